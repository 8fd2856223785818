use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;

/// Shared flag checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), EvaluationError> {
        if self.is_cancelled() {
            Err(EvaluationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Work already completed for one speaker, persisted as `progress.json`.
///
/// Progress belongs to one resolved checkpoint. Audio from any other
/// checkpoint is not reused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressLedger {
    #[serde(default)]
    checkpoint: Option<String>,
    /// Condition key to stems whose audio has been written.
    #[serde(default)]
    synthesized: BTreeMap<String, BTreeSet<String>>,
    /// Condition key to stems whose re-extraction and alignment finished.
    #[serde(default)]
    extracted: BTreeMap<String, BTreeSet<String>>,
}

impl ProgressLedger {
    /// A missing file means nothing has been done yet.
    pub fn load(path: &Path) -> Result<Self, EvaluationError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data =
            std::fs::read_to_string(path).map_err(|e| EvaluationError::io("read progress", e))?;
        serde_json::from_str(&data).map_err(|e| EvaluationError::json("parse progress", e))
    }

    pub fn save(&self, path: &Path) -> Result<(), EvaluationError> {
        crate::report::write_json(path, self)
    }

    /// Tie progress to `checkpoint`, forgetting all recorded work if it was
    /// made with a different one. Returns whether anything was forgotten.
    pub fn bind_checkpoint(&mut self, checkpoint: &Path) -> bool {
        let checkpoint = checkpoint.display().to_string();
        if self.checkpoint.as_deref() == Some(checkpoint.as_str()) {
            return false;
        }
        let discarded = !self.synthesized.is_empty() || !self.extracted.is_empty();
        *self = Self {
            checkpoint: Some(checkpoint),
            ..Self::default()
        };
        discarded
    }

    pub fn checkpoint(&self) -> Option<&str> {
        self.checkpoint.as_deref()
    }

    pub fn is_synthesized(&self, condition: &str, stem: &str) -> bool {
        contains(&self.synthesized, condition, stem)
    }

    /// New audio invalidates any analysis of the old one.
    pub fn mark_synthesized(&mut self, condition: &str, stem: &str) {
        insert(&mut self.synthesized, condition, stem);
        if let Some(stems) = self.extracted.get_mut(condition) {
            stems.remove(stem);
        }
    }

    pub fn is_extracted(&self, condition: &str, stem: &str) -> bool {
        contains(&self.extracted, condition, stem)
    }

    pub fn mark_extracted(&mut self, condition: &str, stem: &str) {
        insert(&mut self.extracted, condition, stem);
    }
}

fn contains(map: &BTreeMap<String, BTreeSet<String>>, condition: &str, stem: &str) -> bool {
    map.get(condition).is_some_and(|stems| stems.contains(stem))
}

fn insert(map: &mut BTreeMap<String, BTreeSet<String>>, condition: &str, stem: &str) {
    map.entry(condition.to_string())
        .or_default()
        .insert(stem.to_string());
}
