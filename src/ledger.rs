use serde::{Deserialize, Serialize};

/// Pipeline stage a failure was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Speaker,
    Copy,
    Derive,
    Synthesize,
    Extract,
    Align,
    Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub stem: String,
    /// Condition key, or empty when the failure is not tied to one.
    pub condition: String,
    pub stage: Stage,
    pub reason: String,
}

/// Structured record of everything that was skipped or lost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureLedger {
    entries: Vec<FailureEntry>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        stem: impl Into<String>,
        condition: impl Into<String>,
        stage: Stage,
        reason: impl Into<String>,
    ) {
        let entry = FailureEntry {
            stem: stem.into(),
            condition: condition.into(),
            stage,
            reason: reason.into(),
        };
        tracing::warn!(
            stem = %entry.stem,
            condition = %entry.condition,
            stage = ?entry.stage,
            reason = %entry.reason,
            "recorded failure"
        );
        self.entries.push(entry);
    }

    pub fn extend(&mut self, other: &FailureLedger) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn entries(&self) -> &[FailureEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `(stem, condition)` failed at `stage`.
    pub fn contains(&self, stem: &str, condition: &str, stage: Stage) -> bool {
        self.entries
            .iter()
            .any(|e| e.stem == stem && e.condition == condition && e.stage == stage)
    }
}
