//! Primary-then-fallback alignment of regenerated audio.
//!
//! Every file starts `Pending`. The primary aligner runs over the whole
//! batch; files it could not align are queued for the fallback aligner,
//! which sees nothing else. Recovered alignments are converted to frame-rate
//! phoneme indices next to the other predicted features.

use std::fs;
use std::path::PathBuf;

use crate::alignment::indices::alignment_to_indices;
use crate::alignment::{
    Alignment, AlignmentFailure, AlignmentOutcome, AlignmentRequest, PhonemeVocabulary,
};
use crate::artifacts;
use crate::pipeline::traits::BatchAligner;

/// One file to align and where its phoneme indices go.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryTarget {
    pub request: AlignmentRequest,
    pub phonemes: PathBuf,
    /// Frame count of the predicted pitch contour.
    pub frames: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignerSource {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentState {
    Pending,
    Aligned(AlignerSource),
    RetryQueued {
        primary: AlignmentFailure,
    },
    /// Terminal. `fallback` is `None` when the fallback never ran, which
    /// happens only when a recovered alignment could not be converted.
    Failed {
        primary: AlignmentFailure,
        fallback: Option<AlignmentFailure>,
    },
}

impl AlignmentState {
    pub fn is_aligned(&self) -> bool {
        matches!(self, Self::Aligned(_))
    }

    /// Human-readable reason for a terminal failure.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Failed {
                primary,
                fallback: Some(fallback),
            } => Some(format!("primary: {primary}; fallback: {fallback}")),
            Self::Failed {
                primary,
                fallback: None,
            } => Some(primary.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// Final state of each target, in target order.
    pub states: Vec<(String, AlignmentState)>,
    /// Stems handed to the fallback aligner, in order.
    pub fallback_stems: Vec<String>,
}

impl RecoveryReport {
    pub fn count(&self, source: AlignerSource) -> usize {
        self.states
            .iter()
            .filter(|(_, state)| *state == AlignmentState::Aligned(source))
            .count()
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, state)| state.is_aligned())
            .map(|(stem, _)| stem.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<(&str, &AlignmentState)> {
        self.states
            .iter()
            .filter(|(_, state)| matches!(state, AlignmentState::Failed { .. }))
            .map(|(stem, state)| (stem.as_str(), state))
            .collect()
    }
}

pub struct AlignmentRecovery<'a> {
    primary: &'a dyn BatchAligner,
    fallback: &'a dyn BatchAligner,
    vocab: &'a PhonemeVocabulary,
    hop_seconds: f64,
}

impl<'a> AlignmentRecovery<'a> {
    pub fn new(
        primary: &'a dyn BatchAligner,
        fallback: &'a dyn BatchAligner,
        vocab: &'a PhonemeVocabulary,
        hop_seconds: f64,
    ) -> Self {
        Self {
            primary,
            fallback,
            vocab,
            hop_seconds,
        }
    }

    pub fn run(&self, targets: &[RecoveryTarget]) -> RecoveryReport {
        let mut states = vec![AlignmentState::Pending; targets.len()];
        let mut alignments: Vec<Option<Alignment>> = vec![None; targets.len()];

        // Stale artifacts from an earlier run would read as success.
        for target in targets {
            remove_stale(&target.request);
        }

        let requests: Vec<AlignmentRequest> =
            targets.iter().map(|t| t.request.clone()).collect();
        let outcomes = run_aligner(self.primary, &requests);
        let mut retry = Vec::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(alignment) => {
                    states[i] = AlignmentState::Aligned(AlignerSource::Primary);
                    alignments[i] = Some(alignment);
                }
                Err(primary) => {
                    tracing::warn!(
                        stem = %targets[i].request.stem,
                        aligner = self.primary.name(),
                        reason = %primary,
                        "primary alignment failed; queued for fallback"
                    );
                    states[i] = AlignmentState::RetryQueued { primary };
                    retry.push(i);
                }
            }
        }

        let fallback_stems: Vec<String> = retry
            .iter()
            .map(|&i| targets[i].request.stem.clone())
            .collect();
        if !retry.is_empty() {
            let requests: Vec<AlignmentRequest> = retry
                .iter()
                .map(|&i| {
                    remove_stale(&targets[i].request);
                    targets[i].request.clone()
                })
                .collect();
            tracing::info!(
                aligner = self.fallback.name(),
                files = requests.len(),
                "retrying failed alignments"
            );
            let outcomes = run_aligner(self.fallback, &requests);
            for (&i, outcome) in retry.iter().zip(outcomes) {
                let primary = match std::mem::replace(&mut states[i], AlignmentState::Pending) {
                    AlignmentState::RetryQueued { primary } => primary,
                    _ => AlignmentFailure::Backend("retry state lost".to_string()),
                };
                states[i] = match outcome {
                    Ok(alignment) => {
                        alignments[i] = Some(alignment);
                        AlignmentState::Aligned(AlignerSource::Fallback)
                    }
                    Err(fallback) => {
                        tracing::warn!(
                            stem = %targets[i].request.stem,
                            aligner = self.fallback.name(),
                            reason = %fallback,
                            "fallback alignment failed"
                        );
                        AlignmentState::Failed {
                            primary,
                            fallback: Some(fallback),
                        }
                    }
                };
            }
        }

        for (i, target) in targets.iter().enumerate() {
            let Some(alignment) = alignments[i].take() else {
                continue;
            };
            if let Err(err) = self.persist(target, &alignment) {
                tracing::warn!(stem = %target.request.stem, error = %err, "alignment conversion failed");
                states[i] = AlignmentState::Failed {
                    primary: err,
                    fallback: None,
                };
            }
        }

        RecoveryReport {
            states: targets
                .iter()
                .map(|t| t.request.stem.clone())
                .zip(states)
                .collect(),
            fallback_stems,
        }
    }

    fn persist(
        &self,
        target: &RecoveryTarget,
        alignment: &Alignment,
    ) -> Result<(), AlignmentFailure> {
        let conversion = |err: crate::error::EvaluationError| {
            AlignmentFailure::Conversion(err.to_string())
        };
        alignment.save(&target.request.output).map_err(conversion)?;
        let indices = alignment_to_indices(alignment, self.vocab, target.frames, self.hop_seconds);
        artifacts::save_indices(&target.phonemes, &indices).map_err(conversion)
    }
}

/// Pads or truncates the aligner's answer so every request has an outcome.
fn run_aligner(aligner: &dyn BatchAligner, requests: &[AlignmentRequest]) -> Vec<AlignmentOutcome> {
    let mut outcomes = aligner.align_batch(requests);
    if outcomes.len() != requests.len() {
        tracing::warn!(
            aligner = aligner.name(),
            expected = requests.len(),
            returned = outcomes.len(),
            "aligner returned a mismatched number of results"
        );
    }
    outcomes.truncate(requests.len());
    while outcomes.len() < requests.len() {
        outcomes.push(Err(AlignmentFailure::Backend(format!(
            "{} returned no result",
            aligner.name()
        ))));
    }
    outcomes
}

fn remove_stale(request: &AlignmentRequest) {
    match fs::remove_file(&request.output) {
        Ok(()) => tracing::debug!(path = %request.output.display(), "removed stale alignment"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(
            path = %request.output.display(),
            error = %err,
            "could not remove stale alignment"
        ),
    }
}
