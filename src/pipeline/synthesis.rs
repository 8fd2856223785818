use std::time::{Duration, Instant};

use crate::artifacts::{self, ArtifactLayout};
use crate::benchmark::Benchmark;
use crate::error::EvaluationError;
use crate::interpolate::FeatureInterpolation;
use crate::ledger::{FailureLedger, Stage};
use crate::pipeline::progress::{CancellationToken, ProgressLedger};
use crate::pipeline::traits::{SynthesisRequest, Synthesizer};
use crate::types::{Condition, EditKind, FeatureSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisFailure {
    /// This utterance failed; the rest of the batch is usable.
    #[error("{0}")]
    Item(String),
    /// Nothing from this batch can be trusted.
    #[error("batch failed: {0}")]
    Batch(String),
}

/// What happened to one condition's synthesis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisOutcome {
    pub written: Vec<String>,
    /// Already written by an earlier run.
    pub resumed: Vec<String>,
    pub failed: Vec<String>,
    /// A batch failed or the deadline passed.
    pub incomplete: bool,
}

/// Shared stores the invoker writes into.
pub struct SynthesisSinks<'s> {
    pub benchmark: &'s mut Benchmark,
    pub progress: &'s mut ProgressLedger,
    pub ledger: &'s mut FailureLedger,
}

pub struct SynthesisInvoker<'a> {
    layout: &'a ArtifactLayout,
    interpolation: FeatureInterpolation,
    speaker: usize,
    batch_size: usize,
    deadline: Option<Duration>,
    cancel: &'a CancellationToken,
}

impl<'a> SynthesisInvoker<'a> {
    pub fn new(
        layout: &'a ArtifactLayout,
        interpolation: FeatureInterpolation,
        speaker: usize,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            layout,
            interpolation,
            speaker,
            batch_size: 1,
            deadline: None,
            cancel,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Generate audio for `stems` under `condition`.
    ///
    /// Returns `Err(Cancelled)` when the token fires between batches; stems
    /// written before that are already marked in the progress ledger.
    pub fn synthesize(
        &self,
        condition: &Condition,
        stems: &[String],
        synthesizer: &dyn Synthesizer,
        sinks: SynthesisSinks<'_>,
    ) -> Result<SynthesisOutcome, EvaluationError> {
        let SynthesisSinks {
            benchmark,
            progress,
            ledger,
        } = sinks;
        let key = condition.key();
        let mut outcome = SynthesisOutcome::default();

        let pending: Vec<&String> = stems
            .iter()
            .filter(|stem| {
                let done = progress.is_synthesized(&key, stem)
                    && self.layout.generated_audio(stem, condition).exists();
                if done {
                    outcome.resumed.push((*stem).clone());
                }
                !done
            })
            .collect();

        let started = Instant::now();
        let mut chunks = pending.chunks(self.batch_size);
        while let Some(chunk) = chunks.next() {
            self.cancel.check()?;

            if let Some(deadline) = self.deadline {
                if started.elapsed() > deadline {
                    let remaining = chunk.iter().chain(chunks.by_ref().flatten());
                    for stem in remaining {
                        self.fail(stem, condition, "batch deadline exceeded", ledger, &mut outcome);
                    }
                    outcome.incomplete = true;
                    tracing::warn!(condition = %key, "synthesis deadline exceeded");
                    break;
                }
            }

            let mut loaded: Vec<(&String, FeatureSet)> = Vec::with_capacity(chunk.len());
            for stem in chunk {
                match self.layout.load_targets(stem, &condition.target_tag()) {
                    Ok(mut features) => {
                        self.interpolation.reconcile(&mut features);
                        loaded.push((*stem, features));
                    }
                    Err(err) => self.fail(stem, condition, &err.to_string(), ledger, &mut outcome),
                }
            }
            if loaded.is_empty() {
                continue;
            }

            let requests: Vec<SynthesisRequest<'_>> = loaded
                .iter()
                .map(|(stem, features)| SynthesisRequest {
                    stem,
                    features,
                    speaker: self.speaker,
                    formant_ratio: 1.0,
                    loudness_ratio: loudness_ratio(condition),
                })
                .collect();
            let generated = benchmark.time("synthesize", || synthesizer.generate_batch(&requests));

            let results = match generated {
                Ok(results) => results,
                Err(failure) => {
                    let reason = failure.to_string();
                    for (stem, _) in &loaded {
                        self.fail(stem, condition, &reason, ledger, &mut outcome);
                    }
                    let skipped = format!("not attempted after {reason}");
                    for stem in chunks.by_ref().flatten() {
                        self.fail(stem, condition, &skipped, ledger, &mut outcome);
                    }
                    outcome.incomplete = true;
                    tracing::warn!(condition = %key, error = %failure, "synthesis batch failed; condition incomplete");
                    break;
                }
            };
            if results.len() != loaded.len() {
                tracing::warn!(
                    condition = %key,
                    expected = loaded.len(),
                    returned = results.len(),
                    "synthesizer returned a mismatched number of results"
                );
            }

            let mut results = results.into_iter();
            for (stem, _) in &loaded {
                let result = results.next().unwrap_or_else(|| {
                    Err(SynthesisFailure::Item("synthesizer returned no result".to_string()))
                });
                let written = result
                    .map_err(|failure| failure.to_string())
                    .and_then(|audio| {
                        artifacts::write_wav(&self.layout.generated_audio(stem, condition), &audio)
                            .map_err(|err| err.to_string())
                    });
                match written {
                    Ok(()) => {
                        tracing::debug!(stem = %stem, condition = %key, "synthesized");
                        progress.mark_synthesized(&key, stem);
                        outcome.written.push((*stem).clone());
                    }
                    Err(reason) => self.fail(stem, condition, &reason, ledger, &mut outcome),
                }
            }
        }
        Ok(outcome)
    }

    /// Record a stem that produced no audio this run. Audio left by an
    /// earlier run is removed so it cannot be scored in its place.
    fn fail(
        &self,
        stem: &str,
        condition: &Condition,
        reason: &str,
        ledger: &mut FailureLedger,
        outcome: &mut SynthesisOutcome,
    ) {
        let key = condition.key();
        ledger.record(stem, &key, Stage::Synthesize, reason);
        outcome.failed.push(stem.to_string());
        let stale = self.layout.generated_audio(stem, condition);
        match std::fs::remove_file(&stale) {
            Ok(()) => tracing::debug!(path = %stale.display(), "removed stale audio"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(path = %stale.display(), error = %err, "could not remove stale audio"),
        }
    }
}

/// Loudness edit already applied to the features, for generators that
/// condition on it.
fn loudness_ratio(condition: &Condition) -> f64 {
    match condition {
        Condition::Edited {
            kind: EditKind::Scale,
            ratio,
        } => *ratio,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::EvaluationConfig;
    use crate::interpolate::PpgInterpolation;
    use crate::types::Waveform;

    /// Fails items whose stem starts with `bad`; fails the whole batch when
    /// a stem starts with `crash`.
    struct Scripted {
        calls: Mutex<Vec<String>>,
    }

    impl Synthesizer for Scripted {
        fn generate(&self, request: &SynthesisRequest<'_>) -> Result<Waveform, SynthesisFailure> {
            self.calls.lock().unwrap().push(request.stem.to_string());
            if request.stem.starts_with("crash") {
                return Err(SynthesisFailure::Batch("device lost".to_string()));
            }
            if request.stem.starts_with("bad") {
                return Err(SynthesisFailure::Item("nan output".to_string()));
            }
            Ok(Waveform {
                sample_rate_hz: 100,
                samples: vec![0.1; request.frames()],
            })
        }
    }

    fn setup(stems: &[&str]) -> (tempfile::TempDir, ArtifactLayout) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EvaluationConfig {
            eval_dir: dir.path().to_path_buf(),
            ..EvaluationConfig::default()
        };
        let layout = ArtifactLayout::new(&config, "vctk", "00");
        let features = FeatureSet {
            pitch: vec![100.0; 4],
            periodicity: vec![0.9; 4],
            loudness: vec![-20.0; 3],
            ..FeatureSet::default()
        };
        for stem in stems {
            layout
                .save_targets(stem, "original-100", &features)
                .expect("save targets");
        }
        (dir, layout)
    }

    fn stems(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn item_failures_do_not_stop_the_batch() {
        let (_dir, layout) = setup(&["a", "bad1", "c"]);
        let cancel = CancellationToken::new();
        let invoker = SynthesisInvoker::new(
            &layout,
            FeatureInterpolation::new(PpgInterpolation::Nearest),
            0,
            &cancel,
        )
        .with_batch_size(2);
        let synthesizer = Scripted {
            calls: Mutex::new(Vec::new()),
        };
        let (mut benchmark, mut progress, mut ledger) =
            (Benchmark::new(), ProgressLedger::default(), FailureLedger::new());
        let outcome = invoker
            .synthesize(
                &Condition::Reconstructed,
                &stems(&["a", "bad1", "c", "missing"]),
                &synthesizer,
                SynthesisSinks {
                    benchmark: &mut benchmark,
                    progress: &mut progress,
                    ledger: &mut ledger,
                },
            )
            .expect("synthesize");

        assert_eq!(outcome.written, vec!["a", "c"]);
        assert_eq!(outcome.failed, vec!["bad1", "missing"]);
        assert!(!outcome.incomplete);
        assert!(ledger.contains("bad1", "reconstructed", Stage::Synthesize));
        assert!(progress.is_synthesized("reconstructed", "c"));
        // Loudness was reconciled to the pitch length before generation.
        let audio = artifacts::read_wav(&layout.generated_audio("a", &Condition::Reconstructed))
            .expect("read audio");
        assert_eq!(audio.samples.len(), 4);
    }

    #[test]
    fn batch_failure_marks_condition_incomplete() {
        let (_dir, layout) = setup(&["a", "crash", "c"]);
        let cancel = CancellationToken::new();
        let invoker = SynthesisInvoker::new(
            &layout,
            FeatureInterpolation::new(PpgInterpolation::Nearest),
            0,
            &cancel,
        );
        let synthesizer = Scripted {
            calls: Mutex::new(Vec::new()),
        };
        let (mut benchmark, mut progress, mut ledger) =
            (Benchmark::new(), ProgressLedger::default(), FailureLedger::new());
        let outcome = invoker
            .synthesize(
                &Condition::Reconstructed,
                &stems(&["a", "crash", "c"]),
                &synthesizer,
                SynthesisSinks {
                    benchmark: &mut benchmark,
                    progress: &mut progress,
                    ledger: &mut ledger,
                },
            )
            .expect("synthesize");
        assert!(outcome.incomplete);
        assert_eq!(outcome.written, vec!["a"]);
        assert_eq!(outcome.failed, vec!["crash", "c"]);
        assert_eq!(*synthesizer.calls.lock().unwrap(), vec!["a", "crash"]);
        assert!(ledger.contains("crash", "reconstructed", Stage::Synthesize));
        assert!(ledger.contains("c", "reconstructed", Stage::Synthesize));
        assert!(!progress.is_synthesized("reconstructed", "c"));
    }

    /// Answers only the first request of every batch.
    struct Short;

    impl Synthesizer for Short {
        fn generate(&self, request: &SynthesisRequest<'_>) -> Result<Waveform, SynthesisFailure> {
            Ok(Waveform {
                sample_rate_hz: 100,
                samples: vec![0.1; request.frames()],
            })
        }

        fn generate_batch(
            &self,
            requests: &[SynthesisRequest<'_>],
        ) -> Result<Vec<Result<Waveform, SynthesisFailure>>, SynthesisFailure> {
            Ok(requests.iter().take(1).map(|r| self.generate(r)).collect())
        }
    }

    #[test]
    fn missing_batch_results_fail_their_items() {
        let (_dir, layout) = setup(&["a", "b"]);
        let cancel = CancellationToken::new();
        let invoker = SynthesisInvoker::new(
            &layout,
            FeatureInterpolation::new(PpgInterpolation::Nearest),
            0,
            &cancel,
        )
        .with_batch_size(2);
        let (mut benchmark, mut progress, mut ledger) =
            (Benchmark::new(), ProgressLedger::default(), FailureLedger::new());
        let outcome = invoker
            .synthesize(
                &Condition::Reconstructed,
                &stems(&["a", "b"]),
                &Short,
                SynthesisSinks {
                    benchmark: &mut benchmark,
                    progress: &mut progress,
                    ledger: &mut ledger,
                },
            )
            .expect("synthesize");
        assert_eq!(outcome.written, vec!["a"]);
        assert_eq!(outcome.failed, vec!["b"]);
        assert!(ledger.contains("b", "reconstructed", Stage::Synthesize));
        assert!(!layout.generated_audio("b", &Condition::Reconstructed).exists());
    }

    #[test]
    fn failed_item_removes_audio_from_an_earlier_run() {
        let (_dir, layout) = setup(&["bad1"]);
        let stale = layout.generated_audio("bad1", &Condition::Reconstructed);
        artifacts::write_wav(
            &stale,
            &Waveform {
                sample_rate_hz: 100,
                samples: vec![0.5; 4],
            },
        )
        .expect("write stale audio");
        let cancel = CancellationToken::new();
        let invoker = SynthesisInvoker::new(
            &layout,
            FeatureInterpolation::new(PpgInterpolation::Nearest),
            0,
            &cancel,
        );
        let synthesizer = Scripted {
            calls: Mutex::new(Vec::new()),
        };
        let (mut benchmark, mut progress, mut ledger) =
            (Benchmark::new(), ProgressLedger::default(), FailureLedger::new());
        let outcome = invoker
            .synthesize(
                &Condition::Reconstructed,
                &stems(&["bad1"]),
                &synthesizer,
                SynthesisSinks {
                    benchmark: &mut benchmark,
                    progress: &mut progress,
                    ledger: &mut ledger,
                },
            )
            .expect("synthesize");
        assert_eq!(outcome.failed, vec!["bad1"]);
        assert!(!stale.exists());
    }

    #[test]
    fn elapsed_deadline_fails_remaining_items() {
        let (_dir, layout) = setup(&["a", "b"]);
        let cancel = CancellationToken::new();
        let invoker = SynthesisInvoker::new(
            &layout,
            FeatureInterpolation::new(PpgInterpolation::Nearest),
            0,
            &cancel,
        )
        .with_deadline(Some(Duration::ZERO));
        let synthesizer = Scripted {
            calls: Mutex::new(Vec::new()),
        };
        let (mut benchmark, mut progress, mut ledger) =
            (Benchmark::new(), ProgressLedger::default(), FailureLedger::new());
        let outcome = invoker
            .synthesize(
                &Condition::Reconstructed,
                &stems(&["a", "b"]),
                &synthesizer,
                SynthesisSinks {
                    benchmark: &mut benchmark,
                    progress: &mut progress,
                    ledger: &mut ledger,
                },
            )
            .expect("synthesize");
        assert!(outcome.incomplete);
        assert_eq!(outcome.failed.len() + outcome.written.len(), 2);
        assert_eq!(ledger.len(), outcome.failed.len());
    }

    #[test]
    fn cancelled_token_stops_before_generating() {
        let (_dir, layout) = setup(&["a"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let invoker = SynthesisInvoker::new(
            &layout,
            FeatureInterpolation::new(PpgInterpolation::Nearest),
            0,
            &cancel,
        );
        let synthesizer = Scripted {
            calls: Mutex::new(Vec::new()),
        };
        let (mut benchmark, mut progress, mut ledger) =
            (Benchmark::new(), ProgressLedger::default(), FailureLedger::new());
        let result = invoker.synthesize(
            &Condition::Reconstructed,
            &stems(&["a"]),
            &synthesizer,
            SynthesisSinks {
                benchmark: &mut benchmark,
                progress: &mut progress,
                ledger: &mut ledger,
            },
        );
        assert!(matches!(result, Err(EvaluationError::Cancelled)));
        assert!(synthesizer.calls.lock().unwrap().is_empty());
    }
}
