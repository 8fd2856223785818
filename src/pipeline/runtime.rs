use std::path::PathBuf;

use crate::alignment::recovery::{AlignerSource, AlignmentRecovery, RecoveryTarget};
use crate::alignment::{AlignmentRequest, PhonemeVocabulary};
use crate::artifacts::{self, Artifact, ArtifactLayout};
use crate::benchmark::Benchmark;
use crate::config::EvaluationConfig;
use crate::edit::ConditionGenerator;
use crate::error::EvaluationError;
use crate::interpolate::FeatureInterpolation;
use crate::ledger::{FailureLedger, Stage};
use crate::metrics::{ConditionMetrics, MetricsDelta, ProsodyFrames, ProsodyMetrics, SkipReason};
use crate::pipeline::context::{resolve_checkpoint, EvaluationContext};
use crate::pipeline::extraction::ProsodyExtraction;
use crate::pipeline::partition::{AdaptationPartition, Partitions};
use crate::pipeline::progress::{CancellationToken, ProgressLedger};
use crate::pipeline::synthesis::{SynthesisInvoker, SynthesisSinks};
use crate::pipeline::traits::{
    AdaptationJob, AlignmentStretcher, BatchAligner, FeatureExtractor, SpeakerAdapter,
    SynthesizerLoader, Synthesizer,
};
use crate::report::{
    self, AlignmentSummary, BenchmarkResults, DatasetObjective, DatasetResults, RawResults,
    SpeakerObjective, SpeakerResults,
};
use crate::types::{Condition, Device};

/// Drives derivation, synthesis, re-analysis and scoring for whole datasets.
pub struct Evaluator {
    config: EvaluationConfig,
    loader: Box<dyn SynthesizerLoader>,
    extractor: Box<dyn FeatureExtractor>,
    primary_aligner: Box<dyn BatchAligner>,
    fallback_aligner: Box<dyn BatchAligner>,
    stretcher: Box<dyn AlignmentStretcher>,
    adapter: Option<Box<dyn SpeakerAdapter>>,
    vocab: PhonemeVocabulary,
    cancel: CancellationToken,
}

pub(crate) struct EvaluatorParts {
    pub config: EvaluationConfig,
    pub loader: Box<dyn SynthesizerLoader>,
    pub extractor: Box<dyn FeatureExtractor>,
    pub primary_aligner: Box<dyn BatchAligner>,
    pub fallback_aligner: Box<dyn BatchAligner>,
    pub stretcher: Box<dyn AlignmentStretcher>,
    pub adapter: Option<Box<dyn SpeakerAdapter>>,
    pub vocab: PhonemeVocabulary,
    pub cancel: CancellationToken,
}

/// Per-speaker state threaded through the stages.
struct SpeakerRun<'r> {
    layout: &'r ArtifactLayout,
    conditions: &'r [Condition],
    stems: &'r [String],
    progress: &'r mut ProgressLedger,
    ledger: FailureLedger,
    incomplete: Vec<String>,
    alignment: AlignmentSummary,
}

impl Evaluator {
    pub(crate) fn from_parts(parts: EvaluatorParts) -> Self {
        Self {
            config: parts.config,
            loader: parts.loader,
            extractor: parts.extractor,
            primary_aligner: parts.primary_aligner,
            fallback_aligner: parts.fallback_aligner,
            stretcher: parts.stretcher,
            adapter: parts.adapter,
            vocab: parts.vocab,
            cancel: parts.cancel,
        }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Token that stops the evaluation between files.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Conditions in processing order.
    pub fn conditions(&self) -> Vec<Condition> {
        Condition::ordered(&self.config.edits, &self.config.ratios)
    }

    pub fn evaluate_datasets(
        &self,
        datasets: &[&str],
    ) -> Result<Vec<DatasetResults>, EvaluationError> {
        datasets
            .iter()
            .map(|dataset| self.evaluate_dataset(dataset))
            .collect()
    }

    /// Evaluate every adaptation partition of `dataset` and write the
    /// dataset-level results.
    ///
    /// A speaker that fails fatally is recorded and skipped. Cancellation and
    /// unusable partition files abort the dataset.
    pub fn evaluate_dataset(&self, dataset: &str) -> Result<DatasetResults, EvaluationError> {
        let partition_path = Partitions::path_for(&self.config.partition_dir, dataset);
        let partitions = Partitions::load(&partition_path)?.adaptation_pairs()?;
        tracing::info!(dataset, speakers = partitions.len(), config = %self.config.name, "evaluating dataset");

        let mut context = EvaluationContext::new(self.loader.as_ref(), Device::from_gpu(self.config.gpu));
        let mut metrics = ConditionMetrics::for_conditions(&self.conditions());
        let mut failures = FailureLedger::new();
        let mut alignment = AlignmentSummary::default();
        let mut speakers = Vec::with_capacity(partitions.len());
        let mut num_samples = 0u64;

        for partition in &partitions {
            match self.evaluate_speaker(&mut context, dataset, partition, &mut metrics) {
                Ok(results) => {
                    num_samples += results.num_samples;
                    alignment.add(results.alignment);
                    failures.extend(&results.failures);
                    speakers.push(partition.index.clone());
                }
                Err(err) if err.is_speaker_fatal() => {
                    tracing::error!(dataset, speaker = %partition.index, error = %err, "speaker evaluation failed");
                    failures.record(partition.test.as_str(), "", Stage::Speaker, err.to_string());
                }
                Err(err) => return Err(err),
            }
        }

        let benchmark = context.benchmark();
        let results = DatasetResults {
            dataset: dataset.to_string(),
            config: self.config.name.clone(),
            objective: DatasetObjective {
                average: metrics.snapshot(),
            },
            num_samples,
            num_frames: num_samples / self.config.hopsize as u64,
            benchmark: BenchmarkResults {
                raw: benchmark.raw_seconds(),
                average: benchmark.per_sample(num_samples),
            },
            speakers,
            alignment,
            failures,
            generated_at: chrono::Utc::now().to_rfc3339(),
        };
        report::write_json(&ArtifactLayout::dataset_results(&self.config, dataset), &results)?;
        tracing::info!(dataset, num_samples, "dataset evaluation finished");
        Ok(results)
    }

    /// Evaluate one held-out speaker and write its `results.json`.
    ///
    /// Progress is saved before returning, including on cancellation, so a
    /// rerun skips completed syntheses and extractions.
    pub fn evaluate_speaker(
        &self,
        context: &mut EvaluationContext<'_>,
        dataset: &str,
        partition: &AdaptationPartition,
        dataset_metrics: &mut ConditionMetrics,
    ) -> Result<SpeakerResults, EvaluationError> {
        let layout = ArtifactLayout::new(&self.config, dataset, &partition.index);
        let mut progress = ProgressLedger::load(&layout.progress())?;
        let result =
            self.run_speaker(context, &layout, dataset, partition, &mut progress, dataset_metrics);
        progress.save(&layout.progress())?;
        result
    }

    fn run_speaker(
        &self,
        context: &mut EvaluationContext<'_>,
        layout: &ArtifactLayout,
        dataset: &str,
        partition: &AdaptationPartition,
        progress: &mut ProgressLedger,
        dataset_metrics: &mut ConditionMetrics,
    ) -> Result<SpeakerResults, EvaluationError> {
        tracing::info!(dataset, speaker = %partition.index, stems = partition.test_stems.len(), "evaluating speaker");
        let conditions = self.conditions();
        let mut run = SpeakerRun {
            layout,
            conditions: &conditions,
            stems: &partition.test_stems,
            progress,
            ledger: FailureLedger::new(),
            incomplete: Vec::new(),
            alignment: AlignmentSummary::default(),
        };

        let checkpoint = self.checkpoint_for(context.benchmark_mut(), dataset, partition)?;
        let checkpoint = resolve_checkpoint(&checkpoint)?;
        if run.progress.bind_checkpoint(&checkpoint) {
            tracing::info!(
                dataset,
                speaker = %partition.index,
                checkpoint = %checkpoint.display(),
                "checkpoint changed; discarding earlier progress"
            );
        }
        self.copy_originals(&mut run)?;

        let (synthesizer, benchmark) = context.synthesizer_and_benchmark(&checkpoint)?;
        self.generate(&mut run, synthesizer, benchmark)?;

        let mut speaker_metrics = ConditionMetrics::for_conditions(&conditions);
        let mut objective = SpeakerObjective::default();
        for condition in &conditions {
            self.cancel.check()?;
            self.analyze(&mut run, condition, benchmark)?;
            let raw = self.score(&mut run, condition, benchmark, &mut speaker_metrics, dataset_metrics);
            objective.raw.insert(condition.key(), raw);
        }
        objective.average = speaker_metrics.snapshot();

        let num_samples = artifacts::count_samples(&layout.subjective_dir())?;
        let results = SpeakerResults {
            dataset: dataset.to_string(),
            index: partition.index.clone(),
            checkpoint: checkpoint.display().to_string(),
            distributions: report::condition_distributions(&objective.raw),
            objective,
            num_samples,
            num_frames: num_samples / self.config.hopsize as u64,
            incomplete_conditions: run.incomplete,
            alignment: run.alignment,
            failures: run.ledger,
        };
        report::write_json(&layout.speaker_results(), &results)?;
        tracing::info!(
            dataset,
            speaker = %partition.index,
            num_samples,
            failures = results.failures.len(),
            "speaker evaluation finished"
        );
        Ok(results)
    }

    fn checkpoint_for(
        &self,
        benchmark: &mut Benchmark,
        dataset: &str,
        partition: &AdaptationPartition,
    ) -> Result<PathBuf, EvaluationError> {
        let adapter = match (&self.adapter, self.config.adapt) {
            (Some(adapter), true) => adapter,
            _ => return Ok(self.config.checkpoint.clone()),
        };
        let job = AdaptationJob {
            dataset: dataset.to_string(),
            train_partition: partition.train.clone(),
            test_partition: partition.test.clone(),
            train_stems: partition.train_stems.clone(),
            checkpoint: self.config.checkpoint.clone(),
            output_dir: self
                .config
                .runs_dir
                .join(&self.config.name)
                .join("adapt")
                .join(dataset)
                .join(&partition.index),
        };
        tracing::info!(dataset, speaker = %partition.index, output = %job.output_dir.display(), "adapting speaker");
        benchmark.time("adapt", || adapter.adapt(&job))
    }

    /// Copy cached audio and features into the original bucket. Missing
    /// audio is fatal; missing features only lose the files that need them.
    fn copy_originals(&self, run: &mut SpeakerRun<'_>) -> Result<(), EvaluationError> {
        let tag = Condition::Original.tag();
        for stem in run.stems {
            let audio = run.layout.cached_audio(stem);
            if !audio.is_file() {
                return Err(EvaluationError::MissingOriginal {
                    stem: stem.clone(),
                    path: audio,
                });
            }
            artifacts::copy_file(&audio, &run.layout.original_audio(stem))?;

            for artifact in Artifact::CACHED {
                let source = run.layout.cached(stem, artifact);
                if source.is_file() {
                    artifacts::copy_file(&source, &run.layout.target(stem, &tag, artifact))?;
                } else if matches!(
                    artifact,
                    Artifact::Pitch | Artifact::Periodicity | Artifact::Loudness
                ) {
                    run.ledger.record(
                        stem.as_str(),
                        "",
                        Stage::Copy,
                        format!("missing cached feature '{}'", source.display()),
                    );
                }
            }
        }
        Ok(())
    }

    /// Reconstruction, then derivation and synthesis of every edited condition.
    fn generate(
        &self,
        run: &mut SpeakerRun<'_>,
        synthesizer: &dyn Synthesizer,
        benchmark: &mut Benchmark,
    ) -> Result<(), EvaluationError> {
        let invoker = SynthesisInvoker::new(
            run.layout,
            FeatureInterpolation::new(self.config.ppg_interpolation),
            self.config.speaker_id,
            &self.cancel,
        )
        .with_batch_size(self.config.synthesis_batch_size)
        .with_deadline(self.config.batch_timeout());
        let generator = ConditionGenerator::new(&self.config, self.stretcher.as_ref());

        for condition in run.conditions.iter().filter(|c| c.is_generated()) {
            let key = condition.key();
            let ready: Vec<String> = match *condition {
                Condition::Edited { kind, ratio } => {
                    let mut ready = Vec::with_capacity(run.stems.len());
                    for stem in run.stems {
                        self.cancel.check()?;
                        let derived =
                            benchmark.time("derive", || generator.derive(run.layout, stem, kind, ratio));
                        match derived {
                            Ok(()) => ready.push(stem.clone()),
                            Err(err) => {
                                run.ledger.record(stem.as_str(), &key, Stage::Derive, err.to_string())
                            }
                        }
                    }
                    ready
                }
                _ => run.stems.to_vec(),
            };

            tracing::info!(condition = %key, stems = ready.len(), "synthesizing");
            let outcome = invoker.synthesize(
                condition,
                &ready,
                synthesizer,
                SynthesisSinks {
                    benchmark: &mut *benchmark,
                    progress: &mut *run.progress,
                    ledger: &mut run.ledger,
                },
            )?;
            if !outcome.resumed.is_empty() {
                tracing::info!(condition = %key, resumed = outcome.resumed.len(), "skipped completed syntheses");
            }
            if outcome.incomplete {
                run.incomplete.push(key);
            }
            run.progress.save(&run.layout.progress())?;
        }
        Ok(())
    }

    /// Re-extract prosody from the condition's audio and recover phoneme
    /// alignments for it. Stems analyzed since their audio was last written
    /// are skipped.
    fn analyze(
        &self,
        run: &mut SpeakerRun<'_>,
        condition: &Condition,
        benchmark: &mut Benchmark,
    ) -> Result<(), EvaluationError> {
        let key = condition.key();
        let tag = condition.tag();
        let target_tag = condition.target_tag();
        let extraction = ProsodyExtraction::new(
            self.extractor.as_ref(),
            FeatureInterpolation::new(self.config.ppg_interpolation),
            self.config.voicing_threshold,
            self.config.loudness_bands,
        );

        let mut targets = Vec::with_capacity(run.stems.len());
        let mut unextracted = Vec::new();
        for stem in run.stems {
            self.cancel.check()?;
            let audio = run.layout.generated_audio(stem, condition);
            if !audio.is_file() || run.progress.is_extracted(&key, stem) {
                continue;
            }
            let frames = match benchmark.time("extract", || extraction.extract_to(run.layout, stem, condition)) {
                Ok(frames) => frames,
                Err(err) => {
                    run.ledger.record(stem.as_str(), &key, Stage::Extract, err.to_string());
                    unextracted.push(stem.as_str());
                    match artifacts::read_wav(&audio) {
                        Ok(waveform) => waveform.frames(self.config.hopsize),
                        Err(_) => continue,
                    }
                }
            };
            targets.push(RecoveryTarget {
                request: AlignmentRequest {
                    stem: stem.clone(),
                    audio,
                    text: run.layout.target(stem, &target_tag, Artifact::Text),
                    output: run.layout.predicted(stem, &tag, Artifact::Alignment),
                },
                phonemes: run.layout.predicted(stem, &tag, Artifact::Phonemes),
                frames,
            });
        }
        if targets.is_empty() {
            return Ok(());
        }

        let recovery = AlignmentRecovery::new(
            self.primary_aligner.as_ref(),
            self.fallback_aligner.as_ref(),
            &self.vocab,
            self.config.hop_seconds(),
        );
        let report = benchmark.time("align", || recovery.run(&targets));
        for (stem, state) in report.failed() {
            let reason = state.failure_reason().unwrap_or_default();
            run.ledger.record(stem, &key, Stage::Align, reason);
        }
        let summary = AlignmentSummary {
            primary: report.count(AlignerSource::Primary),
            fallback: report.count(AlignerSource::Fallback),
            failed: report.failed().len(),
        };
        tracing::info!(
            condition = %key,
            primary = summary.primary,
            fallback = summary.fallback,
            failed = summary.failed,
            "aligned"
        );
        run.alignment.add(summary);

        for stem in report.succeeded() {
            if !unextracted.contains(&stem) {
                run.progress.mark_extracted(&key, stem);
            }
        }
        run.progress.save(&run.layout.progress())
    }

    /// Compare predictions against targets for every stem with audio, fanning
    /// each delta out to the file, speaker and dataset accumulators.
    fn score(
        &self,
        run: &mut SpeakerRun<'_>,
        condition: &Condition,
        benchmark: &mut Benchmark,
        speaker_metrics: &mut ConditionMetrics,
        dataset_metrics: &mut ConditionMetrics,
    ) -> RawResults {
        let key = condition.key();
        let tag = condition.tag();
        let target_tag = condition.target_tag();
        let mut raw = RawResults::new();

        for stem in run.stems {
            if !run.layout.generated_audio(stem, condition).is_file() {
                continue;
            }
            let delta = benchmark.time("metrics", || -> Result<MetricsDelta, SkipReason> {
                let predicted = ProsodyFrames::load(|a| run.layout.predicted(stem, &tag, a))?;
                let target = ProsodyFrames::load(|a| run.layout.target(stem, &target_tag, a))?;
                MetricsDelta::between(&predicted, &target)
            });
            match delta {
                Ok(delta) => {
                    let mut file = ProsodyMetrics::new();
                    file.merge(&delta);
                    speaker_metrics.merge(&key, &delta);
                    dataset_metrics.merge(&key, &delta);
                    raw.push((stem.clone(), file.query()));
                }
                Err(reason) => {
                    run.ledger.record(stem.as_str(), &key, Stage::Metrics, reason.to_string())
                }
            }
        }
        raw
    }
}
