use std::path::{Path, PathBuf};

use crate::alignment::{Alignment, AlignmentOutcome, AlignmentRequest};
use crate::error::EvaluationError;
use crate::pipeline::synthesis::SynthesisFailure;
use crate::types::{Device, FeatureSet, Waveform};

/// Everything the generator is conditioned on for one utterance.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub stem: &'a str,
    pub features: &'a FeatureSet,
    pub speaker: usize,
    pub formant_ratio: f64,
    pub loudness_ratio: f64,
}

impl SynthesisRequest<'_> {
    /// Output frame count; every feature in the request has this length.
    pub fn frames(&self) -> usize {
        self.features.frames()
    }
}

pub trait Synthesizer: Send + Sync {
    fn generate(&self, request: &SynthesisRequest<'_>) -> Result<Waveform, SynthesisFailure>;

    /// Generate a batch. `Err` means the whole batch failed; per-item
    /// failures are returned inside the vector.
    fn generate_batch(
        &self,
        requests: &[SynthesisRequest<'_>],
    ) -> Result<Vec<Result<Waveform, SynthesisFailure>>, SynthesisFailure> {
        let mut outputs = Vec::with_capacity(requests.len());
        for request in requests {
            match self.generate(request) {
                Err(SynthesisFailure::Batch(message)) => {
                    return Err(SynthesisFailure::Batch(message))
                }
                other => outputs.push(other),
            }
        }
        Ok(outputs)
    }
}

pub trait SynthesizerLoader: Send + Sync {
    fn load(
        &self,
        checkpoint: &Path,
        device: Device,
    ) -> Result<Box<dyn Synthesizer>, EvaluationError>;
}

/// Pitch in Hz and periodicity, one value per frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PitchTrack {
    pub pitch: Vec<f32>,
    pub periodicity: Vec<f32>,
}

pub trait FeatureExtractor: Send + Sync {
    fn pitch_and_periodicity(&self, audio: &Waveform) -> Result<PitchTrack, EvaluationError>;

    /// Loudness in dB, averaged over `bands` frequency bands.
    fn loudness(&self, audio: &Waveform, bands: usize) -> Result<Vec<f32>, EvaluationError>;

    fn phonetic_posteriorgram(&self, audio: &Waveform) -> Result<Vec<Vec<f32>>, EvaluationError>;
}

/// Aligner with a per-file result.
pub trait BatchAligner: Send + Sync {
    fn name(&self) -> &str;

    /// One outcome per request, in request order.
    fn align_batch(&self, requests: &[AlignmentRequest]) -> Vec<AlignmentOutcome>;
}

/// Aligner that only reports success by writing `request.output`.
pub trait AlignmentBackend: Send + Sync {
    fn name(&self) -> &str;

    fn write_alignments(&self, requests: &[AlignmentRequest]) -> Result<(), EvaluationError>;
}

pub trait AlignmentStretcher: Send + Sync {
    /// Alignment of the same phonemes after time-stretching by `ratio`
    /// (`ratio > 1` speeds speech up).
    fn stretch(&self, alignment: &Alignment, ratio: f64) -> Alignment;
}

/// Inputs for adapting the generator to one held-out speaker.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationJob {
    pub dataset: String,
    pub train_partition: String,
    pub test_partition: String,
    pub train_stems: Vec<String>,
    /// Checkpoint adaptation starts from.
    pub checkpoint: PathBuf,
    /// Directory for adapted checkpoints and logs.
    pub output_dir: PathBuf,
}

pub trait SpeakerAdapter: Send + Sync {
    /// Returns the adapted generator checkpoint.
    fn adapt(&self, job: &AdaptationJob) -> Result<PathBuf, EvaluationError>;
}
