pub mod alignment;
pub mod artifacts;
pub mod benchmark;
pub mod config;
pub mod edit;
pub mod error;
pub mod interpolate;
pub mod ledger;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod types;

pub use config::EvaluationConfig;
pub use error::EvaluationError;
pub use pipeline::builder::EvaluatorBuilder;
pub use pipeline::progress::CancellationToken;
pub use pipeline::runtime::Evaluator;
pub use pipeline::traits::{
    AlignmentBackend, AlignmentStretcher, BatchAligner, FeatureExtractor, SpeakerAdapter,
    Synthesizer, SynthesizerLoader,
};
pub use types::{Condition, Device, EditKind, FeatureSet, Waveform};
