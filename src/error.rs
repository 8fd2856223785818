use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("tensor error while {context}: {source}")]
    Tensor {
        context: &'static str,
        #[source]
        source: candle_core::Error,
    },
    #[error("WAV error while {context}: {source}")]
    Wav {
        context: &'static str,
        #[source]
        source: hound::Error,
    },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("no generator checkpoint could be resolved from '{}'", path.display())]
    CheckpointNotFound { path: PathBuf },
    #[error("partition file '{}' is unusable: {message}", path.display())]
    Partition { path: PathBuf, message: String },
    #[error("original audio for stem '{stem}' is missing at '{}'", path.display())]
    MissingOriginal { stem: String, path: PathBuf },
    #[error("evaluation cancelled")]
    Cancelled,
}

impl EvaluationError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn tensor(context: &'static str, source: candle_core::Error) -> Self {
        Self::Tensor { context, source }
    }

    pub(crate) fn wav(context: &'static str, source: hound::Error) -> Self {
        Self::Wav { context, source }
    }

    pub fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn partition(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Partition {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Errors that end the current speaker's evaluation but leave the rest of
    /// the dataset running.
    pub fn is_speaker_fatal(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Partition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_and_partition_errors_escape_the_speaker_scope() {
        assert!(!EvaluationError::Cancelled.is_speaker_fatal());
        assert!(!EvaluationError::partition("/tmp/p.json", "bad").is_speaker_fatal());
        assert!(EvaluationError::CheckpointNotFound {
            path: PathBuf::from("/nope")
        }
        .is_speaker_fatal());
    }

    #[test]
    fn runtime_error_message_includes_context() {
        let err = EvaluationError::runtime("generate", "out of memory");
        assert_eq!(err.to_string(), "generate: out of memory");
    }
}
