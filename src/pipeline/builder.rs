use std::path::Path;

use crate::alignment::PhonemeVocabulary;
use crate::config::EvaluationConfig;
use crate::edit::VoicedStretcher;
use crate::error::EvaluationError;
use crate::pipeline::progress::CancellationToken;
use crate::pipeline::runtime::{Evaluator, EvaluatorParts};
use crate::pipeline::traits::{
    AlignmentStretcher, BatchAligner, FeatureExtractor, SpeakerAdapter, SynthesizerLoader,
};

pub struct EvaluatorBuilder {
    config: EvaluationConfig,
    loader: Option<Box<dyn SynthesizerLoader>>,
    extractor: Option<Box<dyn FeatureExtractor>>,
    primary_aligner: Option<Box<dyn BatchAligner>>,
    fallback_aligner: Option<Box<dyn BatchAligner>>,
    stretcher: Option<Box<dyn AlignmentStretcher>>,
    adapter: Option<Box<dyn SpeakerAdapter>>,
    vocab: Option<PhonemeVocabulary>,
    cancel: CancellationToken,
}

impl EvaluatorBuilder {
    pub fn new(config: EvaluationConfig) -> Self {
        Self {
            config,
            loader: None,
            extractor: None,
            primary_aligner: None,
            fallback_aligner: None,
            stretcher: None,
            adapter: None,
            vocab: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_loader(mut self, loader: Box<dyn SynthesizerLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_extractor(mut self, extractor: Box<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_primary_aligner(mut self, aligner: Box<dyn BatchAligner>) -> Self {
        self.primary_aligner = Some(aligner);
        self
    }

    pub fn with_fallback_aligner(mut self, aligner: Box<dyn BatchAligner>) -> Self {
        self.fallback_aligner = Some(aligner);
        self
    }

    pub fn with_stretcher(mut self, stretcher: Box<dyn AlignmentStretcher>) -> Self {
        self.stretcher = Some(stretcher);
        self
    }

    pub fn with_adapter(mut self, adapter: Box<dyn SpeakerAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_vocabulary(mut self, vocab: PhonemeVocabulary) -> Self {
        self.vocab = Some(vocab);
        self
    }

    /// Load the phoneme vocabulary from a JSON map of label to index.
    pub fn with_vocabulary_file(self, path: &Path) -> Result<Self, EvaluationError> {
        let vocab = PhonemeVocabulary::load(path)?;
        Ok(self.with_vocabulary(vocab))
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Result<Evaluator, EvaluationError> {
        self.config.validate()?;
        if self.config.adapt && self.adapter.is_none() {
            return Err(EvaluationError::invalid_input(
                "speaker adaptation is enabled but no adapter was provided",
            ));
        }

        Ok(Evaluator::from_parts(EvaluatorParts {
            loader: required(self.loader, "synthesizer loader")?,
            extractor: required(self.extractor, "feature extractor")?,
            primary_aligner: required(self.primary_aligner, "primary aligner")?,
            fallback_aligner: required(self.fallback_aligner, "fallback aligner")?,
            stretcher: self
                .stretcher
                .unwrap_or_else(|| Box::new(VoicedStretcher)),
            adapter: self.adapter,
            vocab: self.vocab.unwrap_or_default(),
            cancel: self.cancel,
            config: self.config,
        }))
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, EvaluationError> {
    value.ok_or_else(|| EvaluationError::invalid_input(format!("missing {name}")))
}
