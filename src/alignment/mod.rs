pub mod indices;
pub mod recovery;
mod vocabulary;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;

pub use vocabulary::PhonemeVocabulary;

/// Label used for silent spans in word and phoneme tiers.
pub const SILENCE: &str = "<silent>";

/// Times are seconds; intervals are `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phoneme {
    pub phoneme: String,
    pub start: f64,
    pub end: f64,
}

impl Phoneme {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub phonemes: Vec<Phoneme>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Alignment {
    pub words: Vec<Word>,
}

impl Alignment {
    pub fn phonemes(&self) -> impl Iterator<Item = &Phoneme> {
        self.words.iter().flat_map(|word| word.phonemes.iter())
    }

    pub fn phoneme_count(&self) -> usize {
        self.words.iter().map(|word| word.phonemes.len()).sum()
    }

    pub fn start(&self) -> f64 {
        self.phonemes().next().map_or(0.0, |p| p.start)
    }

    pub fn end(&self) -> f64 {
        self.phonemes().last().map_or(0.0, |p| p.end)
    }

    pub fn duration(&self) -> f64 {
        self.end() - self.start()
    }

    /// Phoneme start times followed by the final end time.
    pub fn boundaries(&self) -> Vec<f64> {
        let mut boundaries: Vec<f64> = self.phonemes().map(|p| p.start).collect();
        if let Some(last) = self.phonemes().last() {
            boundaries.push(last.end);
        }
        boundaries
    }

    /// Phoneme enclosing `time`. Times before the first or after the last
    /// phoneme resolve to that first or last phoneme.
    pub fn phoneme_at(&self, time: f64) -> Option<&Phoneme> {
        let phonemes: Vec<&Phoneme> = self.phonemes().collect();
        if phonemes.is_empty() {
            return None;
        }
        let after = phonemes.partition_point(|p| p.start <= time);
        Some(phonemes[after.saturating_sub(1)])
    }

    /// Structural checks applied before an aligner's output is trusted.
    pub fn validate(&self) -> Result<(), String> {
        if self.phoneme_count() == 0 {
            return Err("alignment contains no phonemes".to_string());
        }
        let mut previous_end = 0.0f64;
        for (index, phoneme) in self.phonemes().enumerate() {
            if !phoneme.start.is_finite() || !phoneme.end.is_finite() {
                return Err(format!("phoneme {index} has non-finite bounds"));
            }
            if phoneme.start < 0.0 || phoneme.end < phoneme.start {
                return Err(format!(
                    "phoneme {index} '{}' has invalid interval [{}, {}]",
                    phoneme.phoneme, phoneme.start, phoneme.end
                ));
            }
            // Small tolerance for aligners that round boundaries independently.
            if phoneme.start + 1e-6 < previous_end {
                return Err(format!(
                    "phoneme {index} starts at {} before previous end {previous_end}",
                    phoneme.start
                ));
            }
            previous_end = phoneme.end;
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, EvaluationError> {
        let data =
            fs::read_to_string(path).map_err(|e| EvaluationError::io("read alignment", e))?;
        serde_json::from_str(&data).map_err(|e| EvaluationError::json("parse alignment", e))
    }

    pub fn save(&self, path: &Path) -> Result<(), EvaluationError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| EvaluationError::io("create alignment directory", e))?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| EvaluationError::json("serialize alignment", e))?;
        fs::write(path, data).map_err(|e| EvaluationError::io("write alignment", e))
    }

    /// Rebuild word bounds from their phonemes after the phonemes moved.
    pub(crate) fn refresh_word_bounds(&mut self) {
        for word in &mut self.words {
            if let (Some(first), Some(last)) = (word.phonemes.first(), word.phonemes.last()) {
                word.start = first.start;
                word.end = last.end;
            }
        }
    }
}

/// One utterance handed to an aligner.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRequest {
    pub stem: String,
    pub audio: PathBuf,
    pub text: PathBuf,
    /// Where the alignment artifact is expected.
    pub output: PathBuf,
}

/// Why an aligner produced no usable alignment for one file.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlignmentFailure {
    #[error("alignment artifact was not written")]
    MissingArtifact,
    #[error("alignment artifact is malformed: {0}")]
    Malformed(String),
    #[error("aligner failed: {0}")]
    Backend(String),
    #[error("alignment could not be converted to phoneme indices: {0}")]
    Conversion(String),
}

pub type AlignmentOutcome = Result<Alignment, AlignmentFailure>;

/// Read and validate an artifact left behind by an aligner.
pub fn read_artifact(path: &Path) -> AlignmentOutcome {
    if !path.exists() {
        return Err(AlignmentFailure::MissingArtifact);
    }
    let alignment =
        Alignment::load(path).map_err(|err| AlignmentFailure::Malformed(err.to_string()))?;
    alignment.validate().map_err(AlignmentFailure::Malformed)?;
    Ok(alignment)
}

#[cfg(test)]
pub(crate) fn alignment_from_phonemes(phonemes: &[(&str, f64, f64)]) -> Alignment {
    Alignment {
        words: phonemes
            .iter()
            .map(|&(label, start, end)| Word {
                word: label.to_string(),
                start,
                end,
                phonemes: vec![Phoneme {
                    phoneme: label.to_string(),
                    start,
                    end,
                }],
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phoneme_at_resolves_enclosing_interval() {
        let alignment = alignment_from_phonemes(&[
            (SILENCE, 0.0, 0.1),
            ("aa", 0.1, 0.3),
            ("s", 0.3, 0.4),
        ]);
        assert_eq!(alignment.phoneme_at(0.05).unwrap().phoneme, SILENCE);
        assert_eq!(alignment.phoneme_at(0.1).unwrap().phoneme, "aa");
        assert_eq!(alignment.phoneme_at(0.35).unwrap().phoneme, "s");
        assert_eq!(alignment.phoneme_at(9.0).unwrap().phoneme, "s");
        assert_eq!(alignment.boundaries(), vec![0.0, 0.1, 0.3, 0.4]);
    }

    #[test]
    fn validate_rejects_empty_and_overlapping_alignments() {
        assert!(Alignment::default().validate().is_err());
        let overlapping = alignment_from_phonemes(&[("aa", 0.0, 0.3), ("b", 0.2, 0.4)]);
        assert!(overlapping.validate().is_err());
        let inverted = alignment_from_phonemes(&[("aa", 0.3, 0.2)]);
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn read_artifact_distinguishes_missing_from_malformed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a-alignment.json");
        assert_eq!(read_artifact(&path), Err(AlignmentFailure::MissingArtifact));

        fs::write(&path, "{ not json").expect("write");
        assert!(matches!(read_artifact(&path), Err(AlignmentFailure::Malformed(_))));

        fs::write(&path, r#"{"words": []}"#).expect("write");
        assert!(matches!(read_artifact(&path), Err(AlignmentFailure::Malformed(_))));

        let good = alignment_from_phonemes(&[("aa", 0.0, 0.2)]);
        good.save(&path).expect("save");
        assert_eq!(read_artifact(&path), Ok(good));
    }
}
