use std::collections::HashMap;
use std::path::Path;

use crate::alignment::SILENCE;
use crate::error::EvaluationError;

/// ARPAbet phonemes without stress markers, followed by silence.
const ARPABET: [&str; 40] = [
    "aa", "ae", "ah", "ao", "aw", "ay", "b", "ch", "d", "dh", "eh", "er", "ey", "f", "g", "hh",
    "ih", "iy", "jh", "k", "l", "m", "n", "ng", "ow", "oy", "p", "r", "s", "sh", "t", "th", "uh",
    "uw", "v", "w", "y", "z", "zh", SILENCE,
];

/// Maps phoneme labels to the integer indices stored in `-phonemes.pt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhonemeVocabulary {
    index: HashMap<String, usize>,
    silence: usize,
}

impl PhonemeVocabulary {
    pub fn load(path: &Path) -> Result<Self, EvaluationError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| EvaluationError::io("read phoneme vocabulary", e))?;
        let raw: HashMap<String, usize> = serde_json::from_str(&data)
            .map_err(|e| EvaluationError::json("parse phoneme vocabulary", e))?;
        Self::from_map(raw)
    }

    pub fn from_map(raw: HashMap<String, usize>) -> Result<Self, EvaluationError> {
        let index: HashMap<String, usize> = raw
            .into_iter()
            .map(|(label, id)| (normalize(&label), id))
            .collect();
        let silence = index.get(SILENCE).copied().ok_or_else(|| {
            EvaluationError::invalid_input(format!("phoneme vocabulary has no '{SILENCE}' entry"))
        })?;
        Ok(Self { index, silence })
    }

    /// Index of `label`; unknown labels map to silence.
    pub fn index_of(&self, label: &str) -> usize {
        self.index.get(&normalize(label)).copied().unwrap_or_else(|| {
            tracing::debug!(phoneme = label, "unknown phoneme mapped to silence");
            self.silence
        })
    }

    pub fn silence(&self) -> usize {
        self.silence
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Default for PhonemeVocabulary {
    fn default() -> Self {
        let index: HashMap<String, usize> = ARPABET
            .iter()
            .enumerate()
            .map(|(id, label)| (label.to_string(), id))
            .collect();
        let silence = ARPABET.len() - 1;
        Self { index, silence }
    }
}

/// Lowercase and strip ARPAbet stress digits (`AA1` -> `aa`).
fn normalize(label: &str) -> String {
    let trimmed = label.trim();
    if trimmed.starts_with('<') {
        return trimmed.to_ascii_lowercase();
    }
    trimmed
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vocabulary_strips_stress_and_case() {
        let vocab = PhonemeVocabulary::default();
        assert_eq!(vocab.len(), 40);
        assert_eq!(vocab.index_of("AA1"), vocab.index_of("aa"));
        assert_eq!(vocab.index_of("<SILENT>"), vocab.silence());
        assert_eq!(vocab.index_of("xx"), vocab.silence());
    }

    #[test]
    fn load_requires_silence_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vocab.json");
        std::fs::write(&path, r#"{"aa": 0, "b": 1}"#).expect("write vocab");
        assert!(PhonemeVocabulary::load(&path).is_err());

        std::fs::write(&path, r#"{"aa": 0, "b": 1, "<silent>": 2}"#).expect("write vocab");
        let vocab = PhonemeVocabulary::load(&path).expect("load vocab");
        assert_eq!(vocab.index_of("B"), 1);
        assert_eq!(vocab.silence(), 2);
    }
}
