use crate::alignment::{Alignment, SILENCE};
use crate::pipeline::traits::AlignmentStretcher;

/// Unvoiced consonants keep their duration under time-stretching.
const UNVOICED: [&str; 9] = ["p", "t", "k", "f", "th", "s", "sh", "ch", "hh"];

/// Silence labels emitted by common aligners.
const SILENT: [&str; 4] = [SILENCE, "sil", "sp", "pau"];

/// Stretches voiced phonemes only. Silence, unvoiced phonemes and gaps
/// between phonemes keep their original length.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoicedStretcher;

impl VoicedStretcher {
    pub fn is_voiced(label: &str) -> bool {
        let label = label
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .to_ascii_lowercase();
        !label.is_empty() && !SILENT.contains(&label.as_str()) && !UNVOICED.contains(&label.as_str())
    }
}

impl AlignmentStretcher for VoicedStretcher {
    fn stretch(&self, alignment: &Alignment, ratio: f64) -> Alignment {
        let mut stretched = alignment.clone();
        let mut cursor = alignment.start();
        let mut previous_end = alignment.start();
        for word in &mut stretched.words {
            for phoneme in &mut word.phonemes {
                let gap = (phoneme.start - previous_end).max(0.0);
                previous_end = phoneme.end;
                let duration = if Self::is_voiced(&phoneme.phoneme) {
                    phoneme.duration() / ratio
                } else {
                    phoneme.duration()
                };
                phoneme.start = cursor + gap;
                phoneme.end = phoneme.start + duration;
                cursor = phoneme.end;
            }
        }
        stretched.refresh_word_bounds();
        stretched
    }
}
