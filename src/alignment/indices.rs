use crate::alignment::{Alignment, PhonemeVocabulary};

/// Phoneme index for each frame, sampled at `frame * hop_seconds`.
///
/// Frames before the first phoneme take the first phoneme; frames after the
/// last take the last. An empty alignment yields silence throughout.
pub fn alignment_to_indices(
    alignment: &Alignment,
    vocab: &PhonemeVocabulary,
    frames: usize,
    hop_seconds: f64,
) -> Vec<i64> {
    let phonemes: Vec<_> = alignment.phonemes().collect();
    if phonemes.is_empty() {
        return vec![vocab.silence() as i64; frames];
    }
    let ids: Vec<i64> = phonemes
        .iter()
        .map(|p| vocab.index_of(&p.phoneme) as i64)
        .collect();

    // Frame times only increase, so walk the phonemes once.
    let mut cursor = 0usize;
    (0..frames)
        .map(|frame| {
            let time = frame as f64 * hop_seconds;
            while cursor + 1 < phonemes.len() && phonemes[cursor + 1].start <= time {
                cursor += 1;
            }
            ids[cursor]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{alignment_from_phonemes, SILENCE};

    #[test]
    fn indices_follow_enclosing_interval() {
        let vocab = PhonemeVocabulary::default();
        let alignment = alignment_from_phonemes(&[
            (SILENCE, 0.0, 0.015),
            ("AA1", 0.015, 0.045),
            ("s", 0.045, 0.06),
        ]);
        let indices = alignment_to_indices(&alignment, &vocab, 8, 0.01);
        let silent = vocab.silence() as i64;
        let aa = vocab.index_of("aa") as i64;
        let s = vocab.index_of("s") as i64;
        assert_eq!(indices, vec![silent, silent, aa, aa, aa, s, s, s]);
    }

    #[test]
    fn agrees_with_phoneme_lookup() {
        let vocab = PhonemeVocabulary::default();
        let alignment = alignment_from_phonemes(&[
            ("b", 0.0, 0.013),
            ("iy", 0.013, 0.071),
            ("t", 0.071, 0.1),
        ]);
        let hop = 256.0 / 22_050.0;
        let indices = alignment_to_indices(&alignment, &vocab, 12, hop);
        for (frame, index) in indices.iter().enumerate() {
            let expected = alignment
                .phoneme_at(frame as f64 * hop)
                .map(|p| vocab.index_of(&p.phoneme) as i64);
            assert_eq!(Some(*index), expected);
        }
    }

    #[test]
    fn empty_alignment_is_silence() {
        let vocab = PhonemeVocabulary::default();
        let indices = alignment_to_indices(&Alignment::default(), &vocab, 3, 0.01);
        assert_eq!(indices, vec![vocab.silence() as i64; 3]);
    }
}
