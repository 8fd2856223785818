//! Derivation of edited target features from the original recording.

mod stretch;

pub use stretch::VoicedStretcher;

use crate::alignment::Alignment;
use crate::artifacts::{self, Artifact, ArtifactLayout};
use crate::config::EvaluationConfig;
use crate::error::EvaluationError;
use crate::interpolate::{grid, FeatureInterpolation};
use crate::pipeline::traits::AlignmentStretcher;
use crate::types::{Condition, EditKind, FeatureSet};

/// Time-stretched features with the grid and alignment that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Stretched {
    pub features: FeatureSet,
    pub grid: Vec<f64>,
    pub alignment: Alignment,
}

pub struct ConditionGenerator<'a> {
    stretcher: &'a dyn AlignmentStretcher,
    interpolation: FeatureInterpolation,
    fmin: f32,
    fmax: f32,
    hop_seconds: f64,
}

impl<'a> ConditionGenerator<'a> {
    pub fn new(config: &EvaluationConfig, stretcher: &'a dyn AlignmentStretcher) -> Self {
        Self {
            stretcher,
            interpolation: FeatureInterpolation::new(config.ppg_interpolation),
            fmin: config.fmin,
            fmax: config.fmax,
            hop_seconds: config.hop_seconds(),
        }
    }

    /// Multiply pitch by `ratio`, clipped to the configured pitch range.
    pub fn shift_pitch(&self, features: &FeatureSet, ratio: f64) -> FeatureSet {
        let ratio = ratio as f32;
        FeatureSet {
            pitch: features
                .pitch
                .iter()
                .map(|&hz| (hz * ratio).clamp(self.fmin, self.fmax))
                .collect(),
            ..features.clone()
        }
    }

    /// Add `10 * log2(ratio)` dB to loudness.
    pub fn scale_loudness(&self, features: &FeatureSet, ratio: f64) -> FeatureSet {
        let offset = (10.0 * ratio.log2()) as f32;
        FeatureSet {
            loudness: features.loudness.iter().map(|&db| db + offset).collect(),
            ..features.clone()
        }
    }

    pub fn stretch(
        &self,
        features: &FeatureSet,
        alignment: &Alignment,
        ratio: f64,
    ) -> Result<Stretched, EvaluationError> {
        let mut reconciled = features.clone();
        self.interpolation.reconcile(&mut reconciled);

        let stretched = self.stretcher.stretch(alignment, ratio);
        let grid = grid::from_alignments(
            alignment,
            &stretched,
            reconciled.frames(),
            self.hop_seconds,
        )?;
        Ok(Stretched {
            features: self.interpolation.resample(&reconciled, &grid),
            grid,
            alignment: stretched,
        })
    }

    /// Derive and persist the targets of one edited condition for `stem`.
    pub fn derive(
        &self,
        layout: &ArtifactLayout,
        stem: &str,
        kind: EditKind,
        ratio: f64,
    ) -> Result<(), EvaluationError> {
        let source_tag = Condition::Original.tag();
        let tag = Condition::Edited { kind, ratio }.tag();
        let original = layout.load_targets(stem, &source_tag)?;

        let derived = match kind {
            EditKind::Shift => self.shift_pitch(&original, ratio),
            EditKind::Scale => self.scale_loudness(&original, ratio),
            EditKind::Stretch => {
                let alignment =
                    Alignment::load(&layout.target(stem, &source_tag, Artifact::Alignment))?;
                let stretched = self.stretch(&original, &alignment, ratio)?;
                artifacts::save_grid(&layout.target(stem, &tag, Artifact::Grid), &stretched.grid)?;
                stretched
                    .alignment
                    .save(&layout.target(stem, &tag, Artifact::Alignment))?;
                stretched.features
            }
        };
        tracing::debug!(stem, condition = %tag, frames = derived.frames(), "derived targets");
        layout.save_targets(stem, &tag, &derived)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::alignment::{alignment_from_phonemes, SILENCE};

    fn config() -> EvaluationConfig {
        EvaluationConfig {
            sample_rate_hz: 100,
            hopsize: 1,
            ..EvaluationConfig::default()
        }
    }

    fn reference_alignment() -> Alignment {
        alignment_from_phonemes(&[
            (SILENCE, 0.0, 0.2),
            ("aa", 0.2, 0.8),
            ("s", 0.8, 1.0),
            ("iy", 1.0, 1.6),
            (SILENCE, 1.6, 2.0),
        ])
    }

    fn sine_features(frames: usize) -> FeatureSet {
        let wave = |i: usize| (2.0 * std::f32::consts::PI * i as f32 / 100.0).sin();
        FeatureSet {
            pitch: (0..frames).map(|i| 200.0 + 20.0 * wave(i)).collect(),
            periodicity: vec![0.8; frames],
            loudness: (0..frames).map(wave).collect(),
            voicing: vec![1.0; frames],
            phonemes: vec![1; frames],
            ppg: Vec::new(),
            text: "ah see".to_string(),
        }
    }

    #[test]
    fn shift_clips_to_pitch_range() {
        let config = config();
        let generator = ConditionGenerator::new(&config, &VoicedStretcher);
        let features = FeatureSet {
            pitch: vec![30.0, 100.0, 400.0],
            ..FeatureSet::default()
        };
        assert_eq!(generator.shift_pitch(&features, 2.0).pitch, vec![60.0, 200.0, 550.0]);
        assert_eq!(generator.shift_pitch(&features, 0.5).pitch, vec![50.0, 50.0, 200.0]);
    }

    #[test]
    fn scale_adds_log_ratio_in_decibels() {
        let config = config();
        let generator = ConditionGenerator::new(&config, &VoicedStretcher);
        let features = FeatureSet {
            loudness: vec![-30.0, -10.0],
            ..FeatureSet::default()
        };
        let louder = generator.scale_loudness(&features, 2.0);
        assert_abs_diff_eq!(louder.loudness[0], -20.0, epsilon = 1e-5);
        let quieter = generator.scale_loudness(&features, 0.5);
        assert_abs_diff_eq!(quieter.loudness[1], -20.0, epsilon = 1e-5);
    }

    #[test]
    fn stretch_round_trip_recovers_original() {
        let config = config();
        let generator = ConditionGenerator::new(&config, &VoicedStretcher);
        let original = sine_features(200);
        let alignment = reference_alignment();

        let faster = generator.stretch(&original, &alignment, 2.0).expect("stretch");
        assert_eq!(faster.grid.len(), 140);
        assert_eq!(faster.features.loudness.len(), 140);
        assert_eq!(faster.features.phonemes.len(), 140);
        assert_eq!(faster.features.text, original.text);

        let restored = generator
            .stretch(&faster.features, &faster.alignment, 0.5)
            .expect("stretch back");
        assert_eq!(restored.features.loudness.len(), 200);
        for (got, want) in restored.features.loudness.iter().zip(&original.loudness) {
            assert_abs_diff_eq!(*got, *want, epsilon = 0.1);
        }
        for (got, want) in restored.features.pitch.iter().zip(&original.pitch) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1.0);
        }
    }

    #[test]
    fn derive_persists_shifted_targets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EvaluationConfig {
            eval_dir: dir.path().to_path_buf(),
            ..config()
        };
        let layout = ArtifactLayout::new(&config, "vctk", "00");
        let original = sine_features(200);
        layout
            .save_targets("s1", &Condition::Original.tag(), &original)
            .expect("save original");
        reference_alignment()
            .save(&layout.target("s1", "original-100", Artifact::Alignment))
            .expect("save alignment");

        let generator = ConditionGenerator::new(&config, &VoicedStretcher);
        generator.derive(&layout, "s1", EditKind::Shift, 2.0).expect("shift");
        generator.derive(&layout, "s1", EditKind::Stretch, 0.5).expect("stretch");

        let shifted = layout.load_targets("s1", "shifted-200").expect("load shifted");
        assert_abs_diff_eq!(shifted.pitch[0], 400.0, epsilon = 1e-3);
        assert_eq!(shifted.loudness, original.loudness);

        let grid = artifacts::load_grid(&layout.target("s1", "stretched-050", Artifact::Grid))
            .expect("grid");
        let stretched = layout.load_targets("s1", "stretched-050").expect("load stretched");
        assert_eq!(grid.len(), stretched.frames());
        assert_eq!(grid.len(), 320);
        assert!(layout
            .target("s1", "stretched-050", Artifact::Alignment)
            .exists());
    }
}
