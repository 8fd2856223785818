use std::path::Path;

use crate::artifacts::{self, Artifact, ArtifactLayout};
use crate::error::EvaluationError;
use crate::interpolate::FeatureInterpolation;
use crate::pipeline::traits::FeatureExtractor;
use crate::types::{Condition, FeatureSet, Waveform};

/// Everything stored per stem from re-analysis, phonemes included since
/// they are aligned to the extracted frames.
const PREDICTED: [Artifact; 6] = [
    Artifact::Pitch,
    Artifact::Periodicity,
    Artifact::Loudness,
    Artifact::Voicing,
    Artifact::Ppg,
    Artifact::Phonemes,
];

/// Runs the feature extractors over audio and stores the predictions.
pub struct ProsodyExtraction<'a> {
    extractor: &'a dyn FeatureExtractor,
    interpolation: FeatureInterpolation,
    voicing_threshold: f32,
    loudness_bands: usize,
}

impl<'a> ProsodyExtraction<'a> {
    pub fn new(
        extractor: &'a dyn FeatureExtractor,
        interpolation: FeatureInterpolation,
        voicing_threshold: f32,
        loudness_bands: usize,
    ) -> Self {
        Self {
            extractor,
            interpolation,
            voicing_threshold,
            loudness_bands,
        }
    }

    /// Pitch, periodicity, loudness, voicing and posteriorgram, reconciled to
    /// the pitch frame count. Phonemes come from alignment later.
    pub fn extract(&self, audio: &Waveform) -> Result<FeatureSet, EvaluationError> {
        let track = self.extractor.pitch_and_periodicity(audio)?;
        if track.pitch.is_empty() {
            return Err(EvaluationError::invalid_input("extractor returned no pitch frames"));
        }
        let voicing = track
            .periodicity
            .iter()
            .map(|&p| if p >= self.voicing_threshold { 1.0 } else { 0.0 })
            .collect();
        let mut features = FeatureSet {
            pitch: track.pitch,
            periodicity: track.periodicity,
            loudness: self.extractor.loudness(audio, self.loudness_bands)?,
            voicing,
            phonemes: Vec::new(),
            ppg: self.extractor.phonetic_posteriorgram(audio)?,
            text: String::new(),
        };
        self.interpolation.reconcile(&mut features);
        Ok(features)
    }

    /// Extract from the audio of `(stem, condition)` and persist the
    /// predictions. Returns the predicted frame count.
    ///
    /// Predictions from an earlier run are removed first, so a failed
    /// extraction leaves nothing behind to be scored.
    pub fn extract_to(
        &self,
        layout: &ArtifactLayout,
        stem: &str,
        condition: &Condition,
    ) -> Result<usize, EvaluationError> {
        let tag = condition.tag();
        let path = |artifact| layout.predicted(stem, &tag, artifact);
        for artifact in PREDICTED {
            remove_stale(&path(artifact));
        }
        let audio = artifacts::read_wav(&layout.generated_audio(stem, condition))?;
        let features = self.extract(&audio)?;
        artifacts::save_contour(&path(Artifact::Pitch), &features.pitch)?;
        artifacts::save_contour(&path(Artifact::Periodicity), &features.periodicity)?;
        artifacts::save_contour(&path(Artifact::Loudness), &features.loudness)?;
        artifacts::save_contour(&path(Artifact::Voicing), &features.voicing)?;
        if !features.ppg.is_empty() {
            artifacts::save_frames(&path(Artifact::Ppg), &features.ppg)?;
        }
        tracing::debug!(stem, condition = %condition, frames = features.frames(), "extracted prosody");
        Ok(features.frames())
    }
}

fn remove_stale(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale prediction"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "could not remove stale prediction"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolate::PpgInterpolation;
    use crate::pipeline::traits::PitchTrack;

    struct Fixed;

    impl FeatureExtractor for Fixed {
        fn pitch_and_periodicity(&self, _audio: &Waveform) -> Result<PitchTrack, EvaluationError> {
            Ok(PitchTrack {
                pitch: vec![120.0, 130.0, 140.0, 150.0],
                periodicity: vec![0.9, 0.05, 0.5, 0.1625],
            })
        }

        fn loudness(&self, _audio: &Waveform, bands: usize) -> Result<Vec<f32>, EvaluationError> {
            assert_eq!(bands, 1);
            Ok(vec![-20.0; 5])
        }

        fn phonetic_posteriorgram(&self, _audio: &Waveform) -> Result<Vec<Vec<f32>>, EvaluationError> {
            Ok(vec![vec![1.0, 0.0]; 4])
        }
    }

    fn extraction(extractor: &dyn FeatureExtractor) -> ProsodyExtraction<'_> {
        ProsodyExtraction::new(
            extractor,
            FeatureInterpolation::new(PpgInterpolation::Slerp),
            0.1625,
            1,
        )
    }

    #[test]
    fn voicing_thresholds_periodicity_and_lengths_are_reconciled() {
        let audio = Waveform {
            sample_rate_hz: 100,
            samples: vec![0.0; 4],
        };
        let features = extraction(&Fixed).extract(&audio).expect("extract");
        assert_eq!(features.voicing, vec![1.0, 0.0, 1.0, 1.0]);
        assert_eq!(features.loudness.len(), 4);
        assert!(features.is_reconciled());
    }

    #[test]
    fn extract_to_persists_predictions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = crate::config::EvaluationConfig {
            eval_dir: dir.path().to_path_buf(),
            ..crate::config::EvaluationConfig::default()
        };
        let layout = ArtifactLayout::new(&config, "vctk", "00");
        let condition = Condition::Reconstructed;
        artifacts::write_wav(
            &layout.generated_audio("s1", &condition),
            &Waveform {
                sample_rate_hz: 100,
                samples: vec![0.0; 8],
            },
        )
        .expect("write audio");

        let frames = extraction(&Fixed)
            .extract_to(&layout, "s1", &condition)
            .expect("extract");
        assert_eq!(frames, 4);
        let voicing =
            artifacts::load_contour(&layout.predicted("s1", "reconstructed-100", Artifact::Voicing))
                .expect("voicing");
        assert_eq!(voicing, vec![1.0, 0.0, 1.0, 1.0]);
        assert!(layout
            .predicted("s1", "reconstructed-100", Artifact::Ppg)
            .exists());
    }

    struct Broken;

    impl FeatureExtractor for Broken {
        fn pitch_and_periodicity(&self, _audio: &Waveform) -> Result<PitchTrack, EvaluationError> {
            Err(EvaluationError::runtime("pitch", "model unavailable"))
        }

        fn loudness(&self, _audio: &Waveform, _bands: usize) -> Result<Vec<f32>, EvaluationError> {
            Ok(Vec::new())
        }

        fn phonetic_posteriorgram(&self, _audio: &Waveform) -> Result<Vec<Vec<f32>>, EvaluationError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn failed_extraction_leaves_no_earlier_predictions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = crate::config::EvaluationConfig {
            eval_dir: dir.path().to_path_buf(),
            ..crate::config::EvaluationConfig::default()
        };
        let layout = ArtifactLayout::new(&config, "vctk", "00");
        let condition = Condition::Reconstructed;
        artifacts::write_wav(
            &layout.generated_audio("s1", &condition),
            &Waveform {
                sample_rate_hz: 100,
                samples: vec![0.0; 8],
            },
        )
        .expect("write audio");
        extraction(&Fixed)
            .extract_to(&layout, "s1", &condition)
            .expect("first extraction");
        let pitch = layout.predicted("s1", "reconstructed-100", Artifact::Pitch);
        assert!(pitch.exists());

        assert!(extraction(&Broken)
            .extract_to(&layout, "s1", &condition)
            .is_err());
        assert!(!pitch.exists());
        assert!(!layout
            .predicted("s1", "reconstructed-100", Artifact::Ppg)
            .exists());
    }
}
