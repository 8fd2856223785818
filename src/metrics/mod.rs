//! Streaming prosody-distance metrics.
//!
//! Accumulators keep running sums only, so updates commute and a query can
//! be taken at any point without disturbing later updates.

mod registry;

pub use registry::ConditionMetrics;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::artifacts::{self, Artifact};

/// Voicing values above this count as voiced.
const VOICED: f32 = 0.5;

/// Why a file contributed nothing to the metrics.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkipReason {
    #[error("missing metric input '{}'", .0.display())]
    MissingArtifact(PathBuf),
    #[error("unreadable metric input '{}': {message}", path.display())]
    Corrupt { path: PathBuf, message: String },
    #[error("predicted and target sequences share no frames")]
    Empty,
    #[error("non-finite {0} values")]
    NonFinite(&'static str),
}

/// Per-frame prosody of one utterance, as compared by the metrics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProsodyFrames {
    pub pitch: Vec<f32>,
    pub periodicity: Vec<f32>,
    pub loudness: Vec<f32>,
    pub voicing: Vec<f32>,
    pub phonemes: Vec<i64>,
}

impl ProsodyFrames {
    /// Load every metric input, reporting the first one that is missing or
    /// unreadable.
    pub fn load(path_of: impl Fn(Artifact) -> PathBuf) -> Result<Self, SkipReason> {
        Ok(Self {
            pitch: read(&path_of(Artifact::Pitch), artifacts::load_contour)?,
            periodicity: read(&path_of(Artifact::Periodicity), artifacts::load_contour)?,
            loudness: read(&path_of(Artifact::Loudness), artifacts::load_contour)?,
            voicing: read(&path_of(Artifact::Voicing), artifacts::load_contour)?,
            phonemes: read(&path_of(Artifact::Phonemes), artifacts::load_indices)?,
        })
    }

    fn common_len(&self, other: &Self) -> usize {
        [
            self.pitch.len(),
            self.periodicity.len(),
            self.loudness.len(),
            self.voicing.len(),
            self.phonemes.len(),
            other.pitch.len(),
            other.periodicity.len(),
            other.loudness.len(),
            other.voicing.len(),
            other.phonemes.len(),
        ]
        .into_iter()
        .min()
        .unwrap_or(0)
    }
}

fn read<T>(
    path: &Path,
    load: impl Fn(&Path) -> Result<T, crate::error::EvaluationError>,
) -> Result<T, SkipReason> {
    if !path.exists() {
        return Err(SkipReason::MissingArtifact(path.to_path_buf()));
    }
    load(path).map_err(|err| SkipReason::Corrupt {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Running sums contributed by one `(predicted, target)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricsDelta {
    pub frames: u64,
    /// Frames voiced in both prediction and target.
    pub voiced_frames: u64,
    pub pitch_cents_squared: f64,
    pub pitch_cents_absolute: f64,
    pub periodicity_squared: f64,
    pub loudness_squared: f64,
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub phonemes_correct: u64,
}

impl MetricsDelta {
    /// Compare over the frames both sides share.
    pub fn between(predicted: &ProsodyFrames, target: &ProsodyFrames) -> Result<Self, SkipReason> {
        let n = predicted.common_len(target);
        if n == 0 {
            return Err(SkipReason::Empty);
        }
        for (name, a, b) in [
            ("pitch", &predicted.pitch, &target.pitch),
            ("periodicity", &predicted.periodicity, &target.periodicity),
            ("loudness", &predicted.loudness, &target.loudness),
        ] {
            if a[..n].iter().chain(&b[..n]).any(|v| !v.is_finite()) {
                return Err(SkipReason::NonFinite(name));
            }
        }

        let mut delta = MetricsDelta {
            frames: n as u64,
            ..Self::default()
        };
        for i in 0..n {
            let predicted_voiced = predicted.voicing[i] > VOICED;
            let target_voiced = target.voicing[i] > VOICED;
            match (predicted_voiced, target_voiced) {
                (true, true) => delta.true_positives += 1,
                (true, false) => delta.false_positives += 1,
                (false, true) => delta.false_negatives += 1,
                (false, false) => {}
            }
            let (p, t) = (predicted.pitch[i], target.pitch[i]);
            if predicted_voiced && target_voiced && p > 0.0 && t > 0.0 {
                let cents = 1200.0 * (f64::from(p) / f64::from(t)).log2();
                delta.voiced_frames += 1;
                delta.pitch_cents_squared += cents * cents;
                delta.pitch_cents_absolute += cents.abs();
            }
            let periodicity = f64::from(predicted.periodicity[i] - target.periodicity[i]);
            delta.periodicity_squared += periodicity * periodicity;
            let loudness = f64::from(predicted.loudness[i] - target.loudness[i]);
            delta.loudness_squared += loudness * loudness;
            if predicted.phonemes[i] == target.phonemes[i] {
                delta.phonemes_correct += 1;
            }
        }
        Ok(delta)
    }
}

/// Averaged view of an accumulator. Metrics with no contributing frames are
/// `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub pitch_rmse_cents: Option<f64>,
    pub pitch_mae_cents: Option<f64>,
    pub periodicity_rmse: Option<f64>,
    pub loudness_rmse_db: Option<f64>,
    pub voicing_precision: Option<f64>,
    pub voicing_recall: Option<f64>,
    pub voicing_f1: Option<f64>,
    pub phoneme_accuracy: Option<f64>,
    pub frames: u64,
    pub voiced_frames: u64,
    pub files: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProsodyMetrics {
    totals: MetricsDelta,
    files: u64,
}

impl ProsodyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &mut self,
        predicted: &ProsodyFrames,
        target: &ProsodyFrames,
    ) -> Result<(), SkipReason> {
        let delta = MetricsDelta::between(predicted, target)?;
        self.merge(&delta);
        Ok(())
    }

    pub fn merge(&mut self, delta: &MetricsDelta) {
        let t = &mut self.totals;
        t.frames += delta.frames;
        t.voiced_frames += delta.voiced_frames;
        t.pitch_cents_squared += delta.pitch_cents_squared;
        t.pitch_cents_absolute += delta.pitch_cents_absolute;
        t.periodicity_squared += delta.periodicity_squared;
        t.loudness_squared += delta.loudness_squared;
        t.true_positives += delta.true_positives;
        t.false_positives += delta.false_positives;
        t.false_negatives += delta.false_negatives;
        t.phonemes_correct += delta.phonemes_correct;
        self.files += 1;
    }

    pub fn query(&self) -> MetricsSnapshot {
        let t = &self.totals;
        let ratio = |num: f64, den: u64| (den > 0).then(|| num / den as f64);
        let precision = ratio(t.true_positives as f64, t.true_positives + t.false_positives);
        let recall = ratio(t.true_positives as f64, t.true_positives + t.false_negatives);
        let f1 = match (precision, recall) {
            (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };
        MetricsSnapshot {
            pitch_rmse_cents: ratio(t.pitch_cents_squared, t.voiced_frames).map(f64::sqrt),
            pitch_mae_cents: ratio(t.pitch_cents_absolute, t.voiced_frames),
            periodicity_rmse: ratio(t.periodicity_squared, t.frames).map(f64::sqrt),
            loudness_rmse_db: ratio(t.loudness_squared, t.frames).map(f64::sqrt),
            voicing_precision: precision,
            voicing_recall: recall,
            voicing_f1: f1,
            phoneme_accuracy: ratio(t.phonemes_correct as f64, t.frames),
            frames: t.frames,
            voiced_frames: t.voiced_frames,
            files: self.files,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
