use std::fmt;

use serde::{Deserialize, Serialize};

/// The three prosody edits under evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EditKind {
    #[serde(rename = "shifted")]
    Shift,
    #[serde(rename = "stretched")]
    Stretch,
    #[serde(rename = "scaled")]
    Scale,
}

impl EditKind {
    /// Evaluation order.
    pub const ALL: [EditKind; 3] = [EditKind::Shift, EditKind::Stretch, EditKind::Scale];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shift => "shifted",
            Self::Stretch => "stretched",
            Self::Scale => "scaled",
        }
    }
}

/// One named evaluation configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    /// The recorded audio, re-analyzed with the evaluation extractors.
    Original,
    /// Resynthesis from unmodified features.
    Reconstructed,
    Edited { kind: EditKind, ratio: f64 },
}

impl Condition {
    /// Conditions in processing order: original, reconstructed, then each
    /// configured edit kind (shifted, stretched, scaled) with ascending ratios.
    pub fn ordered(edits: &[EditKind], ratios: &[f64]) -> Vec<Condition> {
        let mut ratios = ratios.to_vec();
        ratios.sort_by(|a, b| a.total_cmp(b));
        ratios.dedup();

        let mut conditions = vec![Condition::Original, Condition::Reconstructed];
        for kind in EditKind::ALL {
            if !edits.contains(&kind) {
                continue;
            }
            conditions.extend(ratios.iter().map(|&ratio| Condition::Edited { kind, ratio }));
        }
        conditions
    }

    /// Integer percentage used in names. Truncates, so `0.717` becomes `71`,
    /// after absorbing representation error so `0.29` stays `29`.
    pub fn ratio_percent(ratio: f64) -> u32 {
        (ratio * 100.0 + 1e-6) as u32
    }

    pub fn ratio(&self) -> f64 {
        match self {
            Self::Original | Self::Reconstructed => 1.0,
            Self::Edited { ratio, .. } => *ratio,
        }
    }

    /// Results key, e.g. `reconstructed` or `shifted-050`.
    pub fn key(&self) -> String {
        match self {
            Self::Original => "original".to_string(),
            Self::Reconstructed => "reconstructed".to_string(),
            Self::Edited { kind, ratio } => {
                format!("{}-{:03}", kind.as_str(), Self::ratio_percent(*ratio))
            }
        }
    }

    /// File name tag, e.g. `original-100` or `stretched-071`.
    pub fn tag(&self) -> String {
        match self {
            Self::Original => "original-100".to_string(),
            Self::Reconstructed => "reconstructed-100".to_string(),
            Self::Edited { .. } => self.key(),
        }
    }

    /// Tag of the target features this condition is measured against.
    pub fn target_tag(&self) -> String {
        match self {
            Self::Original | Self::Reconstructed => Self::Original.tag(),
            Self::Edited { .. } => self.tag(),
        }
    }

    /// Whether audio for this condition comes out of the synthesizer.
    pub fn is_generated(&self) -> bool {
        !matches!(self, Self::Original)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Compute device handed to the synthesizer loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl Device {
    pub fn from_gpu(gpu: Option<usize>) -> Self {
        gpu.map_or(Self::Cpu, Self::Cuda)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

impl Waveform {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate_hz as f64
    }

    /// Number of feature frames covered at the given hop.
    pub fn frames(&self, hopsize: usize) -> usize {
        if hopsize == 0 {
            return 0;
        }
        self.samples.len() / hopsize
    }
}

/// All per-frame features of one utterance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureSet {
    /// Hz.
    pub pitch: Vec<f32>,
    pub periodicity: Vec<f32>,
    /// dB.
    pub loudness: Vec<f32>,
    /// 1.0 for voiced frames, 0.0 otherwise.
    pub voicing: Vec<f32>,
    pub phonemes: Vec<i64>,
    /// Phonetic posteriorgram, one distribution per frame.
    pub ppg: Vec<Vec<f32>>,
    pub text: String,
}

impl FeatureSet {
    /// Reference frame count; every other feature is reconciled to it.
    pub fn frames(&self) -> usize {
        self.pitch.len()
    }

    pub fn is_reconciled(&self) -> bool {
        let n = self.frames();
        self.periodicity.len() == n
            && self.loudness.len() == n
            && (self.voicing.is_empty() || self.voicing.len() == n)
            && (self.phonemes.is_empty() || self.phonemes.len() == n)
            && (self.ppg.is_empty() || self.ppg.len() == n)
    }
}
