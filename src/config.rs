use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::EvaluationError;
use crate::interpolate::PpgInterpolation;
use crate::types::{Condition, EditKind};

/// Constant ratios at which prosody edits are evaluated.
pub const DEFAULT_RATIOS: [f64; 4] = [0.5, 0.717, 1.414, 2.0];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Configuration name; names the output bucket for generated files.
    pub name: String,
    pub eval_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub partition_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub checkpoint: PathBuf,
    pub sample_rate_hz: u32,
    pub hopsize: usize,
    pub window_size: usize,
    pub fmin: f32,
    pub fmax: f32,
    pub ratios: Vec<f64>,
    pub edits: Vec<EditKind>,
    pub voicing_threshold: f32,
    pub loudness_bands: usize,
    pub ppg_interpolation: PpgInterpolation,
    pub speaker_id: usize,
    /// Run speaker adaptation before evaluating each partition.
    pub adapt: bool,
    pub gpu: Option<usize>,
    /// Utterances handed to the synthesizer per call.
    pub synthesis_batch_size: usize,
    pub batch_timeout_secs: Option<u64>,
}

impl EvaluationConfig {
    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 22_050;
    pub const DEFAULT_HOPSIZE: usize = 256;

    pub fn load(path: &Path) -> Result<Self, EvaluationError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| EvaluationError::io("read evaluation config", e))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| EvaluationError::json("parse evaluation config", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EvaluationError> {
        if self.sample_rate_hz == 0 || self.hopsize == 0 {
            return Err(EvaluationError::invalid_input(
                "sample_rate_hz and hopsize must be non-zero",
            ));
        }
        if !(self.fmin > 0.0 && self.fmin < self.fmax) {
            return Err(EvaluationError::invalid_input(format!(
                "pitch range must satisfy 0 < fmin < fmax, got [{}, {}]",
                self.fmin, self.fmax
            )));
        }
        if self.synthesis_batch_size == 0 {
            return Err(EvaluationError::invalid_input(
                "synthesis_batch_size must be at least 1",
            ));
        }
        if let Some(bad) = self.ratios.iter().find(|r| !r.is_finite() || **r <= 0.0) {
            return Err(EvaluationError::invalid_input(format!(
                "edit ratios must be finite and positive, got {bad}"
            )));
        }
        let ratios = self.sorted_ratios();
        if let Some(pair) = ratios
            .windows(2)
            .find(|pair| Condition::ratio_percent(pair[0]) == Condition::ratio_percent(pair[1]))
        {
            return Err(EvaluationError::invalid_input(format!(
                "edit ratios {} and {} share the name {:03}",
                pair[0],
                pair[1],
                Condition::ratio_percent(pair[0])
            )));
        }
        Ok(())
    }

    /// Frame hop in seconds.
    pub fn hop_seconds(&self) -> f64 {
        self.hopsize as f64 / self.sample_rate_hz as f64
    }

    /// Ratios in ascending order, as evaluated.
    pub fn sorted_ratios(&self) -> Vec<f64> {
        let mut ratios = self.ratios.clone();
        ratios.sort_by(|a, b| a.total_cmp(b));
        ratios.dedup();
        ratios
    }

    pub fn batch_timeout(&self) -> Option<std::time::Duration> {
        self.batch_timeout_secs.map(std::time::Duration::from_secs)
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            name: "promonet".to_string(),
            eval_dir: PathBuf::from("eval"),
            cache_dir: PathBuf::from("data/cache"),
            partition_dir: PathBuf::from("data/partitions"),
            runs_dir: PathBuf::from("runs"),
            checkpoint: PathBuf::from("runs/promonet"),
            sample_rate_hz: Self::DEFAULT_SAMPLE_RATE_HZ,
            hopsize: Self::DEFAULT_HOPSIZE,
            window_size: 1024,
            fmin: 50.0,
            fmax: 550.0,
            ratios: DEFAULT_RATIOS.to_vec(),
            edits: EditKind::ALL.to_vec(),
            voicing_threshold: 0.1625,
            loudness_bands: 1,
            ppg_interpolation: PpgInterpolation::Slerp,
            speaker_id: 0,
            adapt: false,
            gpu: None,
            synthesis_batch_size: 1,
            batch_timeout_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_config_default() {
        let config = EvaluationConfig::default();
        assert_eq!(config.sample_rate_hz, 22_050);
        assert_eq!(config.hopsize, 256);
        assert_eq!(config.ratios, vec![0.5, 0.717, 1.414, 2.0]);
        assert_eq!(config.edits.len(), 3);
        assert!(config.gpu.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let json = r#"{
            "name": "w2v2fb",
            "ratios": [2.0, 0.5],
            "edits": ["shifted"],
            "ppg_interpolation": "nearest"
        }"#;
        let config: EvaluationConfig = serde_json::from_str(json).expect("valid config json");
        assert_eq!(config.name, "w2v2fb");
        assert_eq!(config.edits, vec![EditKind::Shift]);
        assert_eq!(config.ppg_interpolation, PpgInterpolation::Nearest);
        assert_eq!(config.sorted_ratios(), vec![0.5, 2.0]);
        assert_eq!(config.fmax, 550.0);
    }

    #[test]
    fn validate_rejects_non_positive_ratio() {
        let config = EvaluationConfig {
            ratios: vec![1.0, 0.0],
            ..EvaluationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_ratios_with_the_same_name() {
        let config = EvaluationConfig {
            ratios: vec![0.715, 2.0, 0.7159],
            ..EvaluationConfig::default()
        };
        match config.validate() {
            Err(EvaluationError::InvalidInput { message }) => assert!(message.contains("071")),
            other => panic!("expected colliding ratios to be rejected, got {other:?}"),
        }
        let distinct = EvaluationConfig {
            ratios: vec![0.71, 0.72],
            ..EvaluationConfig::default()
        };
        assert!(distinct.validate().is_ok());
    }

    #[test]
    fn load_reads_config_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"hopsize": 128, "gpu": 1}"#).expect("write config");
        let config = EvaluationConfig::load(&path).expect("load config");
        assert_eq!(config.hopsize, 128);
        assert_eq!(config.gpu, Some(1));
        assert!((config.hop_seconds() - 128.0 / 22_050.0).abs() < 1e-12);
    }

    #[test]
    fn load_fails_on_missing_file() {
        assert!(EvaluationConfig::load(Path::new("/nonexistent/config.json")).is_err());
    }
}
