//! On-disk layout and codecs for evaluation artifacts.
//!
//! Tensors keep the `.pt` suffix used throughout the evaluation tree but are
//! stored as safetensors files holding a single tensor named `data`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Tensor};
use walkdir::WalkDir;

use crate::config::EvaluationConfig;
use crate::error::EvaluationError;
use crate::types::{Condition, FeatureSet, Waveform};

const TENSOR_NAME: &str = "data";

/// Tag of the unedited source files in the feature cache.
const CACHE_TAG: &str = "100";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Pitch,
    Periodicity,
    Loudness,
    Voicing,
    Phonemes,
    Ppg,
    Grid,
    Alignment,
    Text,
}

impl Artifact {
    /// Features copied from the cache into the original bucket.
    pub const CACHED: [Artifact; 8] = [
        Artifact::Pitch,
        Artifact::Periodicity,
        Artifact::Loudness,
        Artifact::Voicing,
        Artifact::Phonemes,
        Artifact::Ppg,
        Artifact::Alignment,
        Artifact::Text,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Pitch => "-pitch.pt",
            Self::Periodicity => "-periodicity.pt",
            Self::Loudness => "-loudness.pt",
            Self::Voicing => "-voicing.pt",
            Self::Phonemes => "-phonemes.pt",
            Self::Ppg => "-ppg.pt",
            Self::Grid => "-grid.pt",
            Self::Alignment => "-alignment.json",
            Self::Text => "-text.txt",
        }
    }

    /// Suffix of this artifact in the preprocessed feature cache.
    fn cache_suffix(self) -> &'static str {
        match self {
            Self::Alignment => ".json",
            Self::Text => ".txt",
            other => other.suffix(),
        }
    }
}

/// Paths for one dataset and adaptation partition index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    eval_dir: PathBuf,
    cache_dir: PathBuf,
    config_name: String,
    dataset: String,
    index: String,
}

impl ArtifactLayout {
    pub fn new(config: &EvaluationConfig, dataset: &str, index: &str) -> Self {
        Self {
            eval_dir: config.eval_dir.clone(),
            cache_dir: config.cache_dir.clone(),
            config_name: config.name.clone(),
            dataset: dataset.to_string(),
            index: index.to_string(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn bucket(&self, kind: &str, bucket: &str) -> PathBuf {
        self.eval_dir
            .join(kind)
            .join(&self.dataset)
            .join(bucket)
            .join(&self.index)
    }

    /// Targets and derived generator inputs.
    pub fn objective_original_dir(&self) -> PathBuf {
        self.bucket("objective", "original")
    }

    /// Features re-extracted from generated audio.
    pub fn objective_dir(&self) -> PathBuf {
        self.bucket("objective", &self.config_name)
    }

    pub fn subjective_original_dir(&self) -> PathBuf {
        self.bucket("subjective", "original")
    }

    pub fn subjective_dir(&self) -> PathBuf {
        self.bucket("subjective", &self.config_name)
    }

    pub fn target(&self, stem: &str, tag: &str, artifact: Artifact) -> PathBuf {
        self.objective_original_dir()
            .join(format!("{stem}-{tag}{}", artifact.suffix()))
    }

    pub fn predicted(&self, stem: &str, tag: &str, artifact: Artifact) -> PathBuf {
        self.objective_dir()
            .join(format!("{stem}-{tag}{}", artifact.suffix()))
    }

    pub fn original_audio(&self, stem: &str) -> PathBuf {
        self.subjective_original_dir()
            .join(format!("{stem}-{}.wav", Condition::Original.tag()))
    }

    /// Audio analyzed for `condition`. The original condition reads the
    /// copied recording.
    pub fn generated_audio(&self, stem: &str, condition: &Condition) -> PathBuf {
        match condition {
            Condition::Original => self.original_audio(stem),
            _ => self
                .subjective_dir()
                .join(format!("{stem}-{}.wav", condition.tag())),
        }
    }

    pub fn cached_audio(&self, stem: &str) -> PathBuf {
        self.cache_dir
            .join(&self.dataset)
            .join(format!("{stem}-{CACHE_TAG}.wav"))
    }

    pub fn cached(&self, stem: &str, artifact: Artifact) -> PathBuf {
        self.cache_dir
            .join(&self.dataset)
            .join(format!("{stem}-{CACHE_TAG}{}", artifact.cache_suffix()))
    }

    pub fn speaker_results(&self) -> PathBuf {
        self.objective_dir().join("results.json")
    }

    pub fn progress(&self) -> PathBuf {
        self.objective_dir().join("progress.json")
    }

    /// Dataset-level results, next to the per-index directories.
    pub fn dataset_results(config: &EvaluationConfig, dataset: &str) -> PathBuf {
        config
            .eval_dir
            .join("objective")
            .join(dataset)
            .join(&config.name)
            .join("results.json")
    }

    pub fn save_targets(
        &self,
        stem: &str,
        tag: &str,
        features: &FeatureSet,
    ) -> Result<(), EvaluationError> {
        save_features(|artifact| self.target(stem, tag, artifact), features)
    }

    pub fn load_targets(&self, stem: &str, tag: &str) -> Result<FeatureSet, EvaluationError> {
        load_features(|artifact| self.target(stem, tag, artifact))
    }
}

fn save_features(
    path_of: impl Fn(Artifact) -> PathBuf,
    features: &FeatureSet,
) -> Result<(), EvaluationError> {
    save_contour(&path_of(Artifact::Pitch), &features.pitch)?;
    save_contour(&path_of(Artifact::Periodicity), &features.periodicity)?;
    save_contour(&path_of(Artifact::Loudness), &features.loudness)?;
    if !features.voicing.is_empty() {
        save_contour(&path_of(Artifact::Voicing), &features.voicing)?;
    }
    if !features.phonemes.is_empty() {
        save_indices(&path_of(Artifact::Phonemes), &features.phonemes)?;
    }
    if !features.ppg.is_empty() {
        save_frames(&path_of(Artifact::Ppg), &features.ppg)?;
    }
    write_text(&path_of(Artifact::Text), &features.text)
}

/// Pitch, periodicity and loudness are required; other features default to
/// empty when absent.
fn load_features(path_of: impl Fn(Artifact) -> PathBuf) -> Result<FeatureSet, EvaluationError> {
    let optional = |artifact: Artifact| {
        let path = path_of(artifact);
        path.exists().then_some(path)
    };
    Ok(FeatureSet {
        pitch: load_contour(&path_of(Artifact::Pitch))?,
        periodicity: load_contour(&path_of(Artifact::Periodicity))?,
        loudness: load_contour(&path_of(Artifact::Loudness))?,
        voicing: optional(Artifact::Voicing)
            .map(|path| load_contour(&path))
            .transpose()?
            .unwrap_or_default(),
        phonemes: optional(Artifact::Phonemes)
            .map(|path| load_indices(&path))
            .transpose()?
            .unwrap_or_default(),
        ppg: optional(Artifact::Ppg)
            .map(|path| load_frames(&path))
            .transpose()?
            .unwrap_or_default(),
        text: optional(Artifact::Text)
            .map(|path| read_text(&path))
            .transpose()?
            .unwrap_or_default(),
    })
}

fn ensure_parent(path: &Path) -> Result<(), EvaluationError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EvaluationError::io("create artifact directory", e))?;
    }
    Ok(())
}

fn cpu() -> candle_core::Device {
    candle_core::Device::Cpu
}

fn save_tensor(path: &Path, tensor: Tensor) -> Result<(), EvaluationError> {
    ensure_parent(path)?;
    let tensors = HashMap::from([(TENSOR_NAME.to_string(), tensor)]);
    candle_core::safetensors::save(&tensors, path)
        .map_err(|e| EvaluationError::tensor("write tensor artifact", e))
}

fn load_tensor(path: &Path) -> Result<Tensor, EvaluationError> {
    let mut tensors = candle_core::safetensors::load(path, &cpu())
        .map_err(|e| EvaluationError::tensor("read tensor artifact", e))?;
    tensors.remove(TENSOR_NAME).ok_or_else(|| {
        EvaluationError::invalid_input(format!(
            "'{}' has no '{TENSOR_NAME}' tensor",
            path.display()
        ))
    })
}

pub fn save_contour(path: &Path, values: &[f32]) -> Result<(), EvaluationError> {
    let tensor = Tensor::from_slice(values, values.len(), &cpu())
        .map_err(|e| EvaluationError::tensor("build contour tensor", e))?;
    save_tensor(path, tensor)
}

/// Any rank is accepted; leading unit dimensions are flattened away.
pub fn load_contour(path: &Path) -> Result<Vec<f32>, EvaluationError> {
    load_tensor(path)?
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(|e| EvaluationError::tensor("decode contour tensor", e))
}

pub fn save_indices(path: &Path, values: &[i64]) -> Result<(), EvaluationError> {
    let tensor = Tensor::from_slice(values, values.len(), &cpu())
        .map_err(|e| EvaluationError::tensor("build index tensor", e))?;
    save_tensor(path, tensor)
}

pub fn load_indices(path: &Path) -> Result<Vec<i64>, EvaluationError> {
    let tensor = load_tensor(path)?
        .flatten_all()
        .map_err(|e| EvaluationError::tensor("decode index tensor", e))?;
    let tensor = if tensor.dtype() == DType::I64 {
        tensor
    } else {
        tensor
            .to_dtype(DType::I64)
            .map_err(|e| EvaluationError::tensor("convert index tensor", e))?
    };
    tensor
        .to_vec1::<i64>()
        .map_err(|e| EvaluationError::tensor("decode index tensor", e))
}

pub fn save_grid(path: &Path, grid: &[f64]) -> Result<(), EvaluationError> {
    let tensor = Tensor::from_slice(grid, grid.len(), &cpu())
        .map_err(|e| EvaluationError::tensor("build grid tensor", e))?;
    save_tensor(path, tensor)
}

pub fn load_grid(path: &Path) -> Result<Vec<f64>, EvaluationError> {
    load_tensor(path)?
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::F64))
        .and_then(|t| t.to_vec1::<f64>())
        .map_err(|e| EvaluationError::tensor("decode grid tensor", e))
}

/// Frames-major `[frames, classes]` matrix.
pub fn save_frames(path: &Path, frames: &[Vec<f32>]) -> Result<(), EvaluationError> {
    let classes = frames.first().map_or(0, Vec::len);
    if frames.iter().any(|frame| frame.len() != classes) {
        return Err(EvaluationError::invalid_input(format!(
            "ragged frame matrix for '{}'",
            path.display()
        )));
    }
    let flat: Vec<f32> = frames.iter().flatten().copied().collect();
    let tensor = Tensor::from_vec(flat, (frames.len(), classes), &cpu())
        .map_err(|e| EvaluationError::tensor("build frame tensor", e))?;
    save_tensor(path, tensor)
}

pub fn load_frames(path: &Path) -> Result<Vec<Vec<f32>>, EvaluationError> {
    let tensor = load_tensor(path)?;
    let tensor = match tensor.rank() {
        2 => tensor,
        // Batched `[1, frames, classes]` artifacts.
        3 => tensor
            .squeeze(0)
            .map_err(|e| EvaluationError::tensor("squeeze frame tensor", e))?,
        rank => {
            return Err(EvaluationError::invalid_input(format!(
                "'{}' has rank {rank}, expected a frame matrix",
                path.display()
            )))
        }
    };
    tensor
        .to_dtype(DType::F32)
        .and_then(|t| t.to_vec2::<f32>())
        .map_err(|e| EvaluationError::tensor("decode frame tensor", e))
}

pub fn write_text(path: &Path, text: &str) -> Result<(), EvaluationError> {
    ensure_parent(path)?;
    fs::write(path, text).map_err(|e| EvaluationError::io("write transcript", e))
}

pub fn read_text(path: &Path) -> Result<String, EvaluationError> {
    fs::read_to_string(path).map_err(|e| EvaluationError::io("read transcript", e))
}

/// Copy one file, creating the destination directory.
pub fn copy_file(from: &Path, to: &Path) -> Result<(), EvaluationError> {
    ensure_parent(to)?;
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| EvaluationError::io("copy artifact", e))
}

/// Mono 32-bit float WAV.
pub fn write_wav(path: &Path, audio: &Waveform) -> Result<(), EvaluationError> {
    ensure_parent(path)?;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate_hz,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| EvaluationError::wav("create wav", e))?;
    for &sample in &audio.samples {
        writer
            .write_sample(sample)
            .map_err(|e| EvaluationError::wav("write wav sample", e))?;
    }
    writer
        .finalize()
        .map_err(|e| EvaluationError::wav("finalize wav", e))
}

/// Read a WAV file, downmixing to mono and scaling integer samples to
/// `[-1, 1]`.
pub fn read_wav(path: &Path) -> Result<Waveform, EvaluationError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| EvaluationError::wav("open wav", e))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| EvaluationError::wav("read wav samples", e))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(|e| EvaluationError::wav("read wav samples", e))?
        }
    };
    let channels = usize::from(spec.channels.max(1));
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    Ok(Waveform {
        sample_rate_hz: spec.sample_rate,
        samples,
    })
}

/// Total per-channel samples across every `.wav` file under `dir`.
pub fn count_samples(dir: &Path) -> Result<u64, EvaluationError> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut total = 0u64;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| EvaluationError::runtime("walk audio directory", e))?;
        let is_wav = entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "wav");
        if !is_wav {
            continue;
        }
        let reader = hound::WavReader::open(entry.path())
            .map_err(|e| EvaluationError::wav("open wav for sample count", e))?;
        total += u64::from(reader.duration());
    }
    Ok(total)
}
