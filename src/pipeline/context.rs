use std::path::{Path, PathBuf};

use crate::benchmark::Benchmark;
use crate::error::EvaluationError;
use crate::pipeline::traits::{Synthesizer, SynthesizerLoader};
use crate::types::Device;

const GENERATOR_PREFIX: &str = "generator-";
const CHECKPOINT_SUFFIX: &str = ".pt";

/// Mutable state shared by the stages of one dataset run.
pub struct EvaluationContext<'a> {
    loader: &'a dyn SynthesizerLoader,
    device: Device,
    loaded: Option<(PathBuf, Box<dyn Synthesizer>)>,
    benchmark: Benchmark,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(loader: &'a dyn SynthesizerLoader, device: Device) -> Self {
        Self {
            loader,
            device,
            loaded: None,
            benchmark: Benchmark::new(),
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn benchmark(&self) -> &Benchmark {
        &self.benchmark
    }

    pub fn benchmark_mut(&mut self) -> &mut Benchmark {
        &mut self.benchmark
    }

    /// Checkpoint of the currently loaded synthesizer.
    pub fn loaded_checkpoint(&self) -> Option<&Path> {
        self.loaded.as_ref().map(|(path, _)| path.as_path())
    }

    /// Synthesizer for `checkpoint`, loading it unless it is already cached,
    /// together with the benchmark so both can be used at once.
    pub fn synthesizer_and_benchmark(
        &mut self,
        checkpoint: &Path,
    ) -> Result<(&dyn Synthesizer, &mut Benchmark), EvaluationError> {
        let resolved = resolve_checkpoint(checkpoint)?;
        let cached = matches!(&self.loaded, Some((path, _)) if *path == resolved);
        if !cached {
            tracing::info!(checkpoint = %resolved.display(), device = %self.device, "loading synthesizer");
            let loader = self.loader;
            let device = self.device;
            let synthesizer = self
                .benchmark
                .time("load", || loader.load(&resolved, device))?;
            self.loaded = Some((resolved, synthesizer));
        }
        let synthesizer = self
            .loaded
            .as_ref()
            .map(|(_, synthesizer)| synthesizer.as_ref())
            .ok_or_else(|| EvaluationError::runtime("load synthesizer", "no synthesizer cached"))?;
        Ok((synthesizer, &mut self.benchmark))
    }
}

/// A file is used as-is. A directory resolves to its `generator-<step>.pt`
/// with the highest step.
pub fn resolve_checkpoint(path: &Path) -> Result<PathBuf, EvaluationError> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if !path.is_dir() {
        return Err(EvaluationError::CheckpointNotFound {
            path: path.to_path_buf(),
        });
    }
    let entries =
        std::fs::read_dir(path).map_err(|e| EvaluationError::io("list checkpoint directory", e))?;
    let mut latest: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| EvaluationError::io("list checkpoint directory", e))?;
        let name = entry.file_name();
        let Some(step) = name
            .to_str()
            .and_then(|name| name.strip_prefix(GENERATOR_PREFIX))
            .and_then(|rest| rest.strip_suffix(CHECKPOINT_SUFFIX))
            .and_then(|step| step.parse::<u64>().ok())
        else {
            continue;
        };
        if latest.as_ref().map_or(true, |(best, _)| step > *best) {
            latest = Some((step, entry.path()));
        }
    }
    latest
        .map(|(_, path)| path)
        .ok_or_else(|| EvaluationError::CheckpointNotFound {
            path: path.to_path_buf(),
        })
}
