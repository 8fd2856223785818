//! Serializable results documents.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::EvaluationError;
use crate::ledger::FailureLedger;
use crate::metrics::MetricsSnapshot;

const WORST_FILES: usize = 5;

/// Per-file metrics for one condition, in processing order.
pub type RawResults = Vec<(String, MetricsSnapshot)>;

#[derive(Debug, Clone, Serialize, Default)]
pub struct SpeakerObjective {
    pub raw: BTreeMap<String, RawResults>,
    pub average: BTreeMap<String, MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
pub struct AlignmentSummary {
    pub primary: usize,
    pub fallback: usize,
    pub failed: usize,
}

impl AlignmentSummary {
    pub fn add(&mut self, other: AlignmentSummary) {
        self.primary += other.primary;
        self.fallback += other.fallback;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeakerResults {
    pub dataset: String,
    pub index: String,
    pub checkpoint: String,
    pub objective: SpeakerObjective,
    /// Spread of per-file errors for each condition.
    pub distributions: BTreeMap<String, ConditionDistribution>,
    pub num_samples: u64,
    pub num_frames: u64,
    pub incomplete_conditions: Vec<String>,
    pub alignment: AlignmentSummary,
    pub failures: FailureLedger,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetObjective {
    pub average: BTreeMap<String, MetricsSnapshot>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BenchmarkResults {
    /// Total seconds per stage.
    pub raw: BTreeMap<String, f64>,
    /// Seconds per generated sample.
    pub average: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetResults {
    pub dataset: String,
    pub config: String,
    pub objective: DatasetObjective,
    pub num_samples: u64,
    pub num_frames: u64,
    pub benchmark: BenchmarkResults,
    /// Partition indices evaluated, in order.
    pub speakers: Vec<String>,
    pub alignment: AlignmentSummary,
    pub failures: FailureLedger,
    pub generated_at: String,
}

/// Spread of one per-file error over the files of a condition.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorSpread {
    pub files: usize,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub max: f64,
}

impl ErrorSpread {
    /// `None` when no file reported a finite value.
    pub fn of(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        let last = values.len().checked_sub(1)?;
        values.sort_by(f64::total_cmp);
        Some(Self {
            files: values.len(),
            mean: values.iter().sum::<f64>() / values.len() as f64,
            median: quantile(&values, 0.5),
            p90: quantile(&values, 0.9),
            max: values[last],
        })
    }
}

/// A file with one of the largest pitch errors in its condition.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorstFile {
    pub stem: String,
    pub pitch_rmse_cents: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ConditionDistribution {
    /// Metric name to its spread. Metrics no file reported are left out.
    pub errors: BTreeMap<&'static str, ErrorSpread>,
    pub worst_files: Vec<WorstFile>,
}

type MetricField = fn(&MetricsSnapshot) -> Option<f64>;

/// Per-file errors summarized in each condition's distribution.
const SPREAD_METRICS: [(&str, MetricField); 4] = [
    ("pitch_rmse_cents", |s| s.pitch_rmse_cents),
    ("periodicity_rmse", |s| s.periodicity_rmse),
    ("loudness_rmse_db", |s| s.loudness_rmse_db),
    ("voicing_f1", |s| s.voicing_f1),
];

/// Distributions of per-file errors for every condition in `raw`.
pub fn condition_distributions(
    raw: &BTreeMap<String, RawResults>,
) -> BTreeMap<String, ConditionDistribution> {
    raw.iter()
        .map(|(condition, files)| {
            let errors = SPREAD_METRICS
                .iter()
                .filter_map(|&(name, field)| {
                    let spread = ErrorSpread::of(files.iter().filter_map(|(_, s)| field(s)))?;
                    Some((name, spread))
                })
                .collect();
            let distribution = ConditionDistribution {
                errors,
                worst_files: worst_pitch_files(files, WORST_FILES),
            };
            (condition.clone(), distribution)
        })
        .collect()
}

/// Highest pitch error first; ties keep stem order.
fn worst_pitch_files(files: &RawResults, limit: usize) -> Vec<WorstFile> {
    let mut worst: Vec<WorstFile> = files
        .iter()
        .filter_map(|(stem, snapshot)| {
            let pitch_rmse_cents = snapshot.pitch_rmse_cents.filter(|v| v.is_finite())?;
            Some(WorstFile {
                stem: stem.clone(),
                pitch_rmse_cents,
            })
        })
        .collect();
    worst.sort_by(|a, b| {
        b.pitch_rmse_cents
            .total_cmp(&a.pitch_rmse_cents)
            .then_with(|| a.stem.cmp(&b.stem))
    });
    worst.truncate(limit);
    worst
}

/// Linear interpolation between the closest ranks of a sorted, non-empty
/// slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let below = position.floor() as usize;
    let above = (below + 1).min(sorted.len() - 1);
    sorted[below] + (sorted[above] - sorted[below]) * (position - below as f64)
}

/// Pretty-printed JSON with a trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), EvaluationError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EvaluationError::io("create results directory", e))?;
    }
    let mut file = File::create(path).map_err(|e| EvaluationError::io("create results file", e))?;
    serde_json::to_writer_pretty(&mut file, value)
        .map_err(|e| EvaluationError::json("serialize results", e))?;
    file.write_all(b"\n")
        .map_err(|e| EvaluationError::io("finalize results file", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pitch: Option<f64>) -> MetricsSnapshot {
        MetricsSnapshot {
            pitch_rmse_cents: pitch,
            loudness_rmse_db: Some(1.0),
            files: 1,
            ..MetricsSnapshot::default()
        }
    }

    #[test]
    fn quantile_interpolates_between_ranks() {
        let sorted = [0.0, 10.0, 20.0, 30.0];
        assert_eq!(quantile(&sorted, 0.5), 15.0);
        assert_eq!(quantile(&sorted, 1.0), 30.0);
        assert_eq!(quantile(&[7.0], 0.9), 7.0);
    }

    #[test]
    fn spread_ignores_non_finite_values() {
        assert_eq!(ErrorSpread::of([f64::NAN]), None);
        let spread = ErrorSpread::of([3.0, f64::INFINITY, 1.0]).expect("spread");
        assert_eq!(spread.files, 2);
        assert_eq!(spread.median, 2.0);
        assert_eq!(spread.max, 3.0);
    }

    #[test]
    fn distributions_rank_worst_files_first() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "shifted-200".to_string(),
            vec![
                ("a".to_string(), snapshot(Some(10.0))),
                ("b".to_string(), snapshot(Some(30.0))),
                ("c".to_string(), snapshot(None)),
            ],
        );
        let distributions = condition_distributions(&raw);
        let shifted = &distributions["shifted-200"];
        let pitch = &shifted.errors["pitch_rmse_cents"];
        assert_eq!(pitch.files, 2);
        assert_eq!(pitch.mean, 20.0);
        assert_eq!(pitch.max, 30.0);
        assert_eq!(shifted.errors["loudness_rmse_db"].files, 3);
        assert!(!shifted.errors.contains_key("periodicity_rmse"));
        assert_eq!(shifted.worst_files[0].stem, "b");
        assert_eq!(shifted.worst_files.len(), 2);
    }

    #[test]
    fn raw_entries_serialize_as_stem_metric_pairs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/results.json");
        let mut objective = SpeakerObjective::default();
        objective
            .raw
            .insert("reconstructed".to_string(), vec![("s1".to_string(), snapshot(Some(5.0)))]);
        write_json(&path, &objective).expect("write json");

        let text = std::fs::read_to_string(&path).expect("read back");
        assert!(text.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(value["raw"]["reconstructed"][0][0], "s1");
        assert_eq!(value["raw"]["reconstructed"][0][1]["pitch_rmse_cents"], 5.0);
    }
}
