use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::EvaluationError;

const TRAIN_PREFIX: &str = "train-adapt-";
const TEST_PREFIX: &str = "test-adapt-";

/// One held-out speaker: adapt on `train_stems`, evaluate on `test_stems`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptationPartition {
    /// Two-digit suffix shared by the train and test partition names.
    pub index: String,
    pub train: String,
    pub test: String,
    pub train_stems: Vec<String>,
    /// Sorted.
    pub test_stems: Vec<String>,
}

/// Partition name to stems, as read from `<partition_dir>/<dataset>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitions {
    path: PathBuf,
    partitions: BTreeMap<String, Vec<String>>,
}

impl Partitions {
    pub fn path_for(partition_dir: &Path, dataset: &str) -> PathBuf {
        partition_dir.join(format!("{dataset}.json"))
    }

    pub fn load(path: &Path) -> Result<Self, EvaluationError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| EvaluationError::partition(path, format!("cannot read: {e}")))?;
        let partitions: BTreeMap<String, Vec<String>> = serde_json::from_str(&data)
            .map_err(|e| EvaluationError::partition(path, format!("cannot parse: {e}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            partitions,
        })
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.partitions.get(name).map(Vec::as_slice)
    }

    /// `train-adapt-XX` / `test-adapt-XX` pairs in index order.
    pub fn adaptation_pairs(&self) -> Result<Vec<AdaptationPartition>, EvaluationError> {
        let indices = |prefix: &str| -> Vec<String> {
            self.partitions
                .keys()
                .filter_map(|name| name.strip_prefix(prefix).map(str::to_string))
                .collect()
        };
        let train = indices(TRAIN_PREFIX);
        let test = indices(TEST_PREFIX);
        if train != test {
            return Err(EvaluationError::partition(
                &self.path,
                format!("adaptation partitions do not pair up: train {train:?}, test {test:?}"),
            ));
        }

        Ok(train
            .into_iter()
            .map(|index| {
                let train = format!("{TRAIN_PREFIX}{index}");
                let test = format!("{TEST_PREFIX}{index}");
                let train_stems = self.partitions.get(&train).cloned().unwrap_or_default();
                let mut test_stems = self.partitions.get(&test).cloned().unwrap_or_default();
                test_stems.sort();
                AdaptationPartition {
                    index,
                    train,
                    test,
                    train_stems,
                    test_stems,
                }
            })
            .collect())
    }
}
