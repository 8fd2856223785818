use std::collections::BTreeMap;

use crate::metrics::{MetricsDelta, MetricsSnapshot, ProsodyMetrics};
use crate::types::Condition;

/// One accumulator per condition key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionMetrics {
    conditions: BTreeMap<String, ProsodyMetrics>,
}

impl ConditionMetrics {
    pub fn for_conditions(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions
                .iter()
                .map(|condition| (condition.key(), ProsodyMetrics::new()))
                .collect(),
        }
    }

    pub fn merge(&mut self, key: &str, delta: &MetricsDelta) {
        self.conditions
            .entry(key.to_string())
            .or_default()
            .merge(delta);
    }

    pub fn get(&self, key: &str) -> Option<&ProsodyMetrics> {
        self.conditions.get(key)
    }

    pub fn snapshot(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.conditions
            .iter()
            .map(|(key, metrics)| (key.clone(), metrics.query()))
            .collect()
    }

    pub fn reset(&mut self) {
        self.conditions.values_mut().for_each(ProsodyMetrics::reset);
    }
}
