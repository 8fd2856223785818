use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Named wall-clock totals for one dataset run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Benchmark {
    totals: BTreeMap<String, Duration>,
}

impl Benchmark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, elapsed: Duration) {
        *self.totals.entry(name.to_string()).or_default() += elapsed;
    }

    /// Run `work` and add its wall-clock time to `name`.
    pub fn time<T>(&mut self, name: &str, work: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let output = work();
        self.record(name, started.elapsed());
        output
    }

    pub fn raw_seconds(&self) -> BTreeMap<String, f64> {
        self.totals
            .iter()
            .map(|(name, elapsed)| (name.clone(), elapsed.as_secs_f64()))
            .collect()
    }

    /// Seconds per generated audio sample; zero when nothing was generated.
    pub fn per_sample(&self, num_samples: u64) -> BTreeMap<String, f64> {
        self.totals
            .iter()
            .map(|(name, elapsed)| {
                let average = if num_samples == 0 {
                    0.0
                } else {
                    elapsed.as_secs_f64() / num_samples as f64
                };
                (name.clone(), average)
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.totals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_accumulate_per_name() {
        let mut benchmark = Benchmark::new();
        benchmark.record("synthesize", Duration::from_millis(1500));
        benchmark.record("synthesize", Duration::from_millis(500));
        let answer = benchmark.time("align", || 42);
        assert_eq!(answer, 42);

        let raw = benchmark.raw_seconds();
        assert_eq!(raw["synthesize"], 2.0);
        assert!(raw.contains_key("align"));
        assert_eq!(benchmark.per_sample(4)["synthesize"], 0.5);
        assert_eq!(benchmark.per_sample(0)["synthesize"], 0.0);

        benchmark.reset();
        assert!(benchmark.raw_seconds().is_empty());
    }
}
