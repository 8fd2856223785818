//! 1D grid sampling of feature sequences.
//!
//! A grid holds one fractional index into the source sequence per target
//! frame. Every edited condition that changes timing goes through here.

pub mod grid;
mod slerp;

use serde::{Deserialize, Serialize};

use crate::types::FeatureSet;

/// Elementwise sampling method for scalar sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Linear,
    Nearest,
}

/// How posteriorgram frames are resampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PpgInterpolation {
    Nearest,
    Linear,
    #[default]
    Slerp,
}

/// Sample `sequence` at every position of `grid`.
pub fn sample(sequence: &[f32], grid: &[f64], method: Method) -> Vec<f32> {
    match method {
        Method::Linear => linear(sequence, grid),
        Method::Nearest => grid
            .iter()
            .filter_map(|&x| nearest_index(x, sequence.len()).map(|i| sequence[i]))
            .collect(),
    }
}

/// Nearest-neighbor sampling of discrete labels.
pub fn sample_labels(sequence: &[i64], grid: &[f64]) -> Vec<i64> {
    grid.iter()
        .filter_map(|&x| nearest_index(x, sequence.len()).map(|i| sequence[i]))
        .collect()
}

/// Pitch is interpolated in log2 space so that halfway between 100 Hz and
/// 200 Hz is 141.4 Hz. Values must be positive.
pub fn pitch(sequence: &[f32], grid: &[f64]) -> Vec<f32> {
    let log_pitch: Vec<f32> = sequence
        .iter()
        .map(|&hz| hz.max(f32::MIN_POSITIVE).log2())
        .collect();
    linear(&log_pitch, grid)
        .into_iter()
        .map(|value| value.exp2())
        .collect()
}

/// Resample a sequence of distributions (one per frame).
pub fn distributions(frames: &[Vec<f32>], grid: &[f64], method: PpgInterpolation) -> Vec<Vec<f32>> {
    let n = frames.len();
    if n == 0 {
        return Vec::new();
    }
    match method {
        PpgInterpolation::Nearest => grid
            .iter()
            .filter_map(|&x| nearest_index(x, n).map(|i| frames[i].clone()))
            .collect(),
        PpgInterpolation::Linear => grid
            .iter()
            .map(|&x| {
                if n == 1 {
                    return frames[0].clone();
                }
                let (i, weight) = bracket(x, n);
                frames[i - 1]
                    .iter()
                    .zip(&frames[i])
                    .map(|(&a, &b)| (a as f64 * (1.0 - weight) + b as f64 * weight) as f32)
                    .collect()
            })
            .collect(),
        PpgInterpolation::Slerp => grid
            .iter()
            .map(|&x| {
                if n == 1 {
                    return frames[0].clone();
                }
                let (i, weight) = bracket(x, n);
                slerp::simplex(&frames[i - 1], &frames[i], weight)
            })
            .collect(),
    }
}

fn linear(sequence: &[f32], grid: &[f64]) -> Vec<f32> {
    let n = sequence.len();
    match n {
        0 => Vec::new(),
        1 => vec![sequence[0]; grid.len()],
        _ => grid
            .iter()
            .map(|&x| {
                let i = searchsorted_right(x, n).clamp(1, n - 1);
                let left = (i - 1) as f64;
                let right = i as f64;
                let value = (sequence[i - 1] as f64 * (right - x)
                    + sequence[i] as f64 * (x - left))
                    / (right - left);
                value as f32
            })
            .collect(),
    }
}

/// Number of indices `0..n` that are `<= x`.
fn searchsorted_right(x: f64, n: usize) -> usize {
    if x < 0.0 {
        0
    } else {
        ((x.floor() as usize).saturating_add(1)).min(n)
    }
}

/// Upper bracketing index in `[1, n-1]` and the weight of that upper frame.
fn bracket(x: f64, n: usize) -> (usize, f64) {
    let i = searchsorted_right(x, n).clamp(1, n - 1);
    (i, (x - (i - 1) as f64).clamp(0.0, 1.0))
}

fn nearest_index(x: f64, n: usize) -> Option<usize> {
    if n == 0 {
        return None;
    }
    Some((x.round().max(0.0) as usize).min(n - 1))
}

/// Per-feature sampling, resolved once from the posteriorgram setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureInterpolation {
    ppg: PpgInterpolation,
}

impl FeatureInterpolation {
    pub fn new(ppg: PpgInterpolation) -> Self {
        Self { ppg }
    }

    pub fn ppg_method(&self) -> PpgInterpolation {
        self.ppg
    }

    /// Warp every time-varying feature along `grid`. The text is copied.
    pub fn resample(&self, features: &FeatureSet, grid: &[f64]) -> FeatureSet {
        FeatureSet {
            pitch: pitch(&features.pitch, grid),
            periodicity: sample(&features.periodicity, grid, Method::Linear),
            loudness: sample(&features.loudness, grid, Method::Linear),
            voicing: sample(&features.voicing, grid, Method::Nearest),
            phonemes: sample_labels(&features.phonemes, grid),
            ppg: distributions(&features.ppg, grid, self.ppg),
            text: features.text.clone(),
        }
    }

    /// Resample every feature whose length differs from the pitch contour's
    /// onto the pitch frame count.
    pub fn reconcile(&self, features: &mut FeatureSet) {
        let frames = features.frames();
        if frames == 0 {
            return;
        }
        if needs_resample(features.periodicity.len(), frames) {
            let grid = grid::of_length(features.periodicity.len(), frames);
            features.periodicity = sample(&features.periodicity, &grid, Method::Linear);
        }
        if needs_resample(features.loudness.len(), frames) {
            let grid = grid::of_length(features.loudness.len(), frames);
            features.loudness = sample(&features.loudness, &grid, Method::Linear);
        }
        if needs_resample(features.voicing.len(), frames) {
            let grid = grid::of_length(features.voicing.len(), frames);
            features.voicing = sample(&features.voicing, &grid, Method::Nearest);
        }
        if needs_resample(features.phonemes.len(), frames) {
            let grid = grid::of_length(features.phonemes.len(), frames);
            features.phonemes = sample_labels(&features.phonemes, &grid);
        }
        if needs_resample(features.ppg.len(), frames) {
            let grid = grid::of_length(features.ppg.len(), frames);
            features.ppg = distributions(&features.ppg, &grid, self.ppg);
        }
    }
}

fn needs_resample(len: usize, frames: usize) -> bool {
    len != 0 && len != frames
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn fractional_grid() -> Vec<f64> {
        vec![0.0, 0.25, 0.5, 1.75, 2.0, 2.5, 3.9, 4.0]
    }

    #[test]
    fn constant_sequence_is_preserved_by_every_method() {
        let constant = vec![3.5f32; 5];
        for method in [Method::Linear, Method::Nearest] {
            let out = sample(&constant, &fractional_grid(), method);
            assert_eq!(out.len(), fractional_grid().len());
            for value in out {
                assert_abs_diff_eq!(value, 3.5, epsilon = 1e-6);
            }
        }
        for value in pitch(&vec![220.0f32; 5], &fractional_grid()) {
            assert_abs_diff_eq!(value, 220.0, epsilon = 1e-3);
        }
        let distribution = vec![0.7f32, 0.2, 0.1];
        let frames = vec![distribution.clone(); 5];
        for method in [
            PpgInterpolation::Nearest,
            PpgInterpolation::Linear,
            PpgInterpolation::Slerp,
        ] {
            for frame in distributions(&frames, &fractional_grid(), method) {
                for (got, want) in frame.iter().zip(&distribution) {
                    assert_abs_diff_eq!(*got, *want, epsilon = 1e-5);
                }
            }
        }
    }

    #[test]
    fn linear_is_exact_at_integer_grid_points() {
        let sequence = vec![1.0f32, -2.0, 4.5, 8.0, 0.25];
        let grid: Vec<f64> = (0..sequence.len()).map(|i| i as f64).collect();
        assert_eq!(sample(&sequence, &grid, Method::Linear), sequence);
    }

    #[test]
    fn linear_interpolates_between_neighbors() {
        let out = sample(&[0.0, 10.0, 20.0], &[0.5, 1.25], Method::Linear);
        assert_abs_diff_eq!(out[0], 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 12.5, epsilon = 1e-6);
    }

    #[test]
    fn pitch_interpolates_geometrically() {
        let out = pitch(&[100.0, 200.0], &[0.5]);
        assert_abs_diff_eq!(out[0], 100.0 * 2f32.sqrt(), epsilon = 1e-2);
        assert!((out[0] - 150.0).abs() > 1.0);
    }

    #[test]
    fn nearest_rounds_and_clamps() {
        let out = sample(&[1.0, 2.0, 3.0], &[0.4, 0.6, 2.0], Method::Nearest);
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
        assert_eq!(sample_labels(&[4, 5], &[0.49, 0.51, 1.0]), vec![4, 5, 5]);
    }

    #[test]
    fn slerp_stays_on_the_simplex() {
        let frames = vec![vec![1.0f32, 0.0, 0.0], vec![0.0, 0.5, 0.5]];
        let out = distributions(&frames, &[0.0, 0.3, 0.5, 1.0], PpgInterpolation::Slerp);
        for frame in &out {
            let total: f32 = frame.iter().sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
            assert!(frame.iter().all(|p| *p >= 0.0));
        }
        assert_abs_diff_eq!(out[0][0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(out[3][1], 0.5, epsilon = 1e-5);
    }

    #[test]
    fn reconcile_matches_pitch_length() {
        let mut features = FeatureSet {
            pitch: vec![100.0; 10],
            periodicity: vec![0.5; 9],
            loudness: vec![-20.0; 11],
            voicing: vec![1.0; 10],
            phonemes: vec![3; 8],
            ppg: vec![vec![0.5, 0.5]; 12],
            text: "hello".to_string(),
        };
        FeatureInterpolation::new(PpgInterpolation::Nearest).reconcile(&mut features);
        assert!(features.is_reconciled());
        assert_eq!(features.loudness, vec![-20.0; 10]);
        assert_eq!(features.phonemes, vec![3; 10]);
    }
}
