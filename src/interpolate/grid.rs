use crate::alignment::Alignment;
use crate::error::EvaluationError;

/// `target` evenly spaced positions from `0` to `source - 1`.
pub fn of_length(source: usize, target: usize) -> Vec<f64> {
    match (source, target) {
        (_, 0) => Vec::new(),
        (0, _) | (1, _) => vec![0.0; target],
        (_, 1) => vec![0.0],
        _ => {
            let step = (source - 1) as f64 / (target - 1) as f64;
            (0..target).map(|j| j as f64 * step).collect()
        }
    }
}

/// Time-warp grid that maps each frame of the stretched utterance back to a
/// fractional frame of the original.
///
/// Phoneme boundaries of both alignments are paired up and converted to
/// frames. Audio outside the aligned span keeps its original timing. The
/// grid has `round(original_frames * stretched_duration / original_duration)`
/// entries, clamped to `[0, original_frames - 1]`.
pub fn from_alignments(
    original: &Alignment,
    stretched: &Alignment,
    original_frames: usize,
    hop_seconds: f64,
) -> Result<Vec<f64>, EvaluationError> {
    if original.phoneme_count() != stretched.phoneme_count() {
        return Err(EvaluationError::invalid_input(format!(
            "cannot pair alignments with {} and {} phonemes",
            original.phoneme_count(),
            stretched.phoneme_count()
        )));
    }
    if original_frames == 0 || original.phoneme_count() == 0 {
        return Err(EvaluationError::invalid_input(
            "time-warp grid needs a non-empty alignment and at least one frame",
        ));
    }
    if !(hop_seconds > 0.0) {
        return Err(EvaluationError::invalid_input("hop must be positive"));
    }

    let to_frames = |seconds: f64| seconds / hop_seconds;
    let mut source: Vec<f64> = original.boundaries().into_iter().map(to_frames).collect();
    let mut target: Vec<f64> = stretched.boundaries().into_iter().map(to_frames).collect();

    // Leading silence before the first phoneme.
    if source[0] > 0.0 || target[0] > 0.0 {
        source.insert(0, 0.0);
        target.insert(0, 0.0);
    }
    // Trailing audio past the last phoneme.
    let frames = original_frames as f64;
    let (source_end, target_end) = (source[source.len() - 1], target[target.len() - 1]);
    if frames > source_end {
        source.push(frames);
        target.push(target_end + (frames - source_end));
    }

    let source_duration = source[source.len() - 1];
    let target_duration = target[target.len() - 1];
    if !(source_duration > 0.0) {
        return Err(EvaluationError::invalid_input("original alignment has zero duration"));
    }
    let length = ((frames * target_duration / source_duration).round() as usize).max(1);
    // Alignments longer than the audio compress the sampling positions.
    let scale = source_duration / frames;

    let last = frames - 1.0;
    let grid = (0..length)
        .map(|j| {
            let position = j as f64 * scale;
            warp(&target, &source, position).clamp(0.0, last)
        })
        .collect();
    Ok(grid)
}

/// Piecewise-linear map from `from` knots to `to` knots.
fn warp(from: &[f64], to: &[f64], position: f64) -> f64 {
    let segments = from.len() - 1;
    let after = from.partition_point(|&knot| knot <= position);
    let i = after.saturating_sub(1).min(segments - 1);
    let width = from[i + 1] - from[i];
    if width <= 0.0 {
        return to[i + 1];
    }
    let fraction = ((position - from[i]) / width).clamp(0.0, 1.0);
    to[i] + fraction * (to[i + 1] - to[i])
}
