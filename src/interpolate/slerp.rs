/// Below this angle the two frames are treated as parallel.
const PARALLEL_EPSILON: f64 = 1e-6;

/// Great-circle interpolation between two distributions.
///
/// `sqrt(p)` of a distribution has unit L2 norm, so both frames live on the
/// unit sphere; the interpolated point is squared and renormalized back onto
/// the probability simplex.
pub(super) fn simplex(a: &[f32], b: &[f32], weight: f64) -> Vec<f32> {
    let ua = unit_sqrt(a);
    let ub = unit_sqrt(b);
    let dot = ua
        .iter()
        .zip(&ub)
        .map(|(x, y)| x * y)
        .sum::<f64>()
        .clamp(-1.0, 1.0);
    let omega = dot.acos();

    let (wa, wb) = if omega.abs() < PARALLEL_EPSILON {
        (1.0 - weight, weight)
    } else {
        let sin_omega = omega.sin();
        (
            ((1.0 - weight) * omega).sin() / sin_omega,
            (weight * omega).sin() / sin_omega,
        )
    };

    let squared: Vec<f64> = ua
        .iter()
        .zip(&ub)
        .map(|(x, y)| {
            let v = wa * x + wb * y;
            v * v
        })
        .collect();
    let total: f64 = squared.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return a.to_vec();
    }
    squared.into_iter().map(|v| (v / total) as f32).collect()
}

fn unit_sqrt(frame: &[f32]) -> Vec<f64> {
    let roots: Vec<f64> = frame.iter().map(|&p| (p.max(0.0) as f64).sqrt()).collect();
    let norm = roots.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm <= 0.0 {
        return roots;
    }
    roots.into_iter().map(|v| v / norm).collect()
}
