//! Interpolate a radial profile to the radius where it crosses the noise floor.
//!
//! The interpolation runs in `log10(value)`. Profile values are noisy and not
//! guaranteed to fall monotonically with radius, so the `(log10 value, radius)`
//! pairs are sorted by log-value before piecewise-linear interpolation.

use std::cmp::Ordering;

use crate::profile::Profile;

/// Mask radius of a measured profile.
///
/// Uses the filled bins only. Returns `None` when no filled bin has a positive
/// value (nothing to take the logarithm of).
pub fn estimate_radius(profile: &Profile, onesigma: f64) -> Option<f64> {
    let (radii, values): (Vec<f64>, Vec<f64>) = profile.filled().map(|(r, v, _)| (r, v)).unzip();
    interpolate_crossing(&radii, &values, onesigma)
}

/// Radius at which `values` (sampled at `radii`) reaches `onesigma`.
///
/// Non-positive and non-finite values are dropped. A threshold beyond the
/// range of the remaining values clamps to the radius at that end of the
/// sorted axis.
pub fn interpolate_crossing(radii: &[f64], values: &[f64], onesigma: f64) -> Option<f64> {
    let mut points: Vec<(f64, f64)> = radii
        .iter()
        .zip(values.iter())
        .filter(|&(_, &v)| v > 0.0 && v.is_finite())
        .map(|(&r, &v)| (v.log10(), r))
        .collect();
    if points.is_empty() {
        return None;
    }
    // Stable, so equal log-values keep their radius order
    points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let x = onesigma.log10();
    Some(interp(x, &points))
}

/// Piecewise-linear interpolation over `(x, y)` points sorted by `x`, clamped
/// at both ends.
fn interp(x: f64, points: &[(f64, f64)]) -> f64 {
    let (x_first, y_first) = points[0];
    let (x_last, y_last) = points[points.len() - 1];
    if !(x > x_first) {
        return y_first;
    }
    if x >= x_last {
        return y_last;
    }
    // First point strictly above x; x_first < x < x_last guarantees 1 <= j < len
    let j = points.partition_point(|p| p.0 <= x);
    let (x0, y0) = points[j - 1];
    let (x1, y1) = points[j];
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}
