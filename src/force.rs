//! Signed interaction strength handed to the layout stage.

use crate::affinity::{PathContext, Weights, attraction};
use crate::catalog::Track;

/// Amplification applied to attraction before squaring.
pub const FORCE_FACTOR: f64 = 10.0;

/// Share of the total weight covered by the dimensions `track` has data
/// for, in `[0, 1]`. Colour counts as one bundle (hue, saturation,
/// brightness). Path locality always counts.
///
/// # Panics
///
/// Panics if the weights sum to zero.
pub fn mass(weights: &Weights, track: &Track) -> f64 {
    let max = weights.total();
    assert!(max > 0.0, "mass needs at least one non-zero weight");

    let f = track.features();
    let mut m = weights.path;
    if f.spectrum.is_some() {
        m += weights.spectral;
    }
    if f.color.is_some() {
        m += weights.hue + weights.brightness + weights.saturation;
    }
    if f.tempo.is_some() {
        m += weights.tempo;
    }
    (m / max).clamp(0.0, 1.0)
}

/// `mass(a) * mass(b) * (10 * attraction)^2`, carrying the sign of the
/// attraction. Zero attraction counts as positive.
pub fn force(weights: &Weights, a: &Track, b: &Track, path: Option<PathContext>) -> f64 {
    let attr = attraction(weights, a, b, path);
    let sign = if attr < 0.0 { -1.0 } else { 1.0 };
    mass(weights, a) * mass(weights, b) * (FORCE_FACTOR * attr).powi(2) * sign
}
