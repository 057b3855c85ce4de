//! Pairwise affinity between two tracks.
//!
//! Every feature dimension yields a similarity in `[-1, 1]` (1 = identical,
//! -1 = maximally dissimilar). A dimension only contributes when both tracks
//! have data for it. The weighted sum is always divided by the *configured*
//! weight total, so a pair with missing features drifts toward 0 instead of
//! being inflated by whatever few features they share.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{DEFAULT_RATING, Features, HUE_RANGE, Hsv, Spectrum, Track};

/// Plausible tempo band. Estimates outside it are clamped before comparing.
pub const MIN_BPM: f64 = 100.0;
pub const MAX_BPM: f64 = 160.0;

/// Empirical normaliser for the blurred spectral distance.
pub const SPECTRAL_SCALE: f64 = 2.5;

/// Share of the spectral similarity taken by the profile itself; the rest
/// comes from the volume-dynamics penalty.
const SPECTRAL_SHARE: f64 = 0.75;

#[derive(Error, Debug, PartialEq)]
pub enum WeightsError {
    #[error("Weight '{name}' is negative ({value})")]
    Negative { name: &'static str, value: f64 },
    #[error("Weight '{name}' is not a finite number")]
    NotFinite { name: &'static str },
    #[error("At least one weight must be non-zero")]
    ZeroSum,
}

/// Exclude low-rated tracks from sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingCutoff {
    pub enabled: bool,
    pub minimum: f64,
}

impl Default for RatingCutoff {
    fn default() -> Self {
        Self {
            enabled: false,
            minimum: DEFAULT_RATING,
        }
    }
}

/// Relative importance of each feature dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub hue: f64,
    pub brightness: f64,
    pub saturation: f64,
    pub tempo: f64,
    pub spectral: f64,
    pub path: f64,
    pub rating: RatingCutoff,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            hue: 0.5,
            brightness: 0.5,
            saturation: 1.0,
            tempo: 0.5,
            spectral: 0.5,
            path: 0.5,
            rating: RatingCutoff::default(),
        }
    }
}

impl Weights {
    /// Sum of all six weights.
    pub fn total(&self) -> f64 {
        self.hue + self.saturation + self.brightness + self.tempo + self.spectral + self.path
    }

    /// Reject configurations the model cannot use. Call this once when the
    /// weights are loaded; the computations themselves treat a zero sum as a
    /// programming error and panic.
    pub fn validate(&self) -> Result<(), WeightsError> {
        for (name, value) in self.named() {
            if !value.is_finite() {
                return Err(WeightsError::NotFinite { name });
            }
            if value < 0.0 {
                return Err(WeightsError::Negative { name, value });
            }
        }
        if self.total() <= 0.0 {
            return Err(WeightsError::ZeroSum);
        }
        Ok(())
    }

    /// Whether `track` passes the rating cutoff.
    pub fn admits(&self, track: &Track) -> bool {
        !self.rating.enabled || track.rating() >= self.rating.minimum
    }

    fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("hue", self.hue),
            ("saturation", self.saturation),
            ("brightness", self.brightness),
            ("tempo", self.tempo),
            ("spectral", self.spectral),
            ("path", self.path),
        ]
    }
}

/// Directory-tree locality supplied by the layout stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathContext {
    /// Hops between the two tracks, in `[0, tree_depth]`.
    pub distance: f64,
    /// Largest possible distance in the tree.
    pub tree_depth: f64,
}

/// Circular hue similarity over `[0, 6)`.
pub fn hue_similarity(a: f64, b: f64) -> f64 {
    let mut d = ((a - b).abs() % HUE_RANGE) / HUE_RANGE;
    // Shortest way round the wheel.
    if d > 0.5 {
        d = 1.0 - d;
    }
    1.0 - 2.0 * d
}

/// Similarity of two linear channels in `[0, 1]`.
pub fn linear_similarity(a: f64, b: f64) -> f64 {
    1.0 - 2.0 * (a - b).abs()
}

pub fn tempo_similarity(a: f64, b: f64) -> f64 {
    let a = a.clamp(MIN_BPM, MAX_BPM);
    let b = b.clamp(MIN_BPM, MAX_BPM);
    1.0 - 2.0 * (a - b).abs() / (MAX_BPM - MIN_BPM)
}

/// Bin-by-bin distance between two profiles.
fn direct_distance(a: &Spectrum, b: &Spectrum) -> f64 {
    a.bins.iter().zip(&b.bins).map(|(x, y)| (x - y).abs()).sum()
}

/// Cross distance between neighbouring bins, so a profile shifted by one bin
/// still reads as close. Each adjacent pair is visited from both sides with
/// half weight, which sums to one full term per pair and direction.
fn neighbour_distance(a: &Spectrum, b: &Spectrum) -> f64 {
    let (a, b) = (&a.bins, &b.bins);
    (1..a.len())
        .map(|i| (a[i - 1] - b[i]).abs() + (a[i] - b[i - 1]).abs())
        .sum()
}

/// Spectral profile similarity blended with the volume-dynamics penalty.
///
/// The neighbour term of a non-flat profile against itself is non-zero.
/// That self-term (averaged over both profiles) is subtracted from the
/// neighbour term only, so identical spectra score exactly 1 while the
/// direct bin-by-bin distance is kept whole.
pub fn spectral_similarity(a: &Spectrum, b: &Spectrum) -> f64 {
    let baseline = (neighbour_distance(a, a) + neighbour_distance(b, b)) / 2.0;
    let d = direct_distance(a, b) + (neighbour_distance(a, b) - baseline).max(0.0);
    let profile = (1.0 - d / SPECTRAL_SCALE).clamp(-1.0, 1.0);
    let penalty = (1.0 - (a.volume_diff - b.volume_diff).abs()).max(-1.0);
    SPECTRAL_SHARE * profile + (1.0 - SPECTRAL_SHARE) * penalty
}

pub fn path_similarity(ctx: PathContext) -> f64 {
    let ratio = (ctx.distance / ctx.tree_depth).clamp(0.0, 1.0);
    1.0 - 2.0 * ratio
}

/// Per-dimension similarities for one pair. `None` marks a dimension that
/// does not take part in the sum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Affinity {
    pub hue: Option<f64>,
    pub saturation: Option<f64>,
    pub brightness: Option<f64>,
    pub tempo: Option<f64>,
    pub spectral: Option<f64>,
    pub path: Option<f64>,
}

impl Affinity {
    pub fn between(a: &Features, b: &Features, path: Option<PathContext>) -> Self {
        let colors = a.color.zip(b.color);
        let channel = |f: fn(&Hsv) -> f64, g: fn(f64, f64) -> f64| {
            colors.map(|(ca, cb)| g(f(&ca), f(&cb)))
        };
        Self {
            hue: channel(|c| c.h, hue_similarity),
            saturation: channel(|c| c.s, linear_similarity),
            brightness: channel(|c| c.v, linear_similarity),
            tempo: a.tempo.zip(b.tempo).map(|(x, y)| tempo_similarity(x, y)),
            spectral: a
                .spectrum
                .as_ref()
                .zip(b.spectrum.as_ref())
                .map(|(x, y)| spectral_similarity(x, y)),
            path: path
                .filter(|ctx| ctx.tree_depth > 0.0)
                .map(path_similarity),
        }
    }

    /// Weighted sum of the enabled dimensions, not yet normalised.
    pub fn weighted_sum(&self, w: &Weights) -> f64 {
        [
            (w.hue, self.hue),
            (w.saturation, self.saturation),
            (w.brightness, self.brightness),
            (w.tempo, self.tempo),
            (w.spectral, self.spectral),
            (w.path, self.path),
        ]
        .into_iter()
        .filter_map(|(weight, sim)| sim.map(|s| weight * s))
        .sum()
    }
}

/// Aggregate attraction between two tracks, in `[-1, 1]`.
///
/// `path` is skipped unless both tracks have a path and the tree depth is
/// positive.
///
/// # Panics
///
/// Panics if the weights sum to zero.
pub fn attraction(weights: &Weights, a: &Track, b: &Track, path: Option<PathContext>) -> f64 {
    let total = weights.total();
    assert!(total > 0.0, "attraction needs at least one non-zero weight");

    let path = path.filter(|_| !a.path().is_empty() && !b.path().is_empty());
    let affinity = Affinity::between(a.features(), b.features(), path);
    (affinity.weighted_sum(weights) / total).clamp(-1.0, 1.0)
}
