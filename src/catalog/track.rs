use serde::Deserialize;

use super::TrackId;
use crate::identity::Identity;

/// Number of spectral magnitude samples per track.
pub const SPECTRUM_BINS: usize = 30;

pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 5.0;
pub const DEFAULT_RATING: f64 = (MIN_RATING + MAX_RATING) / 2.0;

/// Hue is circular over `[0, HUE_RANGE)`.
pub const HUE_RANGE: f64 = 6.0;

/// Mood colour in a cylindrical colour space.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

impl Hsv {
    /// Hue wraps into `[0, 6)`; saturation and value are clamped to `[0, 1]`.
    pub fn new(h: f64, s: f64, v: f64) -> Self {
        Self {
            h: h.rem_euclid(HUE_RANGE),
            s: s.clamp(0.0, 1.0),
            v: v.clamp(0.0, 1.0),
        }
    }

    /// Convert the older two-channel hue/brightness encoding.
    ///
    /// Brightness 0.5 is the fully saturated hue. Below that the colour
    /// darkens toward black, above it it washes out toward white.
    pub fn from_hue_brightness(hue: f64, brightness: f64) -> Self {
        let b = brightness.clamp(0.0, 1.0);
        if b <= 0.5 {
            Self::new(hue, 1.0, b * 2.0)
        } else {
            Self::new(hue, (1.0 - b) * 2.0, 1.0)
        }
    }
}

/// Spectral profile plus the volume-dynamics indicator measured with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spectrum {
    pub bins: [f64; SPECTRUM_BINS],
    /// Relative difference between the loudest and the average frame.
    pub volume_diff: f64,
}

impl Spectrum {
    /// Bins are clamped to `[0, 1]`.
    pub fn new(mut bins: [f64; SPECTRUM_BINS], volume_diff: f64) -> Self {
        for b in &mut bins {
            *b = b.clamp(0.0, 1.0);
        }
        Self { bins, volume_diff }
    }

    /// Returns `None` unless `bins` has exactly `SPECTRUM_BINS` samples.
    pub fn from_slice(bins: &[f64], volume_diff: f64) -> Option<Self> {
        let bins: [f64; SPECTRUM_BINS] = bins.try_into().ok()?;
        Some(Self::new(bins, volume_diff))
    }
}

/// Attributes shared by every member of an alias chain.
///
/// Each `None` is a legitimately missing dimension, never a zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    /// Tempo in BPM; `None` when undefined.
    pub tempo: Option<f64>,
    pub spectrum: Option<Spectrum>,
    pub color: Option<Hsv>,
    pub rating: Option<f64>,
    /// Touched during the current load pass.
    pub marked: bool,
}

impl Features {
    /// The user rating, or the midpoint of the scale when unrated.
    pub fn rating_or_default(&self) -> f64 {
        self.rating.unwrap_or(DEFAULT_RATING)
    }

    pub fn set_rating(&mut self, rating: f64) {
        self.rating = Some(rating.clamp(MIN_RATING, MAX_RATING));
    }
}

/// Container formats a track can be catalogued as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Ogg,
    Mp3,
    Wav,
    Flac,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ogg => "ogg",
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Flac => "flac",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ogg" => Some(Self::Ogg),
            "mp3" => Some(Self::Mp3),
            "wav" => Some(Self::Wav),
            "flac" => Some(Self::Flac),
            _ => None,
        }
    }
}

/// One catalogued path.
#[derive(Debug, Clone)]
pub struct Track {
    path: String,
    /// Byte offset of the basename within `path`.
    name_start: usize,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_secs: u32,
    pub format: Option<AudioFormat>,
    pub(crate) features: Features,
    pub identity: Identity,
    /// The file existed the last time it was checked.
    pub reachable: bool,
    pub(crate) prev: Option<TrackId>,
    pub(crate) next: Option<TrackId>,
}

impl Track {
    /// A fresh record: every feature absent, rating at the midpoint, reachable.
    pub fn new(path: &str) -> Self {
        let mut track = Self {
            path: String::new(),
            name_start: 0,
            title: None,
            artist: None,
            album: None,
            duration_secs: 0,
            format: None,
            features: Features::default(),
            identity: Identity::default(),
            reachable: true,
            prev: None,
            next: None,
        };
        track.set_path(path);
        track
    }

    /// Replace the path and recompute the basename.
    pub fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
        self.name_start = path
            .rfind(std::path::is_separator)
            .map(|i| i + 1)
            .unwrap_or(0);
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Substring after the final path separator.
    pub fn name(&self) -> &str {
        &self.path[self.name_start..]
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Mutable access for records that are not yet in a catalog. Once a
    /// track is inserted, edit it through `Catalog::update_features` so the
    /// change reaches its aliases.
    pub fn features_mut(&mut self) -> &mut Features {
        &mut self.features
    }

    pub fn rating(&self) -> f64 {
        self.features.rating_or_default()
    }

    pub fn prev(&self) -> Option<TrackId> {
        self.prev
    }

    pub fn next(&self) -> Option<TrackId> {
        self.next
    }

    /// Head of its chain (or not in a chain at all).
    pub fn is_canonical(&self) -> bool {
        self.prev.is_none()
    }

    /// Display label: the tag title when present, else the basename.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or_else(|| self.name())
    }
}
