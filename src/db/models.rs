use crate::catalog::{AudioFormat, Features, Hsv, Spectrum, Track};

/// One row of the `tracks` table.
///
/// Alias rows carry only their path, identity and the path they repeat.
/// Tags and features live on the chain head.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackRow {
    pub path: String,
    /// Path of the immediate predecessor in the alias chain.
    pub repeats: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_secs: u32,
    pub format: Option<String>,
    pub device: Option<i64>,
    pub inode: i64,
    pub tempo_bpm: Option<f64>,
    /// JSON array of spectrum bins.
    pub spectrum: Option<String>,
    pub volume_diff: Option<f64>,
    pub color_h: Option<f64>,
    pub color_s: Option<f64>,
    pub color_v: Option<f64>,
    pub rating: Option<f64>,
}

impl TrackRow {
    pub fn from_track(track: &Track, repeats: Option<&str>) -> serde_json::Result<Self> {
        let mut row = Self {
            path: track.path().to_string(),
            repeats: repeats.map(str::to_string),
            device: Some(track.identity.device as i64),
            inode: track.identity.inode as i64,
            ..Self::default()
        };
        if repeats.is_some() {
            return Ok(row);
        }

        row.title = track.title.clone();
        row.artist = track.artist.clone();
        row.album = track.album.clone();
        row.duration_secs = track.duration_secs;
        row.format = track.format.map(|f| f.as_str().to_string());

        let f = track.features();
        row.tempo_bpm = f.tempo;
        if let Some(spectrum) = &f.spectrum {
            row.spectrum = Some(serde_json::to_string(&spectrum.bins[..])?);
            row.volume_diff = Some(spectrum.volume_diff);
        }
        if let Some(c) = f.color {
            row.color_h = Some(c.h);
            row.color_s = Some(c.s);
            row.color_v = Some(c.v);
        }
        row.rating = f.rating;
        Ok(row)
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.format.as_deref().and_then(AudioFormat::parse)
    }

    /// Decode the persisted features. A malformed spectrum is dropped
    /// with a warning rather than failing the whole load.
    pub fn features(&self) -> Features {
        let spectrum = self.spectrum.as_deref().and_then(|json| {
            let bins: Vec<f64> = match serde_json::from_str(json) {
                Ok(bins) => bins,
                Err(e) => {
                    log::warn!("Bad spectrum for {}: {}", self.path, e);
                    return None;
                }
            };
            let decoded = Spectrum::from_slice(&bins, self.volume_diff.unwrap_or(0.0));
            if decoded.is_none() {
                log::warn!("Spectrum for {} has {} bins", self.path, bins.len());
            }
            decoded
        });

        // Rows with hue and brightness but no saturation use the older
        // two-channel encoding.
        let color = match (self.color_h, self.color_s, self.color_v) {
            (Some(h), Some(s), Some(v)) => Some(Hsv::new(h, s, v)),
            (Some(h), None, Some(b)) => Some(Hsv::from_hue_brightness(h, b)),
            _ => None,
        };

        Features {
            tempo: self.tempo_bpm,
            spectrum,
            color,
            rating: self.rating,
            marked: false,
        }
    }
}

/// Outcome of loading the catalog.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub tracks: usize,
    pub not_tracks: usize,
    /// Non-track paths dropped because the file is gone.
    pub dropped_not_tracks: usize,
    pub unreachable: usize,
    /// `(alias, repeats)` declarations that could not be replayed. The
    /// alias is kept as a standalone track.
    pub orphans: Vec<(String, String)>,
}

/// Summary statistics for the library.
pub struct LibraryStats {
    pub total_tracks: i64,
    pub repeat_tracks: i64,
    pub analyzed_tracks: i64,
    pub colored_tracks: i64,
    pub not_tracks: i64,
    pub total_duration_hours: f64,
    pub formats: Vec<(String, i64)>,
}
