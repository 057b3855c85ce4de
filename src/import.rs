//! Feature records produced by an external analyzer.
//!
//! An analysis file lists per-path feature values. Each record is merged onto
//! the catalogued track: fields present in the record overwrite, absent ones
//! are left alone. Edits go through [`Catalog::update_features`], so every
//! alias of an imported track picks up the same values.
//!
//! JSON files hold an array of records; TOML files hold `[[track]]` tables.
//!
//! ```toml
//! [[track]]
//! path = "/music/a.ogg"
//! tempo = "undef"
//! color = { h = 2.5, s = 0.4, v = 0.8 }
//! rating = 4.0
//! spectrum = { bins = [0.1, 0.2, ...], volume_diff = 0.3 }
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::catalog::{Catalog, CatalogError, Features, Hsv, SPECTRUM_BINS, Spectrum};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Paths not in the catalog: {}", .0.join(", "))]
    UnknownPaths(Vec<String>),
    #[error("{path}: spectrum has {len} bins, expected {SPECTRUM_BINS}")]
    BadSpectrum { path: String, len: usize },
    #[error("{path}: tempo must be a number or \"undef\", got {value:?}")]
    BadTempo { path: String, value: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

pub type Result<T> = std::result::Result<T, ImportError>;

/// A BPM value, or a label. Only `"undef"` is accepted as a label.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TempoField {
    Bpm(f64),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpectrumField {
    pub bins: Vec<f64>,
    #[serde(default)]
    pub volume_diff: f64,
}

/// One analyzer result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureRecord {
    pub path: String,
    #[serde(default)]
    pub tempo: Option<TempoField>,
    #[serde(default)]
    pub spectrum: Option<SpectrumField>,
    #[serde(default)]
    pub color: Option<Hsv>,
    #[serde(default)]
    pub rating: Option<f64>,
}

#[derive(Deserialize)]
struct TomlDocument {
    #[serde(default)]
    track: Vec<FeatureRecord>,
}

/// Outcome of applying a batch of records.
#[derive(Debug, Default, PartialEq)]
pub struct ImportReport {
    /// Records applied.
    pub records: usize,
    /// Aliases that received the imported values through their chain.
    pub aliases_updated: usize,
}

/// Checked form of a record, ready to merge.
struct FeatureEdit {
    tempo: Option<Option<f64>>,
    spectrum: Option<Spectrum>,
    color: Option<Hsv>,
    rating: Option<f64>,
}

impl FeatureEdit {
    fn from_record(record: &FeatureRecord) -> Result<Self> {
        let tempo = match &record.tempo {
            None => None,
            Some(TempoField::Bpm(bpm)) => Some(Some(*bpm)),
            Some(TempoField::Label(label)) if label.eq_ignore_ascii_case("undef") => Some(None),
            Some(TempoField::Label(label)) => {
                return Err(ImportError::BadTempo {
                    path: record.path.clone(),
                    value: label.clone(),
                });
            }
        };
        let spectrum = match &record.spectrum {
            None => None,
            Some(s) => Some(Spectrum::from_slice(&s.bins, s.volume_diff).ok_or_else(|| {
                ImportError::BadSpectrum {
                    path: record.path.clone(),
                    len: s.bins.len(),
                }
            })?),
        };
        Ok(Self {
            tempo,
            spectrum,
            color: record.color.map(|c| Hsv::new(c.h, c.s, c.v)),
            rating: record.rating,
        })
    }

    fn apply(&self, features: &mut Features) {
        if let Some(tempo) = self.tempo {
            features.tempo = tempo;
        }
        if let Some(spectrum) = self.spectrum {
            features.spectrum = Some(spectrum);
        }
        if let Some(color) = self.color {
            features.color = Some(color);
        }
        if let Some(rating) = self.rating {
            features.set_rating(rating);
        }
    }
}

/// Parse an analysis document. `is_toml` selects the TOML layout;
/// otherwise the text is a JSON array.
pub fn parse_records(contents: &str, is_toml: bool) -> Result<Vec<FeatureRecord>> {
    if is_toml {
        let doc: TomlDocument = toml::from_str(contents)?;
        Ok(doc.track)
    } else {
        Ok(serde_json::from_str(contents)?)
    }
}

/// Read an analysis file, choosing the layout by extension.
pub fn read_records(path: &Path) -> Result<Vec<FeatureRecord>> {
    let contents = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    parse_records(&contents, is_toml)
}

/// Merge `records` onto the catalog.
///
/// Every record is checked before anything is touched: an unknown path or a
/// malformed value rejects the whole batch and leaves the catalog unchanged.
pub fn import_features(catalog: &mut Catalog, records: &[FeatureRecord]) -> Result<ImportReport> {
    let unknown: Vec<String> = records
        .iter()
        .filter(|r| catalog.lookup_by_path(&r.path).is_none())
        .map(|r| r.path.clone())
        .collect();
    if !unknown.is_empty() {
        return Err(ImportError::UnknownPaths(unknown));
    }

    let edits = records
        .iter()
        .map(FeatureEdit::from_record)
        .collect::<Result<Vec<_>>>()?;

    let mut report = ImportReport::default();
    for (record, edit) in records.iter().zip(&edits) {
        let Some(id) = catalog.lookup_by_path(&record.path) else {
            continue;
        };
        catalog.update_features(id, |f| edit.apply(f))?;
        report.records += 1;
        report.aliases_updated += catalog.chain(id)?.len() - 1;
    }

    log::info!(
        "Imported {} feature records ({} aliases updated)",
        report.records,
        report.aliases_updated
    );
    Ok(report)
}
