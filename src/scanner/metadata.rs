use lofty::file::{FileType, TaggedFileExt};
use lofty::prelude::*;
use std::path::Path;

use super::ScanError;
use crate::catalog::AudioFormat;

/// What the extractor learned about a playable file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub format: AudioFormat,
    pub duration_secs: u32,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// Decides whether a path is a track and reads its tags. Any error means
/// "not a track".
pub trait MetadataExtractor: Sync {
    fn extract(&self, path: &Path) -> Result<FileInfo, ScanError>;
}

/// Extractor backed by lofty's format probing and tag readers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyExtractor;

/// Map lofty's file types onto the formats the catalog knows.
pub fn audio_format(file_type: &FileType) -> Option<AudioFormat> {
    match file_type {
        FileType::Mpeg => Some(AudioFormat::Mp3),
        FileType::Flac => Some(AudioFormat::Flac),
        FileType::Wav => Some(AudioFormat::Wav),
        FileType::Vorbis | FileType::Opus | FileType::Speex => Some(AudioFormat::Ogg),
        _ => None,
    }
}

impl MetadataExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> Result<FileInfo, ScanError> {
        let tagged_file = lofty::read_from_path(path).map_err(|e| ScanError::Metadata {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let format = audio_format(&tagged_file.file_type()).ok_or_else(|| ScanError::Metadata {
            path: path.display().to_string(),
            message: format!("unsupported file type {:?}", tagged_file.file_type()),
        })?;

        let duration_secs = tagged_file.properties().duration().as_secs() as u32;

        // Try primary tag, then fall back
        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag());

        let (title, artist, album) = match tag {
            Some(tag) => (
                tag.title().map(|s| s.to_string()),
                tag.artist().map(|s| s.to_string()),
                tag.album().map(|s| s.to_string()),
            ),
            None => {
                log::debug!("No tags in {}", path.display());
                (None, None, None)
            }
        };

        Ok(FileInfo {
            format,
            duration_secs,
            title,
            artist,
            album,
        })
    }
}
