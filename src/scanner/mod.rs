pub mod metadata;

use crate::catalog::{Catalog, Track};
use crate::identity::{FsProbe, Identity};
use crate::SUPPORTED_EXTENSIONS;
use indicatif::{ProgressBar, ProgressStyle};
use metadata::MetadataExtractor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Metadata error for {path}: {message}")]
    Metadata { path: String, message: String },
    #[error("Could not stat {0}")]
    Stat(String),
    #[error(transparent)]
    Catalog(#[from] crate::catalog::CatalogError),
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Only probe files with a supported audio extension.
    pub extension_filter: bool,
    pub show_progress: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extension_filter: true,
            show_progress: true,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ScanResult {
    pub scanned: u64,
    pub new: u64,
    pub repeats: u64,
    pub not_tracks: u64,
    pub skipped: u64,
    pub errors: u64,
}

enum FileAction {
    New,
    Repeat,
    NotTrack,
    Skipped,
}

fn has_supported_extension(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Walk `paths` and add every file the catalog has not seen yet.
///
/// Files already catalogued, or cached as non-tracks, are skipped. A file
/// the extractor rejects is cached as a non-track. A new file whose device
/// and inode match a catalogued track is declared a repeat of it.
pub fn scan(
    catalog: &mut Catalog,
    extractor: &dyn MetadataExtractor,
    probe: &dyn FsProbe,
    paths: &[PathBuf],
    options: &ScanOptions,
) -> ScanResult {
    // First pass: collect candidate files
    let mut files: Vec<PathBuf> = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if options.extension_filter && !has_supported_extension(entry.path()) {
                continue;
            }
            files.push(entry.into_path());
        }
    }

    let pb = if options.show_progress {
        ProgressBar::new(files.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    pb.set_message("Scanning...");

    let mut result = ScanResult::default();

    for path in &files {
        result.scanned += 1;
        match process_file(catalog, extractor, probe, path) {
            Ok(FileAction::New) => result.new += 1,
            Ok(FileAction::Repeat) => result.repeats += 1,
            Ok(FileAction::NotTrack) => result.not_tracks += 1,
            Ok(FileAction::Skipped) => result.skipped += 1,
            Err(e) => {
                log::warn!("Error scanning {}: {}", path.display(), e);
                result.errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!(
        "Done: {} new, {} repeats, {} not tracks, {} skipped, {} errors",
        result.new, result.repeats, result.not_tracks, result.skipped, result.errors
    ));

    result
}

fn process_file(
    catalog: &mut Catalog,
    extractor: &dyn MetadataExtractor,
    probe: &dyn FsProbe,
    path: &Path,
) -> Result<FileAction, ScanError> {
    let file_path = path.to_string_lossy().to_string();

    // Load-or-create: never re-probe a known path
    if catalog.lookup_by_path(&file_path).is_some() || catalog.is_not_track(&file_path) {
        return Ok(FileAction::Skipped);
    }

    let stat = probe
        .stat(&file_path)
        .ok_or_else(|| ScanError::Stat(file_path.clone()))?;

    let info = match extractor.extract(path) {
        Ok(info) => info,
        Err(e) => {
            log::debug!("{} is not a track: {}", file_path, e);
            catalog.add_not_track(&file_path);
            return Ok(FileAction::NotTrack);
        }
    };

    let mut track = Track::new(&file_path);
    track.title = info.title;
    track.artist = info.artist;
    track.album = info.album;
    track.duration_secs = info.duration_secs;
    track.format = Some(info.format);
    track.identity = Identity::new(stat.inode, stat.device);
    let id = catalog.insert(track);

    let candidates = catalog.find_alias_candidates(id)?;
    if !candidates.collisions.is_empty() {
        log::debug!(
            "{} shares its fingerprint with {} unrelated track(s)",
            file_path,
            candidates.collisions.len()
        );
    }
    match candidates.confirmed.first() {
        Some(&original) => {
            catalog.declare_repeat(id, original)?;
            log::info!(
                "{} is the same file as {}",
                file_path,
                catalog.track(original)?.path()
            );
            Ok(FileAction::Repeat)
        }
        None => Ok(FileAction::New),
    }
}

#[cfg(test)]
mod tests {
    use super::metadata::FileInfo;
    use super::*;
    use crate::catalog::AudioFormat;
    use crate::identity::StdProbe;

    /// Treats every `.mp3` as a track titled after its file stem.
    struct StubExtractor;

    impl MetadataExtractor for StubExtractor {
        fn extract(&self, path: &Path) -> Result<FileInfo, ScanError> {
            if path.extension().and_then(|e| e.to_str()) != Some("mp3") {
                return Err(ScanError::Metadata {
                    path: path.display().to_string(),
                    message: "not mp3".into(),
                });
            }
            Ok(FileInfo {
                format: AudioFormat::Mp3,
                duration_secs: 180,
                title: path.file_stem().map(|s| s.to_string_lossy().to_string()),
                artist: None,
                album: None,
            })
        }
    }

    fn quiet(extension_filter: bool) -> ScanOptions {
        ScanOptions {
            extension_filter,
            show_progress: false,
        }
    }

    fn library() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"a").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"jpg").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("c.mp3"), b"c").unwrap();
        dir
    }

    #[test]
    fn test_scan_sorts_tracks_from_non_tracks() {
        let dir = library();
        let mut cat = Catalog::new();
        let roots = vec![dir.path().to_path_buf()];

        let result = scan(&mut cat, &StubExtractor, &StdProbe, &roots, &quiet(false));
        assert_eq!(result.scanned, 3);
        assert_eq!(result.new, 2);
        assert_eq!(result.not_tracks, 1);
        assert_eq!(cat.len(), 2);
        assert_eq!(cat.not_tracks().len(), 1);

        let a = dir.path().join("a.mp3");
        let id = cat.lookup_by_path(a.to_str().unwrap()).unwrap();
        let track = cat.track(id).unwrap();
        assert_eq!(track.title.as_deref(), Some("a"));
        assert_eq!(track.duration_secs, 180);
        assert_eq!(track.format, Some(AudioFormat::Mp3));
    }

    #[test]
    fn test_rescan_skips_known_paths() {
        let dir = library();
        let mut cat = Catalog::new();
        let roots = vec![dir.path().to_path_buf()];
        scan(&mut cat, &StubExtractor, &StdProbe, &roots, &quiet(false));

        let again = scan(&mut cat, &StubExtractor, &StdProbe, &roots, &quiet(false));
        assert_eq!(again.skipped, 3);
        assert_eq!(again.new, 0);
        assert_eq!(cat.len(), 2);
    }

    #[test]
    fn test_extension_filter() {
        let dir = library();
        let mut cat = Catalog::new();
        let roots = vec![dir.path().to_path_buf()];
        let result = scan(&mut cat, &StubExtractor, &StdProbe, &roots, &quiet(true));
        assert_eq!(result.scanned, 2);
        assert_eq!(result.not_tracks, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_hardlink_becomes_repeat() {
        let dir = library();
        std::fs::hard_link(dir.path().join("a.mp3"), dir.path().join("b.mp3")).unwrap();
        let mut cat = Catalog::new();
        let roots = vec![dir.path().to_path_buf()];

        let result = scan(&mut cat, &StubExtractor, &StdProbe, &roots, &quiet(true));
        assert_eq!(result.new, 2);
        assert_eq!(result.repeats, 1);

        let a = cat
            .lookup_by_path(dir.path().join("a.mp3").to_str().unwrap())
            .unwrap();
        let b = cat
            .lookup_by_path(dir.path().join("b.mp3").to_str().unwrap())
            .unwrap();
        assert_eq!(cat.chain(a).unwrap(), vec![a, b]);
    }
}
