use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::affinity::Weights;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to scan for music files (used when `scan` has no CLI args).
    pub music_dirs: Vec<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Stat files whose stored device id is missing.
    pub verify_devices: bool,
    /// Only probe files with a known audio extension while scanning.
    pub extension_filter: bool,
    /// Feature weights and rating cutoff.
    pub weights: Weights,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            music_dirs: Vec::new(),
            db_path: None,
            workers: 0,
            verify_devices: true,
            extension_filter: true,
            weights: Weights::default(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/chromix/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse a config document, falling back to default weights when the
    /// configured ones are unusable.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let mut config: AppConfig = toml::from_str(contents)?;
        if let Err(e) = config.weights.validate() {
            log::warn!("Ignoring configured weights: {}", e);
            config.weights = Weights::default();
        }
        Ok(config)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("chromix.db")
    } else {
        // Fallback: current directory
        PathBuf::from("chromix.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.music_dirs.is_empty());
        assert!(config.verify_devices);
        assert!(config.extension_filter);
        assert_eq!(config.weights, Weights::default());
    }

    #[test]
    fn test_weights_section() {
        let config = AppConfig::parse(
            r#"
            music_dirs = ["/srv/music"]
            workers = 3
            verify_devices = false

            [weights]
            hue = 2.0
            path = 0.0

            [weights.rating]
            enabled = true
            minimum = 3.5
            "#,
        )
        .unwrap();
        assert_eq!(config.music_dirs, vec![PathBuf::from("/srv/music")]);
        assert_eq!(config.resolve_workers(), 3);
        assert!(!config.verify_devices);
        assert_eq!(config.weights.hue, 2.0);
        assert_eq!(config.weights.path, 0.0);
        assert_eq!(config.weights.tempo, 0.5);
        assert!(config.weights.rating.enabled);
        assert_eq!(config.weights.rating.minimum, 3.5);
    }

    #[test]
    fn test_unusable_weights_fall_back() {
        let config = AppConfig::parse(
            "[weights]\nhue = 0.0\nbrightness = 0.0\nsaturation = 0.0\ntempo = 0.0\nspectral = 0.0\npath = 0.0\n",
        )
        .unwrap();
        assert_eq!(config.weights, Weights::default());
    }

    #[test]
    fn test_unparseable_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = \"lots\"").unwrap();
        assert_eq!(AppConfig::load_from(&path).workers, 0);
    }

    #[test]
    fn test_auto_workers_at_least_one() {
        assert!(AppConfig::default().resolve_workers() >= 1);
    }
}
