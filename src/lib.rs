pub mod affinity;
pub mod catalog;
pub mod config;
pub mod db;
pub mod force;
pub mod identity;
pub mod import;
pub mod pathtree;
pub mod scanner;
pub mod similarity;

/// Audio file extensions we probe while scanning
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "ogg", "oga", "opus", "flac", "wav"];

/// Application name for XDG paths
pub const APP_NAME: &str = "chromix";
