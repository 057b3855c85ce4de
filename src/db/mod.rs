pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Catalog(#[from] crate::catalog::CatalogError),
}

pub type Result<T> = std::result::Result<T, DbError>;

const SCHEMA_VERSION: i32 = 1;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than this build (v{SCHEMA_VERSION})"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: tracks (with alias declarations) + non-track cache
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tracks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                position        INTEGER NOT NULL,
                path            TEXT NOT NULL UNIQUE,
                -- Path this track is a repeat of (its predecessor in the chain)
                repeats         TEXT,

                -- Metadata from tags
                title           TEXT,
                artist          TEXT,
                album           TEXT,
                duration_secs   INTEGER NOT NULL DEFAULT 0,
                format          TEXT,

                -- Filesystem identity; NULL device is re-read on load
                device          INTEGER,
                inode           INTEGER NOT NULL DEFAULT 0,

                -- Shared features, NULL when absent
                tempo_bpm       REAL,
                spectrum        TEXT,
                volume_diff     REAL,
                color_h         REAL,
                color_s         REAL,
                color_v         REAL,
                rating          REAL,

                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_tracks_position ON tracks(position);
            CREATE INDEX IF NOT EXISTS idx_tracks_repeats ON tracks(repeats);

            CREATE TABLE IF NOT EXISTS not_tracks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                path            TEXT NOT NULL UNIQUE
            );
            ",
        )?;
        Ok(())
    }
}
