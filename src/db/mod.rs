pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Cached graph payload is corrupt: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// SQLite cache of built jump graphs, keyed by track fingerprint and graph
/// configuration.
pub struct GraphStore {
    pub conn: Connection,
}

impl GraphStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
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

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: one row per (track, graph configuration)
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS graphs (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint     TEXT NOT NULL,
                config_key      TEXT NOT NULL,
                source          TEXT,

                -- Summary, for listing without decoding the payload
                kind            TEXT NOT NULL,
                node_count      INTEGER NOT NULL,
                candidate_count INTEGER NOT NULL,
                edge_count      INTEGER NOT NULL,
                warning_count   INTEGER NOT NULL,
                threshold       REAL,

                -- Full AnnotatedTrack as JSON
                payload         TEXT NOT NULL,

                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(fingerprint, config_key)
            );

            CREATE INDEX IF NOT EXISTS idx_graphs_fingerprint ON graphs(fingerprint);
            CREATE INDEX IF NOT EXISTS idx_graphs_source ON graphs(source);
            ",
        )?;
        Ok(())
    }
}
