//! # Unified Mentor Database
//!
//! Single SQLite database for all durable Mentor state: weekly progress
//! records and session snapshots. Opens at `.mentor/mentor.db` in
//! production; tests use in-memory connections.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Unified database manager for all Mentor state
pub struct MentorDb {
    conn: Arc<Mutex<Connection>>,
}

impl MentorDb {
    /// Open or create the unified database at `.mentor/mentor.db`
    pub fn open() -> Result<Self> {
        Self::open_at(".mentor/mentor.db")
    }

    /// Open database at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open mentor database")?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory mentor database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a shared connection for use by the store modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            self.migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    /// Migration to version 1 - complete schema
    fn migrate_v1(&self, conn: &Connection) -> Result<()> {
        // One progress record per (user, week); per-agent state as JSON
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS weekly_progress (
                user_id TEXT NOT NULL,
                week INTEGER NOT NULL,
                agents_json TEXT NOT NULL DEFAULT '{}',
                overall_progress INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, week)
            )
            "#,
            [],
        )?;

        // Latest session snapshot per user (fast-resume mirror)
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS session_snapshots (
                user_id TEXT PRIMARY KEY,
                snapshot_json TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_progress_user ON weekly_progress(user_id)",
            [],
        )?;

        tracing::info!("MentorDb initialized with schema version {}", SCHEMA_VERSION);

        Ok(())
    }
}
