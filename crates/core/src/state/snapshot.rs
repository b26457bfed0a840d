//! # Session Snapshots
//!
//! Durable local mirror of the session state machine's externally visible
//! state, used to restore a session without re-querying the backend. A
//! snapshot is valid for restoration only while its recorded week matches
//! the currently computed week; a stale snapshot is discarded, never an
//! error. Best-effort mirror - never the source of truth.

use super::db::MentorDb;
use crate::session::Phase;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Serializable mirror of one user's session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Phase at the time of the snapshot
    pub phase: Phase,
    /// Week the mirrored data was loaded for
    pub last_loaded_week: u32,
    /// Short plan description for fast UI restore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_summary: Option<String>,
    /// Short lesson description for fast UI restore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_summary: Option<String>,
    /// Practice track the user was in, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_track: Option<String>,
    /// Timestamp of the snapshot
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// The week-match validity check: restore only when current
    pub fn is_current(&self, current_week: u32) -> bool {
        self.last_loaded_week == current_week
    }
}

/// SQLite-backed snapshot store, written only by the session state machine
pub struct SnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotStore {
    /// Create from shared MentorDb connection
    pub fn new(db: &MentorDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Save (overwrite) the snapshot for a user
    pub fn save(&self, user_id: &str, snapshot: &SessionSnapshot) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let snapshot_json = serde_json::to_string(snapshot)?;
        conn.execute(
            r#"
            INSERT INTO session_snapshots (user_id, snapshot_json, saved_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                snapshot_json = ?2,
                saved_at = ?3
            "#,
            params![user_id, snapshot_json, snapshot.saved_at.to_rfc3339()],
        )
        .context("Failed to save session snapshot")?;

        Ok(())
    }

    /// Load the snapshot for a user, if one exists
    pub fn load(&self, user_id: &str) -> Result<Option<SessionSnapshot>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let snapshot_json: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM session_snapshots WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read session snapshot")?;

        // A corrupt snapshot is treated as absent, not fatal
        Ok(snapshot_json.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Clear the snapshot for a user (hard reset, week rollover)
    pub fn clear(&self, user_id: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "DELETE FROM session_snapshots WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(week: u32) -> SessionSnapshot {
        SessionSnapshot {
            phase: Phase::Instruction,
            last_loaded_week: week,
            plan_summary: Some("Rust ownership deep-dive".to_string()),
            lesson_summary: None,
            active_track: None,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let db = MentorDb::open_in_memory().unwrap();
        let store = SnapshotStore::new(&db);

        store.save("user-1", &snapshot(5)).unwrap();

        let loaded = store.load("user-1").unwrap().unwrap();
        assert_eq!(loaded.phase, Phase::Instruction);
        assert_eq!(loaded.last_loaded_week, 5);
        assert_eq!(
            loaded.plan_summary.as_deref(),
            Some("Rust ownership deep-dive")
        );
    }

    #[test]
    fn test_save_overwrites_previous() {
        let db = MentorDb::open_in_memory().unwrap();
        let store = SnapshotStore::new(&db);

        store.save("user-1", &snapshot(5)).unwrap();
        store.save("user-1", &snapshot(6)).unwrap();

        let loaded = store.load("user-1").unwrap().unwrap();
        assert_eq!(loaded.last_loaded_week, 6);
    }

    #[test]
    fn test_clear_removes_snapshot() {
        let db = MentorDb::open_in_memory().unwrap();
        let store = SnapshotStore::new(&db);

        store.save("user-1", &snapshot(5)).unwrap();
        store.clear("user-1").unwrap();
        assert!(store.load("user-1").unwrap().is_none());
    }

    #[test]
    fn test_week_validity_check() {
        let snap = snapshot(5);
        assert!(snap.is_current(5));
        assert!(!snap.is_current(6));
        assert!(!snap.is_current(4));
    }

    #[test]
    fn test_load_missing_user_is_none() {
        let db = MentorDb::open_in_memory().unwrap();
        let store = SnapshotStore::new(&db);
        assert!(store.load("nobody").unwrap().is_none());
    }
}
