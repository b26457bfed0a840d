//! # Session Events
//!
//! Event types emitted by the session state machine for UI streaming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of session event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    /// Session restored from a valid snapshot
    SessionResumed,
    /// Week number changed; per-week state was invalidated
    WeekRolledOver,
    /// An agent call was dispatched
    AgentCallStarted,
    /// An agent call resolved successfully
    AgentCallCompleted,
    /// An agent call failed (retryable by the user)
    AgentCallFailed,
    /// The learning phase changed
    PhaseChanged,
    /// The weekly progress percentage changed
    ProgressUpdated,
    /// The user rejected the plan and restarted the week
    PlanRejected,
    /// User-initiated hard reset
    SessionReset,
}

/// An event in a learning session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Unique event ID
    pub id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    pub kind: SessionEventKind,
    /// User the event belongs to
    pub user_id: String,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl SessionEvent {
    /// Create a new event
    pub fn new(kind: SessionEventKind, user_id: &str) -> Self {
        Self {
            id: event_id(),
            timestamp: Utc::now(),
            kind,
            user_id: user_id.to_string(),
            data: None,
        }
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Generate a simple unique event id
fn event_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let salt = RandomState::new().build_hasher().finish() as u32;
    format!("{:x}-{:x}", nanos, salt)
}
