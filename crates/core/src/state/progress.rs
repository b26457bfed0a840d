//! # Weekly Progress Records
//!
//! Durable per-user, per-week progress: each agent's last output and a
//! completion flag, plus a derived overall percentage. The record is
//! mutated only through the `ProgressRecorder`; `overall_progress` is a
//! convenience cache, always recomputable from the completion map.

use super::db::MentorDb;
use crate::error::OrchestratorError;
use crate::models::AgentId;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Per-agent slice of a weekly record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentProgress {
    /// Last output payload from this agent (opaque)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Whether this agent's work is complete for the week
    #[serde(default)]
    pub completed: bool,
}

/// One durable record per `(user, week)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyProgressRecord {
    pub user_id: String,
    pub week: u32,
    /// Agent wire id -> progress slice
    #[serde(default)]
    pub agents: BTreeMap<String, AgentProgress>,
    /// Derived: `round(100 * completed / total)`
    pub overall_progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WeeklyProgressRecord {
    /// Create an empty record for a user and week
    pub fn new(user_id: &str, week: u32) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            week,
            agents: BTreeMap::new(),
            overall_progress: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of agents with the completion flag set
    pub fn completed_count(&self) -> usize {
        self.agents.values().filter(|a| a.completed).count()
    }

    /// Whether a specific agent has completed
    pub fn is_completed(&self, agent: AgentId) -> bool {
        self.agents
            .get(agent.as_str())
            .map(|a| a.completed)
            .unwrap_or(false)
    }

    /// Recompute the overall percentage from the completion map
    pub fn recompute_overall(&mut self) {
        let total = AgentId::all().len();
        let completed = self.completed_count();
        self.overall_progress = ((100.0 * completed as f64) / total as f64).round() as u8;
    }
}

/// SQLite-backed store for weekly progress records
///
/// Upsert is a merge, never a replace: the read-modify-write happens inside
/// one connection lock, so the payload merge and the flag update land
/// together or not at all.
pub struct ProgressStore {
    conn: Arc<Mutex<Connection>>,
}

impl ProgressStore {
    /// Create from shared MentorDb connection
    pub fn new(db: &MentorDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Load the record for a user and week, if any
    pub fn get(&self, user_id: &str, week: u32) -> Result<Option<WeeklyProgressRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        Self::get_locked(&conn, user_id, week)
    }

    /// Merge-upsert: load or create the record, apply `mutate`, recompute
    /// the overall percentage, and write the result back - all under one
    /// lock so no half-written record is observable.
    pub fn upsert_with<F>(
        &self,
        user_id: &str,
        week: u32,
        mutate: F,
    ) -> Result<WeeklyProgressRecord>
    where
        F: FnOnce(&mut WeeklyProgressRecord),
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut record = Self::get_locked(&conn, user_id, week)?
            .unwrap_or_else(|| WeeklyProgressRecord::new(user_id, week));

        mutate(&mut record);
        record.recompute_overall();
        record.updated_at = Utc::now();

        let agents_json = serde_json::to_string(&record.agents)?;
        conn.execute(
            r#"
            INSERT INTO weekly_progress (user_id, week, agents_json, overall_progress, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, week) DO UPDATE SET
                agents_json = ?3,
                overall_progress = ?4,
                updated_at = ?6
            "#,
            params![
                record.user_id,
                record.week,
                agents_json,
                record.overall_progress as i64,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to upsert weekly progress")?;

        Ok(record)
    }

    /// Delete the record for a user and week (reject/start-over)
    pub fn delete(&self, user_id: &str, week: u32) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let affected = conn.execute(
            "DELETE FROM weekly_progress WHERE user_id = ?1 AND week = ?2",
            params![user_id, week],
        )?;
        Ok(affected > 0)
    }

    fn get_locked(
        conn: &Connection,
        user_id: &str,
        week: u32,
    ) -> Result<Option<WeeklyProgressRecord>> {
        let row = conn
            .query_row(
                r#"
                SELECT user_id, week, agents_json, overall_progress, created_at, updated_at
                FROM weekly_progress WHERE user_id = ?1 AND week = ?2
                "#,
                params![user_id, week],
                |row| {
                    let agents_json: String = row.get(2)?;
                    let created_at: String = row.get(4)?;
                    let updated_at: String = row.get(5)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        agents_json,
                        row.get::<_, i64>(3)?,
                        created_at,
                        updated_at,
                    ))
                },
            )
            .optional()
            .context("Failed to read weekly progress")?;

        Ok(row.map(
            |(user_id, week, agents_json, overall, created_at, updated_at)| WeeklyProgressRecord {
                user_id,
                week,
                agents: serde_json::from_str(&agents_json).unwrap_or_default(),
                overall_progress: overall as u8,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                updated_at: DateTime::parse_from_rfc3339(&updated_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            },
        ))
    }
}

/// Applies confirmed agent results to the durable record
///
/// The only component with modify access to weekly progress. Agent
/// identities outside the fixed set are a configuration error, not a
/// runtime condition.
pub struct ProgressRecorder {
    store: ProgressStore,
}

impl ProgressRecorder {
    /// Create from shared MentorDb connection
    pub fn new(db: &MentorDb) -> Self {
        Self {
            store: ProgressStore::new(db),
        }
    }

    /// Merge an agent's output payload without touching its completion flag
    pub fn record_output(
        &self,
        user_id: &str,
        week: u32,
        agent_name: &str,
        payload: serde_json::Value,
    ) -> Result<WeeklyProgressRecord, OrchestratorError> {
        let agent = Self::resolve(agent_name)?;
        self.store
            .upsert_with(user_id, week, |record| {
                record
                    .agents
                    .entry(agent.as_str().to_string())
                    .or_default()
                    .output = Some(payload);
            })
            .map_err(OrchestratorError::Persistence)
    }

    /// Set an agent's completion flag and recompute overall progress
    ///
    /// Idempotent: the flag is a boolean, not a counter, so repeating the
    /// call leaves the record unchanged.
    pub fn mark_completed(
        &self,
        user_id: &str,
        week: u32,
        agent_name: &str,
    ) -> Result<WeeklyProgressRecord, OrchestratorError> {
        let agent = Self::resolve(agent_name)?;
        self.store
            .upsert_with(user_id, week, |record| {
                record
                    .agents
                    .entry(agent.as_str().to_string())
                    .or_default()
                    .completed = true;
            })
            .map_err(OrchestratorError::Persistence)
    }

    /// Merge an agent's output and set its completion flag in one write
    ///
    /// For calls whose success both stores a payload and completes the
    /// agent: the merge and the flag update land together or not at all.
    pub fn record_completed(
        &self,
        user_id: &str,
        week: u32,
        agent_name: &str,
        payload: serde_json::Value,
    ) -> Result<WeeklyProgressRecord, OrchestratorError> {
        let agent = Self::resolve(agent_name)?;
        self.store
            .upsert_with(user_id, week, |record| {
                let slot = record
                    .agents
                    .entry(agent.as_str().to_string())
                    .or_default();
                slot.output = Some(payload);
                slot.completed = true;
            })
            .map_err(OrchestratorError::Persistence)
    }

    fn resolve(agent_name: &str) -> Result<AgentId, OrchestratorError> {
        AgentId::parse(agent_name).ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "unknown agent '{}' in completion map",
                agent_name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (MentorDb, ProgressStore, ProgressRecorder) {
        let db = MentorDb::open_in_memory().unwrap();
        let store = ProgressStore::new(&db);
        let recorder = ProgressRecorder::new(&db);
        (db, store, recorder)
    }

    #[test]
    fn test_record_output_does_not_complete() {
        let (_db, store, recorder) = store();

        let record = recorder
            .record_output("user-1", 5, "curriculum_planner", serde_json::json!({"plan": "w5"}))
            .unwrap();

        assert_eq!(record.completed_count(), 0);
        assert_eq!(record.overall_progress, 0);

        let loaded = store.get("user-1", 5).unwrap().unwrap();
        assert!(loaded.agents["curriculum_planner"].output.is_some());
        assert!(!loaded.agents["curriculum_planner"].completed);
    }

    #[test]
    fn test_mark_completed_recomputes_overall() {
        let (_db, _store, recorder) = store();

        let record = recorder
            .mark_completed("user-1", 5, "curriculum_planner")
            .unwrap();

        let total = AgentId::all().len();
        let expected = ((100.0 * 1.0) / total as f64).round() as u8;
        assert_eq!(record.overall_progress, expected);
        assert!(record.is_completed(AgentId::CurriculumPlanner));
    }

    #[test]
    fn test_mark_completed_is_idempotent() {
        let (_db, _store, recorder) = store();

        let first = recorder
            .mark_completed("user-1", 5, "socratic_tutor")
            .unwrap();
        let second = recorder
            .mark_completed("user-1", 5, "socratic_tutor")
            .unwrap();

        assert_eq!(first.completed_count(), second.completed_count());
        assert_eq!(first.overall_progress, second.overall_progress);
    }

    #[test]
    fn test_record_completed_applies_both_fields_in_one_upsert() {
        let (_db, store, recorder) = store();

        recorder
            .record_completed(
                "user-1",
                5,
                "instructor",
                serde_json::json!({"summary": "day 1"}),
            )
            .unwrap();

        // A single write left no half-applied state: payload and flag
        // are both present in the stored record
        let loaded = store.get("user-1", 5).unwrap().unwrap();
        let slot = &loaded.agents["instructor"];
        assert!(slot.output.is_some());
        assert!(slot.completed);
        assert!(loaded.is_completed(AgentId::Instructor));
    }

    #[test]
    fn test_upsert_merges_rather_than_replaces() {
        let (_db, store, recorder) = store();

        recorder
            .record_output("user-1", 5, "curriculum_planner", serde_json::json!({"plan": 1}))
            .unwrap();
        recorder
            .mark_completed("user-1", 5, "socratic_tutor")
            .unwrap();

        let record = store.get("user-1", 5).unwrap().unwrap();
        assert!(record.agents.contains_key("curriculum_planner"));
        assert!(record.agents.contains_key("socratic_tutor"));
    }

    #[test]
    fn test_progress_monotonic_without_reset() {
        let (_db, _store, recorder) = store();

        let mut last = 0u8;
        for agent in ["curriculum_planner", "socratic_tutor", "teaching_assistant"] {
            let record = recorder.mark_completed("user-1", 5, agent).unwrap();
            assert!(record.overall_progress >= last);
            last = record.overall_progress;
        }
        assert_eq!(last, 50); // 3 of 6 agents
    }

    #[test]
    fn test_unknown_agent_is_configuration_error() {
        let (_db, _store, recorder) = store();

        let err = recorder
            .mark_completed("user-1", 5, "oracle")
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }

    #[test]
    fn test_delete_removes_week_record() {
        let (_db, store, recorder) = store();

        recorder
            .mark_completed("user-1", 5, "curriculum_planner")
            .unwrap();
        assert!(store.delete("user-1", 5).unwrap());
        assert!(store.get("user-1", 5).unwrap().is_none());
        assert!(!store.delete("user-1", 5).unwrap());
    }

    #[test]
    fn test_records_are_scoped_per_week() {
        let (_db, store, recorder) = store();

        recorder
            .mark_completed("user-1", 5, "curriculum_planner")
            .unwrap();

        assert!(store.get("user-1", 6).unwrap().is_none());
        assert!(store.get("user-2", 5).unwrap().is_none());
    }
}
