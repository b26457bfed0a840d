//! # Session State Machine
//!
//! Drives one user's weekly learning session through
//! `Onboarding -> PlanReview -> Instruction -> Practice -> Complete`,
//! consuming coordinator results and confirmed progress writes. The
//! machine owns the phase, reads (never writes) the weekly progress
//! record, and mirrors its state into the snapshot store after every
//! transition so a session survives restarts.
//!
//! Every public operation first performs a synchronous week-rollover
//! check: once the computed week number moves past the week the machine's
//! data was loaded for, all per-week state is invalidated and the session
//! restarts at `Onboarding`. Phase transitions are applied strictly after
//! their triggering call resolves; a failure leaves the phase untouched.

use crate::clock::week_number;
use crate::config::OrchestratorConfig;
use crate::coordinator::RequestCoordinator;
use crate::error::OrchestratorError;
use crate::models::{AgentId, AgentRequest};
use crate::state::{
    MentorDb, ProgressRecorder, ProgressStore, SessionSnapshot, SnapshotStore,
    WeeklyProgressRecord,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::events::{SessionEvent, SessionEventKind};
use super::phase::Phase;

/// Completion state of one required practice track
#[derive(Debug, Clone, Serialize)]
pub struct TrackStatus {
    pub agent: AgentId,
    pub completed: bool,
}

/// Read model of a session, returned by every phase operation
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub user_id: String,
    pub phase: Phase,
    pub week: u32,
    pub overall_progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_track: Option<AgentId>,
    pub tracks: Vec<TrackStatus>,
}

/// The per-user session state machine
pub struct SessionMachine {
    user_id: String,
    config: OrchestratorConfig,
    coordinator: Arc<RequestCoordinator>,
    recorder: ProgressRecorder,
    progress: ProgressStore,
    snapshots: SnapshotStore,
    phase: Phase,
    week: u32,
    plan_summary: Option<String>,
    lesson_summary: Option<String>,
    active_track: Option<AgentId>,
    event_tx: Option<mpsc::Sender<SessionEvent>>,
}

impl SessionMachine {
    /// Create a machine for one user over shared infrastructure
    pub fn new(
        user_id: &str,
        config: OrchestratorConfig,
        coordinator: Arc<RequestCoordinator>,
        db: &MentorDb,
    ) -> Self {
        let week = week_number(config.epoch, Utc::now());
        Self {
            user_id: user_id.to_string(),
            config,
            coordinator,
            recorder: ProgressRecorder::new(db),
            progress: ProgressStore::new(db),
            snapshots: SnapshotStore::new(db),
            phase: Phase::Onboarding,
            week,
            plan_summary: None,
            lesson_summary: None,
            active_track: None,
            event_tx: None,
        }
    }

    /// Set event channel for streaming session events
    pub fn with_event_channel(mut self, tx: mpsc::Sender<SessionEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn week(&self) -> u32 {
        self.week
    }

    /// Current read model: phase, week, progress, per-track completion
    ///
    /// Runs the rollover check first, so a read can never serve a
    /// previous week's phase or data.
    pub async fn status(&mut self) -> Result<SessionStatus, OrchestratorError> {
        self.check_rollover().await;
        self.current_status()
    }

    fn current_status(&self) -> Result<SessionStatus, OrchestratorError> {
        let record = self.load_record()?;
        let overall = record.as_ref().map(|r| r.overall_progress).unwrap_or(0);
        let tracks = self
            .config
            .required_tracks
            .iter()
            .map(|t| TrackStatus {
                agent: *t,
                completed: record.as_ref().map(|r| r.is_completed(*t)).unwrap_or(false),
            })
            .collect();

        Ok(SessionStatus {
            user_id: self.user_id.clone(),
            phase: self.phase,
            week: self.week,
            overall_progress: overall,
            plan_summary: self.plan_summary.clone(),
            lesson_summary: self.lesson_summary.clone(),
            active_track: self.active_track,
            tracks,
        })
    }

    /// The full durable record for the current week, for UI detail views
    pub async fn progress_record(
        &mut self,
    ) -> Result<Option<WeeklyProgressRecord>, OrchestratorError> {
        self.check_rollover().await;
        self.load_record()
    }

    /// Restore the session at cold start
    ///
    /// A persisted snapshot is accepted only when its recorded week equals
    /// the freshly computed current week; otherwise it is discarded and
    /// the phase is derived from the durable progress record instead.
    #[tracing::instrument(skip(self), fields(user = %self.user_id))]
    pub async fn resume(&mut self) -> Result<SessionStatus, OrchestratorError> {
        let current = self.current_week();
        self.week = current;

        let snapshot = match self.snapshots.load(&self.user_id) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(user = %self.user_id, "Snapshot load failed: {}", e);
                None
            }
        };

        match snapshot {
            Some(snap) if snap.is_current(current) => {
                self.phase = snap.phase;
                self.plan_summary = snap.plan_summary;
                self.lesson_summary = snap.lesson_summary;
                self.active_track = snap.active_track.as_deref().and_then(AgentId::parse);
                self.emit(
                    SessionEvent::new(SessionEventKind::SessionResumed, &self.user_id)
                        .with_data(serde_json::json!({"phase": self.phase, "week": current})),
                )
                .await;
            }
            stale => {
                if stale.is_some() {
                    tracing::info!(user = %self.user_id, week = current, "Discarding stale snapshot");
                    if let Err(e) = self.snapshots.clear(&self.user_id) {
                        tracing::warn!("Failed to clear stale snapshot: {}", e);
                    }
                }
                self.derive_from_record()?;
                self.save_snapshot();
            }
        }

        self.current_status()
    }

    /// Acknowledge learning parameters and generate the weekly plan
    ///
    /// Calling this again while the plan awaits review is a no-op, so a
    /// double-submit cannot issue duplicate work.
    #[tracing::instrument(skip(self, parameters), fields(user = %self.user_id, week = self.week))]
    pub async fn acknowledge_onboarding(
        &mut self,
        parameters: serde_json::Value,
    ) -> Result<SessionStatus, OrchestratorError> {
        self.check_rollover().await;

        match self.phase {
            Phase::Onboarding => {}
            Phase::PlanReview => return self.current_status(),
            other => {
                return Err(OrchestratorError::InvalidPhase {
                    operation: "acknowledge onboarding",
                    phase: other.to_string(),
                })
            }
        }

        let data = self
            .call_agent(AgentId::CurriculumPlanner, "generate_plan", parameters)
            .await?;

        let record = self.recorder.record_output(
            &self.user_id,
            self.week,
            AgentId::CurriculumPlanner.as_str(),
            data.clone(),
        )?;
        self.emit_progress(&record).await;

        self.plan_summary = summary_of(&data);
        self.set_phase(Phase::PlanReview).await;
        self.current_status()
    }

    /// Approve the generated plan and move into instruction
    ///
    /// Idempotent: approving an already-approved plan changes nothing.
    pub async fn approve_plan(&mut self) -> Result<SessionStatus, OrchestratorError> {
        self.check_rollover().await;

        match self.phase {
            Phase::PlanReview => {}
            // Already approved earlier in the week
            Phase::Instruction | Phase::Practice | Phase::Complete => {
                return self.current_status()
            }
            Phase::Onboarding => {
                return Err(OrchestratorError::InvalidPhase {
                    operation: "approve plan",
                    phase: self.phase.to_string(),
                })
            }
        }

        let record = self.recorder.mark_completed(
            &self.user_id,
            self.week,
            AgentId::CurriculumPlanner.as_str(),
        )?;
        self.emit_progress(&record).await;

        self.set_phase(Phase::Instruction).await;
        self.current_status()
    }

    /// Reject the plan: delete the week's record and start over
    pub async fn reject_plan(&mut self) -> Result<SessionStatus, OrchestratorError> {
        self.check_rollover().await;

        if self.phase != Phase::PlanReview {
            return Err(OrchestratorError::InvalidPhase {
                operation: "reject plan",
                phase: self.phase.to_string(),
            });
        }

        self.progress
            .delete(&self.user_id, self.week)
            .map_err(OrchestratorError::Persistence)?;

        self.plan_summary = None;
        self.lesson_summary = None;
        self.active_track = None;
        self.emit(SessionEvent::new(
            SessionEventKind::PlanRejected,
            &self.user_id,
        ))
        .await;

        self.set_phase(Phase::Onboarding).await;
        self.current_status()
    }

    /// Fetch the daily lesson from the instructor
    pub async fn load_lesson(
        &mut self,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, OrchestratorError> {
        self.check_rollover().await;

        if self.phase != Phase::Instruction {
            return Err(OrchestratorError::InvalidPhase {
                operation: "load lesson",
                phase: self.phase.to_string(),
            });
        }

        let data = self
            .call_agent(AgentId::Instructor, "deliver_lesson", payload)
            .await?;

        let record = self.recorder.record_completed(
            &self.user_id,
            self.week,
            AgentId::Instructor.as_str(),
            data.clone(),
        )?;
        self.emit_progress(&record).await;

        self.lesson_summary = summary_of(&data);
        self.save_snapshot();
        Ok(data)
    }

    /// Branch into a practice track
    pub async fn choose_track(
        &mut self,
        track: AgentId,
    ) -> Result<SessionStatus, OrchestratorError> {
        self.check_rollover().await;

        if self.phase != Phase::Instruction {
            return Err(OrchestratorError::InvalidPhase {
                operation: "choose practice track",
                phase: self.phase.to_string(),
            });
        }
        if !self.config.required_tracks.contains(&track) {
            return Err(OrchestratorError::Configuration(format!(
                "'{}' is not a configured practice track",
                track
            )));
        }

        self.active_track = Some(track);
        self.set_phase(Phase::Practice).await;
        self.current_status()
    }

    /// One interactive exchange with the active practice agent
    pub async fn practice_turn(
        &mut self,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, OrchestratorError> {
        self.check_rollover().await;

        let track = match (self.phase, self.active_track) {
            (Phase::Practice, Some(track)) => track,
            _ => {
                return Err(OrchestratorError::InvalidPhase {
                    operation: "practice",
                    phase: self.phase.to_string(),
                })
            }
        };

        let data = self
            .call_agent(track, practice_action(track), payload)
            .await?;

        self.recorder
            .record_output(&self.user_id, self.week, track.as_str(), data.clone())?;
        Ok(data)
    }

    /// Mark the active track complete and return to instruction
    ///
    /// The week finishes only once every required track reports complete;
    /// a single finished track hands control back to `Instruction`.
    pub async fn complete_track(&mut self) -> Result<SessionStatus, OrchestratorError> {
        self.check_rollover().await;

        let track = match (self.phase, self.active_track) {
            (Phase::Practice, Some(track)) => track,
            _ => {
                return Err(OrchestratorError::InvalidPhase {
                    operation: "complete practice track",
                    phase: self.phase.to_string(),
                })
            }
        };

        let record =
            self.recorder
                .mark_completed(&self.user_id, self.week, track.as_str())?;
        self.emit_progress(&record).await;

        self.active_track = None;
        self.set_phase(Phase::Instruction).await;

        let all_done = self
            .config
            .required_tracks
            .iter()
            .all(|t| record.is_completed(*t));
        if all_done {
            self.set_phase(Phase::Complete).await;
        }

        self.current_status()
    }

    /// One-off consultation with an auxiliary agent (reviewer, strategist)
    ///
    /// Flow agents (planner, instructor, practice tracks) must go through
    /// their dedicated operations so completion stays consistent.
    pub async fn consult_agent(
        &mut self,
        agent: AgentId,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, OrchestratorError> {
        self.check_rollover().await;

        if !matches!(self.phase, Phase::Instruction | Phase::Practice) {
            return Err(OrchestratorError::InvalidPhase {
                operation: "consult agent",
                phase: self.phase.to_string(),
            });
        }
        if agent == AgentId::CurriculumPlanner
            || agent == AgentId::Instructor
            || self.config.required_tracks.contains(&agent)
        {
            return Err(OrchestratorError::Configuration(format!(
                "agent '{}' is driven by the session flow, not ad-hoc consultation",
                agent
            )));
        }

        let data = self.call_agent(agent, action, payload).await?;

        let record = self.recorder.record_completed(
            &self.user_id,
            self.week,
            agent.as_str(),
            data.clone(),
        )?;
        self.emit_progress(&record).await;

        Ok(data)
    }

    /// User-initiated start-over: wipe the week and return to onboarding
    pub async fn hard_reset(&mut self) -> Result<SessionStatus, OrchestratorError> {
        let current = self.current_week();
        self.week = current;

        self.progress
            .delete(&self.user_id, current)
            .map_err(OrchestratorError::Persistence)?;
        if let Err(e) = self.snapshots.clear(&self.user_id) {
            tracing::warn!("Failed to clear snapshot on reset: {}", e);
        }
        self.coordinator.invalidate_user_week(&self.user_id, current);

        self.plan_summary = None;
        self.lesson_summary = None;
        self.active_track = None;
        self.emit(SessionEvent::new(
            SessionEventKind::SessionReset,
            &self.user_id,
        ))
        .await;

        self.set_phase(Phase::Onboarding).await;
        self.current_status()
    }

    // === internals ===

    fn current_week(&self) -> u32 {
        week_number(self.config.epoch, Utc::now())
    }

    fn load_record(&self) -> Result<Option<WeeklyProgressRecord>, OrchestratorError> {
        self.progress
            .get(&self.user_id, self.week)
            .map_err(OrchestratorError::Persistence)
    }

    /// Synchronous, cheap rollover check run before every operation
    async fn check_rollover(&mut self) {
        let current = self.current_week();
        if current == self.week {
            return;
        }

        let previous = self.week;
        tracing::info!(user = %self.user_id, from = previous, to = current, "Week rolled over");

        self.week = current;
        self.phase = Phase::Onboarding;
        self.plan_summary = None;
        self.lesson_summary = None;
        self.active_track = None;

        if let Err(e) = self.snapshots.clear(&self.user_id) {
            tracing::warn!("Failed to clear snapshot on rollover: {}", e);
        }
        self.coordinator.invalidate_user_week(&self.user_id, previous);

        self.emit(
            SessionEvent::new(SessionEventKind::WeekRolledOver, &self.user_id)
                .with_data(serde_json::json!({"from": previous, "to": current})),
        )
        .await;
        self.save_snapshot();
    }

    /// Derive phase and summaries from the durable record (fresh load)
    fn derive_from_record(&mut self) -> Result<(), OrchestratorError> {
        let record = self.load_record()?;

        self.plan_summary = None;
        self.lesson_summary = None;
        self.active_track = None;

        let record = match record {
            Some(r) => r,
            None => {
                self.phase = Phase::Onboarding;
                return Ok(());
            }
        };

        let plan = record.agents.get(AgentId::CurriculumPlanner.as_str());
        self.plan_summary = plan.and_then(|p| p.output.as_ref()).and_then(summary_of);
        self.lesson_summary = record
            .agents
            .get(AgentId::Instructor.as_str())
            .and_then(|p| p.output.as_ref())
            .and_then(summary_of);

        let plan_approved = record.is_completed(AgentId::CurriculumPlanner);
        let plan_generated = plan.map(|p| p.output.is_some()).unwrap_or(false);
        let all_tracks_done = self
            .config
            .required_tracks
            .iter()
            .all(|t| record.is_completed(*t));

        self.phase = if plan_approved && all_tracks_done {
            Phase::Complete
        } else if plan_approved {
            Phase::Instruction
        } else if plan_generated {
            Phase::PlanReview
        } else {
            Phase::Onboarding
        };

        Ok(())
    }

    async fn call_agent(
        &self,
        agent: AgentId,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, OrchestratorError> {
        self.emit(
            SessionEvent::new(SessionEventKind::AgentCallStarted, &self.user_id)
                .with_data(serde_json::json!({"agent": agent, "action": action})),
        )
        .await;

        let outcome = self
            .coordinator
            .dispatch(AgentRequest {
                agent,
                action: action.to_string(),
                user_id: self.user_id.clone(),
                week: self.week,
                payload,
            })
            .await;

        match outcome {
            Ok(data) => {
                self.emit(
                    SessionEvent::new(SessionEventKind::AgentCallCompleted, &self.user_id)
                        .with_data(serde_json::json!({"agent": agent, "action": action})),
                )
                .await;
                Ok(data)
            }
            Err(failure) => {
                self.emit(
                    SessionEvent::new(SessionEventKind::AgentCallFailed, &self.user_id)
                        .with_data(
                            serde_json::json!({"agent": agent, "error": failure.message}),
                        ),
                )
                .await;
                Err(failure.into())
            }
        }
    }

    /// Transition phase (if changed) and mirror state into the snapshot
    async fn set_phase(&mut self, next: Phase) {
        if self.phase != next {
            let previous = self.phase;
            self.phase = next;
            tracing::debug!(user = %self.user_id, from = %previous, to = %next, "Phase changed");
            self.emit(
                SessionEvent::new(SessionEventKind::PhaseChanged, &self.user_id)
                    .with_data(serde_json::json!({"from": previous, "to": next})),
            )
            .await;
        }
        self.save_snapshot();
    }

    /// Best-effort snapshot write; the durable record stays authoritative
    fn save_snapshot(&self) {
        let snapshot = SessionSnapshot {
            phase: self.phase,
            last_loaded_week: self.week,
            plan_summary: self.plan_summary.clone(),
            lesson_summary: self.lesson_summary.clone(),
            active_track: self.active_track.map(|t| t.as_str().to_string()),
            saved_at: Utc::now(),
        };
        if let Err(e) = self.snapshots.save(&self.user_id, &snapshot) {
            tracing::warn!(user = %self.user_id, "Snapshot save failed: {}", e);
        }
    }

    async fn emit_progress(&self, record: &WeeklyProgressRecord) {
        self.emit(
            SessionEvent::new(SessionEventKind::ProgressUpdated, &self.user_id).with_data(
                serde_json::json!({
                    "week": record.week,
                    "overall_progress": record.overall_progress,
                }),
            ),
        )
        .await;
    }

    async fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    #[cfg(test)]
    pub(crate) fn force_loaded_week(&mut self, week: u32) {
        self.week = week;
    }
}

/// Map a practice track to its agent action name
fn practice_action(track: AgentId) -> &'static str {
    match track {
        AgentId::SocraticTutor => "socratic_turn",
        AgentId::TeachingAssistant => "assist_turn",
        AgentId::CodeReviewer => "review_turn",
        AgentId::BrandStrategist => "strategy_turn",
        AgentId::Instructor => "lesson_turn",
        AgentId::CurriculumPlanner => "plan_turn",
    }
}

fn summary_of(data: &serde_json::Value) -> Option<String> {
    data.get("summary")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
