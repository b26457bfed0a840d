//! # Mentor Models
//!
//! Centralized agent identity and request/outcome types for the Mentor
//! system. These types are shared by the gateway, the request coordinator,
//! and the session state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed set of remote learning agents
///
/// Every agent is a stateless request/response backend. The orchestrator
/// only knows which completion flag each one maps to; the content of their
/// responses is opaque.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    /// Generates the weekly curriculum plan
    CurriculumPlanner,
    /// Socratic questioning practice track
    SocraticTutor,
    /// Reviews code submissions
    CodeReviewer,
    /// Personal-brand strategy advisor
    BrandStrategist,
    /// Delivers the daily lesson
    Instructor,
    /// Hands-on task assistance practice track
    TeachingAssistant,
}

impl AgentId {
    /// Get all known agents
    pub fn all() -> Vec<AgentId> {
        vec![
            AgentId::CurriculumPlanner,
            AgentId::SocraticTutor,
            AgentId::CodeReviewer,
            AgentId::BrandStrategist,
            AgentId::Instructor,
            AgentId::TeachingAssistant,
        ]
    }

    /// Wire identifier used in endpoints and progress records
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::CurriculumPlanner => "curriculum_planner",
            AgentId::SocraticTutor => "socratic_tutor",
            AgentId::CodeReviewer => "code_reviewer",
            AgentId::BrandStrategist => "brand_strategist",
            AgentId::Instructor => "instructor",
            AgentId::TeachingAssistant => "teaching_assistant",
        }
    }

    /// Parse a wire identifier back to an agent
    pub fn parse(s: &str) -> Option<AgentId> {
        Self::all().into_iter().find(|a| a.as_str() == s)
    }

    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentId::CurriculumPlanner => "Curriculum Planner",
            AgentId::SocraticTutor => "Socratic Tutor",
            AgentId::CodeReviewer => "Code Reviewer",
            AgentId::BrandStrategist => "Brand Strategist",
            AgentId::Instructor => "Instructor",
            AgentId::TeachingAssistant => "Teaching Assistant",
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical unit of orchestration work sent to a remote agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Which agent to call
    pub agent: AgentId,
    /// Action name understood by that agent
    pub action: String,
    /// User on whose behalf the call is made
    pub user_id: String,
    /// Week the call belongs to (positive)
    pub week: u32,
    /// Opaque payload forwarded to the agent
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AgentRequest {
    /// Deduplication/cache key for this request
    pub fn key(&self) -> RequestKey {
        RequestKey {
            user_id: self.user_id.clone(),
            action: self.action.clone(),
            week: self.week,
        }
    }
}

/// Composite key identifying one unit of work: `(user, action, week)`
///
/// Two concurrent requests with the same key must resolve to the same
/// outcome - this is the core deduplication contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub user_id: String,
    pub action: String,
    pub week: u32,
}

/// Structured failure from an agent call
///
/// `Clone` so one failed transport call can resolve every caller joined on
/// the same in-flight key with the identical error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentFailure {
    /// Agent that failed
    pub agent: AgentId,
    /// Human-readable failure reason
    pub message: String,
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.agent, self.message)
    }
}

/// Normalized result of one agent call: opaque data or a structured failure
pub type AgentOutcome = Result<serde_json::Value, AgentFailure>;
