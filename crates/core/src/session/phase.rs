//! # Learning Phases
//!
//! Phases of a user's weekly learning session. Exactly one phase is active
//! per user at a time; transitions are driven by the session state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the weekly learning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for the user to acknowledge learning parameters
    #[default]
    Onboarding,
    /// A generated plan exists but is not yet approved
    PlanReview,
    /// Daily lesson delivery; practice tracks branch from here
    Instruction,
    /// Interactive exchange with a chosen practice agent
    Practice,
    /// Terminal for the current week
    Complete,
}

impl Phase {
    /// Whether this phase ends the week
    pub fn is_terminal(&self) -> bool {
        *self == Phase::Complete
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Onboarding => "onboarding",
            Phase::PlanReview => "plan_review",
            Phase::Instruction => "instruction",
            Phase::Practice => "practice",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
