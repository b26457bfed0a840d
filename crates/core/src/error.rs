//! # Orchestrator Errors
//!
//! Error taxonomy for the orchestration core. Callers (the API layer, the
//! UI) branch on these classes: transport failures are retryable by the
//! user, persistence failures leave in-memory state untouched, and
//! configuration errors indicate a programming mistake rather than a
//! runtime condition.

use crate::models::{AgentFailure, AgentId};
use thiserror::Error;

/// Errors surfaced by the orchestration core
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Agent unreachable, non-2xx, or remote-side failure. Never cached;
    /// never mutates progress or phase.
    #[error("agent call failed ({agent}): {message}")]
    Transport { agent: AgentId, message: String },

    /// Durable store upsert/delete failed. No in-memory state was changed.
    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),

    /// Unknown agent identity or invalid orchestrator configuration.
    /// Fatal to the call path; not a runtime condition to recover from.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation not valid in the current phase. State is unchanged.
    #[error("cannot {operation} while in phase {phase}")]
    InvalidPhase { operation: &'static str, phase: String },
}

impl From<AgentFailure> for OrchestratorError {
    fn from(failure: AgentFailure) -> Self {
        OrchestratorError::Transport {
            agent: failure.agent,
            message: failure.message,
        }
    }
}

impl OrchestratorError {
    /// Whether the user can sensibly retry the triggering action
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_from_failure() {
        let failure = AgentFailure {
            agent: AgentId::Instructor,
            message: "connection refused".to_string(),
        };
        let err: OrchestratorError = failure.into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("instructor"));
    }

    #[test]
    fn test_configuration_not_retryable() {
        let err = OrchestratorError::Configuration("unknown agent 'oracle'".to_string());
        assert!(!err.is_retryable());
    }
}
