//! # Orchestrator Configuration
//!
//! Constructor-injected configuration for the orchestration core. There is
//! no hidden singleton: tests instantiate isolated configs per case, and
//! production passes one shared instance by handle.

use crate::clock;
use crate::models::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Base URL for agent endpoints (each agent lives under `/agents/<id>`)
    pub gateway_base_url: String,
    /// Per-agent endpoint overrides (agent id -> full URL)
    #[serde(default)]
    pub per_agent_endpoints: HashMap<String, String>,
    /// TTL for completed-result caching, in seconds
    pub cache_ttl_secs: u64,
    /// Transport timeout for one agent call, in seconds
    pub request_timeout_secs: u64,
    /// Program epoch from which week numbers are derived
    pub epoch: DateTime<Utc>,
    /// Practice tracks that must all complete before a week can finish
    pub required_tracks: Vec<AgentId>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gateway_base_url: "http://localhost:8700".to_string(),
            per_agent_endpoints: HashMap::new(),
            cache_ttl_secs: 30,
            request_timeout_secs: 60,
            epoch: clock::default_epoch(),
            required_tracks: vec![AgentId::SocraticTutor, AgentId::TeachingAssistant],
        }
    }
}

impl OrchestratorConfig {
    /// Resolve the endpoint URL for an agent: per-agent override -> base URL
    pub fn endpoint_for(&self, agent: AgentId) -> String {
        self.per_agent_endpoints
            .get(agent.as_str())
            .cloned()
            .unwrap_or_else(|| format!("{}/agents/{}", self.gateway_base_url, agent.as_str()))
    }
}
