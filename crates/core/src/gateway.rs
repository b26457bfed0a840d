//! # Agent Gateway
//!
//! Pure transport adapter for remote agent endpoints. Sends one POST per
//! call and normalizes the response to `{success, data | error}` semantics.
//! No retries, no caching, no side effects beyond the network call; every
//! failure is converted to a structured `AgentFailure` rather than an error
//! escaping the boundary.

use crate::config::OrchestratorConfig;
use crate::models::{AgentFailure, AgentOutcome, AgentRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Seam between the orchestrator and the network
///
/// Production uses [`AgentGateway`]; tests substitute scripted transports.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Perform one agent call and return its normalized outcome
    async fn call(&self, request: &AgentRequest) -> AgentOutcome;
}

/// Wire format sent to an agent endpoint
#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    action: &'a str,
    payload: &'a serde_json::Value,
    #[serde(rename = "userId")]
    user_id: &'a str,
}

/// Wire format returned by an agent endpoint
#[derive(Debug, Deserialize)]
struct WireResponse {
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP transport for remote agents
pub struct AgentGateway {
    client: reqwest::Client,
    config: OrchestratorConfig,
}

impl AgentGateway {
    /// Create a gateway with the transport timeout from config
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    fn failure(request: &AgentRequest, message: impl Into<String>) -> AgentOutcome {
        Err(AgentFailure {
            agent: request.agent,
            message: message.into(),
        })
    }

    async fn call_inner(&self, request: &AgentRequest) -> AgentOutcome {
        if request.week == 0 {
            return Self::failure(request, "week number must be positive");
        }

        let url = self.config.endpoint_for(request.agent);
        let body = WireRequest {
            action: &request.action,
            payload: &request.payload,
            user_id: &request.user_id,
        };

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return Self::failure(request, format!("transport error: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            return Self::failure(request, format!("agent returned HTTP {}", status));
        }

        let wire: WireResponse = match response.json().await {
            Ok(w) => w,
            Err(e) => return Self::failure(request, format!("malformed response: {}", e)),
        };

        if wire.success {
            Ok(wire.data.unwrap_or(serde_json::Value::Null))
        } else {
            Self::failure(
                request,
                wire.error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            )
        }
    }
}

#[async_trait]
impl AgentTransport for AgentGateway {
    async fn call(&self, request: &AgentRequest) -> AgentOutcome {
        let outcome = self.call_inner(request).await;
        match &outcome {
            Ok(_) => {
                tracing::debug!(agent = %request.agent, action = %request.action, week = request.week, "Agent call succeeded");
            }
            Err(f) => {
                tracing::warn!(agent = %request.agent, action = %request.action, error = %f.message, "Agent call failed");
            }
        }
        outcome
    }
}
