//! HTTP agent transport.
//!
//! Task calls:
//!   POST {endpoint}{task_path}
//!   Accept: application/json, text/event-stream
//!   { "request": "...", "action": "...", "context": { ... } }
//!
//! Liveness:
//!   GET {endpoint}{health_path}, falling back to the agent card document.

use std::time::Duration;

use async_trait::async_trait;

use super::response::outcome_from_body;
use super::{AgentOutcome, AgentRequest, AgentTransport};
use crate::config::ProbeConfig;
use crate::error::ServerError;
use crate::models::agent::AgentDescriptor;

/// Calls agents over plain HTTP.
pub struct HttpAgentTransport {
    client: reqwest::Client,
    probe: ProbeConfig,
}

impl HttpAgentTransport {
    pub fn new(probe: ProbeConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(probe.timeout())
                .timeout(Duration::from_secs(300)) // hard ceiling; callers apply tighter ones
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            probe,
        }
    }

    async fn get_ok(&self, url: &str, timeout: Duration) -> Result<(), String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| format!("GET {} failed: {}", url, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("GET {} returned {}", url, response.status()))
        }
    }
}

impl Default for HttpAgentTransport {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn send(
        &self,
        agent: &AgentDescriptor,
        request: &AgentRequest,
    ) -> Result<AgentOutcome, ServerError> {
        let url = agent.url_for(&agent.task_path);
        let body = serde_json::json!({
            "request": request.request,
            "action": request.action,
            "context": request.context,
        });

        let response = self
            .client
            .post(&url)
            .header("accept", "application/json, text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ServerError::Transport(format!("HTTP request to {} failed: {}", url, e)))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let response_text = response.text().await.map_err(|e| {
            ServerError::Transport(format!("Failed to read response body from {}: {}", url, e))
        })?;

        if !status.is_success() {
            return Ok(AgentOutcome::failed(format!(
                "agent returned {}: {}",
                status,
                truncate(response_text.trim(), 300)
            )));
        }

        let outcome = outcome_from_body(content_type.as_deref(), &response_text);
        tracing::debug!(
            "[AgentTransport] {} answered (success: {})",
            agent.id,
            outcome.is_success()
        );
        Ok(outcome)
    }

    /// Both legs share one probe budget, so a hanging health endpoint
    /// still leaves time for the agent card.
    async fn probe(&self, agent: &AgentDescriptor) -> Result<(), String> {
        let leg = probe_leg_timeout(self.probe.timeout());
        let health_url = agent.url_for(&self.probe.health_path);
        match self.get_ok(&health_url, leg).await {
            Ok(()) => Ok(()),
            Err(health_err) => {
                let card_url = agent.url_for(&self.probe.card_path);
                self.get_ok(&card_url, leg)
                    .await
                    .map_err(|card_err| format!("{}; {}", health_err, card_err))
            }
        }
    }
}

fn probe_leg_timeout(budget: Duration) -> Duration {
    (budget / 2).max(Duration::from_millis(100))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
