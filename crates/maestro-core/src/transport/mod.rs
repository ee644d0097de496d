//! Agent transport — how the orchestrator talks to remote agents.
//!
//! ```text
//! WorkflowEngine / Coordinator
//!         │
//!    AgentInvoker  (per-agent call gate + timeout)
//!         │
//!   dyn AgentTransport
//!         │
//!   HttpAgentTransport ──► POST <endpoint><task_path>
//!                          GET  <endpoint>/health
//! ```
//!
//! Remote agents answer either with a single JSON object or with a stream
//! of `kind`-tagged events. [`response`] folds both into an [`AgentOutcome`]
//! before anything upstream sees it.

pub mod http;
pub mod response;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::ServerError;
use crate::models::agent::AgentDescriptor;

pub use http::HttpAgentTransport;

/// Body of a task request sent to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Opaque instruction for the agent (e.g. `check_balance`)
    pub action: String,
    /// Rendered request text
    pub request: String,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl AgentRequest {
    pub fn new(action: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            request: request.into(),
            context: serde_json::Map::new(),
        }
    }

    pub fn with_context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }
}

/// Normalized result of one agent call, independent of the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum AgentOutcome {
    Completed {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Failed {
        reason: String,
    },
}

impl AgentOutcome {
    pub fn completed(text: impl Into<String>) -> Self {
        Self::Completed {
            text: text.into(),
            data: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// A way of reaching remote agents.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Issue one task request. `Err` means the request never produced an
    /// answer (connection refused, unreadable body); an agent that answered
    /// but reported failure yields `Ok(AgentOutcome::Failed)`.
    async fn send(
        &self,
        agent: &AgentDescriptor,
        request: &AgentRequest,
    ) -> Result<AgentOutcome, ServerError>;

    /// Lightweight liveness check. `Err` carries a short diagnostic.
    async fn probe(&self, agent: &AgentDescriptor) -> Result<(), String>;
}

/// Per-agent mutual exclusion: at most one outstanding call per agent.
#[derive(Clone, Default)]
pub struct AgentCallGate {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AgentCallGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, agent_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().await;
            map.entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Shared entry point for every outbound agent call.
#[derive(Clone)]
pub struct AgentInvoker {
    transport: Arc<dyn AgentTransport>,
    gate: AgentCallGate,
    timeout: Duration,
}

impl AgentInvoker {
    pub fn new(transport: Arc<dyn AgentTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            gate: AgentCallGate::new(),
            timeout,
        }
    }

    pub fn transport(&self) -> Arc<dyn AgentTransport> {
        self.transport.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call `agent`, waiting for any in-flight call to the same agent first.
    /// A timeout is reported as `ServerError::Timeout`.
    pub async fn invoke(
        &self,
        agent: &AgentDescriptor,
        request: &AgentRequest,
    ) -> Result<AgentOutcome, ServerError> {
        let _permit = self.gate.acquire(&agent.id).await;

        tracing::info!(
            "[AgentTransport] Calling agent {} (action: {})",
            agent.id,
            request.action
        );

        match tokio::time::timeout(self.timeout, self.transport.send(agent, request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "[AgentTransport] Call to {} timed out after {}s",
                    agent.id,
                    self.timeout.as_secs_f64()
                );
                Err(ServerError::Timeout(format!(
                    "agent '{}' did not answer within {}s",
                    agent.id,
                    self.timeout.as_secs_f64()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowTransport {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl AgentTransport for SlowTransport {
        async fn send(
            &self,
            _agent: &AgentDescriptor,
            request: &AgentRequest,
        ) -> Result<AgentOutcome, ServerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(AgentOutcome::completed(request.request.clone()))
        }

        async fn probe(&self, _agent: &AgentDescriptor) -> Result<(), String> {
            Ok(())
        }
    }

    fn slow(delay_ms: u64) -> Arc<SlowTransport> {
        Arc::new(SlowTransport {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[tokio::test]
    async fn test_same_agent_calls_are_serialized() {
        let transport = slow(30);
        let invoker = AgentInvoker::new(transport.clone(), Duration::from_secs(5));
        let agent = AgentDescriptor::new("a", "A", "http://unused");

        let mut handles = Vec::new();
        for i in 0..4 {
            let invoker = invoker.clone();
            let agent = agent.clone();
            handles.push(tokio::spawn(async move {
                invoker
                    .invoke(&agent, &AgentRequest::new("echo", format!("{}", i)))
                    .await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().unwrap().is_success());
        }
        assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_timeout_error() {
        let invoker = AgentInvoker::new(slow(200), Duration::from_millis(20));
        let agent = AgentDescriptor::new("a", "A", "http://unused");
        let err = invoker
            .invoke(&agent, &AgentRequest::new("echo", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Timeout(_)));
    }
}
