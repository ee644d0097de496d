//! Coordinator — the user-facing façade over the directory and the engine.
//!
//! It owns chat sessions and exposes three entry points:
//!   1. `handle` — one chat turn, answered by the reasoning backend
//!   2. `call_agent` — a single ad-hoc call that bypasses the engine
//!   3. `run_named_workflow` — run a catalog workflow and format the result

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::config::{deadline_after, SessionConfig};
use crate::directory::AgentDirectory;
use crate::error::ServerError;
use crate::models::agent::AgentDescriptor;
use crate::models::session::{ChatMessage, MessageRole, Session};
use crate::models::workflow::{StepStatus, WorkflowInstance, WorkflowStatus};
use crate::reasoning::{GenerateOptions, ReasoningClient};
use crate::transport::http::truncate;
use crate::transport::{AgentInvoker, AgentOutcome, AgentRequest};
use crate::workflow::{WorkflowDefinition, WorkflowEngine};

/// Characters of step output shown in a formatted workflow result.
const PREVIEW_CHARS: usize = 200;

/// Action name used for ad-hoc agent calls.
pub const DIRECT_CALL_ACTION: &str = "message";

const SYSTEM_PROMPT: &str = "You coordinate a set of remote agents on behalf of the user. \
Answer the user directly. When a task needs an agent, name the agent or the workflow \
that handles it. Agents handle one request at a time.";

#[derive(Clone)]
pub struct Coordinator {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    reasoning: Option<Arc<dyn ReasoningClient>>,
    directory: AgentDirectory,
    engine: WorkflowEngine,
    invoker: AgentInvoker,
    settings: SessionConfig,
}

impl Coordinator {
    pub fn new(
        directory: AgentDirectory,
        engine: WorkflowEngine,
        invoker: AgentInvoker,
        reasoning: Option<Arc<dyn ReasoningClient>>,
        settings: SessionConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            reasoning,
            directory,
            engine,
            invoker,
            settings,
        }
    }

    pub fn has_reasoning(&self) -> bool {
        self.reasoning.is_some()
    }

    // ── Chat ───────────────────────────────────────────────────────────

    /// Answer one chat turn for `session_id`, creating the session on first use.
    pub async fn handle(&self, session_id: &str, text: &str) -> Result<String, ServerError> {
        if text.trim().is_empty() {
            return Err(ServerError::BadRequest("message must not be empty".to_string()));
        }

        if self
            .sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(|s| s.cancelled)
        {
            return Err(ServerError::Cancelled(format!(
                "session {} was cancelled",
                session_id
            )));
        }

        let reasoning = self
            .reasoning
            .as_ref()
            .ok_or_else(|| ServerError::Reasoning("no reasoning backend configured".to_string()))?;

        let history = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Session::new(session_id));
            session.push(MessageRole::User, text, self.settings.max_history);
            session.messages.clone()
        };

        let agents = self.directory.list_reachable().await;
        let templates = self.engine.templates().await;
        let prompt = build_prompt(&history, &agents, &templates);

        tracing::info!(
            "[Coordinator] Session {}: {} message(s), {} reachable agent(s)",
            session_id,
            history.len(),
            agents.len()
        );

        let options = GenerateOptions {
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            ..Default::default()
        };
        let reply = reasoning.generate(&prompt, &options).await?;

        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.push(MessageRole::Assistant, reply.clone(), self.settings.max_history);
        }
        Ok(reply)
    }

    /// Mark a session cancelled. Later turns for it are refused.
    pub async fn cancel_session(&self, session_id: &str) -> Result<(), ServerError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ServerError::NotFound(format!("Session {} not found", session_id)))?;
        session.cancelled = true;
        tracing::info!("[Coordinator] Session {} cancelled", session_id);
        Ok(())
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions idle for longer than the configured timeout.
    pub async fn sweep_idle_sessions(&self, now: DateTime<Utc>) -> usize {
        let idle_secs = self.settings.idle_timeout_secs;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| {
            deadline_after(s.last_activity_at, idle_secs).map_or(true, |d| d >= now)
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!("[Coordinator] Dropped {} idle session(s)", removed);
        }
        removed
    }

    // ── Direct agent calls ─────────────────────────────────────────────

    /// Send `message` to one agent, outside any workflow.
    pub async fn call_agent(&self, agent_id: &str, message: &str) -> Result<String, ServerError> {
        let agent = self
            .directory
            .get(agent_id)
            .await
            .ok_or_else(|| ServerError::NotFound(format!("Agent '{}' is not registered", agent_id)))?;

        let request = AgentRequest::new(DIRECT_CALL_ACTION, message);
        match self.invoker.invoke(&agent, &request).await? {
            AgentOutcome::Completed { text, .. } => Ok(text),
            AgentOutcome::Failed { reason } => Err(ServerError::AgentFailed {
                agent_id: agent.id,
                reason,
            }),
        }
    }

    // ── Workflows ──────────────────────────────────────────────────────

    pub async fn run_workflow(
        &self,
        name: &str,
        context: Map<String, Value>,
    ) -> Result<WorkflowInstance, ServerError> {
        let instance = self.engine.instantiate_named(name, context).await?;
        self.engine.run(&instance.id).await
    }

    /// Run a catalog workflow and describe the outcome in plain text.
    pub async fn run_named_workflow(
        &self,
        name: &str,
        context: Map<String, Value>,
    ) -> Result<String, ServerError> {
        let instance = self.run_workflow(name, context).await?;
        Ok(format_instance(&instance))
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }
}

fn build_prompt(
    history: &[ChatMessage],
    agents: &[AgentDescriptor],
    templates: &[WorkflowDefinition],
) -> String {
    let mut prompt = String::from("## Reachable agents\n");
    if agents.is_empty() {
        prompt.push_str("(none)\n");
    }
    for agent in agents {
        let capabilities: Vec<&str> = agent.capabilities.iter().map(String::as_str).collect();
        prompt.push_str(&format!(
            "- {} ({}): {}\n",
            agent.id,
            agent.display_name,
            if capabilities.is_empty() {
                "no declared capabilities".to_string()
            } else {
                capabilities.join(", ")
            }
        ));
    }

    prompt.push_str("\n## Workflows\n");
    for definition in templates {
        let needs: Vec<String> = definition.required_context_keys().into_iter().collect();
        prompt.push_str(&format!(
            "- {}: {} (needs: {})\n",
            definition.name,
            definition.description.as_deref().unwrap_or(""),
            if needs.is_empty() {
                "nothing".to_string()
            } else {
                needs.join(", ")
            }
        ));
    }

    prompt.push_str("\n## Conversation\n");
    for message in history {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        prompt.push_str(&format!("{}: {}\n", role, message.content));
    }
    prompt
}

/// Human-readable rendering of a finished instance.
pub fn format_instance(instance: &WorkflowInstance) -> String {
    let icon = match instance.overall_status {
        WorkflowStatus::Completed => "✅",
        WorkflowStatus::Cancelled => "⏹️",
        WorkflowStatus::Failed => "❌",
        _ => "⏳",
    };
    let mut out = format!(
        "{} Workflow '{}' ({}) {}\n",
        icon,
        instance.definition_ref,
        instance.id,
        instance.overall_status.as_str()
    );

    for step in &instance.steps {
        let detail = match step.status {
            StepStatus::Completed => preview(step.output.as_deref().unwrap_or("")),
            StepStatus::Failed => step.error.clone().unwrap_or_default(),
            _ => String::new(),
        };
        out.push_str(&format!(
            "  - {} [{} / {}] {}",
            step.id,
            step.agent_id,
            step.action,
            step.status.as_str()
        ));
        if !detail.is_empty() {
            out.push_str(&format!(": {}", detail));
        }
        out.push('\n');
    }

    if instance.overall_status != WorkflowStatus::Completed {
        if let Some(error) = &instance.error {
            out.push_str(&format!("Error: {}\n", error));
        }
        let completed: Vec<&str> = instance
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.id.as_str())
            .collect();
        out.push_str(&format!(
            "Completed steps (not rolled back): {}\n",
            if completed.is_empty() {
                "none".to_string()
            } else {
                completed.join(", ")
            }
        ));
    }
    out
}

fn preview(output: &str) -> String {
    truncate(&output.split_whitespace().collect::<Vec<_>>().join(" "), PREVIEW_CHARS)
}
