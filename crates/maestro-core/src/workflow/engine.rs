//! Workflow engine — turns a definition plus a context bag into an
//! instance, then drives it to completion one step at a time.
//!
//! The run loop:
//! 1. mark the instance `running`
//! 2. compute the ready set (pending steps whose dependencies all completed)
//! 3. empty ready set with unfinished steps → deadlock
//! 4. run the ready steps **sequentially, in declaration order**
//! 5. the first failing step fails the instance; nothing else starts
//!
//! Steps never run in parallel, even when their dependencies would allow
//! it: at most one agent call is outstanding per instance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::catalog::WorkflowCatalog;
use super::render::render;
use super::schema::{StepTemplate, WorkflowDefinition};
use crate::config::{deadline_after, RetentionPolicy};
use crate::directory::AgentDirectory;
use crate::error::ServerError;
use crate::models::workflow::{
    StepInstance, StepStatus, WorkflowInstance, WorkflowStatus, WorkflowSummary,
};
use crate::transport::{AgentInvoker, AgentOutcome, AgentRequest};

struct InstanceEntry {
    instance: WorkflowInstance,
    definition: Arc<WorkflowDefinition>,
}

struct EngineInner {
    instances: HashMap<String, InstanceEntry>,
    /// Creation order, used for listings and count-based eviction.
    order: Vec<String>,
}

/// What the run loop should do next.
enum Progress {
    Done,
    Cancelled,
    Deadlocked(Vec<String>),
    Ready(Vec<usize>),
}

#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<RwLock<EngineInner>>,
    catalog: Arc<RwLock<WorkflowCatalog>>,
    directory: AgentDirectory,
    invoker: AgentInvoker,
    retention: RetentionPolicy,
}

impl WorkflowEngine {
    pub fn new(
        directory: AgentDirectory,
        invoker: AgentInvoker,
        catalog: WorkflowCatalog,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(EngineInner {
                instances: HashMap::new(),
                order: Vec::new(),
            })),
            catalog: Arc::new(RwLock::new(catalog)),
            directory,
            invoker,
            retention,
        }
    }

    // ── Catalog ────────────────────────────────────────────────────────

    pub async fn definition(&self, name: &str) -> Result<WorkflowDefinition, ServerError> {
        let catalog = self.catalog.read().await;
        catalog.get(name).cloned().ok_or_else(|| {
            ServerError::NotFound(format!(
                "Workflow '{}' not found. Available: {}",
                name,
                catalog.names().join(", ")
            ))
        })
    }

    pub async fn templates(&self) -> Vec<WorkflowDefinition> {
        self.catalog.read().await.list()
    }

    pub async fn register_definition(&self, definition: WorkflowDefinition) -> Result<(), ServerError> {
        self.catalog.write().await.register(definition)
    }

    // ── Instances ──────────────────────────────────────────────────────

    /// Validate `definition` and `initial_context`, then create a pending instance.
    pub async fn instantiate(
        &self,
        definition: &WorkflowDefinition,
        initial_context: Map<String, Value>,
    ) -> Result<WorkflowInstance, ServerError> {
        definition.validate()?;

        let missing = definition.missing_context_keys(&initial_context);
        if !missing.is_empty() {
            return Err(ServerError::BadRequest(format!(
                "workflow '{}' requires context keys: {}",
                definition.name,
                missing.join(", ")
            )));
        }

        let instance = self.insert_instance(definition.clone(), initial_context).await;
        self.sweep_expired(Utc::now()).await;
        Ok(instance)
    }

    /// Instantiate a catalog workflow by name.
    pub async fn instantiate_named(
        &self,
        name: &str,
        initial_context: Map<String, Value>,
    ) -> Result<WorkflowInstance, ServerError> {
        let definition = self.definition(name).await?;
        self.instantiate(&definition, initial_context).await
    }

    /// Instantiate and run in one call.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        initial_context: Map<String, Value>,
    ) -> Result<WorkflowInstance, ServerError> {
        let instance = self.instantiate(definition, initial_context).await?;
        self.run(&instance.id).await
    }

    async fn insert_instance(
        &self,
        definition: WorkflowDefinition,
        initial_context: Map<String, Value>,
    ) -> WorkflowInstance {
        let instance = WorkflowInstance {
            id: format!("wf-{}", uuid::Uuid::new_v4()),
            definition_ref: definition.name.clone(),
            steps: definition
                .steps
                .iter()
                .map(|t| StepInstance {
                    id: t.id.clone(),
                    agent_id: t.agent_id.clone(),
                    action: t.action.clone(),
                    status: StepStatus::Pending,
                    output: None,
                    data: None,
                    error: None,
                    started_at: None,
                    finished_at: None,
                })
                .collect(),
            overall_status: WorkflowStatus::Pending,
            context: initial_context,
            error: None,
            cancel_requested: false,
            created_at: Utc::now(),
            completed_at: None,
        };

        let mut inner = self.inner.write().await;
        inner.order.push(instance.id.clone());
        inner.instances.insert(
            instance.id.clone(),
            InstanceEntry {
                instance: instance.clone(),
                definition: Arc::new(definition),
            },
        );
        tracing::info!(
            "[WorkflowEngine] Created instance {} of '{}'",
            instance.id,
            instance.definition_ref
        );
        instance
    }

    pub async fn get(&self, instance_id: &str) -> Option<WorkflowInstance> {
        self.inner
            .read()
            .await
            .instances
            .get(instance_id)
            .map(|e| e.instance.clone())
    }

    /// Summaries of all retained instances, oldest first.
    pub async fn list(&self) -> Vec<WorkflowSummary> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.instances.get(id))
            .map(|e| e.instance.summary())
            .collect()
    }

    /// Request cancellation. A pending instance is cancelled immediately;
    /// a running one stops before its next step starts.
    pub async fn cancel(&self, instance_id: &str) -> Result<WorkflowInstance, ServerError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ServerError::NotFound(format!("Workflow {} not found", instance_id)))?;
        let instance = &mut entry.instance;

        match instance.overall_status {
            WorkflowStatus::Pending => {
                instance.overall_status = WorkflowStatus::Cancelled;
                instance.cancel_requested = true;
                instance.error = Some("cancelled before start".to_string());
                instance.completed_at = Some(Utc::now());
            }
            WorkflowStatus::Running => {
                instance.cancel_requested = true;
            }
            status => {
                return Err(ServerError::Conflict(format!(
                    "Workflow {} is already {}",
                    instance_id,
                    status.as_str()
                )));
            }
        }
        tracing::info!("[WorkflowEngine] Cancellation requested for {}", instance_id);
        Ok(instance.clone())
    }

    // ── Execution ──────────────────────────────────────────────────────

    /// Drive a pending instance to a terminal state.
    ///
    /// A failing step is recorded on the instance, which is returned with
    /// status `failed`. A deadlock is returned as `ServerError::Deadlock`
    /// (the stored instance is marked `failed`, its unstarted steps stay
    /// `pending`).
    ///
    /// The run loop lives on its own task: dropping the returned future
    /// (a disconnected HTTP client, an aborted caller) does not stop the
    /// instance from reaching a terminal state.
    pub async fn run(&self, instance_id: &str) -> Result<WorkflowInstance, ServerError> {
        let definition = {
            let mut inner = self.inner.write().await;
            let entry = inner.instances.get_mut(instance_id).ok_or_else(|| {
                ServerError::NotFound(format!("Workflow {} not found", instance_id))
            })?;
            if entry.instance.overall_status != WorkflowStatus::Pending {
                return Err(ServerError::Conflict(format!(
                    "Workflow {} is already {}",
                    instance_id,
                    entry.instance.overall_status.as_str()
                )));
            }
            entry.instance.overall_status = WorkflowStatus::Running;
            entry.definition.clone()
        };

        tracing::info!(
            "[WorkflowEngine] Running {} ('{}', {} steps)",
            instance_id,
            definition.name,
            definition.steps.len()
        );

        let engine = self.clone();
        let id = instance_id.to_string();
        let driver = tokio::spawn(async move { engine.drive(&id, definition).await });
        match driver.await {
            Ok(result) => result,
            Err(e) => {
                let message = format!("run loop stopped unexpectedly: {}", e);
                tracing::error!("[WorkflowEngine] {} {}", instance_id, message);
                self.finish(instance_id, WorkflowStatus::Failed, Some(message.clone()))
                    .await?;
                Err(ServerError::Internal(message))
            }
        }
    }

    async fn drive(
        &self,
        instance_id: &str,
        definition: Arc<WorkflowDefinition>,
    ) -> Result<WorkflowInstance, ServerError> {
        loop {
            match self.progress(instance_id).await? {
                Progress::Done => {
                    return self.finish(instance_id, WorkflowStatus::Completed, None).await;
                }
                Progress::Cancelled => {
                    return self.finish_cancelled(instance_id).await;
                }
                Progress::Deadlocked(pending) => {
                    let err = ServerError::Deadlock {
                        instance_id: instance_id.to_string(),
                        pending,
                    };
                    tracing::error!("[WorkflowEngine] {}", err);
                    self.finish(instance_id, WorkflowStatus::Failed, Some(err.to_string()))
                        .await?;
                    return Err(err);
                }
                Progress::Ready(indices) => {
                    for index in indices {
                        if self.cancel_requested(instance_id).await {
                            return self.finish_cancelled(instance_id).await;
                        }
                        let template = &definition.steps[index];
                        if let Err(reason) = self.execute_step(instance_id, index, template).await {
                            let message = format!("step '{}' failed: {}", template.id, reason);
                            tracing::warn!("[WorkflowEngine] {} {}", instance_id, message);
                            return self
                                .finish(instance_id, WorkflowStatus::Failed, Some(message))
                                .await;
                        }
                    }
                }
            }
        }
    }

    /// Inspect the instance and decide the next move of the run loop.
    async fn progress(&self, instance_id: &str) -> Result<Progress, ServerError> {
        let inner = self.inner.read().await;
        let entry = inner
            .instances
            .get(instance_id)
            .ok_or_else(|| ServerError::Internal(format!("Workflow {} disappeared", instance_id)))?;
        let instance = &entry.instance;

        if instance.steps.iter().all(|s| s.status == StepStatus::Completed) {
            return Ok(Progress::Done);
        }
        if instance.cancel_requested {
            return Ok(Progress::Cancelled);
        }

        let status_of: HashMap<&str, StepStatus> = instance
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.status))
            .collect();
        let ready: Vec<usize> = entry
            .definition
            .steps
            .iter()
            .enumerate()
            .filter(|(_, t)| status_of.get(t.id.as_str()) == Some(&StepStatus::Pending))
            .filter(|(_, t)| {
                t.depends_on
                    .iter()
                    .all(|d| status_of.get(d.as_str()) == Some(&StepStatus::Completed))
            })
            .map(|(i, _)| i)
            .collect();

        if ready.is_empty() {
            let pending = instance
                .steps
                .iter()
                .filter(|s| s.status != StepStatus::Completed)
                .map(|s| s.id.clone())
                .collect();
            return Ok(Progress::Deadlocked(pending));
        }
        Ok(Progress::Ready(ready))
    }

    async fn cancel_requested(&self, instance_id: &str) -> bool {
        self.inner
            .read()
            .await
            .instances
            .get(instance_id)
            .map(|e| e.instance.cancel_requested)
            .unwrap_or(true)
    }

    /// Run one step. `Err` carries the failure reason recorded on the step.
    async fn execute_step(
        &self,
        instance_id: &str,
        index: usize,
        template: &StepTemplate,
    ) -> Result<(), String> {
        let (context, finished_steps) = {
            let mut inner = self.inner.write().await;
            let entry = inner
                .instances
                .get_mut(instance_id)
                .ok_or_else(|| format!("workflow {} disappeared", instance_id))?;
            let step = &mut entry.instance.steps[index];
            step.status = StepStatus::Running;
            step.started_at = Some(Utc::now());
            (entry.instance.context.clone(), entry.instance.steps.clone())
        };

        tracing::info!(
            "[WorkflowEngine] {} step '{}' → {} ({})",
            instance_id,
            template.id,
            template.agent_id,
            template.action
        );

        let result = self.call_step(template, &context, &finished_steps).await;

        let mut inner = self.inner.write().await;
        let entry = inner
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| format!("workflow {} disappeared", instance_id))?;
        let instance = &mut entry.instance;
        let step = &mut instance.steps[index];
        step.finished_at = Some(Utc::now());

        match result {
            Ok((text, data)) => {
                let published = template
                    .output_key
                    .as_ref()
                    .map(|key| (key.clone(), data.clone().unwrap_or_else(|| Value::String(text.clone()))));
                step.status = StepStatus::Completed;
                step.output = Some(text);
                step.data = data;
                if let Some((key, value)) = published {
                    instance.context.insert(key, value);
                }
                Ok(())
            }
            Err(reason) => {
                step.status = StepStatus::Failed;
                step.error = Some(reason.clone());
                Err(reason)
            }
        }
    }

    async fn call_step(
        &self,
        template: &StepTemplate,
        context: &Map<String, Value>,
        steps: &[StepInstance],
    ) -> Result<(String, Option<Value>), String> {
        let agent = self
            .directory
            .get(&template.agent_id)
            .await
            .ok_or_else(|| format!("agent '{}' is not registered", template.agent_id))?;

        if !agent.is_reachable() {
            return Err(ServerError::Unreachable {
                agent_id: agent.id.clone(),
                last_probe: agent.last_probe_summary(),
            }
            .to_string());
        }

        let request = AgentRequest::new(
            template.action.clone(),
            render(&template.input_template, context, steps),
        )
        .with_context(context.clone());

        match self.invoker.invoke(&agent, &request).await {
            Ok(AgentOutcome::Completed { text, data }) => Ok((text, data)),
            Ok(AgentOutcome::Failed { reason }) => Err(ServerError::AgentFailed {
                agent_id: agent.id.clone(),
                reason,
            }
            .to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn finish_cancelled(&self, instance_id: &str) -> Result<WorkflowInstance, ServerError> {
        tracing::info!("[WorkflowEngine] {} cancelled", instance_id);
        self.finish(
            instance_id,
            WorkflowStatus::Cancelled,
            Some("cancelled by caller".to_string()),
        )
        .await
    }

    async fn finish(
        &self,
        instance_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<WorkflowInstance, ServerError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ServerError::Internal(format!("Workflow {} disappeared", instance_id)))?;
        let instance = &mut entry.instance;
        if !instance.overall_status.is_terminal() {
            instance.overall_status = status;
            instance.error = error;
            instance.completed_at = Some(Utc::now());
        }
        if status == WorkflowStatus::Completed {
            tracing::info!("[WorkflowEngine] {} completed", instance_id);
        }
        Ok(instance.clone())
    }

    // ── Retention ──────────────────────────────────────────────────────

    /// Evict finished instances older than the retention age, then the
    /// oldest finished ones beyond the retention count. Pending and
    /// running instances are never evicted. Returns the number evicted.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let max_age_secs = self.retention.max_age_secs;
        let mut inner = self.inner.write().await;

        let mut evict: Vec<String> = inner
            .order
            .iter()
            .filter(|id| {
                inner.instances.get(*id).is_some_and(|e| {
                    let finished = e.instance.completed_at.unwrap_or(e.instance.created_at);
                    e.instance.overall_status.is_terminal()
                        && deadline_after(finished, max_age_secs).is_some_and(|d| d < now)
                })
            })
            .cloned()
            .collect();

        let mut remaining = inner.instances.len() - evict.len();
        if remaining > self.retention.max_instances {
            for id in inner.order.iter() {
                if remaining <= self.retention.max_instances {
                    break;
                }
                if evict.contains(id) {
                    continue;
                }
                let terminal = inner
                    .instances
                    .get(id)
                    .is_some_and(|e| e.instance.overall_status.is_terminal());
                if terminal {
                    evict.push(id.clone());
                    remaining -= 1;
                }
            }
        }

        for id in &evict {
            inner.instances.remove(id);
        }
        inner.order.retain(|id| !evict.contains(id));

        if !evict.is_empty() {
            tracing::debug!("[WorkflowEngine] Evicted {} finished instance(s)", evict.len());
        }
        evict.len()
    }
}
