//! AgentDirectory — the single source of truth for which agents exist and
//! whether they are currently answering.
//!
//! Reachability is written only by [`AgentDirectory::probe_all`] and by the
//! operator override [`AgentDirectory::set_reachability`]. Workflow
//! execution reads it but never writes it.
//!
//! Probe failures are never surfaced as errors: they only update state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::error::ServerError;
use crate::models::agent::{AgentDescriptor, ProbeRecord, Reachability};
use crate::transport::AgentTransport;

/// Result of probing one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub agent_id: String,
    pub reachability: Reachability,
    pub detail: String,
}

struct DirectoryInner {
    /// Registration order, used for deterministic listings.
    order: Vec<String>,
    agents: HashMap<String, AgentDescriptor>,
}

#[derive(Clone)]
pub struct AgentDirectory {
    inner: Arc<RwLock<DirectoryInner>>,
    /// Agents with a probe currently in flight.
    probing: Arc<StdMutex<HashSet<String>>>,
    transport: Arc<dyn AgentTransport>,
    probe_timeout: Duration,
}

impl AgentDirectory {
    pub fn new(transport: Arc<dyn AgentTransport>, probe_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(DirectoryInner {
                order: Vec::new(),
                agents: HashMap::new(),
            })),
            probing: Arc::new(StdMutex::new(HashSet::new())),
            transport,
            probe_timeout,
        }
    }

    /// Insert or replace a descriptor by id. Reachability starts as
    /// `unknown` until the next probe; a replaced agent keeps its position.
    pub async fn register(&self, descriptor: AgentDescriptor) -> AgentDescriptor {
        let mut descriptor = descriptor;
        descriptor.reachability = Reachability::Unknown;
        descriptor.last_probe = None;

        let mut inner = self.inner.write().await;
        if !inner.agents.contains_key(&descriptor.id) {
            inner.order.push(descriptor.id.clone());
        }
        inner
            .agents
            .insert(descriptor.id.clone(), descriptor.clone());

        tracing::info!(
            "[AgentDirectory] Registered agent {} at {}",
            descriptor.id,
            descriptor.endpoint
        );
        descriptor
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.inner.read().await.agents.get(agent_id).cloned()
    }

    /// All agents in registration order.
    pub async fn list(&self) -> Vec<AgentDescriptor> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id).cloned())
            .collect()
    }

    /// Reachable agents in registration order.
    pub async fn list_reachable(&self) -> Vec<AgentDescriptor> {
        self.list()
            .await
            .into_iter()
            .filter(|a| a.is_reachable())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.agents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Operator override of an agent's reachability.
    pub async fn set_reachability(
        &self,
        agent_id: &str,
        reachability: Reachability,
    ) -> Result<AgentDescriptor, ServerError> {
        let mut inner = self.inner.write().await;
        let agent = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| ServerError::NotFound(format!("Agent {} not found", agent_id)))?;
        agent.reachability = reachability;
        agent.last_probe = Some(ProbeRecord {
            at: Utc::now(),
            ok: reachability == Reachability::Reachable,
            detail: format!("set to {} by operator", reachability.as_str()),
        });
        tracing::info!(
            "[AgentDirectory] Operator set {} to {}",
            agent_id,
            reachability.as_str()
        );
        Ok(agent.clone())
    }

    /// Probe every registered agent concurrently.
    ///
    /// An agent whose previous probe is still in flight is skipped, so
    /// probes never pile up against a slow endpoint. Reports come back in
    /// registration order and cover only the agents actually probed.
    pub async fn probe_all(&self) -> Vec<ProbeReport> {
        let agents = self.list().await;
        let claim = ProbeClaim::new(self.probing.clone(), &agents);
        if claim.ids.len() < agents.len() {
            tracing::debug!(
                "[AgentDirectory] Skipping {} agent(s) with a probe still in flight",
                agents.len() - claim.ids.len()
            );
        }

        let mut set = JoinSet::new();
        for (index, agent) in agents
            .into_iter()
            .filter(|a| claim.ids.contains(&a.id))
            .enumerate()
        {
            let transport = self.transport.clone();
            let timeout = self.probe_timeout;
            set.spawn(async move {
                let result = match tokio::time::timeout(timeout, transport.probe(&agent)).await {
                    Ok(r) => r,
                    Err(_) => Err(format!(
                        "probe timed out after {}s",
                        timeout.as_secs_f64()
                    )),
                };
                (index, agent.id, result)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, agent_id, result)) => {
                    let report = self.record_probe(&agent_id, result).await;
                    reports.push((index, report));
                }
                Err(e) => tracing::error!("[AgentDirectory] Probe task failed: {}", e),
            }
        }
        drop(claim);

        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, r)| r).collect()
    }

    async fn record_probe(&self, agent_id: &str, result: Result<(), String>) -> ProbeReport {
        let (reachability, detail) = match result {
            Ok(()) => (Reachability::Reachable, "ok".to_string()),
            Err(e) => (Reachability::Unreachable, e),
        };

        let mut inner = self.inner.write().await;
        if let Some(agent) = inner.agents.get_mut(agent_id) {
            if agent.reachability != reachability {
                tracing::info!(
                    "[AgentDirectory] {} is now {} ({})",
                    agent_id,
                    reachability.as_str(),
                    detail
                );
            }
            agent.reachability = reachability;
            agent.last_probe = Some(ProbeRecord {
                at: Utc::now(),
                ok: reachability == Reachability::Reachable,
                detail: detail.clone(),
            });
        }

        ProbeReport {
            agent_id: agent_id.to_string(),
            reachability,
            detail,
        }
    }

    /// Run `probe_all` on a fixed interval until the returned handle is shut down.
    /// The first round runs one interval from now.
    pub fn spawn_probe_loop(&self, interval: Duration) -> ProbeLoop {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let directory = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reports = directory.probe_all().await;
                        let reachable = reports
                            .iter()
                            .filter(|r| r.reachability == Reachability::Reachable)
                            .count();
                        tracing::debug!(
                            "[AgentDirectory] Probe round: {}/{} reachable",
                            reachable,
                            reports.len()
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("[AgentDirectory] Probe loop stopped");
        });

        ProbeLoop {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

/// Handle to the background probe timer.
pub struct ProbeLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ProbeLoop {
    /// Stop the timer and wait for an in-progress round to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!("[AgentDirectory] Probe loop ended abnormally: {}", e);
        }
    }
}

/// Marks a set of agents as "probe in flight"; released on drop so an
/// abandoned round never blocks future probes.
struct ProbeClaim {
    probing: Arc<StdMutex<HashSet<String>>>,
    ids: HashSet<String>,
}

impl ProbeClaim {
    fn new(probing: Arc<StdMutex<HashSet<String>>>, agents: &[AgentDescriptor]) -> Self {
        let mut ids = HashSet::new();
        {
            let mut in_flight = probing.lock().unwrap_or_else(|e| e.into_inner());
            for agent in agents {
                if in_flight.insert(agent.id.clone()) {
                    ids.insert(agent.id.clone());
                }
            }
        }
        Self { probing, ids }
    }
}

impl Drop for ProbeClaim {
    fn drop(&mut self) {
        let mut in_flight = self.probing.lock().unwrap_or_else(|e| e.into_inner());
        for id in &self.ids {
            in_flight.remove(id);
        }
    }
}
