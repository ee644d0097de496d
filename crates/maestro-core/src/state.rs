//! Shared application state for the server and in-process CLI commands.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::MaestroConfig;
use crate::coordinator::Coordinator;
use crate::directory::{AgentDirectory, ProbeLoop};
use crate::models::agent::Reachability;
use crate::reasoning::{AnthropicReasoningClient, ReasoningClient};
use crate::transport::{AgentInvoker, AgentTransport, HttpAgentTransport};
use crate::workflow::{WorkflowCatalog, WorkflowEngine};

/// Shared state accessible by all API handlers.
pub struct AppStateInner {
    pub config: MaestroConfig,
    pub directory: AgentDirectory,
    pub engine: WorkflowEngine,
    pub coordinator: Coordinator,
    background: Mutex<Option<Background>>,
}

pub type AppState = Arc<AppStateInner>;

struct Background {
    probe_loop: ProbeLoop,
    maintenance_stop: watch::Sender<bool>,
    maintenance: JoinHandle<()>,
}

impl AppStateInner {
    /// Wire the components with the HTTP transport and, when an API key is
    /// configured, the Anthropic reasoning client.
    pub fn from_config(config: MaestroConfig) -> Self {
        let transport = Arc::new(HttpAgentTransport::new(config.probe.clone()));
        let reasoning = AnthropicReasoningClient::from_config(&config.reasoning)
            .map(|c| Arc::new(c) as Arc<dyn ReasoningClient>);
        if reasoning.is_none() {
            tracing::info!("No reasoning API key configured; chat is disabled");
        }
        Self::new(config, transport, reasoning)
    }

    pub fn new(
        config: MaestroConfig,
        transport: Arc<dyn AgentTransport>,
        reasoning: Option<Arc<dyn ReasoningClient>>,
    ) -> Self {
        let directory = AgentDirectory::new(transport.clone(), config.probe.timeout());
        let invoker = AgentInvoker::new(transport, config.engine.step_timeout());

        let mut catalog = WorkflowCatalog::with_builtins();
        for dir in &config.engine.workflow_dirs {
            match catalog.load_dir(dir) {
                Ok(count) => tracing::info!("Loaded {} workflow(s) from {}", count, dir),
                Err(e) => tracing::warn!("Skipping workflow directory: {}", e),
            }
        }

        let engine = WorkflowEngine::new(
            directory.clone(),
            invoker.clone(),
            catalog,
            config.engine.retention,
        );
        let coordinator = Coordinator::new(
            directory.clone(),
            engine.clone(),
            invoker,
            reasoning,
            config.sessions.clone(),
        );

        Self {
            config,
            directory,
            engine,
            coordinator,
            background: Mutex::new(None),
        }
    }

    /// Register the configured agent seeds. Returns how many were registered.
    pub async fn seed_agents(&self) -> usize {
        for seed in &self.config.agents {
            self.directory.register(seed.to_descriptor()).await;
        }
        self.config.agents.len()
    }

    /// Seed agents, probe them once, then start the probe timer and the
    /// retention sweeps. Calling `start` twice is a no-op.
    pub async fn start(&self) {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return;
        }

        let seeded = self.seed_agents().await;
        let reports = self.directory.probe_all().await;
        tracing::info!(
            "Seeded {} agent(s), {} reachable after initial probe",
            seeded,
            reports
                .iter()
                .filter(|r| r.reachability == Reachability::Reachable)
                .count()
        );

        let interval = self.config.probe.interval();
        let probe_loop = self.directory.spawn_probe_loop(interval);

        let (maintenance_stop, mut stop_rx) = watch::channel(false);
        let engine = self.engine.clone();
        let coordinator = self.coordinator.clone();
        let maintenance = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        engine.sweep_expired(now).await;
                        coordinator.sweep_idle_sessions(now).await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        *background = Some(Background {
            probe_loop,
            maintenance_stop,
            maintenance,
        });
    }

    /// Stop the background tasks started by [`start`](Self::start).
    pub async fn shutdown(&self) {
        let Some(background) = self.background.lock().await.take() else {
            return;
        };
        background.probe_loop.shutdown().await;
        let _ = background.maintenance_stop.send(true);
        if let Err(e) = background.maintenance.await {
            tracing::error!("Maintenance task ended abnormally: {}", e);
        }
        tracing::info!("Background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSeed;
    use crate::error::ServerError;
    use crate::models::agent::AgentDescriptor;
    use crate::transport::{AgentOutcome, AgentRequest};
    use async_trait::async_trait;

    struct AlwaysUp;

    #[async_trait]
    impl AgentTransport for AlwaysUp {
        async fn send(
            &self,
            _agent: &AgentDescriptor,
            _request: &AgentRequest,
        ) -> Result<AgentOutcome, ServerError> {
            Ok(AgentOutcome::completed("ok"))
        }

        async fn probe(&self, _agent: &AgentDescriptor) -> Result<(), String> {
            Ok(())
        }
    }

    fn config_with_seed() -> MaestroConfig {
        let mut config = MaestroConfig::default();
        config.agents.push(AgentSeed {
            id: "balance-agent".into(),
            name: Some("Balance".into()),
            endpoint: "http://localhost:9101".into(),
            capabilities: vec!["balance".into()],
            task_path: "/tasks".into(),
        });
        config
    }

    #[tokio::test]
    async fn test_start_seeds_and_probes() {
        let state = AppStateInner::new(config_with_seed(), Arc::new(AlwaysUp), None);
        assert!(state.directory.is_empty().await);

        state.start().await;
        let agent = state.directory.get("balance-agent").await.unwrap();
        assert_eq!(agent.reachability, Reachability::Reachable);
        assert_eq!(agent.display_name, "Balance");

        state.start().await;
        assert_eq!(state.directory.len().await, 1);

        state.shutdown().await;
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_workflow_dirs_extend_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ping.yaml"),
            "name: ping\nsteps:\n  - id: ping\n    agent: balance-agent\n    action: ping\n",
        )
        .unwrap();

        let mut config = config_with_seed();
        config.engine.workflow_dirs = vec![dir.path().to_string_lossy().to_string()];
        config.engine.workflow_dirs.push("/definitely/not/here".into());

        let state = AppStateInner::new(config, Arc::new(AlwaysUp), None);
        assert!(state.engine.definition("ping").await.is_ok());
        assert!(state.engine.definition("resource-purchase").await.is_ok());
        assert!(!state.coordinator.has_reasoning());
    }
}
