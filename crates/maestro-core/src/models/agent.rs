use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an agent answered its most recent liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Reachable,
    Unreachable,
    #[default]
    Unknown,
}

impl Reachability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reachable => "reachable",
            Self::Unreachable => "unreachable",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reachable" => Some(Self::Reachable),
            "unreachable" => Some(Self::Unreachable),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Outcome of the most recent probe (or operator override) for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRecord {
    pub at: DateTime<Utc>,
    pub ok: bool,
    pub detail: String,
}

/// Identity and liveness of one remote capability agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub id: String,
    pub display_name: String,
    /// Base address, e.g. `http://127.0.0.1:8101`
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Path appended to `endpoint` for task requests.
    #[serde(default = "default_task_path")]
    pub task_path: String,
    #[serde(default)]
    pub reachability: Reachability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe: Option<ProbeRecord>,
}

pub fn default_task_path() -> String {
    "/tasks".to_string()
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            endpoint: endpoint.into(),
            capabilities: BTreeSet::new(),
            task_path: default_task_path(),
            reachability: Reachability::Unknown,
            last_probe: None,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_task_path(mut self, task_path: impl Into<String>) -> Self {
        self.task_path = task_path.into();
        self
    }

    pub fn is_reachable(&self) -> bool {
        self.reachability == Reachability::Reachable
    }

    /// Human-readable summary of the last probe, used in failure messages.
    pub fn last_probe_summary(&self) -> String {
        match &self.last_probe {
            Some(p) if p.ok => format!("ok at {}", p.at.to_rfc3339()),
            Some(p) => format!("{} at {}", p.detail, p.at.to_rfc3339()),
            None => "never probed".to_string(),
        }
    }

    /// Join the endpoint with a path without doubling slashes.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
