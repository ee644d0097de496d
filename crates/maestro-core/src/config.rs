//! Runtime configuration, loaded from YAML.
//!
//! ```yaml
//! probe:
//!   interval_secs: 30
//!   timeout_secs: 5
//! engine:
//!   step_timeout_secs: 30
//!   retention:
//!     max_instances: 500
//!     max_age_secs: 86400
//!   workflow_dirs: ["./workflows"]
//! sessions:
//!   idle_timeout_secs: 1800
//! reasoning:
//!   base_url: "${ANTHROPIC_BASE_URL:-https://api.anthropic.com}"
//!   api_key: "${ANTHROPIC_API_KEY:-}"
//! agents:
//!   - id: balance-agent
//!     name: "Balance Agent"
//!     endpoint: "http://127.0.0.1:8101"
//!     capabilities: [balance]
//! ```
//!
//! String values may reference environment variables as `${VAR}` or
//! `${VAR:-default}`; they are expanded before the YAML is parsed.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::models::agent::{default_task_path, AgentDescriptor};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaestroConfig {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    /// Static seed list registered at startup
    #[serde(default)]
    pub agents: Vec<AgentSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Agent-card document tried when the health path fails
    #[serde(default = "default_card_path")]
    pub card_path: String,
}

fn default_probe_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_card_path() -> String {
    "/.well-known/agent.json".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_probe_interval(),
            timeout_secs: default_probe_timeout(),
            health_path: default_health_path(),
            card_path: default_card_path(),
        }
    }
}

/// Upper bound for timer periods; larger values are clamped.
const MAX_PERIOD_SECS: u64 = 365 * 24 * 60 * 60;

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.clamp(1, MAX_PERIOD_SECS))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.clamp(1, MAX_PERIOD_SECS))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    #[serde(default)]
    pub retention: RetentionPolicy,
    /// Directories scanned for additional `*.yaml` workflow definitions
    #[serde(default)]
    pub workflow_dirs: Vec<String>,
}

fn default_step_timeout() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            retention: RetentionPolicy::default(),
            workflow_dirs: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs.max(1))
    }
}

/// Bounds on how many finished workflow instances are kept in memory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

fn default_max_instances() -> usize {
    500
}

fn default_max_age() -> u64 {
    24 * 60 * 60
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_instances: default_max_instances(),
            max_age_secs: default_max_age(),
        }
    }
}

/// `start` plus `secs` seconds, or `None` when that lies beyond the
/// representable range. `None` means the deadline never arrives.
pub fn deadline_after(start: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    start.checked_add_signed(TimeDelta::try_seconds(secs)?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_idle_timeout() -> u64 {
    30 * 60
}

fn default_max_history() -> usize {
    50
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            max_history: default_max_history(),
        }
    }
}

/// Anthropic-compatible Messages API used for free-text conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_reasoning_base_url")]
    pub base_url: String,
    /// No key means no reasoning backend; chat requests are rejected.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_reasoning_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_secs: u64,
}

fn default_reasoning_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_reasoning_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_reasoning_timeout() -> u64 {
    120
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: default_reasoning_base_url(),
            api_key: None,
            model: default_reasoning_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_reasoning_timeout(),
        }
    }
}

impl ReasoningConfig {
    /// The configured key, treating an empty string as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// One entry of the static agent seed list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSeed {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_task_path")]
    pub task_path: String,
}

impl AgentSeed {
    pub fn to_descriptor(&self) -> AgentDescriptor {
        AgentDescriptor::new(
            self.id.clone(),
            self.name.clone().unwrap_or_else(|| self.id.clone()),
            self.endpoint.clone(),
        )
        .with_capabilities(self.capabilities.iter().cloned())
        .with_task_path(self.task_path.clone())
    }
}

impl MaestroConfig {
    /// Parse a config from a YAML string, expanding `${ENV}` references first.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        let expanded = resolve_env_vars(yaml);
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&expanded).map_err(|e| format!("Failed to parse config YAML: {}", e))
    }

    /// Load a config file from disk.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path, e))?;
        Self::from_yaml(&content)
    }

    /// Load from `path` when given, otherwise fall back to defaults.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }
}

/// Resolve environment variable references in a string.
/// Supports `${ENV_VAR}` and `${ENV_VAR:-default}` syntax.
pub fn resolve_env_vars(input: &str) -> String {
    let re = env_var_regex();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_expr = &caps[1];
        if let Some(idx) = var_expr.find(":-") {
            let var_name = &var_expr[..idx];
            let default_val = &var_expr[idx + 2..];
            std::env::var(var_name).unwrap_or_else(|_| default_val.to_string())
        } else {
            std::env::var(var_expr).unwrap_or_else(|_| format!("${{{}}}", var_expr))
        }
    })
    .to_string()
}

/// Only upper-case identifiers count as env references, so workflow
/// templates such as `${context.amount}` pass through untouched.
fn env_var_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*(?::-[^}]*)?)\}").expect("valid env regex")
    })
}
