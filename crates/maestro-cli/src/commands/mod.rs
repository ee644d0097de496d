//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and drives the
//! maestro-core components in-process through `AppState`.

pub mod agent;
pub mod call;
pub mod chat;
pub mod server;
pub mod workflow;

use std::sync::Arc;

use maestro_core::state::{AppState, AppStateInner};
use maestro_core::MaestroConfig;
use serde_json::{Map, Value};

/// Build an in-process `AppState` from the config file, register the seed
/// agents and probe them once.
///
/// No background timers are started; one-shot commands don't need them.
pub async fn init_state(config_path: Option<&str>) -> AppState {
    let config = MaestroConfig::load(config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {}", e);
        std::process::exit(1);
    });
    prepare_state(Arc::new(AppStateInner::from_config(config))).await
}

/// Seed and probe an already-built state.
pub async fn prepare_state(state: AppState) -> AppState {
    state.seed_agents().await;
    state.directory.probe_all().await;
    state
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Parse `key=value` pairs into a context map. Values that parse as JSON
/// (numbers, booleans, objects) keep their type; anything else is a string.
pub fn parse_context_pairs(pairs: &[String]) -> Result<Map<String, Value>, String> {
    let mut context = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid context entry '{}': expected key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid context entry '{}': empty key", pair));
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        context.insert(key.to_string(), value);
    }
    Ok(context)
}
