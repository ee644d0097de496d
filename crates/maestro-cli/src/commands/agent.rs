//! `maestro agent` — Agent directory commands.

use maestro_core::models::agent::{AgentDescriptor, Reachability};
use maestro_core::state::AppState;

use super::print_json;

pub async fn list(state: &AppState) -> Result<(), String> {
    let agents = state.directory.list().await;
    if agents.is_empty() {
        println!("No agents configured. Add them under `agents:` in the config file.");
        return Ok(());
    }
    for agent in &agents {
        println!(
            "{:<20} {:<12} {}  ({})",
            agent.id,
            agent.reachability.as_str(),
            agent.endpoint,
            agent.last_probe_summary()
        );
    }
    Ok(())
}

pub async fn status(state: &AppState, agent_id: &str) -> Result<(), String> {
    let agent = state
        .directory
        .get(agent_id)
        .await
        .ok_or_else(|| format!("Agent '{}' not found", agent_id))?;
    print_json(&serde_json::json!(agent));
    Ok(())
}

pub async fn register(
    state: &AppState,
    id: &str,
    endpoint: &str,
    name: Option<&str>,
    capabilities: Vec<String>,
    task_path: Option<&str>,
) -> Result<(), String> {
    let mut descriptor =
        AgentDescriptor::new(id, name.unwrap_or(id), endpoint).with_capabilities(capabilities);
    if let Some(path) = task_path {
        descriptor = descriptor.with_task_path(path);
    }
    state.directory.register(descriptor).await;
    state.directory.probe_all().await;

    let agent = state
        .directory
        .get(id)
        .await
        .ok_or_else(|| format!("Agent '{}' vanished after registration", id))?;
    print_json(&serde_json::json!(agent));
    Ok(())
}

pub async fn probe(state: &AppState) -> Result<(), String> {
    let reports = state.directory.probe_all().await;
    for report in &reports {
        let icon = if report.reachability == Reachability::Reachable {
            "✅"
        } else {
            "❌"
        };
        println!("{} {:<20} {}", icon, report.agent_id, report.detail);
    }
    Ok(())
}
