use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use maestro_core::error::ServerError;
use maestro_core::models::agent::{AgentDescriptor, Reachability};
use maestro_core::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_agents).post(register_agent))
        .route("/probe", post(probe_agents))
        .route("/{id}", get(get_agent))
        .route("/{id}/reachability", put(set_reachability))
        .route("/{id}/call", post(call_agent))
}

async fn list_agents(State(state): State<AppState>) -> Json<serde_json::Value> {
    let agents = state.directory.list().await;
    Json(serde_json::json!({ "agents": agents }))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentDescriptor>, ServerError> {
    state
        .directory
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("Agent {} not found", id)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterAgentRequest {
    id: String,
    name: Option<String>,
    endpoint: String,
    #[serde(default)]
    capabilities: Vec<String>,
    task_path: Option<String>,
}

async fn register_agent(
    State(state): State<AppState>,
    Json(body): Json<RegisterAgentRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if body.id.trim().is_empty() {
        return Err(ServerError::BadRequest("Agent id must not be empty".to_string()));
    }
    if !(body.endpoint.starts_with("http://") || body.endpoint.starts_with("https://")) {
        return Err(ServerError::BadRequest(format!(
            "Agent endpoint must be an http(s) URL, got '{}'",
            body.endpoint
        )));
    }

    let name = body.name.unwrap_or_else(|| body.id.clone());
    let mut descriptor =
        AgentDescriptor::new(body.id, name, body.endpoint).with_capabilities(body.capabilities);
    if let Some(task_path) = body.task_path {
        descriptor = descriptor.with_task_path(task_path);
    }

    let agent = state.directory.register(descriptor).await;
    Ok(Json(serde_json::json!({ "agent": agent })))
}

async fn probe_agents(State(state): State<AppState>) -> Json<serde_json::Value> {
    let reports = state.directory.probe_all().await;
    Json(serde_json::json!({ "probes": reports }))
}

#[derive(Debug, Deserialize)]
struct ReachabilityRequest {
    reachability: String,
}

async fn set_reachability(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ReachabilityRequest>,
) -> Result<Json<AgentDescriptor>, ServerError> {
    let reachability = Reachability::from_str(&body.reachability).ok_or_else(|| {
        ServerError::BadRequest(format!("Invalid reachability: {}", body.reachability))
    })?;
    state
        .directory
        .set_reachability(&id, reachability)
        .await
        .map(Json)
}

#[derive(Debug, Deserialize)]
struct CallAgentRequest {
    message: String,
}

async fn call_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CallAgentRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let response = state.coordinator.call_agent(&id, &body.message).await?;
    Ok(Json(serde_json::json!({
        "agentId": id,
        "response": response,
    })))
}
