use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use maestro_core::coordinator::format_instance;
use maestro_core::error::ServerError;
use maestro_core::models::workflow::WorkflowInstance;
use maestro_core::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workflows))
        .route("/run", post(run_workflow))
        .route("/{id}", get(get_workflow))
        .route("/{id}/cancel", post(cancel_workflow))
}

pub fn templates_router() -> Router<AppState> {
    Router::new().route("/", get(list_templates))
}

async fn list_workflows(State(state): State<AppState>) -> Json<serde_json::Value> {
    let workflows = state.engine.list().await;
    Json(serde_json::json!({ "workflows": workflows }))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowInstance>, ServerError> {
    state
        .engine
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("Workflow {} not found", id)))
}

#[derive(Debug, Deserialize)]
struct RunWorkflowRequest {
    name: String,
    #[serde(default)]
    context: serde_json::Map<String, serde_json::Value>,
    /// Return immediately with the pending instance; poll `GET /{id}` for progress.
    #[serde(default)]
    background: bool,
}

/// POST /api/workflows/run — Instantiate a catalog workflow and run it.
async fn run_workflow(
    State(state): State<AppState>,
    Json(body): Json<RunWorkflowRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServerError> {
    if body.background {
        let instance = state.engine.instantiate_named(&body.name, body.context).await?;
        let engine = state.engine.clone();
        let id = instance.id.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run(&id).await {
                tracing::warn!("Background workflow {} ended with error: {}", id, e);
            }
        });
        return Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "workflow": instance.summary() })),
        ));
    }

    let instance = state.coordinator.run_workflow(&body.name, body.context).await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "workflow": instance,
            "summary": format_instance(&instance),
        })),
    ))
}

async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let instance = state.engine.cancel(&id).await?;
    Ok(Json(serde_json::json!({ "workflow": instance.summary() })))
}

async fn list_templates(State(state): State<AppState>) -> Json<serde_json::Value> {
    let templates: Vec<serde_json::Value> = state
        .engine
        .templates()
        .await
        .into_iter()
        .map(|definition| {
            let required: Vec<String> = definition.required_context_keys().into_iter().collect();
            serde_json::json!({
                "name": definition.name,
                "description": definition.description,
                "requiredContext": required,
                "steps": definition.steps,
            })
        })
        .collect();
    Json(serde_json::json!({ "templates": templates }))
}
