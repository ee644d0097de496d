use axum::{
    extract::{Path, State},
    routing::{delete, post},
    Json, Router,
};
use serde::Deserialize;

use maestro_core::error::ServerError;
use maestro_core::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(chat))
        .route("/{session_id}", delete(cancel_session))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    session_id: String,
    message: String,
}

/// POST /api/chat — One conversational turn for a session.
async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let reply = state.coordinator.handle(&body.session_id, &body.message).await?;
    Ok(Json(serde_json::json!({
        "sessionId": body.session_id,
        "reply": reply,
    })))
}

/// DELETE /api/chat/{sessionId} — Cancel a session; later turns are refused.
async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.coordinator.cancel_session(&session_id).await?;
    Ok(Json(serde_json::json!({
        "sessionId": session_id,
        "cancelled": true,
    })))
}
