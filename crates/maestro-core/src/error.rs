//! Core error type for the Maestro orchestrator.
//!
//! `ServerError` is used throughout the core (directory, engine, coordinator).
//! When the `axum` feature is enabled, it also implements `IntoResponse`
//! so it can be used directly as an axum handler error type.

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Agent '{agent_id}' is unreachable (last probe: {last_probe})")]
    Unreachable { agent_id: String, last_probe: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Agent '{agent_id}' failed: {reason}")]
    AgentFailed { agent_id: String, reason: String },

    #[error("Workflow {instance_id} deadlocked; pending steps never became ready: {}", .pending.join(", "))]
    Deadlock {
        instance_id: String,
        pending: Vec<String>,
    },

    #[error("Cyclic step dependencies: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Reasoning backend error: {0}")]
    Reasoning(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_)
            | ServerError::InvalidDefinition(_)
            | ServerError::CyclicDependency(_) => StatusCode::BAD_REQUEST,
            ServerError::Conflict(_) | ServerError::Cancelled(_) => StatusCode::CONFLICT,
            ServerError::Unreachable { .. }
            | ServerError::Transport(_)
            | ServerError::AgentFailed { .. } => StatusCode::BAD_GATEWAY,
            ServerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Reasoning(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Deadlock { .. } | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
