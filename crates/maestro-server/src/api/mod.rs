pub mod agents;
pub mod chat;
pub mod workflows;

use axum::Router;

use maestro_core::state::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/agents", agents::router())
        .nest("/api/workflows", workflows::router())
        .nest("/api/workflow-templates", workflows::templates_router())
        .nest("/api/chat", chat::router())
}
