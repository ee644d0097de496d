//! Maestro Server — HTTP boundary for the orchestration core.
//!
//! Exposes the agent directory, workflow engine and coordinator of
//! `maestro-core` as a JSON API via axum. The crate can be used standalone
//! (`maestro server`) or embedded with a pre-built [`AppState`].

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use maestro_core::state::{AppState, AppStateInner};
use maestro_core::MaestroConfig;

/// Configuration for the Maestro HTTP server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Optional path to a YAML `MaestroConfig`; defaults are used when absent.
    pub config_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3300,
            config_path: None,
        }
    }
}

/// Load the config, build a shared `AppState`, and start its background tasks.
pub async fn create_app_state(config_path: Option<&str>) -> Result<AppState, String> {
    let config = MaestroConfig::load(config_path)?;
    let state: AppState = Arc::new(AppStateInner::from_config(config));
    state.start().await;
    Ok(state)
}

/// Start the Maestro HTTP server.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    // The CLI may already have installed a subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "maestro_server=info,maestro_core=info,tower_http=info".into()
            }),
        )
        .try_init();

    tracing::info!("Starting Maestro server on {}:{}", config.host, config.port);

    let state = create_app_state(config.config_path.as_deref()).await?;

    start_server_with_state(config, state).await
}

/// Build the full router (API routes, health check, CORS and tracing layers).
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("Maestro server listening on {}", local_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    let agents = state.directory.list().await;
    let reachable = agents.iter().filter(|a| a.is_reachable()).count();
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "maestro-server",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": { "total": agents.len(), "reachable": reachable },
        "reasoning": state.coordinator.has_reasoning(),
    }))
}
