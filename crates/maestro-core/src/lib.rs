//! Maestro Core — orchestration of remote capability agents.
//!
//! This crate holds the parts of the system that decide *which* agent is
//! called, *when*, and *what happens* when it fails:
//!
//! - [`directory::AgentDirectory`] — known agents and their reachability
//! - [`workflow::WorkflowEngine`] — dependency-ordered, strictly sequential
//!   execution of step graphs against those agents
//! - [`coordinator::Coordinator`] — the user-facing façade (chat sessions,
//!   direct agent calls, named workflow runs)
//!
//! It has **no HTTP framework dependency** by default. The HTTP boundary
//! lives in `maestro-server`, the command line in `maestro-cli`.
//!
//! # Feature Flags
//!
//! - `axum` — Enables `IntoResponse` impl on `ServerError` for use in axum handlers.

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod models;
pub mod reasoning;
pub mod state;
pub mod transport;
pub mod workflow;

// Convenience re-exports
pub use config::MaestroConfig;
pub use error::ServerError;
pub use state::{AppState, AppStateInner};
