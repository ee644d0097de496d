//! Workflow definitions, the built-in catalog, and the sequential engine.

pub mod catalog;
pub mod engine;
pub mod render;
pub mod schema;

pub use catalog::WorkflowCatalog;
pub use engine::WorkflowEngine;
pub use schema::{StepTemplate, WorkflowDefinition};
