//! Tool surface.
//!
//! A tool is a leaf in a namespaced tree (`calendar.update`,
//! `vercel.projects.removeProjectDomain`), carrying its approval mode, JSON
//! schemas and an effectful `run`. The registry exclusively owns tools;
//! runners hold read-only `Arc` references.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::ApprovalMode;

pub mod builtin;
pub mod preview;
pub mod registry;

pub use registry::{CatalogEntry, RegisteredTool, ToolRegistry};

/// Trait for tool implementations.
///
/// Implementations must be safe to invoke concurrently with distinct inputs
/// and must not share mutable state with other tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Canonical dotted path, unique within the registry.
    fn path(&self) -> &str;

    /// Human description, shown to the model in the tool catalog.
    fn description(&self) -> &str;

    /// Whether every invocation must pass through the approval pipeline.
    fn approval(&self) -> ApprovalMode;

    /// JSON Schema for the input value.
    fn input_schema(&self) -> Value;

    /// JSON Schema for the output value.
    fn output_schema(&self) -> Value;

    /// Execute the tool. Errors become failed receipts, never panics.
    async fn run(&self, input: Value) -> anyhow::Result<Value>;

    /// Short human-readable projection of the input for approval prompts.
    /// Returning `None` falls back to the runner's redacting default.
    fn preview_input(&self, _input: &Value) -> Option<String> {
        None
    }
}
