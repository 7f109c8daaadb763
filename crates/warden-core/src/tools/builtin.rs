//! Builtin demo tools.
//!
//! A small set backing the server's default wiring and the scenario suite:
//! arithmetic and text helpers run unattended, while the calendar and domain
//! tools are approval-gated.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::RegistryError;
use crate::types::ApprovalMode;

use super::registry::ToolRegistry;
use super::Tool;

/// Register every builtin tool.
pub fn register_builtin_tools(registry: &ToolRegistry) -> Result<(), RegistryError> {
    registry.register(Arc::new(MathAdd))?;
    registry.register(Arc::new(TextUppercase))?;
    registry.register(Arc::new(CalendarUpdate))?;
    registry.register(Arc::new(RemoveProjectDomain))?;
    Ok(())
}

/// `math.add` — add two numbers.
pub struct MathAdd;

#[async_trait]
impl Tool for MathAdd {
    fn path(&self) -> &str {
        "math.add"
    }

    fn description(&self) -> &str {
        "Add two numbers and return their sum."
    }

    fn approval(&self) -> ApprovalMode {
        ApprovalMode::Auto
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "number"},
                "b": {"type": "number"}
            },
            "required": ["a", "b"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"sum": {"type": "number"}},
            "required": ["sum"]
        })
    }

    async fn run(&self, input: Value) -> anyhow::Result<Value> {
        let a = input["a"].as_f64().unwrap_or(0.0);
        let b = input["b"].as_f64().unwrap_or(0.0);
        Ok(json!({"sum": a + b}))
    }
}

/// `text.uppercase` — uppercase a string.
pub struct TextUppercase;

#[async_trait]
impl Tool for TextUppercase {
    fn path(&self) -> &str {
        "text.uppercase"
    }

    fn description(&self) -> &str {
        "Uppercase the given text."
    }

    fn approval(&self) -> ApprovalMode {
        ApprovalMode::Auto
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn run(&self, input: Value) -> anyhow::Result<Value> {
        let text = input["text"].as_str().unwrap_or_default();
        Ok(json!({"text": text.to_uppercase()}))
    }
}

/// `calendar.update` — create or update a calendar event. Approval-gated.
pub struct CalendarUpdate;

#[async_trait]
impl Tool for CalendarUpdate {
    fn path(&self) -> &str {
        "calendar.update"
    }

    fn description(&self) -> &str {
        "Create or update a calendar event with a title and start time."
    }

    fn approval(&self) -> ApprovalMode {
        ApprovalMode::Required
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "start": {"type": "string"},
                "attendees": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["title", "start"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"event_id": {"type": "string"}},
            "required": ["event_id"]
        })
    }

    async fn run(&self, input: Value) -> anyhow::Result<Value> {
        let title = input["title"].as_str().unwrap_or_default();
        let start = input["start"].as_str().unwrap_or_default();
        // Demo implementation: a deterministic id derived from the input.
        let event_id = format!("evt-{:08x}", seed_hash(title, start));
        Ok(json!({"event_id": event_id}))
    }

    fn preview_input(&self, input: &Value) -> Option<String> {
        let title = input.get("title")?.as_str()?;
        let start = input.get("start").and_then(Value::as_str).unwrap_or("?");
        Some(format!("Update calendar: \"{}\" at {}", title, start))
    }
}

/// `vercel.projects.removeProjectDomain` — detach a domain from a project.
/// Approval-gated.
pub struct RemoveProjectDomain;

#[async_trait]
impl Tool for RemoveProjectDomain {
    fn path(&self) -> &str {
        "vercel.projects.removeProjectDomain"
    }

    fn description(&self) -> &str {
        "Remove a domain from a project. Destructive; cannot be undone."
    }

    fn approval(&self) -> ApprovalMode {
        ApprovalMode::Required
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "owner": {"type": "string"},
                "project": {"type": "string"},
                "domain": {"type": "string"}
            },
            "required": ["owner", "project", "domain"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"removed": {"type": "boolean"}},
            "required": ["removed"]
        })
    }

    async fn run(&self, input: Value) -> anyhow::Result<Value> {
        let domain = input["domain"].as_str().unwrap_or_default();
        tracing::info!(domain, "Removing project domain");
        Ok(json!({"removed": true}))
    }
}

fn seed_hash(a: &str, b: &str) -> u32 {
    // FNV-1a, good enough for demo event ids.
    let mut hash: u32 = 0x811c_9dc5;
    for byte in a.bytes().chain(b.bytes()) {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
