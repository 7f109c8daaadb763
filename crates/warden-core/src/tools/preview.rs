//! Input previews for approval prompts.
//!
//! A preview is the short human-readable projection of a tool input shown to
//! the approver. It must never carry the raw secret-bearing payload: fields
//! marked `"secret": true` in the input schema, and fields whose names look
//! secret-bearing, are redacted before rendering.

use serde_json::Value;

const MAX_PREVIEW_CHARS: usize = 240;
const REDACTED: &str = "[redacted]";

const SECRET_NAME_HINTS: &[&str] = &[
    "secret",
    "password",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "private_key",
];

/// Render the default preview: truncated JSON with secrets redacted.
pub fn default_preview(input_schema: &Value, input: &Value) -> String {
    let mut projected = input.clone();
    redact(&mut projected, Some(input_schema));
    let rendered = serde_json::to_string(&projected).unwrap_or_else(|_| "{}".to_string());
    truncate_chars(&rendered, MAX_PREVIEW_CHARS)
}

fn redact(value: &mut Value, schema: Option<&Value>) {
    match value {
        Value::Object(map) => {
            let properties = schema.and_then(|s| s.get("properties"));
            for (key, child) in map.iter_mut() {
                let child_schema = properties.and_then(|p| p.get(key));
                if is_secret_field(key, child_schema) {
                    *child = Value::String(REDACTED.to_string());
                } else {
                    redact(child, child_schema);
                }
            }
        }
        Value::Array(items) => {
            let item_schema = schema.and_then(|s| s.get("items"));
            for item in items {
                redact(item, item_schema);
            }
        }
        _ => {}
    }
}

fn is_secret_field(name: &str, schema: Option<&Value>) -> bool {
    if schema
        .and_then(|s| s.get("secret"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    SECRET_NAME_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Char-boundary-safe truncation with an ellipsis marker.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let boundary = floor_char_boundary(text, max_chars);
    format!("{}…", &text[..boundary])
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}
