//! Prompt assembly for the turn loop.
//!
//! Renders the tool catalog and the tool-script instructions into the system
//! prompt, and the transcript into plain structured text any chat backend
//! can consume.

use crate::tools::CatalogEntry;
use crate::types::ApprovalMode;

use super::TranscriptEntry;

/// Render the full system prompt: role description, catalog, script rules.
pub fn render_system(catalog: &[CatalogEntry]) -> String {
    let mut out = String::from(
        "You are an assistant that completes user requests by calling tools.\n\
         Reply with either a final natural-language answer, or a single \
         fenced code block in the tool-script language:\n\
         ```tool-script\n\
         let result = tools.some.tool({ \"key\": \"value\" });\n\
         return { \"answer\": result.field };\n\
         ```\n\
         Statements: `let name = expr;`, `expr;`, `return expr;`. \
         Expressions: JSON literals, variable references like `name.field`, \
         tool calls `tools.<path>(<input>)`, and `join(call, call)` to run \
         calls concurrently. Nothing else is available.\n\n\
         Available tools:\n",
    );
    for entry in catalog {
        let gate = match entry.approval {
            ApprovalMode::Auto => "auto",
            ApprovalMode::Required => "requires human approval",
        };
        out.push_str(&format!(
            "- tools.{} ({}): {}\n  input: {}\n  output: {}\n",
            entry.path,
            gate,
            entry.description,
            compact_schema(&entry.input_schema),
            compact_schema(&entry.output_schema),
        ));
    }
    out
}

/// Render one transcript entry as text for a chat-style backend.
/// Returns `(role, content)`.
pub fn render_transcript_entry(entry: &TranscriptEntry) -> (&'static str, String) {
    match entry {
        TranscriptEntry::AssistantText { text } => ("assistant", text.clone()),
        TranscriptEntry::AssistantCode { code } => {
            ("assistant", format!("```tool-script\n{}\n```", code))
        }
        TranscriptEntry::RunReport { ok, error, receipts } => {
            let receipts_json =
                serde_json::to_string(receipts).unwrap_or_else(|_| "[]".to_string());
            let content = match error {
                Some(error) => format!(
                    "Run result: ok={}, error={}\nReceipts: {}",
                    ok, error, receipts_json
                ),
                None => format!("Run result: ok={}\nReceipts: {}", ok, receipts_json),
            };
            ("user", content)
        }
    }
}

fn compact_schema(schema: &serde_json::Value) -> String {
    serde_json::to_string(schema).unwrap_or_else(|_| "{}".to_string())
}
