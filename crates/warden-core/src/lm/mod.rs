//! Language-model contract.
//!
//! The loop hands the model a system description (tool catalog included),
//! the user prompt, and the transcript so far; the model answers with either
//! a final natural-language message or a single code snippet to execute.
//! The backend itself is an external collaborator — only this contract is
//! fixed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::CatalogEntry;
use crate::types::Receipt;

pub mod http;
pub mod prompt;
pub mod scripted;

pub use http::HttpLm;
pub use scripted::ScriptedLm;

/// One prior exchange in the turn, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// Assistant text that did not terminate the turn.
    AssistantText { text: String },
    /// A code snippet the assistant emitted.
    AssistantCode { code: String },
    /// The outcome of running a snippet, receipts included.
    RunReport {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        receipts: Vec<Receipt>,
    },
}

/// Everything the model is given for one completion.
#[derive(Debug, Clone)]
pub struct LmRequest {
    pub system_prompt: String,
    pub tool_catalog: Vec<CatalogEntry>,
    pub user_prompt: String,
    pub transcript: Vec<TranscriptEntry>,
}

/// The model's answer: final message, or code to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LmReply {
    Final { text: String },
    Code { code: String },
}

#[derive(Debug, Clone, Error)]
pub enum LmError {
    /// Transport or backend failure; retried once per step.
    #[error("language model unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something outside the contract.
    #[error("language model protocol error: {0}")]
    Protocol(String),
}

/// The seam between the agent loop and any model backend.
#[async_trait]
pub trait LmClient: Send + Sync {
    async fn complete(&self, request: LmRequest) -> Result<LmReply, LmError>;
}
