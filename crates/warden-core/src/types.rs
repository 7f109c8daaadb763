//! Shared data model for the turn runtime.
//!
//! Everything here is wire-visible: receipts, approval requests, turn states
//! and failure reasons all serialize with serde and cross the RPC surface
//! unchanged.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Whether a tool invocation may run directly or must pass through the
/// approval pipeline. Part of the tool's identity: changing it requires
/// re-registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    Auto,
    Required,
}

/// The binary human (or system) decision on a sensitive tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Denied,
}

/// How the decision on a receipt was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptDecision {
    /// The tool is not approval-gated.
    Auto,
    Approved,
    Denied,
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Succeeded,
    Failed,
    Denied,
    TimedOut,
}

/// Immutable record of one tool invocation's decision and outcome.
///
/// A run produces an ordered sequence of these; the turn's receipt log is
/// the concatenation across runs in invocation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub tool_path: String,
    pub call_id: String,
    pub decision: ReceiptDecision,
    pub status: ReceiptStatus,
    /// Short human-readable projection of the input, never the raw payload.
    pub input_preview: String,
    /// `sha256:` + base64 digest over the canonical JSON of the output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Receipt {
    /// Digest a tool output for the receipt without retaining the payload.
    pub fn digest_of(output: &serde_json::Value) -> String {
        let canonical = serde_json::to_vec(output).unwrap_or_default();
        let hash = Sha256::digest(&canonical);
        format!(
            "sha256:{}",
            base64::engine::general_purpose::STANDARD.encode(hash)
        )
    }
}

/// What a human approver sees about a suspended tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub call_id: String,
    pub tool_path: String,
    pub input_preview: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a turn session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Closed set of machine-readable reasons a turn can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    StepBudget,
    TotalTimeout,
    EventBackpressure,
    SandboxFault,
    LmUnavailable,
    Internal,
}

impl FailReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StepBudget => "step_budget",
            Self::TotalTimeout => "total_timeout",
            Self::EventBackpressure => "event_backpressure",
            Self::SandboxFault => "sandbox_fault",
            Self::LmUnavailable => "lm_unavailable",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
