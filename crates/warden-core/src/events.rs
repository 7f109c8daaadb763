//! Canonical event protocol for a turn.
//!
//! `TurnEvent` is the single source of truth for everything a turn emits.
//! The session queue, the long-poll RPC verbs and the SSE stream all carry
//! these events unchanged; consumers map them to their own presentation.

use serde::{Deserialize, Serialize};

use crate::types::{Decision, FailReason, Receipt, TurnState};

/// Events emitted by a turn, FIFO per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Progress marker; adjacent non-terminal status events may coalesce
    /// under backpressure.
    Status { state: TurnState },

    /// The model emitted a code snippet to execute.
    CodeGenerated { code: String },

    /// A tool invocation finished (any decision, any status).
    ToolResult { receipt: Receipt },

    /// A sensitive tool call is suspended on a human decision.
    AwaitingApproval {
        call_id: String,
        tool_path: String,
        input_preview: String,
    },

    /// The suspended call received a decision.
    ApprovalResolved {
        call_id: String,
        decision: Decision,
        actor_id: String,
    },

    /// Intermediate or final assistant text.
    AgentMessage { text: String },

    /// Terminal: the turn failed with a machine-readable reason.
    Failed { reason: FailReason, detail: String },

    /// Terminal: the turn completed with a final message.
    Completed { text: String, receipt_count: usize },
}

impl TurnEvent {
    /// Terminal events end the session's event stream; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Completed { .. } | Self::Failed { .. } => true,
            Self::Status { state } => state.is_terminal(),
            _ => false,
        }
    }

    /// Whether this event may be coalesced with an adjacent one of the same
    /// shape when a reader falls behind.
    pub fn is_coalescible(&self) -> bool {
        matches!(self, Self::Status { state } if !state.is_terminal())
    }
}

/// Seam between event producers (runner, agent loop) and the session queue.
///
/// The session implements this; tests substitute a collector. Emission is
/// infallible by contract: a torn-down session drops events silently.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TurnEvent);
}
