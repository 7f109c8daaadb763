//! Request and response types for the API.

use serde::{Deserialize, Serialize};

use warden_core::approval::ResolveStatus;
use warden_core::{Decision, TurnEvent};

// ============================================================================
// Turn Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RunTurnRequest {
    pub prompt: String,
    pub requester_id: String,
    pub channel_id: String,
    /// Caller clock reading (RFC 3339); server clock when absent.
    pub now_iso: Option<String>,
}

/// RunTurn reply: the new turn id plus its first event.
#[derive(Serialize)]
pub struct RunTurnResponse {
    pub turn_id: String,
    pub event: TurnEvent,
}

/// ContinueTurn reply. `event` is null once the stream is over.
#[derive(Serialize)]
pub struct ContinueTurnResponse {
    pub event: Option<TurnEvent>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveApprovalRequest {
    pub call_id: String,
    pub actor_id: String,
    pub decision: Decision,
}

#[derive(Serialize)]
pub struct ResolveApprovalResponse {
    pub status: ResolveStatus,
}

#[derive(Serialize)]
pub struct AddRuleResponse {
    pub rule_id: u64,
    /// Pending approvals the rule retroactively resolved.
    pub resolved: usize,
}

#[derive(Serialize)]
pub struct CancelTurnResponse {
    pub cancelled: bool,
}
