//! Approval pipeline.
//!
//! Every sensitive tool call produces a decision — approved or denied —
//! subject to authorization, a timeout, and turn-scoped auto-resolution
//! rules. The registry owns pending decisions; runners await them.

pub mod registry;
pub mod rules;

pub use registry::{
    ApprovalRegistry, DecisionFuture, DecisionOutcome, OpenRequest, Opened, ResolveStatus,
};
pub use rules::{ApprovalRule, RuleOperator, RuleSpec};

/// Actor id recorded when a pending approval expires.
pub const SYSTEM_TIMEOUT: &str = "system:timeout";

/// Actor id recorded when teardown or cancellation forces a denial.
pub const SYSTEM_CANCELLED: &str = "system:cancelled";

/// Actor id recorded when a rule auto-resolves an approval.
pub fn rule_actor(rule_id: u64) -> String {
    format!("system:rule:{}", rule_id)
}
