//! Pending-approval bookkeeping.
//!
//! The registry is a process-wide structure mapping call ids to decision
//! channels. Opening a sensitive call either resolves immediately from a
//! matching rule or records a pending entry with an armed timeout; resolving
//! delivers the decision to the waiting runner. All operations are total:
//! failure paths are enumerated statuses, never panics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::OpenError;
use crate::types::{ApprovalRequest, Decision};

use super::rules::{ApprovalRule, RuleSpec};
use super::{rule_actor, SYSTEM_CANCELLED, SYSTEM_TIMEOUT};

/// The decision delivered to a waiting runner, with the actor that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub actor_id: String,
}

/// Outcome of `resolve`, spec-enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStatus {
    Resolved,
    NotFound,
    Unauthorized,
}

/// Request to open an approval for one sensitive tool call.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub call_id: String,
    pub turn_id: String,
    pub requester_id: String,
    pub tool_path: String,
    pub input: Value,
    pub input_preview: String,
    pub timeout: Duration,
}

/// Result of `open`: either resolved on the spot by a rule, or pending.
#[derive(Debug)]
pub enum Opened {
    /// A rule matched; no pending entry was recorded.
    Resolved(DecisionOutcome),
    Pending(DecisionFuture),
}

/// Awaitable decision for a pending approval.
#[derive(Debug)]
pub struct DecisionFuture {
    rx: oneshot::Receiver<DecisionOutcome>,
}

impl DecisionFuture {
    /// Wait for the decision. A dropped registry entry (teardown race)
    /// reads as a cancellation denial.
    pub async fn wait(self) -> DecisionOutcome {
        self.rx.await.unwrap_or_else(|_| DecisionOutcome {
            decision: Decision::Denied,
            actor_id: SYSTEM_CANCELLED.to_string(),
        })
    }
}

struct PendingEntry {
    turn_id: String,
    requester_id: String,
    tool_path: String,
    input: Value,
    input_preview: String,
    created_at: DateTime<Utc>,
    tx: oneshot::Sender<DecisionOutcome>,
    /// Cancels the timeout watcher once a decision lands.
    timer_guard: CancellationToken,
}

/// Process-wide approval registry.
pub struct ApprovalRegistry {
    pending: Arc<DashMap<String, PendingEntry>>,
    rules: Mutex<HashMap<String, Vec<ApprovalRule>>>,
    rule_seq: AtomicU64,
}

impl Default for ApprovalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            rules: Mutex::new(HashMap::new()),
            rule_seq: AtomicU64::new(1),
        }
    }

    /// Open an approval for a sensitive call.
    ///
    /// Rules registered for the call's turn are evaluated first, in
    /// registration order; a match resolves immediately without recording a
    /// pending entry. Otherwise the entry is recorded and a timeout armed.
    pub fn open(&self, request: OpenRequest) -> Result<Opened, OpenError> {
        if let Some(rule) = self.first_matching_rule(
            &request.turn_id,
            &request.tool_path,
            &request.input,
        ) {
            tracing::debug!(
                call_id = %request.call_id,
                rule_id = rule.id,
                "Approval auto-resolved by rule at open"
            );
            return Ok(Opened::Resolved(DecisionOutcome {
                decision: rule.decision,
                actor_id: rule_actor(rule.id),
            }));
        }

        let (tx, rx) = oneshot::channel();
        let timer_guard = CancellationToken::new();

        match self.pending.entry(request.call_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(OpenError::AlreadyPending(request.call_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    turn_id: request.turn_id,
                    requester_id: request.requester_id,
                    tool_path: request.tool_path,
                    input: request.input,
                    input_preview: request.input_preview,
                    created_at: Utc::now(),
                    tx,
                    timer_guard: timer_guard.clone(),
                });
            }
        }

        self.spawn_timeout_watcher(request.call_id, request.timeout, timer_guard);
        Ok(Opened::Pending(DecisionFuture { rx }))
    }

    /// Deliver a human decision.
    ///
    /// `NotFound` when no pending entry exists (or it already resolved);
    /// `Unauthorized` when the actor is not the turn's requester — in that
    /// case nothing changes.
    pub fn resolve(&self, call_id: &str, actor_id: &str, decision: Decision) -> ResolveStatus {
        self.resolve_checked(call_id, actor_id, decision, None)
    }

    /// Like `resolve`, but the pending entry must belong to the given turn.
    pub fn resolve_in_turn(
        &self,
        turn_id: &str,
        call_id: &str,
        actor_id: &str,
        decision: Decision,
    ) -> ResolveStatus {
        self.resolve_checked(call_id, actor_id, decision, Some(turn_id))
    }

    fn resolve_checked(
        &self,
        call_id: &str,
        actor_id: &str,
        decision: Decision,
        expected_turn: Option<&str>,
    ) -> ResolveStatus {
        {
            let Some(entry) = self.pending.get(call_id) else {
                return ResolveStatus::NotFound;
            };
            if let Some(turn_id) = expected_turn {
                if entry.turn_id != turn_id {
                    return ResolveStatus::NotFound;
                }
            }
            if entry.requester_id != actor_id {
                return ResolveStatus::Unauthorized;
            }
        }

        let Some((_, entry)) = self.pending.remove(call_id) else {
            // Lost a race with the timeout watcher or another resolver.
            return ResolveStatus::NotFound;
        };
        entry.timer_guard.cancel();
        let _ = entry.tx.send(DecisionOutcome {
            decision,
            actor_id: actor_id.to_string(),
        });
        tracing::info!(call_id, actor_id, ?decision, "Approval resolved");
        ResolveStatus::Resolved
    }

    /// Idempotent teardown of one pending approval: deliver `denied` with
    /// the system-cancelled actor, bypassing authorization.
    pub fn cancel(&self, call_id: &str) {
        if let Some((_, entry)) = self.pending.remove(call_id) {
            entry.timer_guard.cancel();
            let _ = entry.tx.send(DecisionOutcome {
                decision: Decision::Denied,
                actor_id: SYSTEM_CANCELLED.to_string(),
            });
            tracing::debug!(call_id, "Pending approval cancelled");
        }
    }

    /// Cancel every pending approval owned by a turn. Returns the call ids
    /// that were cancelled.
    pub fn cancel_turn(&self, turn_id: &str) -> Vec<String> {
        let call_ids: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().turn_id == turn_id)
            .map(|entry| entry.key().clone())
            .collect();
        for call_id in &call_ids {
            self.cancel(call_id);
        }
        call_ids
    }

    /// Store a rule and retroactively resolve every currently-pending
    /// approval of the same turn and tool path whose input matches.
    /// Returns the count of auto-resolved approvals.
    pub fn add_rule(&self, turn_id: &str, spec: RuleSpec) -> (u64, usize) {
        let id = self.rule_seq.fetch_add(1, Ordering::Relaxed);
        let rule = ApprovalRule::from_spec(id, turn_id, spec);

        // Register first: an open() racing this call either sees the rule
        // or lands in the retroactive scan below.
        self.rules
            .lock()
            .entry(turn_id.to_string())
            .or_default()
            .push(rule.clone());

        let matching: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| {
                let pending = entry.value();
                pending.turn_id == turn_id
                    && pending.tool_path == rule.tool_path
                    && rule.matches(&pending.input)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let actor = rule_actor(id);
        let mut resolved = 0;
        for call_id in matching {
            if let Some((_, entry)) = self.pending.remove(&call_id) {
                entry.timer_guard.cancel();
                let _ = entry.tx.send(DecisionOutcome {
                    decision: rule.decision,
                    actor_id: actor.clone(),
                });
                resolved += 1;
            }
        }

        tracing::info!(turn_id, rule_id = id, resolved, "Approval rule added");
        (id, resolved)
    }

    /// Drop every rule registered for a turn (session teardown).
    pub fn drop_rules(&self, turn_id: &str) {
        self.rules.lock().remove(turn_id);
    }

    /// Enumerate pending approvals for a turn.
    pub fn pending_for_turn(&self, turn_id: &str) -> Vec<ApprovalRequest> {
        self.pending
            .iter()
            .filter(|entry| entry.value().turn_id == turn_id)
            .map(|entry| ApprovalRequest {
                call_id: entry.key().clone(),
                tool_path: entry.value().tool_path.clone(),
                input_preview: entry.value().input_preview.clone(),
                created_at: entry.value().created_at,
            })
            .collect()
    }

    /// Total pending approvals across all turns.
    pub fn size(&self) -> usize {
        self.pending.len()
    }

    fn first_matching_rule(
        &self,
        turn_id: &str,
        tool_path: &str,
        input: &Value,
    ) -> Option<ApprovalRule> {
        let rules = self.rules.lock();
        rules.get(turn_id)?.iter().find(|rule| {
            rule.tool_path == tool_path && rule.matches(input)
        }).cloned()
    }

    fn spawn_timeout_watcher(
        &self,
        call_id: String,
        timeout: Duration,
        timer_guard: CancellationToken,
    ) {
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_guard.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some((_, entry)) = pending.remove(&call_id) {
                        let _ = entry.tx.send(DecisionOutcome {
                            decision: Decision::Denied,
                            actor_id: SYSTEM_TIMEOUT.to_string(),
                        });
                        tracing::info!(call_id = %call_id, "Approval timed out");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::rules::RuleOperator;
    use serde_json::json;

    fn open_request(call_id: &str, turn_id: &str, input: Value) -> OpenRequest {
        OpenRequest {
            call_id: call_id.to_string(),
            turn_id: turn_id.to_string(),
            requester_id: "U1".to_string(),
            tool_path: "calendar.update".to_string(),
            input,
            input_preview: "preview".to_string(),
            timeout: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn resolve_delivers_decision_to_waiter() {
        let registry = ApprovalRegistry::new();
        let opened = registry.open(open_request("c1", "t1", json!({}))).unwrap();
        let Opened::Pending(future) = opened else {
            panic!("expected pending");
        };

        assert_eq!(
            registry.resolve("c1", "U1", Decision::Approved),
            ResolveStatus::Resolved
        );
        let outcome = future.wait().await;
        assert_eq!(outcome.decision, Decision::Approved);
        assert_eq!(outcome.actor_id, "U1");
        assert_eq!(registry.size(), 0);
    }

    #[tokio::test]
    async fn unauthorized_actor_changes_nothing() {
        let registry = ApprovalRegistry::new();
        let Opened::Pending(future) =
            registry.open(open_request("c1", "t1", json!({}))).unwrap()
        else {
            panic!("expected pending");
        };

        assert_eq!(
            registry.resolve("c1", "U2", Decision::Approved),
            ResolveStatus::Unauthorized
        );
        assert_eq!(registry.size(), 1);

        assert_eq!(
            registry.resolve("c1", "U1", Decision::Denied),
            ResolveStatus::Resolved
        );
        let outcome = future.wait().await;
        assert_eq!(outcome.decision, Decision::Denied);
    }

    #[tokio::test]
    async fn duplicate_call_id_fails_fast() {
        let registry = ApprovalRegistry::new();
        let _first = registry.open(open_request("c1", "t1", json!({}))).unwrap();
        let err = registry.open(open_request("c1", "t1", json!({}))).unwrap_err();
        assert_eq!(err, OpenError::AlreadyPending("c1".to_string()));
    }

    #[tokio::test]
    async fn resolving_unknown_or_settled_call_is_not_found() {
        let registry = ApprovalRegistry::new();
        assert_eq!(
            registry.resolve("nope", "U1", Decision::Approved),
            ResolveStatus::NotFound
        );

        let Opened::Pending(future) =
            registry.open(open_request("c1", "t1", json!({}))).unwrap()
        else {
            panic!("expected pending");
        };
        registry.resolve("c1", "U1", Decision::Approved);
        future.wait().await;
        assert_eq!(
            registry.resolve("c1", "U1", Decision::Approved),
            ResolveStatus::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_denies_with_system_actor() {
        let registry = ApprovalRegistry::new();
        let mut request = open_request("c1", "t1", json!({}));
        request.timeout = Duration::from_millis(10);
        let Opened::Pending(future) = registry.open(request).unwrap() else {
            panic!("expected pending");
        };

        let outcome = future.wait().await;
        assert_eq!(outcome.decision, Decision::Denied);
        assert_eq!(outcome.actor_id, SYSTEM_TIMEOUT);
        assert_eq!(registry.size(), 0);
    }

    #[tokio::test]
    async fn rule_at_open_resolves_without_pending_entry() {
        let registry = ApprovalRegistry::new();
        let (rule_id, resolved) = registry.add_rule(
            "t1",
            RuleSpec {
                tool_path: "calendar.update".to_string(),
                field: "title".to_string(),
                operator: RuleOperator::Includes,
                value: "Dinner".to_string(),
                decision: Decision::Approved,
            },
        );
        assert_eq!(resolved, 0);

        let opened = registry
            .open(open_request("c1", "t1", json!({"title": "Dinner with Ella"})))
            .unwrap();
        let Opened::Resolved(outcome) = opened else {
            panic!("expected rule resolution");
        };
        assert_eq!(outcome.decision, Decision::Approved);
        assert_eq!(outcome.actor_id, rule_actor(rule_id));
        assert_eq!(registry.size(), 0);
    }

    #[tokio::test]
    async fn retroactive_rule_resolves_only_matching_pending() {
        let registry = ApprovalRegistry::new();
        let mut matching = open_request("c1", "t1", json!({"owner": "example-inc"}));
        matching.tool_path = "vercel.projects.removeProjectDomain".to_string();
        let mut other = open_request("c2", "t1", json!({"owner": "someone-else"}));
        other.tool_path = "vercel.projects.removeProjectDomain".to_string();

        let Opened::Pending(matching_future) = registry.open(matching).unwrap() else {
            panic!("expected pending");
        };
        let Opened::Pending(_other_future) = registry.open(other).unwrap() else {
            panic!("expected pending");
        };

        let (_, resolved) = registry.add_rule(
            "t1",
            RuleSpec {
                tool_path: "vercel.projects.removeProjectDomain".to_string(),
                field: "owner".to_string(),
                operator: RuleOperator::Equals,
                value: "example-inc".to_string(),
                decision: Decision::Approved,
            },
        );
        assert_eq!(resolved, 1);
        assert_eq!(matching_future.wait().await.decision, Decision::Approved);
        assert_eq!(registry.size(), 1);
        assert_eq!(registry.pending_for_turn("t1").len(), 1);
    }

    #[tokio::test]
    async fn cancel_turn_drains_pending() {
        let registry = ApprovalRegistry::new();
        let Opened::Pending(f1) = registry.open(open_request("c1", "t1", json!({}))).unwrap()
        else {
            panic!("expected pending");
        };
        let Opened::Pending(_f2) =
            registry.open(open_request("c2", "t2", json!({}))).unwrap()
        else {
            panic!("expected pending");
        };

        let cancelled = registry.cancel_turn("t1");
        assert_eq!(cancelled, vec!["c1".to_string()]);
        assert!(registry.pending_for_turn("t1").is_empty());
        assert_eq!(registry.size(), 1);

        let outcome = f1.wait().await;
        assert_eq!(outcome.decision, Decision::Denied);
        assert_eq!(outcome.actor_id, SYSTEM_CANCELLED);
    }

    #[tokio::test]
    async fn resolve_in_turn_rejects_foreign_turn() {
        let registry = ApprovalRegistry::new();
        let Opened::Pending(_future) =
            registry.open(open_request("c1", "t1", json!({}))).unwrap()
        else {
            panic!("expected pending");
        };
        assert_eq!(
            registry.resolve_in_turn("t2", "c1", "U1", Decision::Approved),
            ResolveStatus::NotFound
        );
        assert_eq!(registry.size(), 1);
    }
}
