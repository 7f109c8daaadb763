//! Session manager: turn lifecycle and the RPC backing operations.
//!
//! `start` creates a session and spawns the turn driver as its owning task;
//! `wait_for_next` is the long-poll primitive behind RunTurn/ContinueTurn;
//! approvals and rules delegate to the approval registry after the
//! session-level authorization check. On terminal emission the session
//! cancels outstanding approvals, drops its rules, and stays readable for
//! the retention window before being collected.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::agent::{TurnDriver, TurnOutcome};
use crate::approval::{ApprovalRegistry, ResolveStatus, RuleSpec, SYSTEM_CANCELLED};
use crate::config::RuntimeConfig;
use crate::events::{EventSink, TurnEvent};
use crate::lm::LmClient;
use crate::tools::ToolRegistry;
use crate::types::{ApprovalRequest, Decision, TurnState};

use super::state::SessionHandle;

/// Input to `start`, mirroring the RunTurn verb.
#[derive(Debug, Clone)]
pub struct StartTurn {
    pub prompt: String,
    pub requester_id: String,
    pub channel_id: String,
    /// Caller-supplied clock reading; falls back to the server clock when
    /// absent or unparsable.
    pub now_iso: Option<String>,
}

pub struct SessionManager {
    sessions: DashMap<String, Arc<SessionHandle>>,
    approvals: Arc<ApprovalRegistry>,
    tools: Arc<ToolRegistry>,
    lm: Arc<dyn LmClient>,
    config: Arc<RuntimeConfig>,
}

impl SessionManager {
    pub fn new(
        tools: Arc<ToolRegistry>,
        lm: Arc<dyn LmClient>,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            approvals: Arc::new(ApprovalRegistry::new()),
            tools,
            lm,
            config: Arc::new(config),
        })
    }

    pub fn approvals(&self) -> &Arc<ApprovalRegistry> {
        &self.approvals
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create a session and spawn its turn. Returns synchronously with the
    /// new turn id.
    pub fn start(self: &Arc<Self>, request: StartTurn) -> String {
        let turn_id = uuid::Uuid::new_v4().to_string();
        let created_at = parse_now(request.now_iso.as_deref());

        let handle = Arc::new(SessionHandle::new(
            turn_id.clone(),
            request.requester_id.clone(),
            request.channel_id,
            created_at,
            Arc::clone(&self.approvals),
            self.config.event_queue_soft_cap,
        ));
        self.sessions.insert(turn_id.clone(), Arc::clone(&handle));

        tracing::info!(
            turn_id = %turn_id,
            requester_id = %request.requester_id,
            "Turn started"
        );

        let manager = Arc::clone(self);
        let driver = TurnDriver::new(
            Arc::clone(&self.lm),
            Arc::clone(&self.tools),
            Arc::clone(&self.approvals),
            Arc::clone(&handle) as Arc<dyn EventSink>,
            Arc::clone(&self.config),
            turn_id.clone(),
            request.requester_id,
            handle.cancel_token(),
        );
        let spawned_turn_id = turn_id.clone();
        tokio::spawn(async move {
            let outcome = driver.run(request.prompt).await;
            manager.finalize(&spawned_turn_id, &handle, outcome);
        });

        turn_id
    }

    /// Long-poll primitive: the next unread event for the session cursor,
    /// or `None` when the turn is unknown, finished, or torn down.
    pub async fn wait_for_next(&self, turn_id: &str) -> Option<TurnEvent> {
        // Clone out of the map guard before awaiting.
        let handle = self.sessions.get(turn_id).map(|h| Arc::clone(&h))?;
        handle.next_event().await
    }

    /// Deliver a human decision for a suspended call in this turn.
    pub fn resolve_approval(
        &self,
        turn_id: &str,
        call_id: &str,
        actor_id: &str,
        decision: Decision,
    ) -> ResolveStatus {
        let Some(handle) = self.sessions.get(turn_id).map(|h| Arc::clone(&h)) else {
            return ResolveStatus::NotFound;
        };
        if handle.requester_id != actor_id {
            tracing::warn!(
                turn_id,
                call_id,
                actor_id,
                "Approval resolution by non-requester rejected"
            );
            return ResolveStatus::Unauthorized;
        }
        self.approvals
            .resolve_in_turn(turn_id, call_id, actor_id, decision)
    }

    /// Register a rule scoped to this turn. Returns `(rule_id, resolved)`
    /// where `resolved` counts retroactively auto-resolved approvals, or
    /// `None` for an unknown turn.
    pub fn add_rule(&self, turn_id: &str, spec: RuleSpec) -> Option<(u64, usize)> {
        if !self.sessions.contains_key(turn_id) {
            return None;
        }
        Some(self.approvals.add_rule(turn_id, spec))
    }

    /// Cooperatively cancel a turn. Pending approvals resolve as denied so
    /// the runner can observe the cancellation and wind down.
    pub fn cancel(&self, turn_id: &str) -> bool {
        let Some(handle) = self.sessions.get(turn_id).map(|h| Arc::clone(&h)) else {
            return false;
        };
        tracing::info!(turn_id, "Turn cancellation requested");
        handle.cancel_token().cancel();
        self.approvals.cancel_turn(turn_id);
        true
    }

    /// Current state of a turn, if it is still known.
    pub fn state(&self, turn_id: &str) -> Option<TurnState> {
        self.sessions.get(turn_id).map(|h| h.state())
    }

    /// Pending approvals for a turn, for inspection surfaces.
    pub fn pending_approvals(&self, turn_id: &str) -> Vec<ApprovalRequest> {
        self.approvals.pending_for_turn(turn_id)
    }

    fn finalize(self: &Arc<Self>, turn_id: &str, handle: &Arc<SessionHandle>, outcome: TurnOutcome) {
        // Teardown order matters: outstanding approvals resolve (and their
        // events emit) before the terminal event, so nothing follows it.
        for call_id in self.approvals.cancel_turn(turn_id) {
            handle.emit(TurnEvent::ApprovalResolved {
                call_id,
                decision: Decision::Denied,
                actor_id: SYSTEM_CANCELLED.to_string(),
            });
        }
        self.approvals.drop_rules(turn_id);

        match outcome {
            TurnOutcome::Completed {
                text,
                receipt_count,
            } => {
                tracing::info!(turn_id, receipt_count, "Turn completed");
                handle.emit(TurnEvent::Completed {
                    text,
                    receipt_count,
                });
            }
            TurnOutcome::Failed { reason, detail } => {
                tracing::warn!(turn_id, %reason, detail, "Turn failed");
                handle.emit(TurnEvent::Failed { reason, detail });
            }
            TurnOutcome::Cancelled => {
                tracing::info!(turn_id, "Turn cancelled");
                handle.emit(TurnEvent::Status {
                    state: TurnState::Cancelled,
                });
            }
        }

        let manager = Arc::clone(self);
        let retention = self.config.post_terminal_retention();
        let gc_turn_id = turn_id.to_string();
        let gc_handle = Arc::clone(handle);
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            gc_handle.teardown();
            manager.sessions.remove(&gc_turn_id);
            tracing::debug!(turn_id = %gc_turn_id, "Session collected after retention");
        });
    }
}

fn parse_now(now_iso: Option<&str>) -> DateTime<Utc> {
    match now_iso {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(parsed) => parsed.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!(raw, "Unparsable now_iso, using server clock: {}", e);
                Utc::now()
            }
        },
        None => Utc::now(),
    }
}
