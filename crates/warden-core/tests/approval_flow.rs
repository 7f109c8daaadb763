//! Approval pipeline flows: timeouts, retroactive rules, rule-at-open, and
//! cancellation draining.

mod common;

use std::sync::Arc;

use warden_core::approval::{RuleOperator, RuleSpec, SYSTEM_CANCELLED, SYSTEM_TIMEOUT};
use warden_core::lm::ScriptedLm;
use warden_core::types::{ReceiptDecision, ReceiptStatus};
use warden_core::{Decision, ResolveStatus, RuntimeConfig, TurnEvent, TurnState};

use common::{assert_call_ordering, drain_to_terminal, manager_with, start_turn, wait_until};

const REMOVE_DOMAIN_JOIN: &str = "let pair = join(\n  tools.vercel.projects.removeProjectDomain({ \"owner\": \"example-inc\", \"project\": \"site\", \"domain\": \"a.example.com\" }),\n  tools.vercel.projects.removeProjectDomain({ \"owner\": \"other-org\", \"project\": \"site\", \"domain\": \"b.example.com\" })\n);\nreturn pair;";

#[tokio::test(start_paused = true)]
async fn approval_times_out_to_denied() {
    let lm = Arc::new(ScriptedLm::new());
    lm.push_code(
        "tools.calendar.update({ \"title\": \"Dinner\", \"start\": \"2026-08-02T17:00:00Z\" });",
    );
    lm.push_final("Nobody approved in time.");
    let config = RuntimeConfig {
        approval_timeout_ms: 10,
        ..Default::default()
    };
    let manager = manager_with(lm, config);

    let turn_id = start_turn(&manager, "schedule dinner", "U1");
    let events = drain_to_terminal(&manager, &turn_id).await;

    let call_id = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::AwaitingApproval { call_id, .. } => Some(call_id.clone()),
            _ => None,
        })
        .expect("awaiting_approval event");
    assert_call_ordering(&events, &call_id);

    let (decision, actor) = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::ApprovalResolved {
                decision, actor_id, ..
            } => Some((*decision, actor_id.clone())),
            _ => None,
        })
        .expect("approval_resolved event");
    assert_eq!(decision, Decision::Denied);
    assert_eq!(actor, SYSTEM_TIMEOUT);

    let receipt = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::ToolResult { receipt } => Some(receipt),
            _ => None,
        })
        .expect("receipt event");
    assert_eq!(receipt.decision, ReceiptDecision::Denied);
    assert_eq!(receipt.status, ReceiptStatus::Denied);
    assert_eq!(receipt.error.as_deref(), Some("timed_out"));
}

#[tokio::test]
async fn retroactive_rule_resolves_matching_pending() {
    let lm = Arc::new(ScriptedLm::new());
    lm.push_code(REMOVE_DOMAIN_JOIN);
    lm.push_final("Removed what was allowed.");
    let manager = manager_with(lm, RuntimeConfig::default());

    let turn_id = start_turn(&manager, "clean up our domains", "U1");

    let (_seen, first) = wait_until(&manager, &turn_id, |e| {
        matches!(e, TurnEvent::AwaitingApproval { .. })
    })
    .await;
    let (_seen, second) = wait_until(&manager, &turn_id, |e| {
        matches!(e, TurnEvent::AwaitingApproval { .. })
    })
    .await;

    let approvals: Vec<(String, String)> = [first, second]
        .into_iter()
        .map(|e| match e {
            TurnEvent::AwaitingApproval {
                call_id,
                input_preview,
                ..
            } => (call_id, input_preview),
            _ => unreachable!(),
        })
        .collect();
    let matching_call = approvals
        .iter()
        .find(|(_, preview)| preview.contains("example-inc"))
        .map(|(call_id, _)| call_id.clone())
        .expect("one pending approval for example-inc");
    let other_call = approvals
        .iter()
        .find(|(call_id, _)| *call_id != matching_call)
        .map(|(call_id, _)| call_id.clone())
        .expect("one other pending approval");

    let (rule_id, resolved) = manager
        .add_rule(
            &turn_id,
            RuleSpec {
                tool_path: "vercel.projects.removeProjectDomain".to_string(),
                field: "owner".to_string(),
                operator: RuleOperator::Equals,
                value: "example-inc".to_string(),
                decision: Decision::Approved,
            },
        )
        .expect("known turn");
    assert_eq!(resolved, 1);

    let (_seen, resolution) = wait_until(&manager, &turn_id, |e| {
        matches!(e, TurnEvent::ApprovalResolved { .. })
    })
    .await;
    let TurnEvent::ApprovalResolved {
        call_id,
        decision,
        actor_id,
    } = resolution
    else {
        unreachable!();
    };
    assert_eq!(call_id, matching_call);
    assert_eq!(decision, Decision::Approved);
    assert_eq!(actor_id, format!("system:rule:{}", rule_id));

    // The non-matching call is still pending.
    let still_pending = manager.pending_approvals(&turn_id);
    assert_eq!(still_pending.len(), 1);
    assert_eq!(still_pending[0].call_id, other_call);

    assert_eq!(
        manager.resolve_approval(&turn_id, &other_call, "U1", Decision::Denied),
        ResolveStatus::Resolved
    );

    let rest = drain_to_terminal(&manager, &turn_id).await;
    assert!(rest.last().unwrap().is_terminal());
    assert!(manager.pending_approvals(&turn_id).is_empty());
}

#[tokio::test]
async fn rule_at_open_skips_the_approval_pipeline() {
    let lm = Arc::new(ScriptedLm::new());
    lm.push_code(
        "tools.calendar.update({ \"title\": \"Standup\", \"start\": \"2026-08-03T09:00:00Z\" });",
    );
    lm.push_final("Scheduled.");
    let manager = manager_with(lm, RuntimeConfig::default());

    let turn_id = start_turn(&manager, "schedule standup", "U1");
    manager
        .add_rule(
            &turn_id,
            RuleSpec {
                tool_path: "calendar.update".to_string(),
                field: "title".to_string(),
                operator: RuleOperator::Includes,
                value: "Standup".to_string(),
                decision: Decision::Approved,
            },
        )
        .expect("known turn");

    let events = drain_to_terminal(&manager, &turn_id).await;
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, TurnEvent::AwaitingApproval { .. })),
        "rule-resolved call must not suspend: {:?}",
        events
    );
    let receipt = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::ToolResult { receipt } => Some(receipt),
            _ => None,
        })
        .expect("receipt event");
    assert_eq!(receipt.decision, ReceiptDecision::Approved);
    assert_eq!(receipt.status, ReceiptStatus::Succeeded);
}

#[tokio::test]
async fn cancelling_a_turn_drains_pending_approvals() {
    let lm = Arc::new(ScriptedLm::new());
    lm.push_code(
        "tools.calendar.update({ \"title\": \"Dinner\", \"start\": \"2026-08-02T17:00:00Z\" });",
    );
    let manager = manager_with(lm, RuntimeConfig::default());

    let turn_id = start_turn(&manager, "schedule dinner", "U1");
    let (_seen, _awaiting) = wait_until(&manager, &turn_id, |e| {
        matches!(e, TurnEvent::AwaitingApproval { .. })
    })
    .await;

    assert!(manager.cancel(&turn_id));

    let rest = drain_to_terminal(&manager, &turn_id).await;
    assert!(manager.pending_approvals(&turn_id).is_empty());

    let resolution = rest
        .iter()
        .find_map(|e| match e {
            TurnEvent::ApprovalResolved {
                decision, actor_id, ..
            } => Some((*decision, actor_id.clone())),
            _ => None,
        })
        .expect("forced resolution event");
    assert_eq!(resolution, (Decision::Denied, SYSTEM_CANCELLED.to_string()));

    let Some(TurnEvent::Status { state }) = rest.last() else {
        panic!("expected cancelled status, got {:?}", rest.last());
    };
    assert_eq!(*state, TurnState::Cancelled);
    assert_eq!(manager.state(&turn_id), Some(TurnState::Cancelled));
}

#[tokio::test]
async fn add_rule_on_unknown_turn_is_rejected() {
    let manager = manager_with(Arc::new(ScriptedLm::new()), RuntimeConfig::default());
    assert!(manager
        .add_rule(
            "no-such-turn",
            RuleSpec {
                tool_path: "calendar.update".to_string(),
                field: "title".to_string(),
                operator: RuleOperator::Equals,
                value: "x".to_string(),
                decision: Decision::Approved,
            },
        )
        .is_none());
}
