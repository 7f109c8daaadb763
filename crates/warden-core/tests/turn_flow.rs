//! End-to-end turn flows over the session manager: happy path, approval
//! round-trips, authorization, and budget exhaustion.

mod common;

use std::sync::Arc;

use warden_core::lm::ScriptedLm;
use warden_core::types::{ReceiptDecision, ReceiptStatus};
use warden_core::{Decision, FailReason, ResolveStatus, RuntimeConfig, TurnEvent, TurnState};

use common::{assert_call_ordering, drain_to_terminal, manager_with, start_turn, wait_until};

#[tokio::test]
async fn auto_tool_happy_path() {
    let lm = Arc::new(ScriptedLm::new());
    lm.push_code("let x = tools.math.add({ \"a\": 2, \"b\": 3 });\nreturn x;");
    lm.push_final("The sum is 5.");
    let manager = manager_with(lm, RuntimeConfig::default());

    let turn_id = start_turn(&manager, "add 2 and 3", "U1");
    let events = drain_to_terminal(&manager, &turn_id).await;

    let Some(TurnEvent::Completed {
        text,
        receipt_count,
    }) = events.last()
    else {
        panic!("expected completion, got {:?}", events.last());
    };
    assert!(text.contains('5'), "final text: {}", text);
    assert_eq!(*receipt_count, 1);

    let receipt = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::ToolResult { receipt } => Some(receipt),
            _ => None,
        })
        .expect("receipt event");
    assert_eq!(receipt.tool_path, "math.add");
    assert_eq!(receipt.decision, ReceiptDecision::Auto);
    assert_eq!(receipt.status, ReceiptStatus::Succeeded);
}

#[tokio::test]
async fn required_tool_approved() {
    let lm = Arc::new(ScriptedLm::new());
    lm.push_code(
        "let e = tools.calendar.update({ \"title\": \"Dinner with Ella\", \"start\": \"2026-08-02T17:00:00Z\" });\nreturn e;",
    );
    lm.push_final("Dinner with Ella is on the calendar.");
    let manager = manager_with(lm, RuntimeConfig::default());

    let turn_id = start_turn(&manager, "schedule dinner with Ella tomorrow at 5pm", "U1");
    let (_before, awaiting) = wait_until(&manager, &turn_id, |e| {
        matches!(e, TurnEvent::AwaitingApproval { .. })
    })
    .await;
    let TurnEvent::AwaitingApproval {
        call_id,
        tool_path,
        input_preview,
    } = awaiting
    else {
        unreachable!();
    };
    assert_eq!(tool_path, "calendar.update");
    assert!(input_preview.contains("Dinner"), "preview: {}", input_preview);

    assert_eq!(
        manager.resolve_approval(&turn_id, &call_id, "U1", Decision::Approved),
        ResolveStatus::Resolved
    );

    let rest = drain_to_terminal(&manager, &turn_id).await;
    let Some(TurnEvent::Completed { receipt_count, .. }) = rest.last() else {
        panic!("expected completion, got {:?}", rest.last());
    };
    assert_eq!(*receipt_count, 1);

    let resolved = rest
        .iter()
        .find_map(|e| match e {
            TurnEvent::ApprovalResolved {
                call_id: c,
                decision,
                actor_id,
            } if *c == call_id => Some((*decision, actor_id.clone())),
            _ => None,
        })
        .expect("approval_resolved event");
    assert_eq!(resolved, (Decision::Approved, "U1".to_string()));

    let receipt = rest
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
async fn unauthorized_then_denied() {
    let lm = Arc::new(ScriptedLm::new());
    lm.push_code(
        "tools.calendar.update({ \"title\": \"Dinner with Ella\", \"start\": \"2026-08-02T17:00:00Z\" });",
    );
    lm.push_final("I could not update the calendar without approval.");
    let manager = manager_with(lm, RuntimeConfig::default());

    let turn_id = start_turn(&manager, "schedule dinner", "U1");
    let (_before, awaiting) = wait_until(&manager, &turn_id, |e| {
        matches!(e, TurnEvent::AwaitingApproval { .. })
    })
    .await;
    let TurnEvent::AwaitingApproval { call_id, .. } = awaiting else {
        unreachable!();
    };

    // Wrong actor: rejected, no state change.
    assert_eq!(
        manager.resolve_approval(&turn_id, &call_id, "U2", Decision::Approved),
        ResolveStatus::Unauthorized
    );
    assert_eq!(manager.pending_approvals(&turn_id).len(), 1);

    // Correct actor denies.
    assert_eq!(
        manager.resolve_approval(&turn_id, &call_id, "U1", Decision::Denied),
        ResolveStatus::Resolved
    );

    let rest = drain_to_terminal(&manager, &turn_id).await;
    assert!(rest.last().unwrap().is_terminal());

    let receipt = rest
        .iter()
        .find_map(|e| match e {
            TurnEvent::ToolResult { receipt } => Some(receipt),
            _ => None,
        })
        .expect("receipt event");
    assert_eq!(receipt.decision, ReceiptDecision::Denied);
    assert_eq!(receipt.status, ReceiptStatus::Denied);
    assert_eq!(receipt.error.as_deref(), Some("approval_denied"));

    let mut all = Vec::new();
    all.push(TurnEvent::AwaitingApproval {
        call_id: call_id.clone(),
        tool_path: "calendar.update".to_string(),
        input_preview: String::new(),
    });
    all.extend(rest);
    assert_call_ordering(&all, &call_id);
}

#[tokio::test]
async fn step_budget_exhaustion_fails_turn() {
    let lm = Arc::new(ScriptedLm::new());
    lm.push_code("return 1;");
    lm.push_code("return 2;");
    lm.push_code("return 3;");
    let config = RuntimeConfig {
        max_steps: 2,
        ..Default::default()
    };
    let manager = manager_with(lm, config);

    let turn_id = start_turn(&manager, "do nothing useful forever", "U1");
    let events = drain_to_terminal(&manager, &turn_id).await;

    let code_runs = events
        .iter()
        .filter(|e| matches!(e, TurnEvent::CodeGenerated { .. }))
        .count();
    assert_eq!(code_runs, 2);

    let Some(TurnEvent::Failed { reason, .. }) = events.last() else {
        panic!("expected failure, got {:?}", events.last());
    };
    assert_eq!(*reason, FailReason::StepBudget);
}

#[tokio::test]
async fn unknown_turn_yields_no_events() {
    let manager = manager_with(Arc::new(ScriptedLm::new()), RuntimeConfig::default());
    assert!(manager.wait_for_next("no-such-turn").await.is_none());
    assert_eq!(
        manager.resolve_approval("no-such-turn", "c1", "U1", Decision::Approved),
        ResolveStatus::NotFound
    );
}

#[tokio::test]
async fn stream_is_exhausted_after_terminal() {
    let lm = Arc::new(ScriptedLm::new());
    lm.push_final("done");
    let manager = manager_with(lm, RuntimeConfig::default());

    let turn_id = start_turn(&manager, "hi", "U1");
    let events = drain_to_terminal(&manager, &turn_id).await;
    assert!(events.last().unwrap().is_terminal());
    assert!(manager.wait_for_next(&turn_id).await.is_none());
    assert_eq!(manager.state(&turn_id), Some(TurnState::Completed));
}
