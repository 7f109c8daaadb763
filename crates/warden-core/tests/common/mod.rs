//! Shared harness for the turn-flow suites: a session manager wired to the
//! builtin tools and a scripted LM, plus event-stream assertions.

use std::sync::Arc;

use warden_core::lm::ScriptedLm;
use warden_core::session::{SessionManager, StartTurn};
use warden_core::tools::builtin::register_builtin_tools;
use warden_core::tools::ToolRegistry;
use warden_core::{RuntimeConfig, TurnEvent};

pub fn manager_with(lm: Arc<ScriptedLm>, config: RuntimeConfig) -> Arc<SessionManager> {
    let tools = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tools).expect("builtin tools register");
    SessionManager::new(tools, lm, config)
}

pub fn start_turn(manager: &Arc<SessionManager>, prompt: &str, requester_id: &str) -> String {
    manager.start(StartTurn {
        prompt: prompt.to_string(),
        requester_id: requester_id.to_string(),
        channel_id: "chan-1".to_string(),
        now_iso: Some("2026-08-01T12:00:00Z".to_string()),
    })
}

/// Read events until the terminal one (inclusive).
pub async fn drain_to_terminal(manager: &Arc<SessionManager>, turn_id: &str) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = manager.wait_for_next(turn_id).await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    assert!(
        events.last().is_some_and(TurnEvent::is_terminal),
        "stream ended without a terminal event: {:?}",
        events
    );
    events
}

/// Read events until one matches; returns `(events_before, matched)`.
/// Panics if the stream terminates first.
pub async fn wait_until(
    manager: &Arc<SessionManager>,
    turn_id: &str,
    pred: impl Fn(&TurnEvent) -> bool,
) -> (Vec<TurnEvent>, TurnEvent) {
    let mut seen = Vec::new();
    while let Some(event) = manager.wait_for_next(turn_id).await {
        if pred(&event) {
            return (seen, event);
        }
        assert!(
            !event.is_terminal(),
            "turn terminated before the expected event: {:?} (seen: {:?})",
            event,
            seen
        );
        seen.push(event);
    }
    panic!("event stream ended before the expected event (seen: {:?})", seen);
}

/// Assert the per-call ordering: `awaiting_approval` strictly precedes
/// `approval_resolved`, which strictly precedes any receipt for that call.
pub fn assert_call_ordering(events: &[TurnEvent], call_id: &str) {
    let awaiting = events.iter().position(
        |e| matches!(e, TurnEvent::AwaitingApproval { call_id: c, .. } if c == call_id),
    );
    let resolved = events.iter().position(
        |e| matches!(e, TurnEvent::ApprovalResolved { call_id: c, .. } if c == call_id),
    );
    let receipt = events.iter().position(
        |e| matches!(e, TurnEvent::ToolResult { receipt } if receipt.call_id == call_id),
    );

    let awaiting = awaiting.expect("awaiting_approval missing");
    let resolved = resolved.expect("approval_resolved missing");
    assert!(awaiting < resolved, "awaiting must precede resolution");
    if let Some(receipt) = receipt {
        assert!(resolved < receipt, "resolution must precede the receipt");
    }

    let resolution_count = events
        .iter()
        .filter(|e| {
            matches!(e, TurnEvent::ApprovalResolved { call_id: c, .. } if c == call_id)
        })
        .count();
    assert_eq!(resolution_count, 1, "exactly one resolution per call");
}
