//! Per-session state and event queue.
//!
//! Events are FIFO with a single consumer cursor. When a reader is parked
//! in `next_event` the queue hands off through a `Notify`; when the reader
//! falls behind, adjacent progress events coalesce, and a non-coalescible
//! overflow fails the session with `event_backpressure`, draining any
//! pending approvals the turn still owns. Terminal events are never
//! dropped, and nothing follows them.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalRegistry, SYSTEM_CANCELLED};
use crate::events::{EventSink, TurnEvent};
use crate::types::{Decision, FailReason, TurnState};

struct SessionInner {
    state: TurnState,
    queue: VecDeque<TurnEvent>,
    terminal_emitted: bool,
    torn_down: bool,
}

pub struct SessionHandle {
    pub id: String,
    pub requester_id: String,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
    /// Registry lifetime covers all sessions; held so terminal transitions
    /// originating here can drain the turn's pending approvals.
    approvals: Arc<ApprovalRegistry>,
    cancel: CancellationToken,
    soft_cap: usize,
    inner: Mutex<SessionInner>,
    notify: Notify,
}

impl SessionHandle {
    pub fn new(
        id: String,
        requester_id: String,
        channel_id: String,
        created_at: DateTime<Utc>,
        approvals: Arc<ApprovalRegistry>,
        soft_cap: usize,
    ) -> Self {
        Self {
            id,
            requester_id,
            channel_id,
            created_at,
            approvals,
            cancel: CancellationToken::new(),
            soft_cap,
            inner: Mutex::new(SessionInner {
                state: TurnState::Running,
                queue: VecDeque::new(),
                terminal_emitted: false,
                torn_down: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> TurnState {
        self.inner.lock().state
    }

    /// Next unread event for the session cursor. Blocks while the queue is
    /// empty and the turn is live; `None` once the stream is over or the
    /// session is torn down. An event is never delivered twice.
    pub async fn next_event(&self) -> Option<TurnEvent> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(event) = inner.queue.pop_front() {
                    return Some(event);
                }
                if inner.torn_down || inner.terminal_emitted {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Retention expired: wake parked readers and mark the session dead.
    pub fn teardown(&self) {
        self.inner.lock().torn_down = true;
        self.notify.notify_waiters();
    }

    fn track_state(inner: &mut SessionInner, event: &TurnEvent) {
        match event {
            TurnEvent::AwaitingApproval { .. } => inner.state = TurnState::AwaitingApproval,
            TurnEvent::ApprovalResolved { .. } => inner.state = TurnState::Running,
            TurnEvent::Status { state } => inner.state = *state,
            TurnEvent::Completed { .. } => inner.state = TurnState::Completed,
            TurnEvent::Failed { .. } => inner.state = TurnState::Failed,
            _ => {}
        }
    }
}

impl EventSink for SessionHandle {
    fn emit(&self, event: TurnEvent) {
        let mut inner = self.inner.lock();
        if inner.terminal_emitted {
            tracing::debug!(turn_id = %self.id, "Dropping event after terminal");
            return;
        }

        Self::track_state(&mut inner, &event);

        if event.is_terminal() {
            inner.terminal_emitted = true;
            inner.queue.push_back(event);
            drop(inner);
            self.notify.notify_one();
            return;
        }

        if event.is_coalescible() {
            if let Some(back) = inner.queue.back_mut() {
                if back.is_coalescible() {
                    *back = event;
                    drop(inner);
                    self.notify.notify_one();
                    return;
                }
            }
            if inner.queue.len() >= self.soft_cap {
                tracing::debug!(turn_id = %self.id, "Dropping progress event under backpressure");
                return;
            }
        } else if inner.queue.len() >= self.soft_cap {
            tracing::warn!(
                turn_id = %self.id,
                queued = inner.queue.len(),
                "Event queue overflow, failing session"
            );
            // Terminal teardown: pending approvals drain here, their
            // resolutions queued ahead of the terminal event. The runner's
            // own late emits hit the terminal guard above.
            for call_id in self.approvals.cancel_turn(&self.id) {
                inner.queue.push_back(TurnEvent::ApprovalResolved {
                    call_id,
                    decision: Decision::Denied,
                    actor_id: SYSTEM_CANCELLED.to_string(),
                });
            }
            inner.state = TurnState::Failed;
            inner.terminal_emitted = true;
            inner.queue.push_back(TurnEvent::Failed {
                reason: FailReason::EventBackpressure,
                detail: format!("event queue exceeded soft cap of {}", self.soft_cap),
            });
            drop(inner);
            self.cancel.cancel();
            self.notify.notify_one();
            return;
        }

        inner.queue.push_back(event);
        drop(inner);
        self.notify.notify_one();
    }
}
