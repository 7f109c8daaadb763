//! Turn endpoints: the three RPC verbs plus rules, cancellation, and an
//! SSE event stream.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use warden_core::approval::RuleSpec;
use warden_core::session::StartTurn;
use warden_core::types::ApprovalRequest;

const SSE_CHANNEL_BUFFER: usize = 256;

use crate::error::AppError;
use crate::types::{
    AddRuleResponse, CancelTurnResponse, ContinueTurnResponse, ResolveApprovalRequest,
    ResolveApprovalResponse, RunTurnRequest, RunTurnResponse,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(run_turn))
        .route("/:id", delete(cancel_turn))
        .route("/:id/next", post(continue_turn))
        .route("/:id/approval", post(resolve_approval))
        .route("/:id/approvals", get(list_pending_approvals))
        .route("/:id/rules", post(add_rule))
        .route("/:id/events", get(stream_events))
}

/// RunTurn: start a session and return its first event.
async fn run_turn(
    State(state): State<AppState>,
    Json(request): Json<RunTurnRequest>,
) -> Result<Json<RunTurnResponse>, AppError> {
    if request.prompt.trim().is_empty() {
        return Err(AppError::BadRequest("prompt must not be empty".to_string()));
    }
    if request.requester_id.is_empty() {
        return Err(AppError::BadRequest(
            "requester_id must not be empty".to_string(),
        ));
    }

    let turn_id = state.manager.start(StartTurn {
        prompt: request.prompt,
        requester_id: request.requester_id,
        channel_id: request.channel_id,
        now_iso: request.now_iso,
    });

    let event = state
        .manager
        .wait_for_next(&turn_id)
        .await
        .ok_or_else(|| AppError::Internal("turn produced no events".to_string()))?;

    Ok(Json(RunTurnResponse { turn_id, event }))
}

/// ContinueTurn: long-poll the next event. `event` is null once the turn's
/// stream is exhausted.
async fn continue_turn(
    State(state): State<AppState>,
    Path(turn_id): Path<String>,
) -> Result<Json<ContinueTurnResponse>, AppError> {
    if state.manager.state(&turn_id).is_none() {
        return Err(AppError::NotFound(format!("turn {} not found", turn_id)));
    }
    let event = state.manager.wait_for_next(&turn_id).await;
    Ok(Json(ContinueTurnResponse { event }))
}

/// ResolveApproval: deliver a human decision. The outcome is an enumerated
/// status in the body, never an HTTP error.
async fn resolve_approval(
    State(state): State<AppState>,
    Path(turn_id): Path<String>,
    Json(request): Json<ResolveApprovalRequest>,
) -> Json<ResolveApprovalResponse> {
    let status = state.manager.resolve_approval(
        &turn_id,
        &request.call_id,
        &request.actor_id,
        request.decision,
    );
    Json(ResolveApprovalResponse { status })
}

/// Register a turn-scoped approval rule; reports how many pending approvals
/// it retroactively resolved.
async fn add_rule(
    State(state): State<AppState>,
    Path(turn_id): Path<String>,
    Json(spec): Json<RuleSpec>,
) -> Result<Json<AddRuleResponse>, AppError> {
    match state.manager.add_rule(&turn_id, spec) {
        Some((rule_id, resolved)) => Ok(Json(AddRuleResponse { rule_id, resolved })),
        None => Err(AppError::NotFound(format!("turn {} not found", turn_id))),
    }
}

/// Cooperative cancellation of a turn.
async fn cancel_turn(
    State(state): State<AppState>,
    Path(turn_id): Path<String>,
) -> Result<Json<CancelTurnResponse>, AppError> {
    if !state.manager.cancel(&turn_id) {
        return Err(AppError::NotFound(format!("turn {} not found", turn_id)));
    }
    Ok(Json(CancelTurnResponse { cancelled: true }))
}

/// Pending approvals for a turn, for approval UIs.
async fn list_pending_approvals(
    State(state): State<AppState>,
    Path(turn_id): Path<String>,
) -> Result<Json<Vec<ApprovalRequest>>, AppError> {
    if state.manager.state(&turn_id).is_none() {
        return Err(AppError::NotFound(format!("turn {} not found", turn_id)));
    }
    Ok(Json(state.manager.pending_approvals(&turn_id)))
}

/// SSE stream of the turn's remaining events, ending at the terminal one.
async fn stream_events(
    State(state): State<AppState>,
    Path(turn_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if state.manager.state(&turn_id).is_none() {
        return Err(AppError::NotFound(format!("turn {} not found", turn_id)));
    }

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(SSE_CHANNEL_BUFFER);
    let manager = state.manager.clone();
    tokio::spawn(async move {
        while let Some(event) = manager.wait_for_next(&turn_id).await {
            let sse = Event::default()
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().data("{}"));
            if tx.send(Ok(sse)).await.is_err() {
                break;
            }
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}
