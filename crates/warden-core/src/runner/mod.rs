//! Code-mode runner.
//!
//! Executes one tool-script snippet against the tool tree, gating every
//! sensitive call through the approval registry and emitting a receipt per
//! invocation. The interpreter in [`script`] is the sandbox: only the
//! `tools.*` surface and pure literals are reachable from generated code,
//! a call budget and value-size ceiling bound memory, and a compute budget
//! bounds wall-clock (time suspended on a human decision is charged to the
//! approval timeout instead).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalRegistry, OpenRequest, Opened, SYSTEM_CANCELLED, SYSTEM_TIMEOUT};
use crate::events::{EventSink, TurnEvent};
use crate::tools::preview::default_preview;
use crate::tools::{RegisteredTool, ToolRegistry};
use crate::types::{ApprovalMode, Decision, Receipt, ReceiptDecision, ReceiptStatus};

pub mod script;

use script::{Expr, Program, Stmt};

const MAX_TOOL_CALLS: usize = 64;
const MAX_OUTPUT_BYTES: usize = 1_000_000;

/// Result of one run. Receipts are appended in call order regardless of
/// `ok`.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub ok: bool,
    pub value: Option<Value>,
    pub error: Option<String>,
    pub receipts: Vec<Receipt>,
    /// Wall-clock spent suspended on human decisions. The loop credits this
    /// back to its total budget so approvals are charged only to the
    /// approval timeout.
    pub suspended: Duration,
}

#[derive(Debug, Clone, Error)]
enum ScriptFault {
    #[error("script_error: {0}")]
    Parse(#[from] script::ParseError),

    #[error("unknown_tool: {0}")]
    UnknownTool(String),

    #[error("input_schema_violation: {0}")]
    SchemaViolation(String),

    #[error("approval_denied: {0}")]
    ApprovalDenied(String),

    #[error("tool_failed: {0}")]
    ToolFailed(String),

    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("no field '{field}' on value of '{name}'")]
    UnknownField { name: String, field: String },

    #[error("cancelled")]
    Cancelled,

    #[error("tool call budget exceeded")]
    CallBudget,

    #[error("tool output exceeds size limit")]
    OutputTooLarge,

    #[error("timed_out")]
    TimedOut,

    #[error("duplicate approval id for {0}")]
    DuplicateApprovalId(String),
}

/// Per-run compute budget. Suspension on a human decision extends the
/// deadline by the time spent waiting, so only compute and tool execution
/// consume it.
struct ComputeBudget {
    started: Instant,
    budget: Duration,
    suspended: Mutex<Duration>,
}

impl ComputeBudget {
    fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
            suspended: Mutex::new(Duration::ZERO),
        }
    }

    fn deadline(&self) -> Instant {
        self.started + self.budget + *self.suspended.lock()
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline().checked_duration_since(Instant::now())
    }

    fn credit(&self, waited: Duration) {
        *self.suspended.lock() += waited;
    }
}

/// Executes tool-script snippets for one turn.
pub struct CodeRunner {
    tools: Arc<ToolRegistry>,
    approvals: Arc<ApprovalRegistry>,
    sink: Arc<dyn EventSink>,
    turn_id: String,
    requester_id: String,
    approval_timeout: Duration,
    run_timeout: Duration,
    cancel: CancellationToken,
    call_seq: AtomicU64,
    calls_this_run: AtomicUsize,
    completed: Mutex<Vec<Receipt>>,
}

impl CodeRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tools: Arc<ToolRegistry>,
        approvals: Arc<ApprovalRegistry>,
        sink: Arc<dyn EventSink>,
        turn_id: String,
        requester_id: String,
        approval_timeout: Duration,
        run_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tools,
            approvals,
            sink,
            turn_id,
            requester_id,
            approval_timeout,
            run_timeout,
            cancel,
            call_seq: AtomicU64::new(1),
            calls_this_run: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Execute one snippet. Total wall-clock compute is bounded by the run
    /// timeout; expiry aborts with `timed_out` and cancels any outstanding
    /// approval this run owns.
    pub async fn run(&self, code: &str) -> RunOutcome {
        self.completed.lock().clear();
        self.calls_this_run.store(0, Ordering::Relaxed);

        let program = match script::parse(code) {
            Ok(program) => program,
            Err(e) => {
                return RunOutcome {
                    ok: false,
                    value: None,
                    error: Some(ScriptFault::from(e).to_string()),
                    receipts: Vec::new(),
                    suspended: Duration::ZERO,
                };
            }
        };

        let budget = ComputeBudget::new(self.run_timeout);
        let result = self.execute(&program, &budget).await;
        let receipts = std::mem::take(&mut *self.completed.lock());
        let suspended = *budget.suspended.lock();

        match result {
            Ok(value) => RunOutcome {
                ok: true,
                value: Some(value),
                error: None,
                receipts,
                suspended,
            },
            Err(fault) => {
                self.release_outstanding_approvals();
                RunOutcome {
                    ok: false,
                    value: None,
                    error: Some(fault.to_string()),
                    receipts,
                    suspended,
                }
            }
        }
    }

    /// Cancel approvals this turn still has pending and emit their
    /// resolutions, keeping the per-call event ordering intact even when
    /// the waiting future was dropped.
    fn release_outstanding_approvals(&self) {
        for call_id in self.approvals.cancel_turn(&self.turn_id) {
            self.sink.emit(TurnEvent::ApprovalResolved {
                call_id,
                decision: Decision::Denied,
                actor_id: SYSTEM_CANCELLED.to_string(),
            });
        }
    }

    async fn execute(
        &self,
        program: &Program,
        budget: &ComputeBudget,
    ) -> Result<Value, ScriptFault> {
        let mut env: HashMap<String, Value> = HashMap::new();
        let mut last = Value::Null;

        for stmt in &program.stmts {
            if self.cancel.is_cancelled() {
                return Err(ScriptFault::Cancelled);
            }
            if budget.remaining().is_none() {
                return Err(ScriptFault::TimedOut);
            }
            match stmt {
                Stmt::Let { name, expr } => {
                    let value = self.eval(expr, &env, budget).await?;
                    env.insert(name.clone(), value);
                }
                Stmt::Expr(expr) => {
                    last = self.eval(expr, &env, budget).await?;
                }
                Stmt::Return(expr) => {
                    return self.eval(expr, &env, budget).await;
                }
            }
        }
        Ok(last)
    }

    fn eval<'a>(
        &'a self,
        expr: &'a Expr,
        env: &'a HashMap<String, Value>,
        budget: &'a ComputeBudget,
    ) -> BoxFuture<'a, Result<Value, ScriptFault>> {
        Box::pin(async move {
            match expr {
                Expr::Literal(value) => Ok(value.clone()),
                Expr::Object(fields) => {
                    let mut map = serde_json::Map::with_capacity(fields.len());
                    for (key, value_expr) in fields {
                        map.insert(key.clone(), self.eval(value_expr, env, budget).await?);
                    }
                    Ok(Value::Object(map))
                }
                Expr::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item, env, budget).await?);
                    }
                    Ok(Value::Array(values))
                }
                Expr::Ref { name, path } => {
                    let mut current = env
                        .get(name)
                        .ok_or_else(|| ScriptFault::UndefinedVariable(name.clone()))?;
                    for field in path {
                        current = current.get(field).ok_or_else(|| ScriptFault::UnknownField {
                            name: name.clone(),
                            field: field.clone(),
                        })?;
                    }
                    Ok(current.clone())
                }
                Expr::Call { tool_path, arg } => {
                    let input = self.eval(arg, env, budget).await?;
                    self.call_tool(tool_path, input, budget).await
                }
                Expr::Join(parts) => {
                    let results = futures::future::join_all(
                        parts.iter().map(|part| self.eval(part, env, budget)),
                    )
                    .await;
                    let mut values = Vec::with_capacity(results.len());
                    let mut first_fault = None;
                    for result in results {
                        match result {
                            Ok(value) => values.push(value),
                            Err(fault) if first_fault.is_none() => first_fault = Some(fault),
                            Err(_) => {}
                        }
                    }
                    match first_fault {
                        Some(fault) => Err(fault),
                        None => Ok(Value::Array(values)),
                    }
                }
            }
        })
    }

    async fn call_tool(
        &self,
        tool_path: &str,
        input: Value,
        budget: &ComputeBudget,
    ) -> Result<Value, ScriptFault> {
        if self.cancel.is_cancelled() {
            return Err(ScriptFault::Cancelled);
        }
        if self.calls_this_run.fetch_add(1, Ordering::Relaxed) >= MAX_TOOL_CALLS {
            return Err(ScriptFault::CallBudget);
        }

        let registered = self
            .tools
            .resolve(tool_path)
            .map_err(|_| ScriptFault::UnknownTool(tool_path.to_string()))?;

        let call_id = self.next_call_id();
        let started_at = Utc::now();
        let preview = registered
            .tool
            .preview_input(&input)
            .unwrap_or_else(|| default_preview(&registered.tool.input_schema(), &input));

        if let Err(detail) = registered.validate_input(&input) {
            self.push_receipt(Receipt {
                tool_path: tool_path.to_string(),
                call_id,
                decision: ReceiptDecision::Auto,
                status: ReceiptStatus::Failed,
                input_preview: preview,
                output_digest: None,
                error: Some("input_schema_violation".to_string()),
                started_at,
                finished_at: Utc::now(),
            });
            return Err(ScriptFault::SchemaViolation(detail));
        }

        match registered.tool.approval() {
            ApprovalMode::Auto => {
                self.execute_tool(
                    &registered,
                    tool_path,
                    input,
                    call_id,
                    preview,
                    ReceiptDecision::Auto,
                    budget,
                )
                .await
            }
            ApprovalMode::Required => {
                let opened = self.approvals.open(OpenRequest {
                    call_id: call_id.clone(),
                    turn_id: self.turn_id.clone(),
                    requester_id: self.requester_id.clone(),
                    tool_path: tool_path.to_string(),
                    input: input.clone(),
                    input_preview: preview.clone(),
                    timeout: self.approval_timeout,
                });

                let outcome = match opened {
                    Err(_) => {
                        self.push_receipt(Receipt {
                            tool_path: tool_path.to_string(),
                            call_id: call_id.clone(),
                            decision: ReceiptDecision::Auto,
                            status: ReceiptStatus::Failed,
                            input_preview: preview,
                            output_digest: None,
                            error: Some("duplicate_approval_id".to_string()),
                            started_at,
                            finished_at: Utc::now(),
                        });
                        return Err(ScriptFault::DuplicateApprovalId(call_id));
                    }
                    Ok(Opened::Resolved(outcome)) => outcome,
                    Ok(Opened::Pending(future)) => {
                        self.sink.emit(TurnEvent::AwaitingApproval {
                            call_id: call_id.clone(),
                            tool_path: tool_path.to_string(),
                            input_preview: preview.clone(),
                        });
                        let wait_started = Instant::now();
                        let outcome = future.wait().await;
                        budget.credit(wait_started.elapsed());
                        self.sink.emit(TurnEvent::ApprovalResolved {
                            call_id: call_id.clone(),
                            decision: outcome.decision,
                            actor_id: outcome.actor_id.clone(),
                        });
                        outcome
                    }
                };

                match outcome.decision {
                    Decision::Approved => {
                        self.execute_tool(
                            &registered,
                            tool_path,
                            input,
                            call_id,
                            preview,
                            ReceiptDecision::Approved,
                            budget,
                        )
                        .await
                    }
                    Decision::Denied => {
                        let error = if outcome.actor_id == SYSTEM_TIMEOUT {
                            "timed_out"
                        } else {
                            "approval_denied"
                        };
                        self.push_receipt(Receipt {
                            tool_path: tool_path.to_string(),
                            call_id,
                            decision: ReceiptDecision::Denied,
                            status: ReceiptStatus::Denied,
                            input_preview: preview,
                            output_digest: None,
                            error: Some(error.to_string()),
                            started_at,
                            finished_at: Utc::now(),
                        });
                        Err(ScriptFault::ApprovalDenied(tool_path.to_string()))
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_tool(
        &self,
        registered: &RegisteredTool,
        tool_path: &str,
        input: Value,
        call_id: String,
        preview: String,
        decision: ReceiptDecision,
        budget: &ComputeBudget,
    ) -> Result<Value, ScriptFault> {
        let started_at = Utc::now();
        let Some(remaining) = budget.remaining() else {
            return Err(ScriptFault::TimedOut);
        };

        match tokio::time::timeout(remaining, registered.tool.run(input)).await {
            Ok(Ok(output)) => {
                let encoded_len = serde_json::to_vec(&output).map(|v| v.len()).unwrap_or(0);
                if encoded_len > MAX_OUTPUT_BYTES {
                    self.push_receipt(Receipt {
                        tool_path: tool_path.to_string(),
                        call_id,
                        decision,
                        status: ReceiptStatus::Failed,
                        input_preview: preview,
                        output_digest: None,
                        error: Some("output_too_large".to_string()),
                        started_at,
                        finished_at: Utc::now(),
                    });
                    return Err(ScriptFault::OutputTooLarge);
                }
                self.push_receipt(Receipt {
                    tool_path: tool_path.to_string(),
                    call_id,
                    decision,
                    status: ReceiptStatus::Succeeded,
                    input_preview: preview,
                    output_digest: Some(Receipt::digest_of(&output)),
                    error: None,
                    started_at,
                    finished_at: Utc::now(),
                });
                Ok(output)
            }
            Ok(Err(e)) => {
                let error = e.to_string();
                self.push_receipt(Receipt {
                    tool_path: tool_path.to_string(),
                    call_id,
                    decision,
                    status: ReceiptStatus::Failed,
                    input_preview: preview,
                    output_digest: None,
                    error: Some(error.clone()),
                    started_at,
                    finished_at: Utc::now(),
                });
                Err(ScriptFault::ToolFailed(error))
            }
            Err(_) => {
                self.push_receipt(Receipt {
                    tool_path: tool_path.to_string(),
                    call_id,
                    decision,
                    status: ReceiptStatus::TimedOut,
                    input_preview: preview,
                    output_digest: None,
                    error: Some("timed_out".to_string()),
                    started_at,
                    finished_at: Utc::now(),
                });
                Err(ScriptFault::TimedOut)
            }
        }
    }

    fn push_receipt(&self, receipt: Receipt) {
        self.sink.emit(TurnEvent::ToolResult {
            receipt: receipt.clone(),
        });
        self.completed.lock().push(receipt);
    }

    fn next_call_id(&self) -> String {
        let seq = self.call_seq.fetch_add(1, Ordering::Relaxed);
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        format!("call-{:03}-{}", seq, random)
    }
}
