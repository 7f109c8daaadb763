//! Turn driver: the agent loop.
//!
//! Each step asks the model for either a final message or a code snippet;
//! snippets run through the code-mode runner and their receipts feed back
//! into the transcript. Budget exhaustion, repeated sandbox faults and LM
//! outages terminate the turn with a machine-readable reason.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalRegistry;
use crate::config::RuntimeConfig;
use crate::events::{EventSink, TurnEvent};
use crate::lm::{prompt, LmClient, LmReply, LmRequest, TranscriptEntry};
use crate::runner::CodeRunner;
use crate::tools::ToolRegistry;
use crate::types::{FailReason, TurnState};

/// Consecutive sandbox faults tolerated before the turn fails.
const SANDBOX_FAULT_LIMIT: usize = 2;

/// How a turn ended. The session manager maps this onto the terminal event.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed { text: String, receipt_count: usize },
    Failed { reason: FailReason, detail: String },
    Cancelled,
}

pub struct TurnDriver {
    lm: Arc<dyn LmClient>,
    tools: Arc<ToolRegistry>,
    approvals: Arc<ApprovalRegistry>,
    sink: Arc<dyn EventSink>,
    config: Arc<RuntimeConfig>,
    turn_id: String,
    requester_id: String,
    cancel: CancellationToken,
}

impl TurnDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lm: Arc<dyn LmClient>,
        tools: Arc<ToolRegistry>,
        approvals: Arc<ApprovalRegistry>,
        sink: Arc<dyn EventSink>,
        config: Arc<RuntimeConfig>,
        turn_id: String,
        requester_id: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            lm,
            tools,
            approvals,
            sink,
            config,
            turn_id,
            requester_id,
            cancel,
        }
    }

    /// Drive the turn to an outcome. Never panics; every exit path is a
    /// `TurnOutcome`.
    pub async fn run(self, user_prompt: String) -> TurnOutcome {
        let catalog = self.tools.catalog();
        let system_prompt = prompt::render_system(&catalog);

        let runner = CodeRunner::new(
            Arc::clone(&self.tools),
            Arc::clone(&self.approvals),
            Arc::clone(&self.sink),
            self.turn_id.clone(),
            self.requester_id.clone(),
            self.config.approval_timeout(),
            self.config.per_step_timeout(),
            self.cancel.clone(),
        );

        let mut transcript: Vec<TranscriptEntry> = Vec::new();
        let mut receipt_count = 0usize;
        let mut steps_taken = 0usize;
        let mut consecutive_sandbox_faults = 0usize;
        let mut total_deadline = Instant::now() + self.config.total_timeout();

        for step in 1..=self.config.max_steps {
            if self.cancel.is_cancelled() {
                return TurnOutcome::Cancelled;
            }
            let Some(remaining) = total_deadline.checked_duration_since(Instant::now()) else {
                return TurnOutcome::Failed {
                    reason: FailReason::TotalTimeout,
                    detail: format!("turn exceeded {}ms", self.config.total_timeout_ms),
                };
            };
            steps_taken = step;

            self.sink.emit(TurnEvent::Status {
                state: TurnState::Running,
            });

            let request = LmRequest {
                system_prompt: system_prompt.clone(),
                tool_catalog: catalog.clone(),
                user_prompt: user_prompt.clone(),
                transcript: transcript.clone(),
            };
            let step_budget = remaining.min(self.config.per_step_timeout());
            let reply = match self.complete_with_retry(request, step_budget).await {
                Ok(reply) => reply,
                Err(StepError::Cancelled) => return TurnOutcome::Cancelled,
                Err(StepError::LmFailed(detail)) => {
                    return TurnOutcome::Failed {
                        reason: FailReason::LmUnavailable,
                        detail,
                    };
                }
            };

            match reply {
                LmReply::Final { text } => {
                    self.sink.emit(TurnEvent::AgentMessage { text: text.clone() });
                    let text = if self.config.verbose_footer {
                        format!(
                            "{}\n\n[trace: {} steps, {} receipts]",
                            text, steps_taken, receipt_count
                        )
                    } else {
                        text
                    };
                    return TurnOutcome::Completed {
                        text,
                        receipt_count,
                    };
                }
                LmReply::Code { code } => {
                    self.sink.emit(TurnEvent::CodeGenerated { code: code.clone() });
                    transcript.push(TranscriptEntry::AssistantCode { code: code.clone() });

                    let outcome = runner.run(&code).await;
                    receipt_count += outcome.receipts.len();
                    // Approval suspension is charged to the approval
                    // timeout, not the turn budget.
                    total_deadline += outcome.suspended;

                    if self.cancel.is_cancelled() {
                        return TurnOutcome::Cancelled;
                    }

                    let is_sandbox_fault = !outcome.ok
                        && outcome
                            .error
                            .as_deref()
                            .is_some_and(|e| e.starts_with("script_error"));
                    if is_sandbox_fault {
                        consecutive_sandbox_faults += 1;
                        if consecutive_sandbox_faults >= SANDBOX_FAULT_LIMIT {
                            return TurnOutcome::Failed {
                                reason: FailReason::SandboxFault,
                                detail: outcome
                                    .error
                                    .unwrap_or_else(|| "sandbox fault".to_string()),
                            };
                        }
                    } else {
                        consecutive_sandbox_faults = 0;
                    }

                    tracing::debug!(
                        turn_id = %self.turn_id,
                        step,
                        ok = outcome.ok,
                        receipts = outcome.receipts.len(),
                        "Code run finished"
                    );

                    transcript.push(TranscriptEntry::RunReport {
                        ok: outcome.ok,
                        error: outcome.error,
                        receipts: outcome.receipts,
                    });
                }
            }
        }

        TurnOutcome::Failed {
            reason: FailReason::StepBudget,
            detail: format!("step budget of {} exhausted", self.config.max_steps),
        }
    }

    /// One LM completion with at most one retry, bounded by the step budget
    /// and responsive to cancellation.
    async fn complete_with_retry(
        &self,
        request: LmRequest,
        step_budget: Duration,
    ) -> Result<LmReply, StepError> {
        let mut last_error = String::new();
        for attempt in 0..2 {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
                result = tokio::time::timeout(step_budget, self.lm.complete(request.clone())) => result,
            };
            match result {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        turn_id = %self.turn_id,
                        attempt,
                        "LM call failed: {}",
                        last_error
                    );
                }
                Err(_) => {
                    last_error = format!("LM call exceeded {}ms", step_budget.as_millis());
                    tracing::warn!(turn_id = %self.turn_id, attempt, "{}", last_error);
                }
            }
        }
        Err(StepError::LmFailed(last_error))
    }
}

enum StepError {
    Cancelled,
    LmFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::ScriptedLm;
    use crate::tools::builtin::register_builtin_tools;
    use parking_lot::Mutex;

    struct CollectorSink(Mutex<Vec<TurnEvent>>);

    impl EventSink for CollectorSink {
        fn emit(&self, event: TurnEvent) {
            self.0.lock().push(event);
        }
    }

    fn driver_with(lm: Arc<ScriptedLm>, config: RuntimeConfig) -> (TurnDriver, Arc<CollectorSink>) {
        let tools = Arc::new(ToolRegistry::new());
        register_builtin_tools(&tools).unwrap();
        let sink = Arc::new(CollectorSink(Mutex::new(Vec::new())));
        let driver = TurnDriver::new(
            lm,
            tools,
            Arc::new(ApprovalRegistry::new()),
            sink.clone(),
            Arc::new(config),
            "t1".to_string(),
            "U1".to_string(),
            CancellationToken::new(),
        );
        (driver, sink)
    }

    #[tokio::test]
    async fn final_reply_completes_in_one_step() {
        let lm = Arc::new(ScriptedLm::new());
        lm.push_final("All done.");
        let (driver, sink) = driver_with(lm.clone(), RuntimeConfig::default());

        let outcome = driver.run("hello".to_string()).await;
        let TurnOutcome::Completed { text, receipt_count } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(text, "All done.");
        assert_eq!(receipt_count, 0);
        assert!(sink
            .0
            .lock()
            .iter()
            .any(|e| matches!(e, TurnEvent::AgentMessage { .. })));
        assert_eq!(lm.requests().len(), 1);
    }

    #[tokio::test]
    async fn code_reply_feeds_receipts_back() {
        let lm = Arc::new(ScriptedLm::new());
        lm.push_code("let x = tools.math.add({ \"a\": 2, \"b\": 3 });\nreturn x;");
        lm.push_final("The sum is 5.");
        let (driver, _sink) = driver_with(lm.clone(), RuntimeConfig::default());

        let outcome = driver.run("add 2 and 3".to_string()).await;
        let TurnOutcome::Completed { text, receipt_count } = outcome else {
            panic!("expected completion");
        };
        assert!(text.contains('5'));
        assert_eq!(receipt_count, 1);

        // The second request carries the run report with the receipt.
        let second = &lm.requests()[1];
        assert!(matches!(
            second.transcript.last(),
            Some(TranscriptEntry::RunReport { ok: true, .. })
        ));
    }

    #[tokio::test]
    async fn step_budget_exhaustion_fails() {
        let lm = Arc::new(ScriptedLm::new());
        lm.push_code("return 1;");
        lm.push_code("return 2;");
        let config = RuntimeConfig {
            max_steps: 2,
            ..Default::default()
        };
        let (driver, _sink) = driver_with(lm, config);

        let outcome = driver.run("loop forever".to_string()).await;
        let TurnOutcome::Failed { reason, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(reason, FailReason::StepBudget);
    }

    #[tokio::test]
    async fn lm_errors_retry_once_then_fail() {
        let lm = Arc::new(ScriptedLm::new());
        lm.push_error(crate::lm::LmError::Unavailable("down".to_string()));
        lm.push_error(crate::lm::LmError::Unavailable("still down".to_string()));
        let (driver, _sink) = driver_with(lm.clone(), RuntimeConfig::default());

        let outcome = driver.run("hi".to_string()).await;
        let TurnOutcome::Failed { reason, detail } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(reason, FailReason::LmUnavailable);
        assert!(detail.contains("still down"));
        assert_eq!(lm.requests().len(), 2);
    }

    #[tokio::test]
    async fn repeated_sandbox_faults_fail_the_turn() {
        let lm = Arc::new(ScriptedLm::new());
        lm.push_code("this is not a program");
        lm.push_code("neither is this");
        let (driver, _sink) = driver_with(lm, RuntimeConfig::default());

        let outcome = driver.run("hi".to_string()).await;
        let TurnOutcome::Failed { reason, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(reason, FailReason::SandboxFault);
    }
}
