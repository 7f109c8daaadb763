//! Scripted LM client for tests and offline demos.
//!
//! Replies are queued up front and popped in order; the requests the loop
//! actually sent are recorded for assertions.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::{LmClient, LmError, LmReply, LmRequest};

#[derive(Default)]
pub struct ScriptedLm {
    replies: Mutex<VecDeque<Result<LmReply, LmError>>>,
    requests: Mutex<Vec<LmRequest>>,
}

impl ScriptedLm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_final(&self, text: impl Into<String>) -> &Self {
        self.replies
            .lock()
            .push_back(Ok(LmReply::Final { text: text.into() }));
        self
    }

    pub fn push_code(&self, code: impl Into<String>) -> &Self {
        self.replies
            .lock()
            .push_back(Ok(LmReply::Code { code: code.into() }));
        self
    }

    pub fn push_error(&self, error: LmError) -> &Self {
        self.replies.lock().push_back(Err(error));
        self
    }

    /// Requests the loop has made so far, oldest first.
    pub fn requests(&self) -> Vec<LmRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LmClient for ScriptedLm {
    async fn complete(&self, request: LmRequest) -> Result<LmReply, LmError> {
        self.requests.lock().push(request);
        self.replies.lock().pop_front().unwrap_or_else(|| {
            Err(LmError::Unavailable("scripted replies exhausted".to_string()))
        })
    }
}
