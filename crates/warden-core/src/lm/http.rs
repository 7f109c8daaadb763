//! OpenAI-compatible HTTP adapter for the LM contract.
//!
//! Talks to any chat-completions endpoint. A single fenced code block in
//! the reply is treated as tool-script; anything else is a final message.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{prompt, LmClient, LmError, LmReply, LmRequest};

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:tool-script|toolscript|ts)?[ \t]*\n((?s:.*?))```").expect("valid regex")
});

/// Configuration for the HTTP adapter, usually read from the environment.
#[derive(Debug, Clone)]
pub struct HttpLmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

pub struct HttpLm {
    client: reqwest::Client,
    config: HttpLmConfig,
}

impl HttpLm {
    pub fn new(config: HttpLmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Build from `WARDEN_LM_BASE_URL`, `WARDEN_LM_API_KEY`,
    /// `WARDEN_LM_MODEL`. Returns `None` when credentials are absent.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("WARDEN_LM_BASE_URL").ok()?;
        let api_key = std::env::var("WARDEN_LM_API_KEY").ok()?;
        let model = std::env::var("WARDEN_LM_MODEL")
            .unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Some(Self::new(HttpLmConfig {
            base_url,
            api_key,
            model,
        }))
    }

    fn build_messages(request: &LmRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.transcript.len() + 2);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: request.system_prompt.clone(),
        });
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.user_prompt.clone(),
        });
        for entry in &request.transcript {
            let (role, content) = prompt::render_transcript_entry(entry);
            messages.push(ChatMessage {
                role: role.to_string(),
                content,
            });
        }
        messages
    }
}

#[async_trait::async_trait]
impl LmClient for HttpLm {
    async fn complete(&self, request: LmRequest) -> Result<LmReply, LmError> {
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: Self::build_messages(&request),
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LmError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LmError::Unavailable(format!(
                "backend returned {}: {}",
                status, detail
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LmError::Protocol(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LmError::Protocol("empty choices".to_string()))?;

        Ok(parse_reply(&content))
    }
}

/// Interpret raw model text: a fenced code block wins, else final text.
pub fn parse_reply(content: &str) -> LmReply {
    match CODE_FENCE.captures(content) {
        Some(captures) => LmReply::Code {
            code: captures[1].trim().to_string(),
        },
        None => LmReply::Final {
            text: content.trim().to_string(),
        },
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    content: String,
}
