//! AI extraction backend — trait seam plus the HTTP implementation.
//!
//! The backend is an OpenAI-compatible chat completions endpoint. The
//! trait exists so the orchestrator (and tests) never depend on the
//! transport.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::BackendError;

/// Why the backend stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Normal completion.
    Stop,
    /// Token limit hit — the content is truncated but may still contain
    /// a parseable prefix.
    Length,
    /// Content-safety filter fired. Not retryable.
    ContentFilter,
    /// Anything else the backend reports.
    Other(String),
}

impl FinishReason {
    fn from_api(s: Option<&str>) -> Self {
        match s {
            None | Some("") | Some("stop") => Self::Stop,
            Some("length") => Self::Length,
            Some("content_filter") => Self::ContentFilter,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

/// One backend completion.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub content: String,
    pub finish_reason: FinishReason,
}

/// Seam between the orchestrator and the AI backend transport.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Send a single prompt and return the raw completion text.
    async fn complete(&self, prompt: &str) -> Result<BackendResponse, BackendError>;
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ── HTTP implementation ─────────────────────────────────────────────

/// Extraction runs near-deterministic.
const EXTRACTION_TEMPERATURE: f32 = 0.1;
const EXTRACTION_TOP_P: f32 = 0.95;
const EXTRACTION_MAX_TOKENS: u32 = 4000;

/// OpenAI-compatible chat completions backend over HTTPS.
pub struct HttpChatBackend {
    config: BackendConfig,
    client: reqwest::Client,
}

impl HttpChatBackend {
    /// Build a client with the configured per-request timeout.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ExtractionBackend for HttpChatBackend {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &str) -> Result<BackendResponse, BackendError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: EXTRACTION_TEMPERATURE,
            top_p: EXTRACTION_TOP_P,
            max_tokens: EXTRACTION_MAX_TOKENS,
            stream: false,
        };

        debug!(
            model = %self.config.model,
            prompt_chars = prompt.len(),
            "Calling extraction backend"
        );

        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout {
                        timeout: self.config.request_timeout,
                    }
                } else {
                    BackendError::RequestFailed {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::InvalidResponse {
                    reason: format!("response body was not valid JSON: {e}"),
                })?;

        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or(BackendError::InvalidResponse {
                reason: "no choices in backend response".into(),
            })?;

        let finish_reason = FinishReason::from_api(choice.finish_reason.as_deref());
        if finish_reason == FinishReason::Length {
            warn!("Backend hit its token limit — response truncated");
        }

        let content = choice
            .message
            .content
            .ok_or(BackendError::InvalidResponse {
                reason: "choice had no message content".into(),
            })?;

        Ok(BackendResponse {
            content: content.trim().to_string(),
            finish_reason,
        })
    }
}
