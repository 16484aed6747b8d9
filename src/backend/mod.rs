//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over LLM providers, translating between
//! normalized [`LlmRequest`]/[`LlmResponse`] types and provider-specific
//! HTTP APIs. Client *nodes* (`nodes::client::*`) own streaming/event
//! emission toward the pipeline context; backends stay a thin HTTP shim,
//! same split the teacher used between `Backend` and its callers.
//!
//! ## Architecture
//!
//! ```text
//! Translator node ─► LlmRequest ─► Backend::complete_streaming() ─► LlmResponse
//!                                          │
//!                  ┌───────────┬───────────┼───────────┬───────────┐
//!             OllamaBackend OpenAiBackend AnthropicBackend   PiBackend
//!             /api/generate  /v1/chat/... /v1/messages       child process
//!             NDJSON         SSE          SSE
//! ```

pub mod anthropic;
pub mod backoff;
pub mod ollama;
pub mod openai;
pub mod pi;
pub mod sse;

pub use anthropic::AnthropicBackend;
pub use backoff::BackoffConfig;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use pi::PiBackend;

use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Type alias for the callback invoked before each transport retry.
///
/// Arguments: `(attempt_number, delay_before_retry, reason_for_retry)`.
pub type RetryCallback<'a> = Option<&'a mut (dyn FnMut(u32, std::time::Duration, &str) + Send)>;

/// Per-request knobs a translator reads from `defaultXxx` config and
/// `_meta` overrides (spec §4.5, Translator field mapping rules).
///
/// `Serialize`/`Deserialize` let a translator node hand one of these to a
/// client node through `message.translated` as plain JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub temperature: Option<f64>,
    pub max_tokens: u32,
    pub json_mode: bool,
    pub options: Option<Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: 4096,
            json_mode: false,
            options: None,
        }
    }
}

impl LlmConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }
}

/// A normalized LLM request — provider-agnostic. Produced by a translator
/// node (`message.translated`), consumed by the matching client node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub messages: Vec<ChatMessage>,
    pub config: LlmConfig,
    pub stream: bool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A normalized LLM response.
#[derive(Debug, Serialize)]
pub struct LlmResponse {
    pub text: String,
    pub status: u16,
    pub metadata: Option<Value>,
}

/// Abstraction over LLM providers. Object-safe, used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn complete(&self, client: &Client, base_url: &str, request: &LlmRequest) -> Result<LlmResponse>;

    /// `on_token` is called for each text delta as it arrives; the final
    /// accumulated text is returned as an [`LlmResponse`].
    async fn complete_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse>;

    fn name(&self) -> &'static str;
}

/// Whether a [`ProxyError`] is retryable under `config`.
pub fn is_retryable(error: &ProxyError, config: &BackoffConfig) -> bool {
    match error {
        ProxyError::HttpError { status, .. } => config.retryable_statuses.contains(status),
        ProxyError::Request(_) => true,
        _ => false,
    }
}

/// Options for [`with_backoff_streaming`].
pub struct BackoffStreamOpts<'a> {
    pub cancel: Option<&'a std::sync::atomic::AtomicBool>,
    pub on_retry: RetryCallback<'a>,
    pub on_token: &'a mut (dyn FnMut(String) + Send),
}

/// Retries a streaming backend call with exponential backoff, per the
/// `config`'s `retryable_statuses`. Each retry restarts the stream from
/// scratch — partial tokens from failed attempts are discarded. Called by
/// [`crate::nodes::client::ClientNode::process`], one retry policy per
/// backend tag.
pub async fn with_backoff_streaming(
    backend: &Arc<dyn Backend>,
    client: &Client,
    base_url: &str,
    request: &LlmRequest,
    config: &BackoffConfig,
    opts: BackoffStreamOpts<'_>,
) -> Result<LlmResponse> {
    let BackoffStreamOpts {
        cancel,
        mut on_retry,
        on_token,
    } = opts;
    let mut last_error: Option<ProxyError> = None;

    for attempt in 0..=config.max_retries {
        if let Some(flag) = cancel {
            if flag.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(ProxyError::Cancelled);
            }
        }

        if attempt > 0 {
            let delay = if let Some(ProxyError::HttpError {
                retry_after: Some(ra),
                ..
            }) = &last_error
            {
                if config.respect_retry_after {
                    *ra
                } else {
                    config.delay_for_attempt(attempt - 1)
                }
            } else {
                config.delay_for_attempt(attempt - 1)
            };

            let reason = last_error.as_ref().map(|e| e.to_string()).unwrap_or_default();
            if let Some(ref mut cb) = on_retry {
                cb(attempt, delay, &reason);
            }
            tokio::time::sleep(delay).await;

            if let Some(flag) = cancel {
                if flag.load(std::sync::atomic::Ordering::Relaxed) {
                    return Err(ProxyError::Cancelled);
                }
            }
        }

        match backend.complete_streaming(client, base_url, request, on_token).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                if attempt < config.max_retries && is_retryable(&e, config) {
                    last_error = Some(e);
                    continue;
                }
                return Err(e);
            }
        }
    }

    Err(last_error.unwrap_or(ProxyError::Other("backoff loop exited unexpectedly".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_retryable_429() {
        let config = BackoffConfig::standard();
        let err = ProxyError::HttpError {
            status: 429,
            body: "rate limited".into(),
            retry_after: None,
        };
        assert!(is_retryable(&err, &config));
    }

    #[test]
    fn is_retryable_400_not_retried() {
        let config = BackoffConfig::standard();
        let err = ProxyError::HttpError {
            status: 400,
            body: "bad request".into(),
            retry_after: None,
        };
        assert!(!is_retryable(&err, &config));
    }

    #[tokio::test]
    async fn backoff_streaming_respects_cancellation() {
        use std::sync::atomic::AtomicBool;

        let cancel = AtomicBool::new(true);
        let backend: Arc<dyn Backend> = Arc::new(OllamaBackend);
        let client = Client::new();
        let request = LlmRequest {
            model: "test".into(),
            system_prompt: None,
            prompt: "test".into(),
            messages: Vec::new(),
            config: LlmConfig::default(),
            stream: false,
        };

        let result = with_backoff_streaming(
            &backend,
            &client,
            "http://localhost:99999",
            &request,
            &BackoffConfig::standard(),
            BackoffStreamOpts {
                cancel: Some(&cancel),
                on_retry: None,
                on_token: &mut |_| {},
            },
        )
        .await;

        assert!(matches!(result.unwrap_err(), ProxyError::Cancelled));
    }
}
