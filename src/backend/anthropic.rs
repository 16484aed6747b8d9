//! Backend for the Anthropic Messages API.
//!
//! [`AnthropicBackend`] calls `POST /v1/messages` with `x-api-key` and
//! `anthropic-version` headers. Streaming decodes SSE events
//! (`content_block_delta`, `message_start`, `message_delta`, `message_stop`).

use super::sse::SseDecoder;
use super::{Backend, LlmRequest, LlmResponse, Role};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Backend for `api.anthropic.com` and Anthropic-compatible gateways.
#[derive(Clone)]
pub struct AnthropicBackend {
    api_key: Option<String>,
    version: String,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field(
                "api_key",
                &self.api_key.as_ref().map(|k| {
                    if k.len() > 6 {
                        format!("{}***", &k[..6])
                    } else {
                        "***".to_string()
                    }
                }),
            )
            .field("version", &self.version)
            .finish()
    }
}

impl AnthropicBackend {
    pub fn new() -> Self {
        Self {
            api_key: None,
            version: ANTHROPIC_VERSION.to_string(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Build the `/v1/messages` request body.
    ///
    /// System prompt is passed as the top-level `system` field (Anthropic
    /// does not accept `role: system` inside `messages`).
    fn build_body(request: &LlmRequest, stream: bool) -> Value {
        let mut messages = Vec::new();
        for msg in &request.messages {
            let role = match msg.role {
                Role::System => continue,
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({"role": role, "content": msg.content}));
        }
        if request.messages.is_empty() {
            messages.push(json!({"role": "user", "content": request.prompt}));
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.config.max_tokens,
            "messages": messages,
            "stream": stream,
        });

        if let Some(ref sys) = request.system_prompt {
            if !sys.is_empty() {
                body["system"] = json!(sys);
            }
        }
        if let Some(temp) = request.config.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(ref custom) = request.config.options {
            if let (Some(base), Some(extra)) = (body.as_object_mut(), custom.as_object()) {
                for (k, v) in extra {
                    base.insert(k.clone(), v.clone());
                }
            }
        }

        body
    }

    fn build_http_request(
        &self,
        client: &Client,
        url: &str,
        body: &Value,
    ) -> reqwest::RequestBuilder {
        let mut req = client
            .post(url)
            .header("anthropic-version", self.version.as_str())
            .json(body);
        if let Some(ref key) = self.api_key {
            req = req.header("x-api-key", key.as_str());
        }
        req
    }

    fn parse_retry_after(value: &str) -> Option<std::time::Duration> {
        value
            .trim()
            .parse::<u64>()
            .ok()
            .map(std::time::Duration::from_secs)
    }

    fn extract_metadata(json_resp: &Value) -> Option<Value> {
        let mut meta = serde_json::Map::new();
        if let Some(v) = json_resp.get("usage") {
            meta.insert("usage".into(), v.clone());
        }
        if let Some(v) = json_resp.get("id") {
            meta.insert("id".into(), v.clone());
        }
        if let Some(v) = json_resp.get("stop_reason") {
            meta.insert("stop_reason".into(), v.clone());
        }
        if meta.is_empty() {
            None
        } else {
            Some(Value::Object(meta))
        }
    }

    /// Extract a text delta from a `content_block_delta` SSE event, if any.
    fn text_delta(event: &Value) -> Option<&str> {
        if event.get("type").and_then(|t| t.as_str()) != Some("content_block_delta") {
            return None;
        }
        event
            .get("delta")
            .and_then(|d| d.get("text"))
            .and_then(|v| v.as_str())
    }
}

impl Default for AnthropicBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let base = base_url.trim_end_matches('/');
        let url = format!("{}/v1/messages", base);
        let body = Self::build_body(request, false);

        let resp = self
            .build_http_request(client, &url, &body)
            .send()
            .await
            .map_err(|e| ProxyError::Other(format!("Failed to connect to LLM at {}: {}", url, e)))?;

        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            let text = resp.text().await.unwrap_or_default();
            return Err(ProxyError::HttpError {
                status,
                body: text,
                retry_after,
            });
        }

        let json_resp: Value = resp.json().await?;

        let text = json_resp
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|v| v.as_str()))
                    .collect::<String>()
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            text,
            status,
            metadata: Self::extract_metadata(&json_resp),
        })
    }

    async fn complete_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse> {
        let base = base_url.trim_end_matches('/');
        let url = format!("{}/v1/messages", base);
        let body = Self::build_body(request, true);

        let resp = self
            .build_http_request(client, &url, &body)
            .send()
            .await
            .map_err(|e| ProxyError::Other(format!("Failed to connect to LLM at {}: {}", url, e)))?;

        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            let text = resp.text().await.unwrap_or_default();
            return Err(ProxyError::HttpError {
                status,
                body: text,
                retry_after,
            });
        }

        let mut stream = resp.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut accumulated = String::new();
        let mut metadata = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ProxyError::Request)?;
            for event in decoder.decode(&chunk) {
                if let Some(text) = Self::text_delta(&event) {
                    if !text.is_empty() {
                        accumulated.push_str(text);
                        on_token(text.to_string());
                    }
                }
                match event.get("type").and_then(|t| t.as_str()) {
                    Some("message_start") => {
                        if let Some(msg) = event.get("message") {
                            metadata = Self::extract_metadata(msg);
                        }
                    }
                    Some("message_delta") => {
                        let mut merged = metadata.take().unwrap_or_else(|| json!({}));
                        if let Some(usage) = event.get("usage") {
                            merged["usage"] = usage.clone();
                        }
                        if let Some(delta) = event.get("delta") {
                            if let Some(stop_reason) = delta.get("stop_reason") {
                                merged["stop_reason"] = stop_reason.clone();
                            }
                        }
                        metadata = Some(merged);
                    }
                    _ => {}
                }
            }
        }

        for event in decoder.flush() {
            if let Some(text) = Self::text_delta(&event) {
                if !text.is_empty() {
                    accumulated.push_str(text);
                    on_token(text.to_string());
                }
            }
        }

        Ok(LlmResponse {
            text: accumulated,
            status,
            metadata,
        })
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
