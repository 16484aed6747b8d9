//! Client nodes (spec §4.5): the streaming node that submits a translated
//! request to a backend and re-emits its events as `session/update`
//! notifications, one per backend in [`crate::backend`].

use crate::backend::{
    AnthropicBackend, Backend, BackoffConfig, BackoffStreamOpts, LlmRequest, OllamaBackend, OpenAiBackend, PiBackend,
};
use crate::content::{ContentBlock, SessionUpdate};
use crate::error::{ProxyError, Result};
use crate::message::{PipelineContext, PipelineMessage};
use crate::node::{Inputs, Node, NodeCategory, NodeMeta, NodeRegistry, Outputs, PortDef};
use crate::stream::{Item, MessageStream};
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTag {
    Anthropic,
    OpenAi,
    Ollama,
    Pi,
}

impl BackendTag {
    fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Pi => "pi",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAi => "https://api.openai.com",
            Self::Ollama => "http://localhost:11434",
            Self::Pi => "",
        }
    }

    fn api_key_env_var(self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Ollama | Self::Pi => None,
        }
    }

    /// Default transport-retry policy (spec's "no retry policy beyond what
    /// individual client nodes implement" leaves this up to the node): cloud
    /// APIs get [`BackoffConfig::interactive`] since a user is waiting on the
    /// other end of the proxy; Ollama is local and Pi is a child process, so
    /// neither benefits from HTTP-status retry.
    fn default_backoff(self) -> BackoffConfig {
        match self {
            Self::Anthropic | Self::OpenAi => BackoffConfig::interactive(),
            Self::Ollama | Self::Pi => BackoffConfig::none(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Overrides the tag's default retry policy. `0` disables retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

pub struct ClientNode {
    tag: BackendTag,
    config: ClientConfig,
    backend: Arc<dyn Backend>,
    /// Same object as `backend` when `tag == Pi`, kept as a concrete type so
    /// `on_removed` can reach `PiBackend::shutdown` (the `Backend` trait
    /// itself is not downcastable).
    pi: Option<Arc<PiBackend>>,
    http: HttpClient,
}

impl ClientNode {
    pub fn new(tag: BackendTag, config: ClientConfig) -> Self {
        let (backend, pi) = Self::build_backend(tag, &config);
        Self {
            tag,
            config,
            backend,
            pi,
            http: HttpClient::new(),
        }
    }

    fn build_backend(tag: BackendTag, config: &ClientConfig) -> (Arc<dyn Backend>, Option<Arc<PiBackend>>) {
        let key = config.api_key.clone().or_else(|| {
            tag.api_key_env_var()
                .and_then(|var| std::env::var(var).ok())
        });
        match tag {
            BackendTag::Anthropic => {
                let mut backend = AnthropicBackend::new();
                if let Some(key) = key {
                    backend = backend.with_api_key(key);
                }
                (Arc::new(backend), None)
            }
            BackendTag::OpenAi => {
                let mut backend = OpenAiBackend::new();
                if let Some(key) = key {
                    backend = backend.with_api_key(key);
                }
                (Arc::new(backend), None)
            }
            BackendTag::Ollama => (Arc::new(OllamaBackend), None),
            BackendTag::Pi => {
                let program = config.program.clone().unwrap_or_else(|| "pi".to_string());
                let mut backend = PiBackend::new(program);
                if let Some(ref args) = config.args {
                    backend = backend.with_args(args.clone());
                }
                let pi = Arc::new(backend);
                (pi.clone() as Arc<dyn Backend>, Some(pi))
            }
        }
    }

    fn base_url(&self) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| self.tag.default_base_url().to_string())
    }

    fn backoff(&self) -> BackoffConfig {
        let mut backoff = self.tag.default_backoff();
        if let Some(max_retries) = self.config.max_retries {
            backoff.max_retries = max_retries;
        }
        backoff
    }

    fn meta_for(tag: BackendTag) -> NodeMeta {
        let (name, description): (&'static str, &'static str) = match tag {
            BackendTag::Anthropic => ("AnthropicClient", "Submits a translated request to the Anthropic Messages API and streams the response."),
            BackendTag::OpenAi => ("OpenAiClient", "Submits a translated request to an OpenAI-compatible chat completions endpoint and streams the response."),
            BackendTag::Ollama => ("OllamaClient", "Submits a translated request to a local Ollama server and streams the response."),
            BackendTag::Pi => ("PiClient", "Submits a translated request to a Pi CLI child process and streams the response."),
        };
        NodeMeta {
            name,
            category: NodeCategory::Adapter,
            description,
            inputs: vec![PortDef::pipeline("in")],
            outputs: vec![PortDef::pipeline("out")],
        }
    }
}

#[async_trait]
impl Node for ClientNode {
    fn meta(&self) -> NodeMeta {
        Self::meta_for(self.tag)
    }

    fn config(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn update_config(&mut self, config: Value) {
        if let Ok(parsed) = serde_json::from_value(config) {
            self.config = parsed;
            let (backend, pi) = Self::build_backend(self.tag, &self.config);
            self.backend = backend;
            self.pi = pi;
        }
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(var) = self.tag.api_key_env_var() {
            let has_key = self.config.api_key.is_some() || std::env::var(var).is_ok();
            if !has_key {
                errors.push(format!(
                    "{} backend requires an API key: set config.api_key or the {} environment variable",
                    self.tag.as_str(),
                    var
                ));
            }
        }
        errors
    }

    async fn process(&self, inputs: Inputs, ctx: Arc<PipelineContext>) -> Outputs {
        let backend = self.backend.clone();
        let backend_name = self.tag.as_str();
        let http = self.http.clone();
        let base_url = self.base_url();
        let backoff = self.backoff();

        crate::node::streaming::run_streaming(inputs, "in", "out", ctx, move |message, _ctx| {
            run_client(message, backend.clone(), http.clone(), base_url.clone(), backend_name, backoff.clone())
        })
    }

    async fn on_removed(&self) {
        if let Some(ref pi) = self.pi {
            pi.shutdown().await;
        }
    }
}

/// Runs one request against `backend` with transport-level retry, translating
/// streaming token callbacks into `session/update` notifications via the
/// message's shared context, and yields a single final message carrying the
/// raw response.
fn run_client(
    message: PipelineMessage,
    backend: Arc<dyn Backend>,
    http: HttpClient,
    base_url: String,
    backend_name: &'static str,
    backoff: BackoffConfig,
) -> MessageStream {
    let cancel = CancellationToken::new();
    let inner = Box::pin(async_stream::stream! {
        let Some(translated) = message.translated.clone() else {
            yield Err(ProxyError::Other("no translated request: translator must run before client".into()));
            return;
        };
        let request: LlmRequest = match serde_json::from_value(translated) {
            Ok(r) => r,
            Err(e) => {
                yield Err(ProxyError::Other(format!("malformed translated request: {e}")));
                return;
            }
        };

        let ctx = message.ctx.clone();
        let mut on_retry = |attempt: u32, delay: std::time::Duration, reason: &str| {
            warn!(backend = backend_name, attempt, delay_ms = delay.as_millis() as u64, reason, "retrying backend request");
        };
        let result = crate::backend::with_backoff_streaming(
            &backend,
            &http,
            &base_url,
            &request,
            &backoff,
            crate::backend::BackoffStreamOpts {
                cancel: None,
                on_retry: Some(&mut on_retry),
                on_token: &mut |text: String| {
                    if !text.is_empty() {
                        ctx.emit(SessionUpdate::ContentChunk { block: ContentBlock::text(text) });
                    }
                },
            },
        )
        .await;

        match result {
            Ok(response) => {
                let mut body = json!({
                    "text": response.text,
                    "status": response.status,
                    "backend": backend_name,
                    "model": request.model,
                });
                if let Some(meta) = response.metadata {
                    if let (Some(base), Some(extra)) = (body.as_object_mut(), meta.as_object()) {
                        for (k, v) in extra {
                            base.insert(k.clone(), v.clone());
                        }
                    }
                }
                let mut out = message.clone();
                out.response = Some(body);
                yield Ok(out);
            }
            Err(e) => yield Err(e),
        }
    }) as BoxStream<'static, Item>;
    MessageStream::from_boxed(inner, cancel)
}

fn register_backend(registry: &mut NodeRegistry, tag: BackendTag) -> Result<()> {
    registry.register(ClientNode::meta_for(tag), move |config| {
        let parsed: ClientConfig = serde_json::from_value(config).unwrap_or_default();
        Box::new(ClientNode::new(tag, parsed))
    })
}

pub fn register_all(registry: &mut NodeRegistry) -> Result<()> {
    register_backend(registry, BackendTag::Anthropic)?;
    register_backend(registry, BackendTag::OpenAi)?;
    register_backend(registry, BackendTag::Ollama)?;
    register_backend(registry, BackendTag::Pi)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_api_key_for_anthropic() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        let node = ClientNode::new(BackendTag::Anthropic, ClientConfig::default());
        assert!(!node.validate().is_empty());
    }

    #[test]
    fn validate_passes_with_explicit_api_key() {
        let node = ClientNode::new(
            BackendTag::Anthropic,
            ClientConfig {
                api_key: Some("sk-ant-test".into()),
                ..Default::default()
            },
        );
        assert!(node.validate().is_empty());
    }

    #[test]
    fn validate_does_not_require_api_key_for_ollama() {
        let node = ClientNode::new(BackendTag::Ollama, ClientConfig::default());
        assert!(node.validate().is_empty());
    }

    #[test]
    fn base_url_defaults_per_backend() {
        let node = ClientNode::new(BackendTag::Ollama, ClientConfig::default());
        assert_eq!(node.base_url(), "http://localhost:11434");
    }

    #[test]
    fn base_url_overridden_by_config() {
        let node = ClientNode::new(
            BackendTag::Ollama,
            ClientConfig {
                base_url: Some("http://gpu-box:11434".into()),
                ..Default::default()
            },
        );
        assert_eq!(node.base_url(), "http://gpu-box:11434");
    }

    #[test]
    fn backoff_defaults_retry_for_cloud_backends_only() {
        let anthropic = ClientNode::new(BackendTag::Anthropic, ClientConfig::default());
        assert!(anthropic.backoff().max_retries > 0);

        let ollama = ClientNode::new(BackendTag::Ollama, ClientConfig::default());
        assert_eq!(ollama.backoff().max_retries, 0);

        let pi = ClientNode::new(BackendTag::Pi, ClientConfig::default());
        assert_eq!(pi.backoff().max_retries, 0);
    }

    #[test]
    fn backoff_max_retries_overridable() {
        let node = ClientNode::new(
            BackendTag::Ollama,
            ClientConfig {
                max_retries: Some(5),
                ..Default::default()
            },
        );
        assert_eq!(node.backoff().max_retries, 5);
    }
}
