//! Normalizer nodes (spec §4.5): rewrite a client node's backend-raw
//! `message.response` into the canonical [`NormalizedResponse`] shape.

use crate::content::{ContentBlock, NormalizedResponse, Usage};
use crate::error::Result;
use crate::message::PipelineContext;
use crate::node::streaming::run_streaming;
use crate::node::{Inputs, Node, NodeCategory, NodeMeta, NodeRegistry, Outputs, PortDef};
use crate::stream::MessageStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
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
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    #[serde(default = "default_true")]
    pub include_model: bool,
    #[serde(default = "default_true")]
    pub include_id: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            include_model: true,
            include_id: true,
        }
    }
}

pub struct NormalizerNode {
    tag: BackendTag,
    config: NormalizerConfig,
}

impl NormalizerNode {
    pub fn new(tag: BackendTag, config: NormalizerConfig) -> Self {
        Self { tag, config }
    }

    fn meta_for(tag: BackendTag) -> NodeMeta {
        let (name, description): (&'static str, &'static str) = match tag {
            BackendTag::Anthropic => ("AnthropicNormalizer", "Converts an Anthropic client's raw response into the canonical response shape."),
            BackendTag::OpenAi => ("OpenAiNormalizer", "Converts an OpenAI client's raw response into the canonical response shape."),
            BackendTag::Ollama => ("OllamaNormalizer", "Converts an Ollama client's raw response into the canonical response shape."),
            BackendTag::Pi => ("PiNormalizer", "Converts a Pi client's raw response into the canonical response shape."),
        };
        NodeMeta {
            name,
            category: NodeCategory::Transform,
            description,
            inputs: vec![PortDef::pipeline("in")],
            outputs: vec![PortDef::pipeline("out")],
        }
    }

    fn parse_usage(raw: &Value) -> Option<Usage> {
        let usage = raw.get("usage")?;
        let input_tokens = usage.get("input_tokens").and_then(|v| v.as_u64());
        let output_tokens = usage.get("output_tokens").and_then(|v| v.as_u64());
        if input_tokens.is_none() && output_tokens.is_none() {
            return None;
        }
        Some(Usage {
            input_tokens,
            output_tokens,
        })
    }

    fn normalize(&self, raw: &Value) -> NormalizedResponse {
        let text = raw.get("text").and_then(|v| v.as_str()).unwrap_or_default();
        let backend = raw
            .get("backend")
            .and_then(|v| v.as_str())
            .unwrap_or(self.tag.as_str())
            .to_string();
        let model = raw.get("model").and_then(|v| v.as_str()).map(str::to_string);
        let id = raw.get("id").and_then(|v| v.as_str()).map(str::to_string);
        let stop_reason = raw.get("stop_reason").and_then(|v| v.as_str()).map(str::to_string);

        NormalizedResponse {
            content: vec![ContentBlock::text(text)],
            stop_reason,
            usage: Self::parse_usage(raw),
            backend,
            model: self.config.include_model.then_some(model).flatten(),
            id: self.config.include_id.then_some(id).flatten(),
        }
    }
}

#[async_trait]
impl Node for NormalizerNode {
    fn meta(&self) -> NodeMeta {
        Self::meta_for(self.tag)
    }

    fn config(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn update_config(&mut self, config: Value) {
        if let Ok(parsed) = serde_json::from_value(config) {
            self.config = parsed;
        }
    }

    fn validate(&self) -> Vec<String> {
        Vec::new()
    }

    async fn process(&self, inputs: Inputs, ctx: Arc<PipelineContext>) -> Outputs {
        let tag = self.tag;
        let config = self.config.clone();
        run_streaming(inputs, "in", "out", ctx, move |mut message, _ctx| {
            match message.response.clone() {
                Some(raw) => {
                    let node = NormalizerNode::new(tag, config.clone());
                    let normalized = node.normalize(&raw);
                    message.response = serde_json::to_value(normalized).ok();
                }
                None => {
                    warn!(node = "normalizer", "message.response absent, passing through unchanged");
                }
            }
            MessageStream::of(message)
        })
    }
}

fn register_backend(registry: &mut NodeRegistry, tag: BackendTag) -> Result<()> {
    registry.register(NormalizerNode::meta_for(tag), move |config| {
        let parsed: NormalizerConfig = serde_json::from_value(config).unwrap_or_default();
        Box::new(NormalizerNode::new(tag, parsed))
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
    use serde_json::json;

    #[test]
    fn normalizes_raw_response_into_canonical_shape() {
        let node = NormalizerNode::new(BackendTag::Anthropic, NormalizerConfig::default());
        let raw = json!({
            "text": "Hello!",
            "status": 200,
            "backend": "anthropic",
            "model": "claude-sonnet-4-5",
            "id": "msg_123",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let normalized = node.normalize(&raw);
        assert_eq!(normalized.content[0].as_text(), Some("Hello!"));
        assert_eq!(normalized.backend, "anthropic");
        assert_eq!(normalized.model.as_deref(), Some("claude-sonnet-4-5"));
        assert_eq!(normalized.id.as_deref(), Some("msg_123"));
        assert_eq!(normalized.stop_reason.as_deref(), Some("end_turn"));
        let usage = normalized.usage.unwrap();
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(5));
    }

    #[test]
    fn omits_model_and_id_when_config_disables_them() {
        let node = NormalizerNode::new(
            BackendTag::OpenAi,
            NormalizerConfig {
                include_model: false,
                include_id: false,
            },
        );
        let raw = json!({"text": "hi", "backend": "openai", "model": "gpt-4o", "id": "chatcmpl-1"});
        let normalized = node.normalize(&raw);
        assert!(normalized.model.is_none());
        assert!(normalized.id.is_none());
    }

    #[test]
    fn defaults_to_at_least_one_text_block_when_text_missing() {
        let node = NormalizerNode::new(BackendTag::Ollama, NormalizerConfig::default());
        let raw = json!({"backend": "ollama"});
        let normalized = node.normalize(&raw);
        assert_eq!(normalized.content.len(), 1);
        assert_eq!(normalized.content[0].as_text(), Some(""));
    }
}
