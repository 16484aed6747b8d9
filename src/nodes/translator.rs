//! Translator nodes (spec §4.5): rewrite a provider-agnostic ACP request
//! into a normalized [`LlmRequest`], attached as `message.translated` and
//! consumed by the matching client node.

use crate::backend::{ChatMessage, LlmConfig, LlmRequest, Role};
use crate::error::Result;
use crate::message::{PipelineContext, PipelineMessage};
use crate::meta::Metadata;
use crate::node::streaming::run_streaming;
use crate::node::{Inputs, Node, NodeCategory, NodeMeta, NodeRegistry, Outputs, PortDef};
use crate::stream::MessageStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTag {
    Anthropic,
    OpenAi,
    Ollama,
    Pi,
}

impl BackendTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Pi => "pi",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-5",
            Self::OpenAi => "gpt-4o",
            Self::Ollama => "llama3",
            Self::Pi => "pi-default",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_temperature: Option<f64>,
}

pub struct TranslatorNode {
    backend: BackendTag,
    config: TranslatorConfig,
}

impl TranslatorNode {
    pub fn new(backend: BackendTag, config: TranslatorConfig) -> Self {
        Self { backend, config }
    }

    fn meta_for(backend: BackendTag) -> NodeMeta {
        let (name, description): (&'static str, &'static str) = match backend {
            BackendTag::Anthropic => ("AnthropicTranslator", "Rewrites an ACP request into an Anthropic-bound LLM request."),
            BackendTag::OpenAi => ("OpenAiTranslator", "Rewrites an ACP request into an OpenAI-bound LLM request."),
            BackendTag::Ollama => ("OllamaTranslator", "Rewrites an ACP request into an Ollama-bound LLM request."),
            BackendTag::Pi => ("PiTranslator", "Rewrites an ACP request into a Pi CLI prompt."),
        };
        NodeMeta {
            name,
            category: NodeCategory::Transform,
            description,
            inputs: vec![PortDef::pipeline("in")],
            outputs: vec![PortDef::pipeline("out")],
        }
    }

    fn chat_messages(params: &Value) -> Vec<ChatMessage> {
        params
            .get("messages")
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|m| {
                        let role = match m.get("role").and_then(|r| r.as_str())? {
                            "system" => Role::System,
                            "assistant" => Role::Assistant,
                            _ => Role::User,
                        };
                        let content = m.get("content").and_then(|c| c.as_str())?.to_string();
                        Some(ChatMessage { role, content })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn translate(&self, message: &mut PipelineMessage) {
        let params = message.request.params.clone();
        let hints = message
            .request
            .meta()
            .cloned()
            .and_then(Metadata::from_value)
            .and_then(|m| m.namespace(self.backend.as_str()).cloned())
            .unwrap_or_default();

        let model = params
            .get("model")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.config.default_model.clone())
            .unwrap_or_else(|| self.backend.default_model().to_string());

        let max_tokens = params
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .or(self.config.default_max_tokens)
            .unwrap_or(4096);

        let temperature = params
            .get("temperature")
            .and_then(|v| v.as_f64())
            .or(self.config.default_temperature);

        let request = match self.backend {
            BackendTag::Anthropic => self.build_anthropic(&params, &hints, model, max_tokens, temperature),
            BackendTag::OpenAi => self.build_openai(&params, &hints, model, max_tokens, temperature),
            BackendTag::Ollama => self.build_ollama(&params, &hints, model, max_tokens, temperature),
            BackendTag::Pi => self.build_pi(&params, &hints, model),
        };

        message.backend = Some(self.backend.as_str().to_string());
        message.translated = Some(serde_json::to_value(request).unwrap_or(Value::Null));
    }

    fn build_anthropic(
        &self,
        params: &Value,
        hints: &serde_json::Map<String, Value>,
        model: String,
        max_tokens: u32,
        temperature: Option<f64>,
    ) -> LlmRequest {
        let mut options = serde_json::Map::new();
        for key in ["metadata", "stop_sequences", "top_p", "top_k"] {
            if let Some(v) = hints.get(key) {
                options.insert(key.to_string(), v.clone());
            }
        }
        LlmRequest {
            model,
            system_prompt: params.get("system").and_then(|v| v.as_str()).map(str::to_string),
            prompt: String::new(),
            messages: Self::chat_messages(params),
            config: LlmConfig {
                temperature,
                max_tokens,
                json_mode: false,
                options: (!options.is_empty()).then(|| Value::Object(options)),
            },
            stream: true,
        }
    }

    fn build_openai(
        &self,
        params: &Value,
        hints: &serde_json::Map<String, Value>,
        model: String,
        max_tokens: u32,
        temperature: Option<f64>,
    ) -> LlmRequest {
        let mut messages = Vec::new();
        if let Some(system) = params.get("system").and_then(|v| v.as_str()) {
            messages.push(ChatMessage {
                role: Role::System,
                content: system.to_string(),
            });
        }
        messages.extend(Self::chat_messages(params));

        let mut options = serde_json::Map::new();
        for key in ["frequency_penalty", "presence_penalty", "top_p", "stop", "user"] {
            if let Some(v) = hints.get(key) {
                options.insert(key.to_string(), v.clone());
            }
        }
        LlmRequest {
            model,
            system_prompt: None,
            prompt: String::new(),
            messages,
            config: LlmConfig {
                temperature,
                max_tokens,
                json_mode: false,
                options: (!options.is_empty()).then(|| Value::Object(options)),
            },
            stream: true,
        }
    }

    fn build_ollama(
        &self,
        params: &Value,
        hints: &serde_json::Map<String, Value>,
        model: String,
        max_tokens: u32,
        temperature: Option<f64>,
    ) -> LlmRequest {
        let mut options = serde_json::Map::new();
        for key in ["top_p", "top_k", "repeat_penalty"] {
            if let Some(v) = hints.get(key) {
                options.insert(key.to_string(), v.clone());
            }
        }
        LlmRequest {
            model,
            system_prompt: params.get("system").and_then(|v| v.as_str()).map(str::to_string),
            prompt: String::new(),
            messages: Self::chat_messages(params),
            config: LlmConfig {
                temperature,
                max_tokens,
                json_mode: false,
                options: (!options.is_empty()).then(|| Value::Object(options)),
            },
            stream: true,
        }
    }

    fn build_pi(&self, params: &Value, hints: &serde_json::Map<String, Value>, model: String) -> LlmRequest {
        let prompt_text = params
            .get("prompt")
            .and_then(|v| v.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .or_else(|| params.get("prompt").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_default();

        let attachments: Vec<Value> = params
            .get("prompt")
            .and_then(|v| v.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| {
                        matches!(
                            b.get("type").and_then(|t| t.as_str()),
                            Some("image") | Some("resource")
                        )
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut options = serde_json::Map::new();
        options.insert("attachments".to_string(), json!(attachments));
        if let Some(level) = hints.get("thinkingLevel") {
            options.insert("thinkingLevel".to_string(), level.clone());
        }
        let model = hints
            .get("model")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(model);

        LlmRequest {
            model,
            system_prompt: None,
            prompt: prompt_text,
            messages: Vec::new(),
            config: LlmConfig {
                temperature: None,
                max_tokens: 4096,
                json_mode: false,
                options: Some(Value::Object(options)),
            },
            stream: true,
        }
    }
}

#[async_trait]
impl Node for TranslatorNode {
    fn meta(&self) -> NodeMeta {
        Self::meta_for(self.backend)
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
        let backend = self.backend;
        let config = self.config.clone();
        run_streaming(inputs, "in", "out", ctx, move |mut message, _ctx| {
            let node = TranslatorNode::new(backend, config.clone());
            node.translate(&mut message);
            MessageStream::of(message)
        })
    }
}

fn register_backend(registry: &mut NodeRegistry, backend: BackendTag) -> Result<()> {
    registry.register(TranslatorNode::meta_for(backend), move |config| {
        let parsed: TranslatorConfig = serde_json::from_value(config).unwrap_or_default();
        Box::new(TranslatorNode::new(backend, parsed))
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
    use crate::jsonrpc::{AcpRequest, RequestId};

    fn message_with(params: Value) -> PipelineMessage {
        let ctx = PipelineContext::new("req-1", None);
        let request = AcpRequest::new("acp/messages/create", params, RequestId::Number(1));
        PipelineMessage::new(ctx, request)
    }

    #[test]
    fn anthropic_translator_sets_stream_true_and_max_tokens() {
        let node = TranslatorNode::new(BackendTag::Anthropic, TranslatorConfig::default());
        let mut message = message_with(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 2048,
            "messages": [{"role": "user", "content": "Hello"}],
        }));
        node.translate(&mut message);
        assert_eq!(message.backend.as_deref(), Some("anthropic"));
        let translated = message.translated.unwrap();
        assert_eq!(translated["stream"], true);
        assert_eq!(translated["config"]["max_tokens"], 2048);
    }

    #[test]
    fn anthropic_translator_passes_through_meta_hints() {
        let node = TranslatorNode::new(BackendTag::Anthropic, TranslatorConfig::default());
        let mut message = message_with(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 2048,
            "messages": [],
            "_meta": {"anthropic": {"stop_sequences": ["END"], "top_p": 0.9, "top_k": 50}},
        }));
        node.translate(&mut message);
        let translated = message.translated.unwrap();
        let options = &translated["config"]["options"];
        assert_eq!(options["stop_sequences"], json!(["END"]));
        assert_eq!(options["top_p"], 0.9);
        assert_eq!(options["top_k"], 50);
    }

    #[test]
    fn openai_translator_prepends_system_message() {
        let node = TranslatorNode::new(BackendTag::OpenAi, TranslatorConfig::default());
        let mut message = message_with(json!({
            "model": "gpt-4o",
            "system": "Be terse.",
            "messages": [{"role": "user", "content": "Hi"}],
        }));
        node.translate(&mut message);
        let translated = message.translated.unwrap();
        let messages = translated["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "Be terse.");
    }

    #[test]
    fn pi_translator_flattens_prompt_blocks_and_reads_thinking_level() {
        let node = TranslatorNode::new(BackendTag::Pi, TranslatorConfig::default());
        let mut message = message_with(json!({
            "prompt": [{"type": "text", "text": "Why is the sky blue?"}],
            "_meta": {"pi": {"thinkingLevel": "high"}},
        }));
        node.translate(&mut message);
        let translated = message.translated.unwrap();
        assert_eq!(translated["prompt"], "Why is the sky blue?");
        assert_eq!(translated["config"]["options"]["thinkingLevel"], "high");
    }

    #[test]
    fn falls_back_to_default_model_when_absent() {
        let node = TranslatorNode::new(BackendTag::Ollama, TranslatorConfig::default());
        let mut message = message_with(json!({"messages": []}));
        node.translate(&mut message);
        assert_eq!(message.translated.unwrap()["model"], "llama3");
    }
}
