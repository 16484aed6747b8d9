//! Analyzed combiner (spec §4.5): pairs the latest message from each of two
//! inputs with `combineLatest` semantics, then calls an LLM-backed analyzer
//! configured with an instruction prompt to synthesize a single response.

use crate::backend::{AnthropicBackend, Backend, ChatMessage, LlmConfig, LlmRequest, OllamaBackend, OpenAiBackend, Role};
use crate::error::Result;
use crate::message::{PipelineContext, PipelineMessage};
use crate::node::{Inputs, Node, NodeCategory, NodeMeta, NodeRegistry, Outputs, PortDef};
use crate::stream::{combine_latest, Item, MessageStream};
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedCombinerConfig {
    #[serde(default = "default_instruction")]
    pub instruction: String,
    #[serde(default = "default_analyzer_backend")]
    pub analyzer_backend: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_instruction() -> String {
    "Synthesize the two responses below into a single coherent answer.".to_string()
}

fn default_analyzer_backend() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

impl Default for AnalyzedCombinerConfig {
    fn default() -> Self {
        Self {
            instruction: default_instruction(),
            analyzer_backend: default_analyzer_backend(),
            model: default_model(),
            api_key: None,
            base_url: None,
        }
    }
}

pub struct AnalyzedCombinerNode {
    config: AnalyzedCombinerConfig,
}

impl AnalyzedCombinerNode {
    pub fn new(config: AnalyzedCombinerConfig) -> Self {
        Self { config }
    }

    fn analyzer(&self) -> (Arc<dyn Backend>, String) {
        let base_url = self.config.base_url.clone();
        match self.config.analyzer_backend.as_str() {
            "anthropic" => {
                let mut b = AnthropicBackend::new();
                if let Some(ref key) = self.config.api_key {
                    b = b.with_api_key(key.clone());
                }
                (Arc::new(b), base_url.unwrap_or_else(|| "https://api.anthropic.com".into()))
            }
            "openai" => {
                let mut b = OpenAiBackend::new();
                if let Some(ref key) = self.config.api_key {
                    b = b.with_api_key(key.clone());
                }
                (Arc::new(b), base_url.unwrap_or_else(|| "https://api.openai.com".into()))
            }
            _ => (Arc::new(OllamaBackend), base_url.unwrap_or_else(|| "http://localhost:11434".into())),
        }
    }

    /// Combine two upstream messages into one carrying both sides' text
    /// under `translated` — a scratch slot the analyzer stage below reads
    /// and clears.
    fn pair(a: &PipelineMessage, b: &PipelineMessage) -> PipelineMessage {
        let mut combined = a.clone();
        combined.translated = Some(json!({
            "first": response_text(a),
            "second": response_text(b),
        }));
        combined
    }
}

fn response_text(message: &PipelineMessage) -> String {
    message
        .response
        .as_ref()
        .and_then(|r| r.get("content").and_then(|c| c.as_array()).and_then(|c| c.first()))
        .and_then(|block| block.get("text"))
        .and_then(|t| t.as_str())
        .or_else(|| message.response.as_ref().and_then(|r| r.get("text")).and_then(|t| t.as_str()))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Node for AnalyzedCombinerNode {
    fn meta(&self) -> NodeMeta {
        NodeMeta {
            name: "AnalyzedCombiner",
            category: NodeCategory::Transform,
            description: "Pairs the latest message from two inputs and synthesizes a single analyzed response via an LLM.",
            inputs: vec![PortDef::pipeline("in1"), PortDef::pipeline("in2")],
            outputs: vec![PortDef::pipeline("out")],
        }
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

    async fn process(&self, mut inputs: Inputs, _ctx: Arc<PipelineContext>) -> Outputs {
        let mut outputs = Outputs::new();
        let (Some(in1), Some(in2)) = (inputs.remove("in1"), inputs.remove("in2")) else {
            return outputs;
        };
        let a = MessageStream::merge(in1);
        let b = MessageStream::merge(in2);
        let paired = combine_latest(a, b, |x, y| Self::pair(x, y));

        let (backend, base_url) = self.analyzer();
        let http = HttpClient::new();
        let instruction = self.config.instruction.clone();
        let model = self.config.model.clone();

        let analyzed = paired.flat_map(move |message| {
            analyze(message, backend.clone(), http.clone(), base_url.clone(), instruction.clone(), model.clone())
        });
        outputs.insert("out".to_string(), analyzed);
        outputs
    }
}

fn analyze(
    message: PipelineMessage,
    backend: Arc<dyn Backend>,
    http: HttpClient,
    base_url: String,
    instruction: String,
    model: String,
) -> MessageStream {
    let cancel = CancellationToken::new();
    let inner = Box::pin(async_stream::stream! {
        let (first, second) = message
            .translated
            .as_ref()
            .map(|v| {
                (
                    v.get("first").and_then(|t| t.as_str()).unwrap_or_default().to_string(),
                    v.get("second").and_then(|t| t.as_str()).unwrap_or_default().to_string(),
                )
            })
            .unwrap_or_default();

        let prompt = format!("{instruction}\n\nResponse A:\n{first}\n\nResponse B:\n{second}");
        let request = LlmRequest {
            model,
            system_prompt: None,
            prompt: prompt.clone(),
            messages: vec![ChatMessage { role: Role::User, content: prompt }],
            config: LlmConfig::default(),
            stream: false,
        };

        let mut full_text = String::new();
        let result = backend
            .complete_streaming(&http, &base_url, &request, &mut |text: String| full_text.push_str(&text))
            .await;

        match result {
            Ok(response) => {
                let mut out = message.clone();
                out.translated = None;
                out.response = Some(json!({
                    "content": [{"type": "text", "text": response.text}],
                    "backend": "analyzer",
                }));
                yield Ok(out);
            }
            Err(e) => yield Err(e),
        }
    }) as BoxStream<'static, Item>;
    MessageStream::from_boxed(inner, cancel)
}

pub fn register(registry: &mut NodeRegistry) -> Result<()> {
    registry.register(
        NodeMeta {
            name: "AnalyzedCombiner",
            category: NodeCategory::Transform,
            description: "Pairs the latest message from two inputs and synthesizes a single analyzed response via an LLM.",
            inputs: vec![PortDef::pipeline("in1"), PortDef::pipeline("in2")],
            outputs: vec![PortDef::pipeline("out")],
        },
        |config| {
            let parsed: AnalyzedCombinerConfig = serde_json::from_value(config).unwrap_or_default();
            Box::new(AnalyzedCombinerNode::new(parsed))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{AcpRequest, RequestId};

    fn msg_with_text(ctx: &Arc<PipelineContext>, text: &str) -> PipelineMessage {
        let mut m = PipelineMessage::new(ctx.clone(), AcpRequest::new("acp/ping", json!({}), RequestId::Number(1)));
        m.response = Some(json!({"content": [{"type": "text", "text": text}]}));
        m
    }

    #[test]
    fn pair_carries_both_sides_text_in_translated_scratch_slot() {
        let ctx = PipelineContext::new("req-1", None);
        let a = msg_with_text(&ctx, "side A");
        let b = msg_with_text(&ctx, "side B");
        let paired = AnalyzedCombinerNode::pair(&a, &b);
        let translated = paired.translated.unwrap();
        assert_eq!(translated["first"], "side A");
        assert_eq!(translated["second"], "side B");
    }

    #[test]
    fn response_text_extracts_first_content_block() {
        let ctx = PipelineContext::new("req-1", None);
        let m = msg_with_text(&ctx, "hello");
        assert_eq!(response_text(&m), "hello");
    }

    #[test]
    fn default_analyzer_backend_is_ollama() {
        let config = AnalyzedCombinerConfig::default();
        assert_eq!(config.analyzer_backend, "ollama");
    }
}
