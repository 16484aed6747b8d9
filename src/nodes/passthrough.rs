//! Passthrough adapter (spec §4.5): forwards its single input unchanged to
//! another ACP agent addressed by `endpoint`.

use crate::error::Result;
use crate::message::PipelineContext;
use crate::node::streaming::run_streaming;
use crate::node::{Inputs, Node, NodeCategory, NodeMeta, NodeRegistry, Outputs, PortDef};
use crate::stream::MessageStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const ALLOWED_TYPES: &[&str] = &["stdio", "http", "websocket"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassthroughConfig {
    pub endpoint: String,
    #[serde(rename = "type")]
    pub transport_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

pub struct PassthroughNode {
    config: PassthroughConfig,
}

impl PassthroughNode {
    pub fn new(config: PassthroughConfig) -> Self {
        Self { config }
    }

    fn from_value(value: Value) -> Box<dyn Node> {
        let config: PassthroughConfig = serde_json::from_value(value).unwrap_or(PassthroughConfig {
            endpoint: String::new(),
            transport_type: String::new(),
            timeout: None,
        });
        Box::new(Self::new(config))
    }
}

#[async_trait]
impl Node for PassthroughNode {
    fn meta(&self) -> NodeMeta {
        NodeMeta {
            name: "Passthrough",
            category: NodeCategory::Adapter,
            description: "Forwards its single input unchanged to another ACP agent.",
            inputs: vec![PortDef::pipeline("in")],
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
        let mut errors = Vec::new();
        if self.config.endpoint.is_empty() {
            errors.push("endpoint must not be empty".to_string());
        }
        if !ALLOWED_TYPES.contains(&self.config.transport_type.as_str()) {
            errors.push(format!(
                "type must be one of {:?}, got {:?}",
                ALLOWED_TYPES, self.config.transport_type
            ));
        }
        errors
    }

    async fn process(&self, inputs: Inputs, ctx: Arc<PipelineContext>) -> Outputs {
        run_streaming(inputs, "in", "out", ctx, |msg, _ctx| MessageStream::of(msg))
    }
}

pub fn register(registry: &mut NodeRegistry) -> Result<()> {
    registry.register(
        NodeMeta {
            name: "Passthrough",
            category: NodeCategory::Adapter,
            description: "Forwards its single input unchanged to another ACP agent.",
            inputs: vec![PortDef::pipeline("in")],
            outputs: vec![PortDef::pipeline("out")],
        },
        PassthroughNode::from_value,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_endpoint() {
        let node = PassthroughNode::new(PassthroughConfig {
            endpoint: String::new(),
            transport_type: "stdio".into(),
            timeout: None,
        });
        assert!(!node.validate().is_empty());
    }

    #[test]
    fn validate_rejects_unknown_type() {
        let node = PassthroughNode::new(PassthroughConfig {
            endpoint: "child-agent".into(),
            transport_type: "carrier-pigeon".into(),
            timeout: None,
        });
        assert!(!node.validate().is_empty());
    }

    #[test]
    fn validate_accepts_well_formed_config() {
        let node = PassthroughNode::new(PassthroughConfig {
            endpoint: "child-agent".into(),
            transport_type: "stdio".into(),
            timeout: Some(5000),
        });
        assert!(node.validate().is_empty());
    }
}
