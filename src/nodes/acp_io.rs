//! Entry/exit marker nodes (spec §4.5). `ACPInputNode` has no inputs; the
//! engine injects the initial message directly into its downstream
//! consumers rather than calling `process` to produce one. `ACPOutputNode`
//! has no outputs and logs the terminal message.

use crate::error::Result;
use crate::message::PipelineContext;
use crate::node::{Inputs, Node, NodeCategory, NodeMeta, NodeRegistry, Outputs, PortDef};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub struct AcpInputNode;

#[async_trait]
impl Node for AcpInputNode {
    fn meta(&self) -> NodeMeta {
        NodeMeta {
            name: "ACPInputNode",
            category: NodeCategory::Input,
            description: "Entry marker: the engine injects the initial request into its downstream consumers directly.",
            inputs: Vec::new(),
            outputs: vec![PortDef::pipeline("out")],
        }
    }

    fn config(&self) -> Value {
        Value::Null
    }

    fn update_config(&mut self, _config: Value) {}

    fn validate(&self) -> Vec<String> {
        Vec::new()
    }

    async fn process(&self, _inputs: Inputs, _ctx: Arc<PipelineContext>) -> Outputs {
        Outputs::new()
    }
}

pub struct AcpOutputNode;

#[async_trait]
impl Node for AcpOutputNode {
    fn meta(&self) -> NodeMeta {
        NodeMeta {
            name: "ACPOutputNode",
            category: NodeCategory::Output,
            description: "Exit marker: logs the terminal message for a request and produces no further output.",
            inputs: vec![PortDef::pipeline("in")],
            outputs: Vec::new(),
        }
    }

    fn config(&self) -> Value {
        Value::Null
    }

    fn update_config(&mut self, _config: Value) {}

    fn validate(&self) -> Vec<String> {
        Vec::new()
    }

    async fn process(&self, inputs: Inputs, _ctx: Arc<PipelineContext>) -> Outputs {
        let mut inputs = inputs;
        let Some(upstream) = inputs.remove("in") else {
            return Outputs::new();
        };
        let merged = crate::stream::MessageStream::merge(upstream);
        merged.subscribe(
            |msg| info!(request_id = %msg.ctx.request_id, "request exited the graph"),
            |err| tracing::warn!(error = %err, "request exited the graph with an error"),
            || {},
        );
        Outputs::new()
    }
}

pub fn register(registry: &mut NodeRegistry) -> Result<()> {
    registry.register(AcpInputNode.meta(), |_config| Box::new(AcpInputNode))?;
    registry.register(AcpOutputNode.meta(), |_config| Box::new(AcpOutputNode))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acp_input_node_has_no_input_ports() {
        assert!(AcpInputNode.meta().inputs.is_empty());
    }

    #[test]
    fn acp_output_node_has_no_output_ports() {
        assert!(AcpOutputNode.meta().outputs.is_empty());
    }
}
