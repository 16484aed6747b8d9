//! Combiner (spec §4.5): merges two input streams by arrival order. Acts as
//! a passthrough when only one of `in1`/`in2` is connected.

use crate::error::Result;
use crate::message::PipelineContext;
use crate::node::{Inputs, Node, NodeCategory, NodeMeta, NodeRegistry, Outputs, PortDef};
use crate::stream::MessageStream;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct CombinerNode;

#[async_trait]
impl Node for CombinerNode {
    fn meta(&self) -> NodeMeta {
        NodeMeta {
            name: "Combiner",
            category: NodeCategory::Routing,
            description: "Merges two input streams by arrival order; passes through if only one is connected.",
            inputs: vec![PortDef::pipeline("in1").optional(), PortDef::pipeline("in2").optional()],
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

    async fn process(&self, mut inputs: Inputs, _ctx: Arc<PipelineContext>) -> Outputs {
        let mut streams = Vec::new();
        if let Some(s) = inputs.remove("in1") {
            streams.extend(s);
        }
        if let Some(s) = inputs.remove("in2") {
            streams.extend(s);
        }
        let mut outputs = Outputs::new();
        outputs.insert("out".to_string(), MessageStream::merge(streams));
        outputs
    }
}

pub fn register(registry: &mut NodeRegistry) -> Result<()> {
    registry.register(CombinerNode.meta(), |_config| Box::new(CombinerNode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{AcpRequest, RequestId};
    use crate::message::PipelineMessage;
    use serde_json::json;

    fn msg(ctx: &Arc<PipelineContext>) -> PipelineMessage {
        PipelineMessage::new(ctx.clone(), AcpRequest::new("acp/ping", json!({}), RequestId::Number(1)))
    }

    #[tokio::test]
    async fn merges_two_connected_inputs() {
        let ctx = PipelineContext::new("req-1", None);
        let node = CombinerNode;
        let mut inputs = Inputs::new();
        inputs.insert("in1".to_string(), vec![MessageStream::of(msg(&ctx))]);
        inputs.insert("in2".to_string(), vec![MessageStream::of(msg(&ctx))]);
        let mut outputs = node.process(inputs, ctx).await;
        let out = outputs.remove("out").unwrap().collect_all().await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn acts_as_passthrough_with_single_connected_input() {
        let ctx = PipelineContext::new("req-1", None);
        let node = CombinerNode;
        let mut inputs = Inputs::new();
        inputs.insert("in1".to_string(), vec![MessageStream::of(msg(&ctx))]);
        let mut outputs = node.process(inputs, ctx).await;
        let out = outputs.remove("out").unwrap().collect_all().await.unwrap();
        assert_eq!(out.len(), 1);
    }
}
