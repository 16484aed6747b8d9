//! Splitter (spec §4.5): fans one input out to `N` outputs, emitting every
//! input message on every output. Used for parallel dispatch (e.g. feeding
//! several client nodes from a single translated request).

use crate::error::Result;
use crate::message::PipelineContext;
use crate::node::{Inputs, Node, NodeCategory, NodeMeta, NodeRegistry, Outputs, PortDef};
use crate::stream::{Item, MessageStream};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MIN_OUTPUTS: u32 = 2;
const MAX_OUTPUTS: u32 = 10;
const DEFAULT_OUTPUTS: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterConfig {
    #[serde(default = "default_output_count")]
    pub output_count: u32,
}

fn default_output_count() -> u32 {
    DEFAULT_OUTPUTS
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            output_count: DEFAULT_OUTPUTS,
        }
    }
}

pub struct SplitterNode {
    config: SplitterConfig,
}

impl SplitterNode {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    fn output_count(&self) -> u32 {
        self.config.output_count.clamp(MIN_OUTPUTS, MAX_OUTPUTS)
    }

    fn port_names(&self) -> Vec<String> {
        (1..=self.output_count()).map(|n| format!("out{n}")).collect()
    }
}

fn stream_from_receiver(mut rx: mpsc::UnboundedReceiver<Item>) -> MessageStream {
    let cancel = CancellationToken::new();
    let boxed = Box::pin(async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    });
    MessageStream::from_boxed(boxed, cancel)
}

#[async_trait]
impl Node for SplitterNode {
    fn meta(&self) -> NodeMeta {
        NodeMeta {
            name: "Splitter",
            category: NodeCategory::Routing,
            description: "Fans a single input out to 2-10 outputs, each receiving every input message.",
            inputs: vec![PortDef::pipeline("in")],
            outputs: (1..=MAX_OUTPUTS)
                .map(|n| PortDef::pipeline(format!("out{n}")).optional())
                .collect(),
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
        if self.config.output_count < MIN_OUTPUTS || self.config.output_count > MAX_OUTPUTS {
            vec![format!(
                "outputCount must be between {} and {}, got {}",
                MIN_OUTPUTS, MAX_OUTPUTS, self.config.output_count
            )]
        } else {
            Vec::new()
        }
    }

    async fn process(&self, inputs: Inputs, _ctx: Arc<PipelineContext>) -> Outputs {
        let mut inputs = inputs;
        let mut outputs = Outputs::new();
        let Some(upstream) = inputs.remove("in") else {
            return outputs;
        };
        let merged = MessageStream::merge(upstream);

        let ports = self.port_names();
        let mut txs = Vec::with_capacity(ports.len());
        for port in &ports {
            let (tx, rx) = mpsc::unbounded_channel::<Item>();
            txs.push(tx);
            outputs.insert(port.clone(), stream_from_receiver(rx));
        }

        merged.subscribe(
            move |msg| {
                for tx in &txs {
                    let _ = tx.send(Ok(msg.fork()));
                }
            },
            move |_err| {
                // Every branch ends as its channel's sender is dropped with
                // the subscription task.
            },
            || {},
        );

        outputs
    }
}

pub fn register(registry: &mut NodeRegistry) -> Result<()> {
    registry.register(
        NodeMeta {
            name: "Splitter",
            category: NodeCategory::Routing,
            description: "Fans a single input out to 2-10 outputs, each receiving every input message.",
            inputs: vec![PortDef::pipeline("in")],
            outputs: (1..=MAX_OUTPUTS)
                .map(|n| PortDef::pipeline(format!("out{n}")).optional())
                .collect(),
        },
        |config| {
            let parsed: SplitterConfig = serde_json::from_value(config).unwrap_or_default();
            Box::new(SplitterNode::new(parsed))
        },
    )
}
