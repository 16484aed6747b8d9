//! The node contract (spec §4.1): a uniform interface that lets translator,
//! client, normalizer, router, splitter, combiner, and passthrough nodes
//! interoperate.
//!
//! Shape follows the teacher's `Backend`/`Payload` async traits: object
//! safe, `async_trait`-based, config carried as a plain JSON value so the
//! registry's factory closures don't need generics.

pub mod registry;
pub mod router;
pub mod streaming;

pub use registry::NodeRegistry;

use crate::message::PipelineContext;
use crate::stream::MessageStream;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Connections are legal only between ports of the same socket tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketTag {
    Pipeline,
    Control,
    Config,
}

/// Informational only (spec §3): used by an external editor's palette, has
/// zero effect on execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCategory {
    Input,
    Output,
    Routing,
    Transform,
    Adapter,
    Utility,
}

#[derive(Debug, Clone)]
pub struct PortDef {
    pub name: String,
    pub socket: SocketTag,
    pub required: bool,
}

impl PortDef {
    pub fn pipeline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            socket: SocketTag::Pipeline,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Static, per-type metadata: display name, category, description, ports,
/// optional config schema.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub name: &'static str,
    pub category: NodeCategory,
    pub description: &'static str,
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
}

/// Fan-in: an input port with multiple inbound connections is presented as
/// the ordered sequence of upstream streams (spec §4.3, "Execution invariants").
pub type Inputs = HashMap<String, Vec<MessageStream>>;
pub type Outputs = HashMap<String, MessageStream>;

#[async_trait]
pub trait Node: Send + Sync {
    fn meta(&self) -> NodeMeta;

    fn config(&self) -> Value;

    /// Mutates this node's instance config. Implementations should reject
    /// unknown keys the way `validate` would, but per spec this only
    /// mutates the stored map — validation is a separate call.
    fn update_config(&mut self, config: Value);

    /// Human-readable validation errors; empty means the node is ready.
    fn validate(&self) -> Vec<String>;

    async fn process(&self, inputs: Inputs, ctx: Arc<PipelineContext>) -> Outputs;

    /// Called after the engine inserts this node into the graph.
    async fn on_added(&self) {}
    /// Called before the engine removes this node from the graph.
    async fn on_removed(&self) {}
    /// Called when an outgoing edge is formed from `port` to `peer_port` on `peer_node`.
    async fn on_connected(&self, _port: &str, _peer_node: &str, _peer_port: &str) {}
    /// Called when the reverse happens.
    async fn on_disconnected(&self, _port: &str) {}
}

/// Factory signature stored in the registry (spec §9: "the registry holds
/// factory closures").
pub type NodeFactory = Arc<dyn Fn(Value) -> Box<dyn Node> + Send + Sync>;
