//! Router nodes (spec §4.5): a single input dispatched to exactly one (or
//! none) of several named output ports. The abstract contract is
//! [`crate::node::router::run_router`]; this module supplies concrete
//! routers built over it.

use crate::error::Result;
use crate::message::PipelineContext;
use crate::node::router::{get_meta, run_router};
use crate::node::{Inputs, Node, NodeCategory, NodeMeta, NodeRegistry, Outputs, PortDef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Routes by `message.backend` (set by a translator) to a same-named port.
/// Useful right after a splitter feeds several per-backend translators and
/// the graph needs to re-converge per backend downstream.
pub struct BackendRouterNode {
    ports: Vec<String>,
}

impl BackendRouterNode {
    pub fn new(ports: Vec<String>) -> Self {
        Self { ports }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendRouterConfig {
    #[serde(default = "default_backend_ports")]
    pub ports: Vec<String>,
}

fn default_backend_ports() -> Vec<String> {
    vec!["anthropic".into(), "openai".into(), "ollama".into(), "pi".into()]
}

#[async_trait]
impl Node for BackendRouterNode {
    fn meta(&self) -> NodeMeta {
        NodeMeta {
            name: "BackendRouter",
            category: NodeCategory::Routing,
            description: "Routes a message to the named output port matching message.backend.",
            inputs: vec![PortDef::pipeline("in")],
            outputs: default_backend_ports()
                .into_iter()
                .map(|p| PortDef::pipeline(p).optional())
                .collect(),
        }
    }

    fn config(&self) -> Value {
        serde_json::to_value(BackendRouterConfig {
            ports: self.ports.clone(),
        })
        .unwrap_or(Value::Null)
    }

    fn update_config(&mut self, config: Value) {
        if let Ok(parsed) = serde_json::from_value::<BackendRouterConfig>(config) {
            self.ports = parsed.ports;
        }
    }

    fn validate(&self) -> Vec<String> {
        if self.ports.is_empty() {
            vec!["ports must name at least one output".to_string()]
        } else {
            Vec::new()
        }
    }

    async fn process(&self, inputs: Inputs, ctx: Arc<PipelineContext>) -> Outputs {
        let port_refs: Vec<&str> = self.ports.iter().map(String::as_str).collect();
        run_router(inputs, "in", &port_refs, ctx, |msg, _ctx| msg.backend.clone())
    }
}

/// Routes by a dotted `_meta` path, per spec's `getMeta(message, dottedPath)`
/// base-router helper. `routes` maps a stringified meta value to a port
/// name; a value with no matching entry is dropped.
pub struct MetaRouterNode {
    namespace: String,
    key: String,
    routes: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaRouterConfig {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub routes: std::collections::HashMap<String, String>,
}

impl MetaRouterNode {
    pub fn new(config: MetaRouterConfig) -> Self {
        Self {
            namespace: config.namespace,
            key: config.key,
            routes: config.routes,
        }
    }
}

#[async_trait]
impl Node for MetaRouterNode {
    fn meta(&self) -> NodeMeta {
        NodeMeta {
            name: "MetaRouter",
            category: NodeCategory::Routing,
            description: "Routes a message to a port selected by a `_meta.<namespace>.<key>` value.",
            inputs: vec![PortDef::pipeline("in")],
            outputs: vec![PortDef::pipeline("matched").optional()],
        }
    }

    fn config(&self) -> Value {
        serde_json::to_value(MetaRouterConfig {
            namespace: self.namespace.clone(),
            key: self.key.clone(),
            routes: self.routes.clone(),
        })
        .unwrap_or(Value::Null)
    }

    fn update_config(&mut self, config: Value) {
        if let Ok(parsed) = serde_json::from_value::<MetaRouterConfig>(config) {
            self.namespace = parsed.namespace;
            self.key = parsed.key;
            self.routes = parsed.routes;
        }
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.namespace.is_empty() {
            errors.push("namespace must not be empty".to_string());
        }
        if self.key.is_empty() {
            errors.push("key must not be empty".to_string());
        }
        errors
    }

    async fn process(&self, inputs: Inputs, ctx: Arc<PipelineContext>) -> Outputs {
        let namespace = self.namespace.clone();
        let key = self.key.clone();
        let routes = self.routes.clone();
        let port_names: Vec<String> = routes.values().cloned().collect();
        let port_refs: Vec<&str> = port_names.iter().map(String::as_str).collect();
        run_router(inputs, "in", &port_refs, ctx, move |msg, _ctx| {
            let value = get_meta(msg, &namespace, &key)?;
            let key_str = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            routes.get(&key_str).cloned()
        })
    }
}

pub fn register_all(registry: &mut NodeRegistry) -> Result<()> {
    registry.register(
        NodeMeta {
            name: "BackendRouter",
            category: NodeCategory::Routing,
            description: "Routes a message to the named output port matching message.backend.",
            inputs: vec![PortDef::pipeline("in")],
            outputs: default_backend_ports()
                .into_iter()
                .map(|p| PortDef::pipeline(p).optional())
                .collect(),
        },
        |config| {
            let parsed: BackendRouterConfig = serde_json::from_value(config).unwrap_or_else(|_| BackendRouterConfig {
                ports: default_backend_ports(),
            });
            let ports = if parsed.ports.is_empty() {
                default_backend_ports()
            } else {
                parsed.ports
            };
            Box::new(BackendRouterNode::new(ports))
        },
    )?;
    registry.register(
        NodeMeta {
            name: "MetaRouter",
            category: NodeCategory::Routing,
            description: "Routes a message to a port selected by a `_meta.<namespace>.<key>` value.",
            inputs: vec![PortDef::pipeline("in")],
            outputs: vec![PortDef::pipeline("matched").optional()],
        },
        |config| {
            let parsed: MetaRouterConfig = serde_json::from_value(config).unwrap_or_default();
            Box::new(MetaRouterNode::new(parsed))
        },
    )?;
    Ok(())
}
