//! Declarative graph model, validation, and round-trip serialization
//! (spec §3, §4.2).

pub mod engine;

pub use engine::Engine;

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<NodePosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedConnection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    #[serde(rename = "sourceOutput")]
    pub source_output: String,
    pub target: String,
    #[serde(rename = "targetInput")]
    pub target_input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedGraph {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<GraphMetadata>,
    #[serde(default)]
    pub nodes: Vec<SerializedNode>,
    #[serde(default)]
    pub connections: Vec<SerializedConnection>,
}

/// `createEmptyGraph()` (spec §4.2).
pub fn create_empty_graph() -> SerializedGraph {
    SerializedGraph {
        version: "1.0.0".to_string(),
        metadata: Some(GraphMetadata {
            created: Some(chrono::Utc::now().to_rfc3339()),
            modified: None,
        }),
        nodes: Vec::new(),
        connections: Vec::new(),
    }
}

/// `validateGraph(value)` (spec §4.2). Checks structural shape and
/// referential integrity of connection endpoints; does NOT check port
/// names against node metadata (the engine does that at wire time).
pub fn validate_graph(value: &Value) -> Result<SerializedGraph> {
    let obj = value
        .as_object()
        .ok_or_else(|| ProxyError::GraphInvalid("graph must be an object".into()))?;

    let version = obj
        .get("version")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProxyError::GraphInvalid("version must be a non-empty string".into()))?
        .to_string();

    let graph: SerializedGraph = serde_json::from_value(value.clone())
        .map_err(|e| ProxyError::GraphInvalid(format!("malformed graph: {e}")))?;

    let mut seen_ids = HashSet::new();
    for node in &graph.nodes {
        if node.id.is_empty() {
            return Err(ProxyError::GraphInvalid("node id must be non-empty".into()));
        }
        if node.node_type.is_empty() {
            return Err(ProxyError::GraphInvalid(format!(
                "node '{}' has empty type",
                node.id
            )));
        }
        if !seen_ids.insert(node.id.clone()) {
            return Err(ProxyError::GraphInvalid(format!(
                "duplicate node id: {}",
                node.id
            )));
        }
    }

    for conn in &graph.connections {
        if conn.source.is_empty() || conn.source_output.is_empty() {
            return Err(ProxyError::GraphInvalid("connection source fields must be non-empty".into()));
        }
        if conn.target.is_empty() || conn.target_input.is_empty() {
            return Err(ProxyError::GraphInvalid("connection target fields must be non-empty".into()));
        }
        // Self-connections are permitted (spec §4.2).
        if !seen_ids.contains(&conn.source) {
            return Err(ProxyError::GraphInvalid(format!(
                "connection references unknown source node: {}",
                conn.source
            )));
        }
        if !seen_ids.contains(&conn.target) {
            return Err(ProxyError::GraphInvalid(format!(
                "connection references unknown target node: {}",
                conn.target
            )));
        }
    }

    let _ = version;
    Ok(graph)
}

impl SerializedGraph {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("SerializedGraph always serializes")
    }

    /// Stamps `metadata.modified = now`, used by `Engine::export_graph`.
    pub fn touch_modified(&mut self) {
        let meta = self.metadata.get_or_insert_with(GraphMetadata::default);
        meta.modified = Some(chrono::Utc::now().to_rfc3339());
    }
}
