//! The graph engine (spec §4.3): owns the installed graph, instantiates
//! nodes from the registry, wires streams between them, and drives
//! execution from an entry node via the recursive `executeNode` algorithm
//! (the `.ts` semantics — spec §9's resolved Open Question).

use super::{validate_graph, GraphMetadata, SerializedConnection, SerializedGraph, SerializedNode};
use crate::error::{ErrorCode, ProxyError, Result};
use crate::message::{PipelineContext, PipelineMessage};
use crate::node::{Inputs, Node, NodeRegistry, Outputs};
use crate::stream::{Item, MessageStream};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

/// Either a parsed graph or its raw JSON text (`loadGraph(serialized | string)`).
pub enum GraphSource {
    Value(Value),
    Text(String),
}

impl From<Value> for GraphSource {
    fn from(v: Value) -> Self {
        GraphSource::Value(v)
    }
}
impl From<String> for GraphSource {
    fn from(s: String) -> Self {
        GraphSource::Text(s)
    }
}
impl From<SerializedGraph> for GraphSource {
    fn from(g: SerializedGraph) -> Self {
        GraphSource::Value(g.to_value())
    }
}

struct InstalledNode {
    node: Arc<dyn Node>,
    node_type: String,
    label: Option<String>,
    position: Option<super::NodePosition>,
}

#[derive(Default)]
struct InstalledGraph {
    version: String,
    metadata: Option<GraphMetadata>,
    nodes: HashMap<String, InstalledNode>,
    order: Vec<String>,
    connections: Vec<SerializedConnection>,
}

pub struct GraphStats {
    pub node_count: usize,
    pub connection_count: usize,
}

/// Owns one editor (the in-memory installed graph) and the node-id map.
pub struct Engine {
    registry: Arc<NodeRegistry>,
    installed: Mutex<InstalledGraph>,
    reloading: tokio::sync::Mutex<()>,
}

impl Engine {
    pub fn new(registry: NodeRegistry) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(registry),
            installed: Mutex::new(InstalledGraph::default()),
            reloading: tokio::sync::Mutex::new(()),
        })
    }

    /// Parses (if text), validates, then atomically replaces the installed
    /// graph (spec §4.3 `loadGraph`). On any failure mid-way the engine is
    /// left in the empty state — the old graph is NOT restored.
    pub async fn load_graph(&self, source: impl Into<GraphSource>) -> Result<()> {
        let value = match source.into() {
            GraphSource::Value(v) => v,
            GraphSource::Text(s) => serde_json::from_str(&s)
                .map_err(|e| ProxyError::GraphInvalid(format!("invalid JSON: {e}")))?,
        };
        let parsed = validate_graph(&value)?;

        let mut installed = self.installed.lock().await;

        // Step 1-2: tear down the current graph.
        for (_, n) in installed.nodes.drain() {
            n.node.on_removed().await;
        }
        installed.order.clear();
        installed.connections.clear();

        // Step 3: instantiate every serialized node.
        let mut new_nodes = HashMap::new();
        let mut order = Vec::new();
        for sn in &parsed.nodes {
            let config = sn.config.clone().unwrap_or(Value::Null);
            let node = match self.registry.create(&sn.node_type, config) {
                Ok(n) => Arc::<dyn Node>::from(n),
                Err(e) => {
                    // Leave the engine empty, per spec.
                    *installed = InstalledGraph::default();
                    return Err(ProxyError::GraphInvalid(format!(
                        "node '{}': {e}",
                        sn.id
                    )));
                }
            };
            let errors = node.validate();
            if !errors.is_empty() {
                *installed = InstalledGraph::default();
                return Err(ProxyError::GraphInvalid(format!(
                    "node '{}' failed validation: {}",
                    sn.id,
                    errors.join("; ")
                )));
            }
            node.on_added().await;
            new_nodes.insert(
                sn.id.clone(),
                InstalledNode {
                    node,
                    node_type: sn.node_type.clone(),
                    label: sn.label.clone(),
                    position: sn.position,
                },
            );
            order.push(sn.id.clone());
        }

        // Step 4: wire connections, invoking onConnected on the source.
        for conn in &parsed.connections {
            if !new_nodes.contains_key(&conn.source) || !new_nodes.contains_key(&conn.target) {
                *installed = InstalledGraph::default();
                return Err(ProxyError::GraphInvalid(format!(
                    "connection references unknown node: {} -> {}",
                    conn.source, conn.target
                )));
            }
            let source = &new_nodes[&conn.source];
            source
                .node
                .on_connected(&conn.source_output, &conn.target, &conn.target_input)
                .await;
        }

        installed.version = parsed.version;
        installed.metadata = parsed.metadata;
        installed.nodes = new_nodes;
        installed.order = order;
        installed.connections = parsed.connections;

        info!(node_count = installed.nodes.len(), "graph reloaded");
        Ok(())
    }

    /// Snapshots the installed graph (spec §4.3 `exportGraph`).
    pub async fn export_graph(&self) -> SerializedGraph {
        let installed = self.installed.lock().await;
        let nodes = installed
            .order
            .iter()
            .filter_map(|id| {
                installed.nodes.get(id).map(|n| SerializedNode {
                    id: id.clone(),
                    node_type: n.node_type.clone(),
                    config: Some(n.node.config()),
                    position: n.position,
                    label: n.label.clone(),
                })
            })
            .collect();
        let mut graph = SerializedGraph {
            version: "1.0.0".to_string(),
            metadata: installed.metadata.clone(),
            nodes,
            connections: installed.connections.clone(),
        };
        graph.touch_modified();
        graph
    }

    pub async fn clear(&self) {
        let mut installed = self.installed.lock().await;
        for (_, n) in installed.nodes.drain() {
            n.node.on_removed().await;
        }
        *installed = InstalledGraph::default();
    }

    pub async fn get_stats(&self) -> GraphStats {
        let installed = self.installed.lock().await;
        GraphStats {
            node_count: installed.nodes.len(),
            connection_count: installed.connections.len(),
        }
    }

    pub async fn has_node(&self, id: &str) -> bool {
        self.installed.lock().await.nodes.contains_key(id)
    }

    pub async fn node_ids(&self) -> Vec<String> {
        self.installed.lock().await.order.clone()
    }

    /// `execute(entryNodeId, message, ctx)` (spec §4.3).
    pub async fn execute(
        &self,
        entry_node_id: &str,
        message: PipelineMessage,
        ctx: Arc<PipelineContext>,
    ) -> Result<MessageStream> {
        let installed = self.installed.lock().await;
        if !installed.nodes.contains_key(entry_node_id) {
            return Err(ProxyError::NodeNotFound(entry_node_id.to_string()));
        }
        // Snapshot the bits execute_node needs so we can release the lock
        // before running potentially long-lived node execution.
        let snapshot = Snapshot::from_installed(&installed);
        drop(installed);

        let entry_port = snapshot
            .input_port_name(entry_node_id)
            .unwrap_or_else(|| "in".to_string());
        let one_shot = MessageStream::of(message);
        let mut inputs = Inputs::new();
        inputs.insert(entry_port, vec![one_shot]);

        Ok(execute_node(Arc::new(snapshot), entry_node_id.to_string(), inputs, ctx).await)
    }

    /// Starts a debounced file watcher on `path` (spec §4.3, "Hot reload").
    /// Reloads are mutually exclusive; a trigger arriving while one is in
    /// flight is dropped.
    pub fn watch(self: &Arc<Self>, path: std::path::PathBuf) -> Result<notify_debouncer_full::Debouncer<notify::RecommendedWatcher, notify_debouncer_full::FileIdMap>> {
        use notify::{RecursiveMode, Watcher};
        use notify_debouncer_full::{new_debouncer, DebounceEventResult};
        use std::time::Duration;

        let engine = self.clone();
        let watch_path = path.clone();
        let handle = tokio::runtime::Handle::current();
        let mut debouncer = new_debouncer(
            Duration::from_millis(500),
            None,
            move |result: DebounceEventResult| {
                if result.is_err() {
                    return;
                }
                let engine = engine.clone();
                let watch_path = watch_path.clone();
                handle.spawn(async move {
                    let Ok(_permit) = engine.reloading.try_lock() else {
                        return;
                    };
                    match tokio::fs::read_to_string(&watch_path).await {
                        Ok(text) => {
                            if let Err(e) = engine.load_graph(text).await {
                                warn!(error = %e, "hot reload failed, keeping previous graph");
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to read graph file for hot reload"),
                    }
                });
            },
        )
        .map_err(|e| ProxyError::Other(e.to_string()))?;
        debouncer
            .watcher()
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| ProxyError::Other(e.to_string()))?;
        Ok(debouncer)
    }
}

/// An immutable snapshot of the installed graph, cheap to share across the
/// recursive `execute_node` calls of a single `execute` invocation without
/// holding the engine's lock for the whole request lifetime.
struct Snapshot {
    nodes: HashMap<String, Arc<dyn Node>>,
    connections: Vec<SerializedConnection>,
    input_ports: HashMap<String, Vec<String>>,
}

impl Snapshot {
    fn from_installed(installed: &InstalledGraph) -> Self {
        let nodes = installed
            .nodes
            .iter()
            .map(|(id, n)| (id.clone(), n.node.clone()))
            .collect();
        let input_ports = installed
            .nodes
            .iter()
            .map(|(id, n)| (id.clone(), n.node.meta().inputs.into_iter().map(|p| p.name).collect()))
            .collect();
        Self {
            nodes,
            connections: installed.connections.clone(),
            input_ports,
        }
    }

    fn input_port_name(&self, node_id: &str) -> Option<String> {
        self.input_ports.get(node_id).and_then(|ports| ports.first().cloned())
    }
}

/// The recursive executeNode algorithm (spec §4.3).
fn execute_node(
    graph: Arc<Snapshot>,
    node_id: String,
    inputs: Inputs,
    ctx: Arc<PipelineContext>,
) -> BoxFuture<'static, MessageStream> {
    async move {
        let Some(node) = graph.nodes.get(&node_id).cloned() else {
            return MessageStream::failed(ProxyError::NodeNotFound(node_id));
        };

        ctx.mark_started(&node_id);
        let outputs: Outputs = if node.meta().inputs.is_empty() {
            // Entry-marker style node (ACPInputNode): the engine injects the
            // initial message directly into its declared outputs rather than
            // calling `process` on an empty input set.
            let msg = inputs
                .into_values()
                .flatten()
                .next()
                .unwrap_or_else(MessageStream::empty);
            let mut outs = Outputs::new();
            if let Some(port) = node.meta().outputs.first() {
                outs.insert(port.name.clone(), msg);
            }
            outs
        } else {
            let node_id_for_panic = node_id.clone();
            match AssertUnwindSafe(node.process(inputs, ctx.clone())).catch_unwind().await {
                Ok(o) => o,
                Err(_) => {
                    error!(node = %node_id_for_panic, "node process() panicked");
                    ctx.record_error(Some(node_id_for_panic.clone()), "internal error", false);
                    ctx.mark_ended(&node_id_for_panic);
                    return MessageStream::failed(ProxyError::rpc(
                        ErrorCode::InternalError,
                        format!("node '{node_id_for_panic}' panicked"),
                    ));
                }
            }
        };
        ctx.mark_ended(&node_id);

        let outgoing: Vec<&SerializedConnection> =
            graph.connections.iter().filter(|c| c.source == node_id).collect();

        if outgoing.is_empty() {
            let streams: Vec<MessageStream> = outputs.into_values().collect();
            return MessageStream::merge(streams);
        }

        // Group outgoing connections by source output port so ports feeding
        // more than one connection are fanned out rather than consumed once.
        let mut by_port: HashMap<String, Vec<&SerializedConnection>> = HashMap::new();
        for conn in &outgoing {
            by_port.entry(conn.source_output.clone()).or_default().push(conn);
        }

        let mut by_target: HashMap<String, Inputs> = HashMap::new();
        let mut outputs = outputs;
        for (port, conns) in by_port {
            let Some(stream) = outputs.remove(&port) else {
                continue; // node didn't populate this declared port; no value to forward.
            };
            let copies = fan_out(stream, conns.len());
            for (conn, copy) in conns.into_iter().zip(copies) {
                by_target
                    .entry(conn.target.clone())
                    .or_default()
                    .entry(conn.target_input.clone())
                    .or_default()
                    .push(copy);
            }
        }

        let mut branches = Vec::with_capacity(by_target.len());
        for (target_id, target_inputs) in by_target {
            branches.push(execute_node(graph.clone(), target_id, target_inputs, ctx.clone()));
        }
        let results = futures::future::join_all(branches).await;
        MessageStream::merge(results)
    }
    .boxed()
}

/// Duplicates a single-subscription stream into `n` independent copies,
/// each message cloned (same `Arc<PipelineContext>`, per spec's sharing
/// invariant) — used when an output port feeds more than one connection.
fn fan_out(stream: MessageStream, n: usize) -> Vec<MessageStream> {
    if n <= 1 {
        return vec![stream];
    }
    let mut txs = Vec::with_capacity(n);
    let mut outs = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = mpsc::unbounded_channel::<Item>();
        txs.push(tx);
        outs.push(receiver_stream(rx));
    }
    stream.subscribe(
        move |msg| {
            for tx in &txs {
                let _ = tx.send(Ok(msg.clone()));
            }
        },
        |_err| {},
        || {},
    );
    outs
}

fn receiver_stream(mut rx: mpsc::UnboundedReceiver<Item>) -> MessageStream {
    let cancel = tokio_util::sync::CancellationToken::new();
    let boxed = Box::pin(async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    });
    MessageStream::from_boxed(boxed, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{AcpRequest, RequestId};
    use crate::node::{NodeCategory, NodeMeta, PortDef};
    use async_trait::async_trait;
    use serde_json::json;

    struct Passthrough;
    #[async_trait]
    impl Node for Passthrough {
        fn meta(&self) -> NodeMeta {
            NodeMeta {
                name: "Passthrough",
                category: NodeCategory::Adapter,
                description: "",
                inputs: vec![PortDef::pipeline("in")],
                outputs: vec![PortDef::pipeline("out")],
            }
        }
        fn config(&self) -> Value {
            Value::Null
        }
        fn update_config(&mut self, _c: Value) {}
        fn validate(&self) -> Vec<String> {
            vec![]
        }
        async fn process(&self, mut inputs: Inputs, _ctx: Arc<PipelineContext>) -> Outputs {
            let mut outs = Outputs::new();
            if let Some(streams) = inputs.remove("in") {
                outs.insert("out".to_string(), MessageStream::merge(streams));
            }
            outs
        }
    }

    fn registry() -> NodeRegistry {
        let mut reg = NodeRegistry::new();
        reg.register(
            NodeMeta {
                name: "Passthrough",
                category: NodeCategory::Adapter,
                description: "",
                inputs: vec![PortDef::pipeline("in")],
                outputs: vec![PortDef::pipeline("out")],
            },
            |_cfg| Box::new(Passthrough),
        )
        .unwrap();
        reg
    }

    #[tokio::test]
    async fn s1_smoke_single_node_graph() {
        let engine = Engine::new(registry());
        let graph = json!({"version":"1.0.0","nodes":[{"id":"n1","type":"Passthrough"}],"connections":[]});
        engine.load_graph(graph).await.unwrap();

        let ctx = PipelineContext::new("req-1", None);
        let msg = PipelineMessage::new(
            ctx.clone(),
            AcpRequest::new("acp/ping", json!({}), RequestId::Number(1)),
        );
        let out = engine.execute("n1", msg, ctx).await.unwrap();
        let values = out.collect_all().await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].request.method, "acp/ping");
    }

    #[tokio::test]
    async fn s2_translator_chain_produces_anthropic_request() {
        let mut reg = NodeRegistry::new();
        crate::nodes::translator::register_all(&mut reg).unwrap();
        crate::nodes::normalizer::register_all(&mut reg).unwrap();
        let engine = Engine::new(reg);

        let graph = json!({
            "version": "1.0.0",
            "nodes": [
                {"id": "translator", "type": "AnthropicTranslator"},
                {"id": "normalizer", "type": "AnthropicNormalizer"},
            ],
            "connections": [
                {
                    "source": "translator",
                    "sourceOutput": "out",
                    "target": "normalizer",
                    "targetInput": "in",
                },
            ],
        });
        engine.load_graph(graph).await.unwrap();

        let ctx = PipelineContext::new("req-s2", None);
        let request = AcpRequest::new(
            "acp/messages/create",
            json!({
                "model": "claude-sonnet-4",
                "max_tokens": 2048,
                "messages": [{"role": "user", "content": "Hello"}],
            }),
            RequestId::Number(1),
        );
        let msg = PipelineMessage::new(ctx.clone(), request);

        let out = engine.execute("translator", msg, ctx).await.unwrap();
        let values = out.collect_all().await.unwrap();
        assert_eq!(values.len(), 1);

        let result = &values[0];
        assert_eq!(result.backend.as_deref(), Some("anthropic"));
        let translated = result.translated.as_ref().expect("translator must set message.translated");
        assert_eq!(translated["stream"], json!(true));
        assert_eq!(translated["config"]["max_tokens"], json!(2048));
    }

    #[tokio::test]
    async fn s3_translator_preserves_meta_hints_in_config_options() {
        let mut reg = NodeRegistry::new();
        crate::nodes::translator::register_all(&mut reg).unwrap();
        let engine = Engine::new(reg);

        let graph = json!({
            "version": "1.0.0",
            "nodes": [{"id": "translator", "type": "AnthropicTranslator"}],
            "connections": [],
        });
        engine.load_graph(graph).await.unwrap();

        let ctx = PipelineContext::new("req-s3", None);
        let request = AcpRequest::new(
            "acp/messages/create",
            json!({
                "model": "claude-sonnet-4",
                "messages": [{"role": "user", "content": "Hello"}],
                "_meta": {"anthropic": {"stop_sequences": ["END"], "top_p": 0.9, "top_k": 50}},
            }),
            RequestId::Number(2),
        );
        let msg = PipelineMessage::new(ctx.clone(), request);

        let out = engine.execute("translator", msg, ctx).await.unwrap();
        let values = out.collect_all().await.unwrap();
        assert_eq!(values.len(), 1);

        let translated = values[0].translated.as_ref().unwrap();
        let options = &translated["config"]["options"];
        assert_eq!(options["stop_sequences"], json!(["END"]));
        assert_eq!(options["top_p"], json!(0.9));
        assert_eq!(options["top_k"], json!(50));
    }

    #[tokio::test]
    async fn load_graph_rejects_unknown_type() {
        let engine = Engine::new(registry());
        let graph = json!({"version":"1.0.0","nodes":[{"id":"n1","type":"Ghost"}],"connections":[]});
        assert!(engine.load_graph(graph).await.is_err());
        assert_eq!(engine.get_stats().await.node_count, 0);
    }

    #[tokio::test]
    async fn export_round_trips_node_count() {
        let engine = Engine::new(registry());
        let graph = json!({"version":"1.0.0","nodes":[{"id":"n1","type":"Passthrough"}],"connections":[]});
        engine.load_graph(graph).await.unwrap();
        let exported = engine.export_graph().await;
        assert_eq!(exported.nodes.len(), 1);
    }

    #[tokio::test]
    async fn watch_reloads_graph_on_file_change() {
        let engine = Engine::new(registry());
        let path = std::env::temp_dir().join(format!("acp-graph-proxy-watch-test-{}.json", fastrand::u64(..)));

        let initial = json!({"version":"1.0.0","nodes":[{"id":"n1","type":"Passthrough"}],"connections":[]});
        tokio::fs::write(&path, initial.to_string()).await.unwrap();
        engine.load_graph(initial).await.unwrap();

        let _debouncer = engine.watch(path.clone()).unwrap();

        let updated = json!({
            "version": "1.0.0",
            "nodes": [
                {"id": "n1", "type": "Passthrough"},
                {"id": "n2", "type": "Passthrough"},
            ],
            "connections": [],
        });
        tokio::fs::write(&path, updated.to_string()).await.unwrap();

        // Debounce window is 500ms; give the watcher a comfortable margin.
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

        assert_eq!(engine.get_stats().await.node_count, 2);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
