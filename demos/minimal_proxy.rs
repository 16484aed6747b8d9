//! Wires the node registry, graph engine, and stdio transport together into
//! a runnable end-to-end proxy: a one-node `Passthrough` graph that echoes
//! every `acp/*` request straight back as its own result.
//!
//! ```text
//! echo '{"jsonrpc":"2.0","method":"acp/echo","params":{"hello":"world"},"id":1}' \
//!   | cargo run --example minimal_proxy
//! ```

use acp_graph_proxy::error::{ErrorCode, ProxyError};
use acp_graph_proxy::graph::Engine;
use acp_graph_proxy::jsonrpc::AcpResponse;
use acp_graph_proxy::logging::init_logging;
use acp_graph_proxy::message::{PipelineContext, PipelineMessage};
use acp_graph_proxy::node::NodeRegistry;
use acp_graph_proxy::nodes;
use acp_graph_proxy::transport::stdio::StdioTransport;
use acp_graph_proxy::transport::Transport;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

const ENTRY_NODE: &str = "entry";

fn single_node_graph() -> serde_json::Value {
    json!({
        "version": "1.0.0",
        "nodes": [{"id": ENTRY_NODE, "type": "Passthrough"}],
        "connections": [],
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let mut registry = NodeRegistry::new();
    nodes::register_all(&mut registry)?;
    let engine = Engine::new(registry);
    engine.load_graph(single_node_graph()).await?;

    let transport = Arc::new(StdioTransport::new());
    let mut requests = transport.start().await?;

    while let Some(request) = requests.next().await {
        let engine = engine.clone();
        let transport = transport.clone();
        tokio::spawn(async move {
            let request_id = request.id.clone();
            let transport_for_updates = transport.clone();
            let ctx = PipelineContext::new_with_on_update(
                request_id.to_string(),
                None,
                move |notification| {
                    let transport = transport_for_updates.clone();
                    tokio::spawn(async move {
                        if let Err(e) = transport.send_notification(notification).await {
                            warn!(error = %e, "failed to deliver session/update notification");
                        }
                    });
                },
            );
            let message = PipelineMessage::new(ctx.clone(), request);

            let result = match engine.execute(ENTRY_NODE, message, ctx).await {
                Ok(stream) => stream.collect_all().await,
                Err(e) => Err(e),
            };

            let response = match result {
                Ok(messages) => match messages.into_iter().next_back() {
                    Some(msg) => AcpResponse::success(request_id, msg.response.unwrap_or(json!(null))),
                    None => AcpResponse::from_error(
                        request_id,
                        &ProxyError::rpc(ErrorCode::InternalError, "graph produced no output"),
                    ),
                },
                Err(e) => AcpResponse::from_error(request_id, &e),
            };

            if let Err(e) = transport.send_response(response).await {
                warn!(error = %e, "failed to write response");
            }
        });
    }

    Ok(())
}
