//! # acp-graph-proxy
//!
//! A universal LLM protocol proxy. It speaks ACP — a JSON-RPC 2.0 dialect —
//! on the front door, and routes each request through a user-editable,
//! hot-reloadable directed graph of typed nodes out to whichever backend
//! the graph wires it to: Anthropic, OpenAI, Ollama, a Pi CLI subprocess,
//! or another ACP agent passed straight through.
//!
//! ## Core Concepts
//!
//! - **[`jsonrpc`]** — the ACP envelope: [`jsonrpc::AcpRequest`],
//!   [`jsonrpc::AcpResponse`], [`jsonrpc::AcpNotification`], and the closed
//!   JSON-RPC error code taxonomy in [`error::ErrorCode`].
//! - **[`transport`]** — three framings speaking that envelope: line-delimited
//!   stdio, HTTP + Server-Sent Events, and a Pi-dialect-translating wrapper.
//! - **[`graph`]** — the declarative node graph: validation, round-trip
//!   serialization, and [`graph::Engine`], which executes it and hot-reloads
//!   it on file change.
//! - **[`node`]** — the [`node::Node`] contract every node type implements,
//!   plus [`node::NodeRegistry`], the type-name → factory-closure map the
//!   engine instantiates nodes from.
//! - **[`nodes`]** — the reference node library: passthrough, translator,
//!   client, normalizer, splitter, combiner, analyzed combiner, router, and
//!   the stdio-facing ACP input/output nodes.
//! - **[`backend`]** — the [`backend::Backend`] trait and its four
//!   implementations, abstracting over each provider's wire format.
//! - **[`stream`]** — [`stream::MessageStream`], the lazy, cancellable,
//!   single-subscription stream primitive every node passes data through.
//! - **[`message`]** — [`message::PipelineMessage`] and its shared
//!   [`message::PipelineContext`], correlating every message spawned from
//!   one request.
//! - **[`session`]** — [`session::SessionRepository`], an in-memory,
//!   TTL-evicting store of per-session conversation history.
//!
//! ## Quick Start
//!
//! ```no_run
//! use acp_graph_proxy::graph::Engine;
//! use acp_graph_proxy::node::NodeRegistry;
//! use acp_graph_proxy::nodes;
//! use acp_graph_proxy::transport::{stdio::StdioTransport, Transport};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     acp_graph_proxy::logging::init_logging();
//!
//!     let mut registry = NodeRegistry::new();
//!     nodes::register_all(&mut registry)?;
//!     let engine = Engine::new(registry);
//!
//!     let transport = StdioTransport::new();
//!     let mut requests = transport.start().await?;
//!     while let Some(_request) = requests.next().await {
//!         // dispatch into `engine.execute(...)`, forward results back
//!         // through `transport.send_response`/`send_notification`.
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod content;
pub mod error;
pub mod graph;
pub mod jsonrpc;
pub mod logging;
pub mod message;
pub mod meta;
pub mod node;
pub mod nodes;
pub mod output_parser;
pub mod session;
pub mod stream;
pub mod streaming;
pub mod transport;

pub use error::{ErrorCode, ProxyError, Result};
pub use graph::Engine;
pub use jsonrpc::{AcpNotification, AcpRequest, AcpResponse};
pub use message::{PipelineContext, PipelineMessage};
pub use node::{Node, NodeRegistry};
pub use stream::MessageStream;
