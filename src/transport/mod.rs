//! JSON-RPC transports (spec §4.4, §6): three framings share a single
//! interface — `start`/`stop` a lazy stream of incoming requests, and push
//! responses/errors/notifications back out. Concrete framings:
//!
//! - [`stdio::StdioTransport`] — line-delimited JSON over stdin/stdout.
//! - [`http::HttpTransport`] — `POST /rpc` + `GET /events/{requestId}` SSE,
//!   built on `axum`.
//! - [`pi_wrapper::PiWrapperTransport`] — Pi's own line-delimited dialect on
//!   the process's own stdio, translated to and from synthesized JSON-RPC.
//!
//! Grounded on the retrieval pack's MCP transport abstraction
//! (`d843c9d6_xbcsmith-xzatoma__src-mcp-transport-mod.rs.rs`): a minimal
//! trait plus one submodule per framing, adapted from "send a string,
//! receive a stream of strings" to this proxy's typed request/response
//! envelopes.

use crate::error::Result;
use crate::jsonrpc::{AcpNotification, AcpResponse, JsonRpcErrorObject, RequestId};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod http;
pub mod pi_wrapper;
pub mod stdio;

/// Abstraction over the three JSON-RPC framings this proxy speaks.
///
/// `start` is the "lazy stream of incoming requests" from spec §4.4: no I/O
/// happens until it is called, and calling it twice without an intervening
/// `stop` fails with *already running*.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self) -> Result<BoxStream<'static, crate::jsonrpc::AcpRequest>>;
    async fn stop(&self) -> Result<()>;
    async fn send_response(&self, response: AcpResponse) -> Result<()>;
    async fn send_error(&self, id: RequestId, error: JsonRpcErrorObject) -> Result<()>;
    async fn send_notification(&self, notification: AcpNotification) -> Result<()>;
}

/// Shared classification of a raw inbound frame (spec §4.4: "Classify
/// inbound messages"). Used by both `stdio` and `pi_wrapper`, which read
/// line-delimited JSON directly rather than through axum's extractors.
pub(crate) enum Classified {
    Request(crate::jsonrpc::AcpRequest),
    /// A malformed frame; carries the recovered id, if any (spec scenario S5).
    ParseError(Option<RequestId>),
    /// A well-formed JSON-RPC object that is a response or notification, not
    /// a request — a warning, not an error (spec §4.4).
    NotARequest,
}

pub(crate) fn classify(raw: &str) -> Classified {
    use crate::jsonrpc::parse_request_frame;
    use serde_json::Value;

    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return Classified::ParseError(None);
    };
    let has_id = value.get("id").is_some();
    let has_method = value.get("method").is_some();
    if has_method && !has_id {
        return Classified::NotARequest; // notification
    }
    if !has_method && (value.get("result").is_some() || value.get("error").is_some()) {
        return Classified::NotARequest; // response
    }
    match parse_request_frame(raw) {
        Ok(req) => Classified::Request(req),
        Err((id, _)) => Classified::ParseError(id),
    }
}
