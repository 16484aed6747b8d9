//! The pipeline message and its shared per-request context (spec §3).

use crate::content::SessionUpdate;
use crate::error::ProxyError;
use crate::jsonrpc::{AcpNotification, AcpRequest};
use crate::meta::Metadata;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Span;

/// A side channel a node can use to push streaming notifications toward the
/// client, and a record of timing/errors for the whole request tree.
///
/// Shared by `Arc` across every [`PipelineMessage`] cloned from one request
/// (spec §3 invariant: "all messages originating from one request share the
/// same context object").
pub struct PipelineContext {
    pub request_id: String,
    pub session_id: Option<String>,
    pub start_time: Instant,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub meta: parking_lot::Mutex<HashMap<String, Value>>,
    pub span: Span,
    on_update: Box<dyn Fn(AcpNotification) + Send + Sync>,
    pub errors: parking_lot::Mutex<Vec<ContextError>>,
    pub timing: parking_lot::Mutex<HashMap<String, NodeTiming>>,
}

#[derive(Debug, Clone)]
pub struct ContextError {
    pub node_id: Option<String>,
    pub message: String,
    pub recoverable: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeTiming {
    pub started: Option<Duration>,
    pub ended: Option<Duration>,
}

impl PipelineContext {
    pub fn new(request_id: impl Into<String>, session_id: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            request_id: request_id.into(),
            session_id,
            start_time: Instant::now(),
            trace_id: None,
            span_id: None,
            meta: parking_lot::Mutex::new(HashMap::new()),
            span: tracing::info_span!("request"),
            on_update: Box::new(|_| {}),
            errors: parking_lot::Mutex::new(Vec::new()),
            timing: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Like [`PipelineContext::new`], but wires a transport's notification
    /// sink in directly — the common case, since a context built without one
    /// drops every `session/update` on the floor.
    pub fn new_with_on_update<F>(request_id: impl Into<String>, session_id: Option<String>, on_update: F) -> Arc<Self>
    where
        F: Fn(AcpNotification) + Send + Sync + 'static,
    {
        Arc::new(Self {
            request_id: request_id.into(),
            session_id,
            start_time: Instant::now(),
            trace_id: None,
            span_id: None,
            meta: parking_lot::Mutex::new(HashMap::new()),
            span: tracing::info_span!("request"),
            on_update: Box::new(on_update),
            errors: parking_lot::Mutex::new(Vec::new()),
            timing: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Delivers a streaming notification toward the client (spec: `ctx.onUpdate`).
    pub fn emit(&self, update: SessionUpdate) {
        let params = serde_json::json!({
            "requestId": self.request_id,
            "sessionId": self.session_id,
            "update": update,
        });
        (self.on_update)(AcpNotification::new("acp/session/update", params));
    }

    pub fn record_error(&self, node_id: Option<String>, message: impl Into<String>, recoverable: bool) {
        self.errors.lock().push(ContextError {
            node_id,
            message: message.into(),
            recoverable,
        });
    }

    pub fn mark_started(&self, node_id: &str) {
        let elapsed = self.start_time.elapsed();
        self.timing
            .lock()
            .entry(node_id.to_string())
            .or_default()
            .started = Some(elapsed);
    }

    pub fn mark_ended(&self, node_id: &str) {
        let elapsed = self.start_time.elapsed();
        self.timing
            .lock()
            .entry(node_id.to_string())
            .or_default()
            .ended = Some(elapsed);
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("request_id", &self.request_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// The value carried on every edge of the graph (spec §3).
#[derive(Debug, Clone)]
pub struct PipelineMessage {
    pub ctx: Arc<PipelineContext>,
    pub request: AcpRequest,
    pub backend: Option<String>,
    pub translated: Option<Value>,
    pub response: Option<Value>,
}

impl PipelineMessage {
    pub fn new(ctx: Arc<PipelineContext>, request: AcpRequest) -> Self {
        Self {
            ctx,
            request,
            backend: None,
            translated: None,
            response: None,
        }
    }

    /// Clones the message's own fields while keeping the exact same `ctx`
    /// `Arc` — used by fan-out nodes (splitter) so every branch still
    /// reaches the same `onUpdate` sink.
    pub fn fork(&self) -> Self {
        self.clone()
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
