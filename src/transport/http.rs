//! JSON-RPC 2.0 over HTTP + Server-Sent Events (spec §4.4, §6).
//!
//! - `POST /rpc` — body is one JSON-RPC request; the HTTP response body is
//!   the matching JSON-RPC response, written once the engine produces it.
//!   Pending responses are keyed by request id (coerced to a string, since
//!   SSE routing keys are strings but JSON-RPC ids may be numbers).
//! - `GET /events/{requestId}` — an SSE stream of every notification whose
//!   `params.requestId` equals the path segment. First event is
//!   `event: connected`, subsequent ones `event: notification`.
//! - `GET /` — plain-text status page.
//! - `OPTIONS *` — CORS preflight, handled by `tower_http::cors::CorsLayer`.
//!
//! Route table shape grounded on
//! `555d72c1_xbcsmith-xzatoma__src-mcp-transport-http.rs.rs`'s axum usage,
//! adapted from an MCP client transport to this proxy's server-side routes.

use super::Transport;
use crate::error::{ErrorCode, ProxyError, Result};
use crate::jsonrpc::{parse_request_frame, AcpNotification, AcpRequest, AcpResponse, JsonRpcErrorObject, RequestId};
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

struct SharedState {
    request_tx: mpsc::UnboundedSender<AcpRequest>,
    pending: Mutex<HashMap<String, oneshot::Sender<AcpResponse>>>,
    sse: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<AcpNotification>>>>,
}

pub struct HttpTransport {
    bind_addr: SocketAddr,
    cors: bool,
    state: Arc<SharedState>,
    request_rx: Mutex<Option<mpsc::UnboundedReceiver<AcpRequest>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HttpTransport {
    /// Default bind address per spec §6.
    pub fn new() -> Self {
        Self::bind("127.0.0.1:6809".parse().unwrap())
    }

    pub fn bind(bind_addr: SocketAddr) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        Self {
            bind_addr,
            cors: true,
            state: Arc::new(SharedState {
                request_tx,
                pending: Mutex::new(HashMap::new()),
                sse: Mutex::new(HashMap::new()),
            }),
            request_rx: Mutex::new(Some(request_rx)),
            shutdown_tx: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub fn without_cors(mut self) -> Self {
        self.cors = false;
        self
    }

    /// The address actually bound by `start`, once it has run. Needed when
    /// `bind`'s port is `0` (OS-assigned ephemeral port) and a caller needs
    /// to know which port came back, e.g. to build the `GET /events/...` URL.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(status_page))
            .route("/rpc", post(handle_rpc))
            .route("/events/:request_id", get(handle_events))
            .with_state(self.state.clone());
        if self.cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers(Any),
            );
        }
        router
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn status_page() -> impl IntoResponse {
    "acp-graph-proxy: HTTP+SSE transport is running\n"
}

fn requires_acp_prefix(req: &AcpRequest) -> std::result::Result<(), ProxyError> {
    if req.method.starts_with("acp/") {
        Ok(())
    } else {
        Err(ProxyError::rpc(ErrorCode::MethodNotFound, format!("unknown method: {}", req.method)))
    }
}

async fn handle_rpc(State(state): State<Arc<SharedState>>, body: String) -> axum::response::Response {
    let req = match parse_request_frame(&body) {
        Ok(req) => req,
        Err((Some(id), msg)) => {
            let err = ProxyError::rpc(ErrorCode::ParseError, msg);
            return Json(AcpResponse::from_error(id, &err)).into_response();
        }
        Err((None, _)) => return StatusCode::BAD_REQUEST.into_response(),
    };

    if let Err(err) = requires_acp_prefix(&req) {
        return Json(AcpResponse::from_error(req.id.clone(), &err)).into_response();
    }

    if matches!(req.id, RequestId::Null) {
        warn!("POST /rpc received a null id; cannot correlate a response, closing");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let key = req.id.to_string();
    let (tx, rx) = oneshot::channel();
    {
        let mut pending = state.pending.lock().await;
        if pending.contains_key(&key) {
            let err = ProxyError::rpc(ErrorCode::InvalidRequest, format!("duplicate request id: {key}"));
            return Json(AcpResponse::from_error(req.id, &err)).into_response();
        }
        pending.insert(key.clone(), tx);
    }

    if state.request_tx.send(req.clone()).is_err() {
        state.pending.lock().await.remove(&key);
        let err = ProxyError::internal("request stream is closed");
        return Json(AcpResponse::from_error(req.id, &err)).into_response();
    }

    match rx.await {
        Ok(response) => Json(response).into_response(),
        Err(_) => {
            state.pending.lock().await.remove(&key);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

struct SseGuard {
    request_id: String,
    state: Arc<SharedState>,
}

impl Drop for SseGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let request_id = self.request_id.clone();
        tokio::spawn(async move {
            state.sse.lock().await.remove(&request_id);
        });
    }
}

async fn handle_events(
    State(state): State<Arc<SharedState>>,
    Path(request_id): Path<String>,
) -> Sse<impl futures::Stream<Item = std::result::Result<Event, std::convert::Infallible>>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AcpNotification>();
    state.sse.lock().await.entry(request_id.clone()).or_default().push(tx);
    let guard = SseGuard {
        request_id: request_id.clone(),
        state: state.clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        let connected = serde_json::to_string(&serde_json::json!({"requestId": request_id})).unwrap_or_default();
        yield Ok(Event::default().event("connected").data(connected));
        while let Some(notification) = rx.recv().await {
            let data = serde_json::to_string(&notification).unwrap_or_default();
            yield Ok(Event::default().event("notification").data(data));
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn notification_request_id(notification: &AcpNotification) -> Option<String> {
    let value = notification.params.get("requestId")?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(&self) -> Result<BoxStream<'static, AcpRequest>> {
        let mut shutdown_guard = self.shutdown_tx.lock().await;
        if shutdown_guard.is_some() {
            return Err(ProxyError::Other("http transport already running".into()));
        }
        let mut rx_guard = self.request_rx.lock().await;
        let Some(mut request_rx) = rx_guard.take() else {
            return Err(ProxyError::Other("http transport already running".into()));
        };

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| ProxyError::Other(format!("failed to bind {}: {e}", self.bind_addr)))?;
        let actual_addr = listener
            .local_addr()
            .map_err(|e| ProxyError::Other(format!("failed to read bound address: {e}")))?;
        *self.local_addr.lock().await = Some(actual_addr);
        let router = self.router();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "http transport server exited");
            }
        });

        *shutdown_guard = Some(shutdown_tx);
        drop(shutdown_guard);

        let stream = Box::pin(async_stream::stream! {
            while let Some(req) = request_rx.recv().await {
                yield req;
            }
        });
        Ok(stream)
    }

    async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    async fn send_response(&self, response: AcpResponse) -> Result<()> {
        let key = response.id.to_string();
        if let Some(tx) = self.state.pending.lock().await.remove(&key) {
            let _ = tx.send(response);
        }
        Ok(())
    }

    async fn send_error(&self, id: RequestId, error: JsonRpcErrorObject) -> Result<()> {
        self.send_response(AcpResponse::failure(id, error)).await
    }

    async fn send_notification(&self, notification: AcpNotification) -> Result<()> {
        let Some(request_id) = notification_request_id(&notification) else {
            return Ok(());
        };
        let sse = self.state.sse.lock().await;
        if let Some(senders) = sse.get(&request_id) {
            for tx in senders {
                let _ = tx.send(notification.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_request_id_coerces_numbers_to_strings() {
        let n = AcpNotification::new("acp/session/update", json!({"requestId": 42}));
        assert_eq!(notification_request_id(&n), Some("42".to_string()));
    }

    #[test]
    fn notification_request_id_passes_through_strings() {
        let n = AcpNotification::new("acp/session/update", json!({"requestId": "req-7"}));
        assert_eq!(notification_request_id(&n), Some("req-7".to_string()));
    }

    #[test]
    fn notification_missing_request_id_is_none() {
        let n = AcpNotification::new("acp/session/update", json!({}));
        assert_eq!(notification_request_id(&n), None);
    }

    #[tokio::test]
    async fn double_start_fails() {
        let transport = HttpTransport::bind("127.0.0.1:0".parse().unwrap());
        let _stream = transport.start().await.unwrap();
        assert!(transport.start().await.is_err());
        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn s4_notification_appears_on_matching_sse_stream() {
        use futures::StreamExt;

        let transport = Arc::new(HttpTransport::bind("127.0.0.1:0".parse().unwrap()));
        let mut requests = transport.start().await.unwrap();
        let addr = transport.local_addr().await.unwrap();

        let client = reqwest::Client::new();
        let mut events = client
            .get(format!("http://{addr}/events/req-42"))
            .send()
            .await
            .unwrap()
            .bytes_stream();

        // First chunk is always the `connected` event.
        let connected = String::from_utf8(events.next().await.unwrap().unwrap().to_vec()).unwrap();
        assert!(connected.starts_with("event: connected\n"));

        let rpc_transport = transport.clone();
        tokio::spawn(async move {
            let request = requests.next().await.unwrap();
            assert_eq!(request.method, "acp/echo");
            rpc_transport
                .send_notification(AcpNotification::new(
                    "acp/session/update",
                    json!({"requestId": "req-42", "chunk": "hello"}),
                ))
                .await
                .unwrap();
            rpc_transport
                .send_response(AcpResponse::success(request.id, json!({"ok": true})))
                .await
                .unwrap();
        });

        let rpc_body = json!({
            "jsonrpc": "2.0",
            "method": "acp/echo",
            "params": {"requestId": "req-42"},
            "id": 1,
        });
        let rpc_response = client
            .post(format!("http://{addr}/rpc"))
            .body(rpc_body.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(rpc_response.status(), StatusCode::OK);

        let notification_frame = String::from_utf8(events.next().await.unwrap().unwrap().to_vec()).unwrap();
        assert!(notification_frame.starts_with("event: notification\n"));
        assert!(notification_frame.contains("\"requestId\":\"req-42\""));

        transport.stop().await.unwrap();
    }
}
