//! Alternate framing for wrapping the proxy inside a Pi-style parent process
//! (spec §4.4's "Alternate framing for wrapping child processes").
//!
//! This transport is the mirror image of [`crate::backend::pi`]: there, the
//! proxy is the *parent*, spawning Pi as a downstream backend. Here the
//! proxy is itself wrapped — its own stdin/stdout carry Pi's dialect rather
//! than JSON-RPC. Inbound lines have a `type` field naming the command;
//! they are synthesized into `acp/<type>` JSON-RPC requests with
//! `params._meta.pi.originalCommand` set to the original command name.
//! Outbound responses/notifications are translated back using that same
//! hint, kept in a local pending map since an [`AcpResponse`] alone carries
//! no context about which Pi command it answers.

use super::Transport;
use crate::error::{ProxyError, Result};
use crate::jsonrpc::{AcpNotification, AcpRequest, AcpResponse, JsonRpcErrorObject, RequestId};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

pub struct PiWrapperTransport {
    running: AtomicBool,
    stdout: Arc<Mutex<tokio::io::Stdout>>,
    /// synthesized request id (string) -> original Pi command name.
    pending: Arc<Mutex<HashMap<String, String>>>,
}

impl PiWrapperTransport {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            stdout: Arc::new(Mutex::new(tokio::io::stdout())),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for PiWrapperTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_line(stdout: &Mutex<tokio::io::Stdout>, value: &Value) -> Result<()> {
    let mut line = serde_json::to_string(value).map_err(ProxyError::from)?;
    line.push('\n');
    let mut out = stdout.lock().await;
    out.write_all(line.as_bytes()).await.map_err(|e| ProxyError::Other(e.to_string()))?;
    out.flush().await.map_err(|e| ProxyError::Other(e.to_string()))
}

/// Synthesizes an `acp/<type>` request from one inbound Pi command line,
/// per spec §4.4. Returns `None` for a line with no `type` field (malformed,
/// no id to recover — nothing is written back).
fn synthesize_request(id: String, raw: &Value) -> Option<AcpRequest> {
    let command = raw.get("type").and_then(Value::as_str)?.to_string();
    let mut params = raw.clone();
    if let Value::Object(ref mut map) = params {
        map.remove("type");
    }
    params["_meta"] = json!({"pi": {"originalCommand": command}});
    Some(AcpRequest::new(format!("acp/{command}"), params, RequestId::String(id)))
}

#[async_trait]
impl Transport for PiWrapperTransport {
    async fn start(&self) -> Result<BoxStream<'static, AcpRequest>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProxyError::Other("pi wrapper transport already running".into()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<AcpRequest>();
        let stdout = self.stdout.clone();
        let pending = self.pending.clone();
        let counter = Arc::new(AtomicU64::new(0));

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(l)) => l,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "pi wrapper stdio read error, stopping transport");
                        break;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let Ok(raw) = serde_json::from_str::<Value>(trimmed) else {
                    continue; // malformed, no id recoverable
                };
                let id = format!("pi-{}", counter.fetch_add(1, Ordering::SeqCst));
                let Some(request) = synthesize_request(id.clone(), &raw) else {
                    warn!("ignoring Pi frame with no type field");
                    continue;
                };
                let command = raw.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
                pending.lock().await.insert(id, command);
                if tx.send(request).is_err() {
                    break;
                }
            }
        });

        let stream = Box::pin(async_stream::stream! {
            while let Some(req) = rx.recv().await {
                yield req;
            }
        });
        Ok(stream)
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_response(&self, response: AcpResponse) -> Result<()> {
        let key = response.id.to_string();
        let command = self.pending.lock().await.remove(&key);
        let frame = json!({
            "type": "response",
            "command": command,
            "result": response.result,
            "error": response.error,
        });
        write_line(&self.stdout, &frame).await
    }

    async fn send_error(&self, id: RequestId, error: JsonRpcErrorObject) -> Result<()> {
        self.send_response(AcpResponse::failure(id, error)).await
    }

    async fn send_notification(&self, notification: AcpNotification) -> Result<()> {
        let frame = json!({
            "type": "event",
            "event": "update",
            "params": notification.params,
        });
        write_line(&self.stdout, &frame).await
    }
}
