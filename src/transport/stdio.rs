//! Line-delimited JSON-RPC over stdio (spec §4.4, §6). One JSON value per
//! `\n`, no Content-Length framing, empty lines ignored. Diagnostic output
//! (malformed-frame warnings, etc.) goes to `tracing`, never to stdout.

use super::{classify, Classified, Transport};
use crate::error::{ErrorCode, ProxyError, Result};
use crate::jsonrpc::{AcpNotification, AcpRequest, AcpResponse, JsonRpcErrorObject, RequestId};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

pub struct StdioTransport {
    running: AtomicBool,
    stdout: Arc<Mutex<tokio::io::Stdout>>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            stdout: Arc::new(Mutex::new(tokio::io::stdout())),
        }
    }
}

impl Default for StdioTransport {
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

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<BoxStream<'static, AcpRequest>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProxyError::Other("stdio transport already running".into()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<AcpRequest>();
        let stdout = self.stdout.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(l)) => l,
                    Ok(None) => break, // EOF
                    Err(e) => {
                        warn!(error = %e, "stdio read error, stopping transport");
                        break;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match classify(trimmed) {
                    Classified::Request(req) => {
                        if !req.method.starts_with("acp/") {
                            let err = ProxyError::rpc(ErrorCode::MethodNotFound, format!("unknown method: {}", req.method));
                            let resp = AcpResponse::from_error(req.id, &err);
                            let _ = write_line(&stdout, &serde_json::to_value(&resp).unwrap_or(Value::Null)).await;
                            continue;
                        }
                        if tx.send(req).is_err() {
                            break;
                        }
                    }
                    Classified::ParseError(Some(id)) => {
                        let err = ProxyError::rpc(ErrorCode::ParseError, "malformed JSON-RPC frame");
                        let resp = AcpResponse::from_error(id, &err);
                        let _ = write_line(&stdout, &serde_json::to_value(&resp).unwrap_or(Value::Null)).await;
                    }
                    Classified::ParseError(None) => {
                        // No id recoverable; write nothing (spec scenario S5).
                    }
                    Classified::NotARequest => {
                        warn!("ignoring inbound notification/response on stdio transport");
                    }
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
        write_line(&self.stdout, &serde_json::to_value(&response)?).await
    }

    async fn send_error(&self, id: RequestId, error: JsonRpcErrorObject) -> Result<()> {
        let response = AcpResponse::failure(id, error);
        self.send_response(response).await
    }

    async fn send_notification(&self, notification: AcpNotification) -> Result<()> {
        write_line(&self.stdout, &serde_json::to_value(&notification)?).await
    }
}
