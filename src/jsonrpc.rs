//! JSON-RPC 2.0 envelopes for the ACP dialect (spec §3, §6).
//!
//! Field names and shapes follow JSON-RPC 2.0 as spelled out in spec §3;
//! cross-checked for naming convention against the retrieval pack's
//! `jsonrpc-client-rs` crate, adapted here to derive-`serde` the way the
//! rest of this crate does rather than hand-writing `Serialize` impls.

use crate::error::{ErrorCode, ProxyError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC `id`: string, number, or null. Requests with `id: null` are
/// valid and receive a response with `id: null` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcpRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: RequestId,
}

impl AcpRequest {
    pub fn new(method: impl Into<String>, params: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// `params._meta`, if present and an object.
    pub fn meta(&self) -> Option<&Value> {
        self.params.get("_meta")
    }
}

/// A JSON-RPC notification: same shape as a request, but no `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcpNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl AcpNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&ProxyError> for JsonRpcErrorObject {
    fn from(err: &ProxyError) -> Self {
        let code = err.code();
        JsonRpcErrorObject {
            code: code.as_i64(),
            message: err.to_string(),
            data: None,
        }
    }
}

impl JsonRpcErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_i64(),
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcpResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl AcpResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: JsonRpcErrorObject) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_error(id: RequestId, err: &ProxyError) -> Self {
        Self::failure(id, JsonRpcErrorObject::from(err))
    }
}

/// Parses a raw JSON-RPC frame into a request, recovering the `id` when
/// possible so a `ParseError` response can still be addressed (spec §4.4).
/// Returns `Ok(None)` when no `id` could be recovered at all (the caller
/// should then emit nothing, per spec scenario S5).
pub fn parse_request_frame(raw: &str) -> Result<AcpRequest, (Option<RequestId>, String)> {
    let value: Value = serde_json::from_str(raw).map_err(|e| (None, e.to_string()))?;
    let id = value.get("id").cloned().and_then(|v| {
        serde_json::from_value::<RequestId>(v).ok()
    });
    let method = value.get("method").and_then(Value::as_str);
    let jsonrpc = value.get("jsonrpc").and_then(Value::as_str);
    if jsonrpc != Some("2.0") || method.is_none() || value.get("id").is_none() {
        return Err((id, "not a well-formed JSON-RPC 2.0 request".to_string()));
    }
    serde_json::from_value::<AcpRequest>(value).map_err(|e| (id, e.to_string()))
}
