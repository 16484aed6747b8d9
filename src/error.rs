use std::time::Duration;
use thiserror::Error;

/// Closed set of JSON-RPC / ACP error codes this proxy ever emits.
///
/// Standard codes match JSON-RPC 2.0; `-3200x` codes are proxy-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    BackendUnavailable,
    BackendError,
    CapabilityUnsupported,
    RateLimited,
    ContextExceeded,
    AuthFailed,
}

impl ErrorCode {
    pub fn as_i64(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::BackendUnavailable => -32001,
            ErrorCode::BackendError => -32002,
            ErrorCode::CapabilityUnsupported => -32003,
            ErrorCode::RateLimited => -32004,
            ErrorCode::ContextExceeded => -32005,
            ErrorCode::AuthFailed => -32006,
        }
    }

    /// Transient errors are retry-appropriate (spec §3: `{-32001, -32004, -503}`).
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorCode::BackendUnavailable | ErrorCode::RateLimited)
    }

    /// Permanent errors should not be retried (spec §3: `{-32003, -32006, -32602, -32600}`).
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            ErrorCode::CapabilityUnsupported
                | ErrorCode::AuthFailed
                | ErrorCode::InvalidParams
                | ErrorCode::InvalidRequest
        )
    }
}

/// Errors produced by the proxy and its components.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A declared JSON-RPC / ACP error, ready to serialize onto the wire.
    #[error("[{code:?}] {message}")]
    Rpc {
        code: ErrorCode,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A graph was rejected by `validate_graph` or failed to wire at load time.
    #[error("invalid graph: {0}")]
    GraphInvalid(String),

    /// `Engine::execute` was asked for an entry node that doesn't exist.
    #[error("unknown node id: {0}")]
    NodeNotFound(String),

    /// A node type name was not found in the registry.
    #[error("node type not registered: {0}")]
    TypeNotRegistered(String),

    /// Registering a type name that is already present.
    #[error("node type already registered: {0}")]
    TypeAlreadyRegistered(String),

    /// The root stream of a request was cancelled before completion.
    #[error("request cancelled")]
    Cancelled,

    /// The request's 30s hard timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// HTTP error with status code, response body, and optional Retry-After hint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    pub fn rpc(code: ErrorCode, message: impl Into<String>) -> Self {
        ProxyError::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::rpc(ErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::rpc(ErrorCode::InternalError, message)
    }

    /// Maps this error to the JSON-RPC error code it should surface as.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProxyError::Rpc { code, .. } => *code,
            ProxyError::GraphInvalid(_) => ErrorCode::InvalidParams,
            ProxyError::NodeNotFound(_) => ErrorCode::InternalError,
            ProxyError::TypeNotRegistered(_) => ErrorCode::InternalError,
            ProxyError::TypeAlreadyRegistered(_) => ErrorCode::InternalError,
            ProxyError::Cancelled => ErrorCode::InternalError,
            ProxyError::Timeout => ErrorCode::InternalError,
            ProxyError::Json(_) => ErrorCode::ParseError,
            ProxyError::Request(_) => ErrorCode::BackendUnavailable,
            ProxyError::HttpError { status, .. } => match status {
                401 | 403 => ErrorCode::AuthFailed,
                429 => ErrorCode::RateLimited,
                503 => ErrorCode::BackendUnavailable,
                _ => ErrorCode::BackendError,
            },
            ProxyError::Other(_) => ErrorCode::InternalError,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.code().is_transient()
    }
}

impl From<anyhow::Error> for ProxyError {
    fn from(err: anyhow::Error) -> Self {
        ProxyError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
