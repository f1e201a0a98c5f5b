//! Error types for the Janus IPC stack.
//!
//! Two layers:
//! - `JanusError` — the typed error surfaced by the Rust API (client calls,
//!   transport, tracker). Cloneable so the tracker can fan a failure out to
//!   multiple sinks.
//! - `JsonRpcError` — the wire-level error object embedded in a failed
//!   `Response`. Codes are stable across implementations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// JSON-RPC Error Codes (wire-stable)
// ============================================================================

/// Stable error codes shared across implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError,
    ServiceUnavailable,
    AuthenticationFailed,
    RateLimitExceeded,
    ResourceNotFound,
    ValidationFailed,
    HandlerTimeout,
    SocketTransportError,
    ConfigurationError,
    SecurityViolation,
    ResourceLimitExceeded,
    MessageFramingError,
    ResponseTrackingError,
    ManifestValidationError,
}

impl JsonRpcErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError => -32000,
            Self::ServiceUnavailable => -32001,
            Self::AuthenticationFailed => -32002,
            Self::RateLimitExceeded => -32003,
            Self::ResourceNotFound => -32004,
            Self::ValidationFailed => -32005,
            Self::HandlerTimeout => -32006,
            Self::SocketTransportError => -32007,
            Self::ConfigurationError => -32008,
            Self::SecurityViolation => -32009,
            Self::ResourceLimitExceeded => -32010,
            Self::MessageFramingError => -32011,
            Self::ResponseTrackingError => -32012,
            Self::ManifestValidationError => -32013,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ServerError => "Server error",
            Self::ServiceUnavailable => "Service unavailable",
            Self::AuthenticationFailed => "Authentication failed",
            Self::RateLimitExceeded => "Rate limit exceeded",
            Self::ResourceNotFound => "Resource not found",
            Self::ValidationFailed => "Validation failed",
            Self::HandlerTimeout => "Handler timeout",
            Self::SocketTransportError => "Socket transport error",
            Self::ConfigurationError => "Configuration error",
            Self::SecurityViolation => "Security violation",
            Self::ResourceLimitExceeded => "Resource limit exceeded",
            Self::MessageFramingError => "Message framing error",
            Self::ResponseTrackingError => "Response tracking error",
            Self::ManifestValidationError => "Manifest validation error",
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let all = [
            Self::ParseError,
            Self::InvalidRequest,
            Self::MethodNotFound,
            Self::InvalidParams,
            Self::InternalError,
            Self::ServerError,
            Self::ServiceUnavailable,
            Self::AuthenticationFailed,
            Self::RateLimitExceeded,
            Self::ResourceNotFound,
            Self::ValidationFailed,
            Self::HandlerTimeout,
            Self::SocketTransportError,
            Self::ConfigurationError,
            Self::SecurityViolation,
            Self::ResourceLimitExceeded,
            Self::MessageFramingError,
            Self::ResponseTrackingError,
            Self::ManifestValidationError,
        ];
        all.into_iter().find(|c| c.code() == code)
    }
}

// ============================================================================
// Wire Error Object
// ============================================================================

/// Structured detail payload attached to a wire error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcErrorData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl JsonRpcErrorData {
    pub fn details(details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Default::default()
        }
    }
}

/// The error object carried in a failed `Response`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonRpcErrorData>,
}

impl JsonRpcError {
    pub fn new(code: JsonRpcErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: None,
        }
    }

    pub fn with_details(code: JsonRpcErrorCode, details: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: Some(JsonRpcErrorData::details(details)),
        }
    }

    pub fn with_data(code: JsonRpcErrorCode, data: JsonRpcErrorData) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: Some(data),
        }
    }

    /// Resolve the numeric code back to its symbolic form, if known.
    pub fn error_code(&self) -> Option<JsonRpcErrorCode> {
        JsonRpcErrorCode::from_code(self.code)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data.as_ref().and_then(|d| d.details.as_deref()) {
            Some(details) => write!(f, "{} (code {}): {}", self.message, self.code, details),
            None => write!(f, "{} (code {})", self.message, self.code),
        }
    }
}

// ============================================================================
// API Error
// ============================================================================

/// Typed error for every fallible operation in the crate.
///
/// String payloads keep the enum `Clone` — the tracker delivers the same
/// failure to a reject sink while logging it, and task boundaries pass
/// errors by value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JanusError {
    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("invalid socket path: {0}")]
    InvalidSocketPath(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("framing error: {0}")]
    Framing(String),

    /// Fewer than four bytes buffered. The stream extractor treats this as
    /// "need more bytes", not a failure.
    #[error("incomplete length prefix: have {available} of {needed} bytes")]
    IncompleteLengthPrefix { needed: usize, available: usize },

    /// The prefix promised more bytes than are buffered. Same
    /// "need more bytes" semantics as `IncompleteLengthPrefix`.
    #[error("incomplete message: have {available} of {expected} bytes")]
    IncompleteMessage { expected: usize, available: usize },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("unknown request: {0}")]
    UnknownRequest(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("request '{request}' timed out after {timeout:?}")]
    RequestTimeout { request: String, timeout: Duration },

    #[error("duplicate request id: {0}")]
    DuplicateRequestId(String),

    #[error("pending request limit reached ({0})")]
    PendingLimitExceeded(usize),

    #[error("request cancelled: {0}")]
    Cancelled(String),

    #[error("response tracker shut down")]
    TrackerShutdown,

    #[error("correlation mismatch: expected {expected}, got {actual}")]
    CorrelationMismatch { expected: String, actual: String },

    /// Structured failure reported by the remote side.
    #[error("request failed: {0}")]
    Rpc(JsonRpcError),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl JanusError {
    /// Wire code this error maps to when it must be reported in a `Response`.
    pub fn json_rpc_code(&self) -> JsonRpcErrorCode {
        match self {
            Self::SecurityViolation(_) | Self::InvalidSocketPath(_) => {
                JsonRpcErrorCode::SecurityViolation
            }
            Self::Transport(_) | Self::PayloadTooLarge(_) => {
                JsonRpcErrorCode::SocketTransportError
            }
            Self::Framing(_)
            | Self::IncompleteLengthPrefix { .. }
            | Self::IncompleteMessage { .. } => JsonRpcErrorCode::MessageFramingError,
            Self::Manifest(_) => JsonRpcErrorCode::ManifestValidationError,
            Self::UnknownRequest(_) => JsonRpcErrorCode::MethodNotFound,
            Self::ValidationFailed(_) => JsonRpcErrorCode::ValidationFailed,
            Self::RequestTimeout { .. } => JsonRpcErrorCode::HandlerTimeout,
            Self::DuplicateRequestId(_)
            | Self::Cancelled(_)
            | Self::TrackerShutdown
            | Self::CorrelationMismatch { .. } => JsonRpcErrorCode::ResponseTrackingError,
            Self::PendingLimitExceeded(_) => JsonRpcErrorCode::ResourceLimitExceeded,
            Self::Rpc(err) => err
                .error_code()
                .unwrap_or(JsonRpcErrorCode::ServerError),
            Self::Handler(_) => JsonRpcErrorCode::InternalError,
            Self::Configuration(_) => JsonRpcErrorCode::ConfigurationError,
        }
    }

    /// Whether this error means "not enough bytes yet" rather than a real
    /// protocol violation.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::IncompleteLengthPrefix { .. } | Self::IncompleteMessage { .. }
        )
    }

    /// Convert into the wire error object for a failed `Response`.
    pub fn to_json_rpc(&self) -> JsonRpcError {
        match self {
            Self::Rpc(err) => err.clone(),
            other => JsonRpcError::with_details(other.json_rpc_code(), other.to_string()),
        }
    }
}
