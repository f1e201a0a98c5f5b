//! Request/Response wire types.
//!
//! One JSON object per datagram. Field names are wire-normative and shared
//! across implementations — a client here must interoperate with a server
//! written in another language.

use crate::error::JsonRpcError;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// RFC 3339 UTC with millisecond precision — the one timestamp format on
/// the wire.
pub fn wire_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A request datagram.
///
/// `reply_to` present means the sender bound an ephemeral reply socket and
/// expects exactly one response there. Absent means fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Correlation token, unique within the sender's pending set.
    pub id: String,

    /// Request name (alphanumeric, `-`, `_`).
    pub request: String,

    /// Absolute path of the sender's ephemeral reply socket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// Named arguments; absent and empty are equivalent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<HashMap<String, Value>>,

    /// Requested round-trip deadline in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    pub timestamp: String,
}

impl Request {
    pub fn new(request: impl Into<String>, args: Option<HashMap<String, Value>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request: request.into(),
            reply_to: None,
            args,
            timeout: None,
            timestamp: wire_timestamp(),
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Look up a named argument.
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.as_ref().and_then(|args| args.get(name))
    }

    /// Whether the sender expects a response.
    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

/// A response datagram. Exactly one of `result` / `error` is meaningful,
/// selected by `success`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// The `id` of the request being answered.
    pub request_id: String,

    /// Unique id of this response.
    pub id: String,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,

    pub timestamp: String,
}

impl Response {
    /// Create a success response answering `request_id`.
    pub fn success(request_id: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: request_id.into(),
            id: Uuid::new_v4().to_string(),
            success: true,
            result: Some(result),
            error: None,
            timestamp: wire_timestamp(),
        }
    }

    /// Create a failure response answering `request_id`.
    pub fn failure(request_id: impl Into<String>, error: JsonRpcError) -> Self {
        Self {
            request_id: request_id.into(),
            id: Uuid::new_v4().to_string(),
            success: false,
            result: None,
            error: Some(error),
            timestamp: wire_timestamp(),
        }
    }
}
