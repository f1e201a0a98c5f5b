//! SecurityValidator — boundary enforcement for every untrusted input.
//!
//! Stateless: all checks are associated functions over shared constants so
//! the client, the server, and the tests agree on the exact limits.
//!
//! Applied at four boundaries:
//! - client construction (socket path)
//! - every outbound send (request name, args, timeout, payload bytes)
//! - server dispatch (decoded request before any handler runs)
//! - handler registration (name charset, reserved words)

use crate::error::JanusError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Limits
// ============================================================================

/// OS `sun_path` limit.
pub const MAX_SOCKET_PATH_BYTES: usize = 108;
pub const MAX_PATH_SEGMENTS: usize = 10;
pub const MAX_PATH_SEGMENT_BYTES: usize = 50;
pub const ALLOWED_SOCKET_PREFIXES: &[&str] = &["/tmp/", "/var/run/", "/var/tmp/"];

pub const MAX_NAME_LENGTH: usize = 256;
pub const MAX_REQUEST_ID_LENGTH: usize = 64;

pub const MIN_TIMEOUT_SECONDS: f64 = 0.1;
pub const MAX_TIMEOUT_SECONDS: f64 = 300.0;

/// Maximum clock skew tolerated on inbound request timestamps.
pub const MAX_TIMESTAMP_SKEW_SECONDS: i64 = 300;

/// Application-level payload ceiling (the per-datagram limit is lower and
/// enforced by the transport).
pub const MAX_MESSAGE_BYTES: usize = 5 * 1024 * 1024;

pub const MAX_OPEN_CONNECTIONS: usize = 100;
pub const MAX_REGISTERED_HANDLERS: usize = 500;
pub const MAX_PENDING_REQUESTS: usize = 1000;

// ============================================================================
// Word Lists
// ============================================================================

/// Names that can never be requests, channels, or handlers.
pub const RESERVED_NAMES: &[&str] = &[
    "system",
    "admin",
    "root",
    "internal",
    "__proto__",
    "constructor",
];

/// Substrings refused inside any name (case-insensitive).
pub const DANGEROUS_NAME_SUBSTRINGS: &[&str] =
    &["eval", "exec", "system", "shell", "rm", "delete", "drop"];

/// Argument keys that smell like prototype pollution or code smuggling.
pub const DANGEROUS_ARGUMENT_NAMES: &[&str] =
    &["__proto__", "constructor", "prototype", "eval", "function"];

/// SQL-injection tokens refused inside string argument values
/// (case-insensitive).
pub const SQL_INJECTION_TOKENS: &[&str] = &[
    "'", "\"", "--", "/*", "*/", "union", "select", "drop", "delete", "insert", "update",
];

/// Script-injection tokens refused inside string argument values
/// (case-insensitive).
pub const SCRIPT_INJECTION_TOKENS: &[&str] = &[
    "<script",
    "javascript:",
    "vbscript:",
    "onload=",
    "onerror=",
];

// ============================================================================
// Compiled Patterns
// ============================================================================

static SOCKET_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9/_.\-]+$").expect("socket path regex"));

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("name regex"));

static REQUEST_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-]+$").expect("request id regex"));

static UUID_V4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-4[0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$")
        .expect("uuid v4 regex")
});

/// RFC 3339 UTC forms accepted on the wire: optional fractional seconds,
/// `Z` or a numeric offset.
static ISO8601_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d{1,9})?(Z|[+-]\d{2}:\d{2})$")
        .expect("timestamp regex")
});

// ============================================================================
// Validator
// ============================================================================

/// Stateless boundary validator. All functions return `Ok(())` or a typed
/// violation; none of them mutate anything.
pub struct SecurityValidator;

impl SecurityValidator {
    /// Validate a Unix socket path: length, traversal, NUL, allowed
    /// directory prefix, charset, and segment shape.
    pub fn validate_socket_path(path: &str) -> Result<(), JanusError> {
        if path.is_empty() {
            return Err(JanusError::InvalidSocketPath(
                "socket path is empty".to_string(),
            ));
        }
        if path.len() > MAX_SOCKET_PATH_BYTES {
            return Err(JanusError::InvalidSocketPath(format!(
                "socket path too long: {} bytes exceeds the {}-byte sun_path limit",
                path.len(),
                MAX_SOCKET_PATH_BYTES
            )));
        }
        if path.contains('\0') {
            return Err(JanusError::InvalidSocketPath(
                "socket path contains a NUL byte".to_string(),
            ));
        }
        if path.contains("../") {
            return Err(JanusError::SecurityViolation(format!(
                "path traversal detected in socket path: {path}"
            )));
        }

        let normalized = normalize_path(path);
        if !ALLOWED_SOCKET_PREFIXES
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
        {
            return Err(JanusError::SecurityViolation(format!(
                "socket path must live under one of {:?}, got: {normalized}",
                ALLOWED_SOCKET_PREFIXES
            )));
        }
        if !SOCKET_PATH_RE.is_match(&normalized) {
            return Err(JanusError::InvalidSocketPath(format!(
                "socket path contains characters outside [A-Za-z0-9/_.-]: {path}"
            )));
        }

        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() > MAX_PATH_SEGMENTS {
            return Err(JanusError::InvalidSocketPath(format!(
                "socket path has {} segments, maximum is {}",
                segments.len(),
                MAX_PATH_SEGMENTS
            )));
        }
        for segment in segments {
            if segment.len() > MAX_PATH_SEGMENT_BYTES {
                return Err(JanusError::InvalidSocketPath(format!(
                    "path segment '{segment}' exceeds {MAX_PATH_SEGMENT_BYTES} bytes"
                )));
            }
        }
        Ok(())
    }

    /// Validate a request, channel, or handler name.
    pub fn validate_name(name: &str) -> Result<(), JanusError> {
        if name.is_empty() {
            return Err(JanusError::SecurityViolation("name is empty".to_string()));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(JanusError::SecurityViolation(format!(
                "name exceeds {MAX_NAME_LENGTH} characters"
            )));
        }
        if !NAME_RE.is_match(name) {
            return Err(JanusError::SecurityViolation(format!(
                "name contains characters outside [A-Za-z0-9_-]: {name}"
            )));
        }

        let lowered = name.to_ascii_lowercase();
        if RESERVED_NAMES.contains(&lowered.as_str()) {
            return Err(JanusError::SecurityViolation(format!(
                "name '{name}' is reserved"
            )));
        }
        for token in DANGEROUS_NAME_SUBSTRINGS {
            if lowered.contains(token) {
                return Err(JanusError::SecurityViolation(format!(
                    "name '{name}' contains dangerous substring '{token}'"
                )));
            }
        }
        Ok(())
    }

    /// Alias for request names; same rules as any other name.
    pub fn validate_request_name(name: &str) -> Result<(), JanusError> {
        Self::validate_name(name)
    }

    /// Validate a correlation id: bounded length, `[A-Za-z0-9-]` only.
    pub fn validate_request_id(id: &str) -> Result<(), JanusError> {
        if id.is_empty() {
            return Err(JanusError::SecurityViolation(
                "request id is empty".to_string(),
            ));
        }
        if id.len() > MAX_REQUEST_ID_LENGTH {
            return Err(JanusError::SecurityViolation(format!(
                "request id exceeds {MAX_REQUEST_ID_LENGTH} characters"
            )));
        }
        if !REQUEST_ID_RE.is_match(id) {
            return Err(JanusError::SecurityViolation(format!(
                "request id contains characters outside [A-Za-z0-9-]: {id}"
            )));
        }
        Ok(())
    }

    /// Stricter form of `validate_request_id`: must be a UUID v4.
    pub fn validate_uuid_v4(id: &str) -> Result<(), JanusError> {
        if UUID_V4_RE.is_match(id) {
            Ok(())
        } else {
            Err(JanusError::SecurityViolation(format!(
                "'{id}' is not a UUID v4"
            )))
        }
    }

    /// Reject timestamps more than `MAX_TIMESTAMP_SKEW_SECONDS` away from
    /// the host clock.
    pub fn validate_timestamp_epoch(epoch_seconds: f64) -> Result<(), JanusError> {
        let now = chrono::Utc::now().timestamp() as f64;
        let skew = (now - epoch_seconds).abs();
        if skew > MAX_TIMESTAMP_SKEW_SECONDS as f64 {
            return Err(JanusError::SecurityViolation(format!(
                "timestamp skew of {skew:.0}s exceeds the {MAX_TIMESTAMP_SKEW_SECONDS}s window"
            )));
        }
        Ok(())
    }

    /// Check an RFC 3339 timestamp string: accepted lexical form and
    /// actually parseable.
    pub fn validate_timestamp_iso8601(timestamp: &str) -> Result<(), JanusError> {
        if !ISO8601_RE.is_match(timestamp) {
            return Err(JanusError::SecurityViolation(format!(
                "timestamp '{timestamp}' is not in an accepted RFC 3339 form"
            )));
        }
        chrono::DateTime::parse_from_rfc3339(timestamp).map_err(|e| {
            JanusError::SecurityViolation(format!("timestamp '{timestamp}' does not parse: {e}"))
        })?;
        Ok(())
    }

    /// Bounds check on a request timeout in seconds.
    pub fn validate_timeout(seconds: f64) -> Result<(), JanusError> {
        if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&seconds) {
            return Err(JanusError::SecurityViolation(format!(
                "timeout {seconds}s outside [{MIN_TIMEOUT_SECONDS}, {MAX_TIMEOUT_SECONDS}]"
            )));
        }
        Ok(())
    }

    /// Validate raw message bytes before JSON decoding: size, NUL bytes,
    /// UTF-8, and top-level shape (must be a JSON object).
    ///
    /// NUL is checked on the raw bytes: an escaped `\u0000` inside a JSON
    /// string survives (six ASCII bytes on the wire), a raw 0x00 does not.
    pub fn validate_message_bytes(data: &[u8]) -> Result<(), JanusError> {
        if data.is_empty() {
            return Err(JanusError::SecurityViolation(
                "message is empty".to_string(),
            ));
        }
        if data.len() > MAX_MESSAGE_BYTES {
            return Err(JanusError::SecurityViolation(format!(
                "message of {} bytes exceeds the {MAX_MESSAGE_BYTES}-byte limit",
                data.len()
            )));
        }
        if data.contains(&0u8) {
            return Err(JanusError::SecurityViolation(
                "message contains a raw NUL byte".to_string(),
            ));
        }
        let text = std::str::from_utf8(data).map_err(|e| {
            JanusError::SecurityViolation(format!("message is not valid UTF-8: {e}"))
        })?;
        let value: Value = serde_json::from_str(text).map_err(|e| {
            JanusError::SecurityViolation(format!("message is not valid JSON: {e}"))
        })?;
        if !value.is_object() {
            return Err(JanusError::SecurityViolation(
                "message must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    /// Enforce process-wide resource ceilings.
    pub fn validate_resource_limits(
        open_connections: usize,
        registered_handlers: usize,
        pending_requests: usize,
    ) -> Result<(), JanusError> {
        if open_connections > MAX_OPEN_CONNECTIONS {
            return Err(JanusError::SecurityViolation(format!(
                "{open_connections} open connections exceeds the limit of {MAX_OPEN_CONNECTIONS}"
            )));
        }
        if registered_handlers > MAX_REGISTERED_HANDLERS {
            return Err(JanusError::SecurityViolation(format!(
                "{registered_handlers} handlers exceeds the limit of {MAX_REGISTERED_HANDLERS}"
            )));
        }
        if pending_requests > MAX_PENDING_REQUESTS {
            return Err(JanusError::SecurityViolation(format!(
                "{pending_requests} pending requests exceeds the limit of {MAX_PENDING_REQUESTS}"
            )));
        }
        Ok(())
    }

    /// Validate an argument map: refuse dangerous keys and injection
    /// patterns inside any string value, at any nesting depth.
    pub fn validate_argument_map(args: &HashMap<String, Value>) -> Result<(), JanusError> {
        for (name, value) in args {
            let lowered = name.to_ascii_lowercase();
            if DANGEROUS_ARGUMENT_NAMES.contains(&lowered.as_str()) {
                return Err(JanusError::SecurityViolation(format!(
                    "argument name '{name}' is not allowed"
                )));
            }
            validate_value_strings(name, value)?;
        }
        Ok(())
    }
}

/// Scan a JSON value tree for injection tokens in string leaves.
fn validate_value_strings(field: &str, value: &Value) -> Result<(), JanusError> {
    match value {
        Value::String(s) => {
            let lowered = s.to_ascii_lowercase();
            for token in SQL_INJECTION_TOKENS {
                if lowered.contains(token) {
                    return Err(JanusError::SecurityViolation(format!(
                        "argument '{field}' contains SQL injection pattern '{token}'"
                    )));
                }
            }
            for token in SCRIPT_INJECTION_TOKENS {
                if lowered.contains(token) {
                    return Err(JanusError::SecurityViolation(format!(
                        "argument '{field}' contains script injection pattern '{token}'"
                    )));
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                validate_value_strings(&format!("{field}[{i}]"), item)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, item) in map {
                let lowered = key.to_ascii_lowercase();
                if DANGEROUS_ARGUMENT_NAMES.contains(&lowered.as_str()) {
                    return Err(JanusError::SecurityViolation(format!(
                        "argument key '{field}.{key}' is not allowed"
                    )));
                }
                validate_value_strings(&format!("{field}.{key}"), item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Collapse duplicate slashes and `.` segments. `..` never reaches here —
/// traversal is rejected before normalization.
fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        "/".to_string()
    } else if path.ends_with('/') {
        out.push('/');
        out
    } else {
        out
    }
}
