//! Configuration for clients and servers.
//!
//! Both structs carry `Default` impls tuned to the datagram limits and a
//! `validate()` that refuses insecure or nonsensical values before any
//! socket is touched.

use crate::error::JanusError;
use crate::security;
use std::time::Duration;

/// Default per-operation deadline on datagram send/recv.
pub const DEFAULT_DATAGRAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for a full request/response round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default receive buffer / per-datagram payload ceiling (~OS datagram limit).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Client-side configuration.
#[derive(Debug, Clone)]
pub struct JanusClientConfig {
    /// Nominal concurrent-exchange ceiling (informational for datagrams).
    pub max_concurrent_connections: usize,
    /// Per-datagram payload ceiling and receive buffer size.
    pub max_message_size: usize,
    /// Deadline applied to each socket send/recv.
    pub datagram_timeout: Duration,
    /// Round-trip deadline used when the caller passes no timeout.
    pub default_timeout: Duration,
    /// Ceiling on simultaneously tracked in-flight requests.
    pub max_pending_requests: usize,
    /// Ceiling on registered handlers (shared constant with the server).
    pub max_request_handlers: usize,
    /// Application-level ceiling on total argument payload bytes.
    pub max_args_data_size: usize,
    /// When false, skip manifest fetching and argument validation.
    pub enable_validation: bool,
}

impl Default for JanusClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_connections: security::MAX_OPEN_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            datagram_timeout: DEFAULT_DATAGRAM_TIMEOUT,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_pending_requests: security::MAX_PENDING_REQUESTS,
            max_request_handlers: security::MAX_REGISTERED_HANDLERS,
            max_args_data_size: security::MAX_MESSAGE_BYTES,
            enable_validation: true,
        }
    }
}

impl JanusClientConfig {
    pub fn validate(&self) -> Result<(), JanusError> {
        if self.max_concurrent_connections == 0 {
            return Err(JanusError::Configuration(
                "max_concurrent_connections must be positive".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(JanusError::Configuration(
                "max_message_size must be positive".to_string(),
            ));
        }
        if self.datagram_timeout.is_zero() || self.default_timeout.is_zero() {
            return Err(JanusError::Configuration(
                "timeouts must be positive".to_string(),
            ));
        }
        if self.max_pending_requests == 0 || self.max_request_handlers == 0 {
            return Err(JanusError::Configuration(
                "pending/handler limits must be positive".to_string(),
            ));
        }
        if self.max_args_data_size == 0 {
            return Err(JanusError::Configuration(
                "max_args_data_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server-side configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Per-datagram payload ceiling and receive buffer size.
    pub max_message_size: usize,
    /// Unlink a stale socket file before binding.
    pub cleanup_on_start: bool,
    /// Unlink the socket file on graceful shutdown.
    pub cleanup_on_shutdown: bool,
    /// Declared client ceiling (informational for datagrams).
    pub max_clients: usize,
    /// Upper bound on a single handler execution.
    pub default_handler_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            cleanup_on_start: true,
            cleanup_on_shutdown: true,
            max_clients: security::MAX_OPEN_CONNECTIONS,
            default_handler_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), JanusError> {
        if self.max_message_size == 0 {
            return Err(JanusError::Configuration(
                "max_message_size must be positive".to_string(),
            ));
        }
        if self.default_handler_timeout.is_zero() {
            return Err(JanusError::Configuration(
                "default_handler_timeout must be positive".to_string(),
            ));
        }
        if self.max_clients == 0 {
            return Err(JanusError::Configuration(
                "max_clients must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
