//! Janus — connectionless Unix-datagram IPC with request/response
//! correlation.
//!
//! Design principles:
//! - Connectionless exchanges over `AF_UNIX`/`SOCK_DGRAM`: one datagram
//!   out, one datagram back on a per-request ephemeral reply socket
//! - Correlation by id, never by arrival order
//! - A manifest-driven contract validated on both sides of the wire
//! - Security checks at every boundary (paths, names, payloads, args)
//! - Cross-language wire compatibility: a client here interoperates with
//!   a server in any other implementation
//!
//! # Quick start
//!
//! ```no_run
//! use janus::{JanusClient, JanusClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), janus::JanusError> {
//!     let client =
//!         JanusClient::new("/tmp/my-service.sock", JanusClientConfig::default()).await?;
//!     let response = client.send_request("ping", None, None).await?;
//!     println!("pong: {:?}", response.result);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod manifest;
pub mod protocol;
pub mod security;
pub mod server;
pub mod tracking;
pub mod transport;

pub use client::{JanusClient, ParallelRequest, ParallelResult, RequestHandle, RequestStatus};
pub use config::{JanusClientConfig, ServerConfig};
pub use error::{JanusError, JsonRpcError, JsonRpcErrorCode, JsonRpcErrorData};
pub use manifest::{
    ArgumentManifest, ArgumentType, Manifest, ManifestValidator, ModelDefinition,
    RequestManifest, ValidationResult,
};
pub use protocol::{Message, MessageFraming, Request, Response};
pub use security::SecurityValidator;
pub use server::{
    async_handler, bool_handler, string_handler, ClientConnection, HandlerResult, JanusServer,
    RequestHandler, ServerEvent,
};
pub use tracking::{ResponseTracker, TimeoutManager, TrackerConfig};
pub use transport::{DatagramTransport, TransportConfig};
