//! JanusServer — the datagram listen loop.
//!
//! Architecture:
//! - One receive loop on the bound `SOCK_DGRAM` socket, with a periodic
//!   read deadline so the loop can observe the shutdown flag.
//! - Each decoded request is dispatched on its own task; ordering across
//!   requests is deliberately unspecified.
//! - Built-ins resolve before the handler registry and cannot be shadowed.
//! - Every dispatch error becomes a failure `Response` sent to the
//!   request's `reply_to`; requests without `reply_to` are fire-and-forget.

pub mod builtin;
pub mod handlers;

pub use builtin::{BuiltinContext, BUILTIN_REQUESTS};
pub use handlers::{
    array_handler, async_handler, bool_handler, float_handler, int_handler, object_handler,
    string_handler, HandlerRegistry, HandlerResult, RequestHandler,
};

use crate::config::{ServerConfig, DEFAULT_DATAGRAM_TIMEOUT};
use crate::error::{JanusError, JsonRpcError, JsonRpcErrorCode};
use crate::manifest::{Manifest, ManifestValidator};
use crate::protocol::{MessageFraming, Request, Response};
use crate::security::{self, SecurityValidator};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixDatagram;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// How often the receive loop wakes to re-check the running flag.
const RECV_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle and error notifications, in arrival order per subscriber.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Listening { socket_path: String },
    RequestReceived { id: String, request: String, client_id: u64 },
    Error { message: String },
    Stopped,
}

/// Observational record of a sender. Purely bookkeeping — the server never
/// owns a client's reply socket.
#[derive(Debug, Clone, Serialize)]
pub struct ClientConnection {
    pub address: String,
    pub client_id: u64,
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
}

/// Everything a dispatch task needs, detached from the server borrow.
struct DispatchContext {
    config: ServerConfig,
    manifest: Arc<Manifest>,
    handlers: Arc<HandlerRegistry>,
    events: broadcast::Sender<ServerEvent>,
    client_count: usize,
    client_id: u64,
}

pub struct JanusServer {
    socket_path: String,
    config: ServerConfig,
    manifest: Arc<Manifest>,
    handlers: Arc<HandlerRegistry>,
    clients: Arc<Mutex<HashMap<String, ClientConnection>>>,
    next_client_id: AtomicU64,
    running: Arc<AtomicBool>,
    events: broadcast::Sender<ServerEvent>,
}

impl JanusServer {
    pub fn new(
        socket_path: impl Into<String>,
        manifest: Manifest,
        config: ServerConfig,
    ) -> Result<Self, JanusError> {
        let socket_path = socket_path.into();
        SecurityValidator::validate_socket_path(&socket_path)?;
        config.validate()?;

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            socket_path,
            config,
            manifest: Arc::new(manifest),
            handlers: Arc::new(HandlerRegistry::new(security::MAX_REGISTERED_HANDLERS)),
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_client_id: AtomicU64::new(0),
            running: Arc::new(AtomicBool::new(false)),
            events,
        })
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Register an application handler. Built-in names are refused.
    pub fn register_handler(
        &self,
        name: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), JanusError> {
        self.handlers.register(name, handler)
    }

    pub fn unregister_handler(&self, name: &str) -> bool {
        self.handlers.unregister(name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Snapshot of the observational client table.
    pub fn clients(&self) -> Vec<ClientConnection> {
        self.clients.lock().values().cloned().collect()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the receive loop to exit at its next deadline tick. In-flight
    /// handlers finish, bounded by their handler timeout.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Bind the socket and serve until `stop()` is called.
    pub async fn listen(&self) -> Result<(), JanusError> {
        if self.config.cleanup_on_start && Path::new(&self.socket_path).exists() {
            debug!(socket = %self.socket_path, "removing stale socket file");
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                JanusError::Transport(format!(
                    "failed to remove stale socket {}: {e}",
                    self.socket_path
                ))
            })?;
        }

        let socket = UnixDatagram::bind(&self.socket_path).map_err(|e| {
            JanusError::Transport(format!("failed to bind {}: {e}", self.socket_path))
        })?;
        self.running.store(true, Ordering::SeqCst);

        info!(socket = %self.socket_path, "server listening");
        let _ = self.events.send(ServerEvent::Listening {
            socket_path: self.socket_path.clone(),
        });

        let mut buf = vec![0u8; self.config.max_message_size];
        while self.running.load(Ordering::SeqCst) {
            match tokio::time::timeout(RECV_POLL_INTERVAL, socket.recv_from(&mut buf)).await {
                // Deadline tick: loop around and re-check the running flag.
                Err(_) => continue,
                Ok(Err(e)) => {
                    self.emit_error(format!("receive failed: {e}"));
                }
                Ok(Ok((len, _))) => {
                    self.dispatch_datagram(buf[..len].to_vec());
                }
            }
        }

        drop(socket);
        if self.config.cleanup_on_shutdown {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        info!(socket = %self.socket_path, "server stopped");
        let _ = self.events.send(ServerEvent::Stopped);
        Ok(())
    }

    /// Decode one datagram and hand it to its own dispatch task. Malformed
    /// datagrams are dropped after an error event — there is nowhere to
    /// send a reply before the envelope parses.
    fn dispatch_datagram(&self, data: Vec<u8>) {
        if let Err(e) = SecurityValidator::validate_message_bytes(&data) {
            self.emit_error(format!("rejected datagram: {e}"));
            return;
        }
        let request = match MessageFraming::decode_request(&data) {
            Ok(request) => request,
            Err(e) => {
                self.emit_error(format!("malformed request datagram: {e}"));
                return;
            }
        };

        let client_id = self.observe_client(&request);
        debug!(id = %request.id, request = %request.request, client_id, "request received");
        let _ = self.events.send(ServerEvent::RequestReceived {
            id: request.id.clone(),
            request: request.request.clone(),
            client_id,
        });

        let ctx = DispatchContext {
            config: self.config.clone(),
            manifest: self.manifest.clone(),
            handlers: self.handlers.clone(),
            events: self.events.clone(),
            client_count: self.client_count(),
            client_id,
        };
        tokio::spawn(async move {
            ctx.process(request).await;
        });
    }

    /// Update the client table keyed by sender identity (the reply path;
    /// fire-and-forget senders share one synthetic row).
    fn observe_client(&self, request: &Request) -> u64 {
        let key = request
            .reply_to
            .clone()
            .unwrap_or_else(|| "no-reply".to_string());
        let now = Utc::now();
        let mut clients = self.clients.lock();
        let entry = clients.entry(key.clone()).or_insert_with(|| ClientConnection {
            address: key,
            client_id: self.next_client_id.fetch_add(1, Ordering::Relaxed) + 1,
            first_seen: now,
            last_activity: now,
            message_count: 0,
        });
        entry.last_activity = now;
        entry.message_count += 1;
        entry.client_id
    }

    fn emit_error(&self, message: String) {
        warn!("{message}");
        let _ = self.events.send(ServerEvent::Error { message });
    }
}

impl DispatchContext {
    async fn process(self, request: Request) {
        let reply_to = request.reply_to.clone();
        let response = self.respond(&request).await;

        match reply_to {
            Some(path) => self.send_reply(response, &path).await,
            None => debug!(id = %request.id, "no reply_to; response discarded"),
        }
    }

    /// Produce the response for one request: boundary checks, manifest
    /// validation, then built-in or registered-handler execution.
    async fn respond(&self, request: &Request) -> Response {
        if let Err(violation) = validate_inbound_request(request) {
            return Response::failure(&request.id, violation.to_json_rpc());
        }

        let declared = self.manifest.get_request(&request.request).ok();
        if let Some(declared) = declared {
            let result = ManifestValidator::new(&self.manifest)
                .validate_request_args(declared, request.args.as_ref());
            if !result.valid {
                let code = if result.has_presence_errors() {
                    JsonRpcErrorCode::InvalidParams
                } else {
                    JsonRpcErrorCode::ValidationFailed
                };
                return Response::failure(
                    &request.id,
                    JsonRpcError::with_details(code, result.summary()),
                );
            }
        }

        match self.execute(request).await {
            Ok(value) => {
                // Hold handlers to their declared response shape.
                if let Some(shape) = declared.and_then(|d| d.response.as_ref()) {
                    let result =
                        ManifestValidator::new(&self.manifest).validate_response(&value, shape);
                    if !result.valid {
                        return Response::failure(
                            &request.id,
                            JsonRpcError::with_details(
                                JsonRpcErrorCode::ValidationFailed,
                                format!("handler response violates the contract: {}", result.summary()),
                            ),
                        );
                    }
                }
                Response::success(&request.id, value)
            }
            Err(error) => Response::failure(&request.id, error),
        }
    }

    async fn execute(&self, request: &Request) -> HandlerResult {
        let name = request.request.clone();
        let default_bound = self.config.default_handler_timeout;

        if builtin::is_builtin(&name) {
            let bound = builtin::builtin_timeout(&name, default_bound);
            let ctx = BuiltinContext {
                manifest: self.manifest.clone(),
                client_count: self.client_count,
                client_id: Some(self.client_id),
            };
            let request = request.clone();
            let builtin_name = name.clone();
            return run_bounded(bound, &name, async move {
                builtin::handle_builtin(&builtin_name, &request, &ctx).await
            })
            .await;
        }

        match self.handlers.get(&name) {
            Some(handler) => {
                let request = request.clone();
                run_bounded(default_bound, &name, async move {
                    handler.handle(&request).await
                })
                .await
            }
            None => Err(JsonRpcError::with_details(
                JsonRpcErrorCode::MethodNotFound,
                format!("no handler registered for '{name}'"),
            )),
        }
    }

    async fn send_reply(&self, response: Response, reply_to: &str) {
        if let Err(e) = SecurityValidator::validate_socket_path(reply_to) {
            self.emit_error(format!("refusing reply to invalid path: {e}"));
            return;
        }
        let bytes = match MessageFraming::encode_response(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.emit_error(format!("failed to encode response: {e}"));
                return;
            }
        };
        if bytes.len() > self.config.max_message_size {
            self.emit_error(format!(
                "response of {} bytes exceeds the {}-byte datagram limit",
                bytes.len(),
                self.config.max_message_size
            ));
            return;
        }

        let socket = match UnixDatagram::unbound() {
            Ok(socket) => socket,
            Err(e) => {
                self.emit_error(format!("failed to create reply socket: {e}"));
                return;
            }
        };
        match tokio::time::timeout(DEFAULT_DATAGRAM_TIMEOUT, socket.send_to(&bytes, reply_to))
            .await
        {
            Err(_) => self.emit_error(format!("timed out replying to {reply_to}")),
            Ok(Err(e)) => self.emit_error(format!("failed to reply to {reply_to}: {e}")),
            Ok(Ok(_)) => {
                debug!(request_id = %response.request_id, reply_to, "response sent")
            }
        }
    }

    fn emit_error(&self, message: String) {
        warn!("{message}");
        let _ = self.events.send(ServerEvent::Error { message });
    }
}

/// Boundary checks on a decoded request before any handler runs.
fn validate_inbound_request(request: &Request) -> Result<(), JanusError> {
    SecurityValidator::validate_request_name(&request.request)?;
    SecurityValidator::validate_request_id(&request.id)?;

    SecurityValidator::validate_timestamp_iso8601(&request.timestamp)?;
    let parsed = chrono::DateTime::parse_from_rfc3339(&request.timestamp)
        .map_err(|e| JanusError::SecurityViolation(format!("unparseable timestamp: {e}")))?;
    SecurityValidator::validate_timestamp_epoch(parsed.timestamp() as f64)?;

    if let Some(timeout) = request.timeout {
        SecurityValidator::validate_timeout(timeout)?;
    }
    if let Some(args) = &request.args {
        SecurityValidator::validate_argument_map(args)?;
    }
    if let Some(reply_to) = &request.reply_to {
        SecurityValidator::validate_socket_path(reply_to)?;
    }
    Ok(())
}

/// Run a handler future under a deadline, containing panics. A timeout
/// aborts the task; a panic becomes `InternalError` with the panic text.
async fn run_bounded<F>(bound: Duration, name: &str, fut: F) -> HandlerResult
where
    F: std::future::Future<Output = HandlerResult> + Send + 'static,
{
    let mut task = tokio::spawn(fut);
    match tokio::time::timeout(bound, &mut task).await {
        Err(_) => {
            task.abort();
            Err(JsonRpcError::with_details(
                JsonRpcErrorCode::HandlerTimeout,
                format!("handler for '{name}' exceeded {bound:?}"),
            ))
        }
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            let details = if join_error.is_panic() {
                match join_error.into_panic().downcast::<String>() {
                    Ok(text) => *text,
                    Err(payload) => match payload.downcast::<&'static str>() {
                        Ok(text) => (*text).to_string(),
                        Err(_) => "handler panicked".to_string(),
                    },
                }
            } else {
                "handler task was cancelled".to_string()
            };
            Err(JsonRpcError::with_details(
                JsonRpcErrorCode::InternalError,
                details,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_timestamp;
    use serde_json::json;

    fn test_server() -> JanusServer {
        JanusServer::new(
            format!("/tmp/janus_server_unit_{}.sock", std::process::id()),
            Manifest::default(),
            ServerConfig::default(),
        )
        .unwrap()
    }

    fn dispatch_ctx(server: &JanusServer) -> DispatchContext {
        DispatchContext {
            config: server.config.clone(),
            manifest: server.manifest.clone(),
            handlers: server.handlers.clone(),
            events: server.events.clone(),
            client_count: 1,
            client_id: 1,
        }
    }

    #[test]
    fn test_rejects_invalid_socket_path() {
        assert!(JanusServer::new("/etc/x.sock", Manifest::default(), ServerConfig::default())
            .is_err());
    }

    #[test]
    fn test_builtin_names_cannot_be_registered() {
        let server = test_server();
        for name in BUILTIN_REQUESTS {
            assert!(
                server
                    .register_handler(name, bool_handler(|_| Ok(true)))
                    .is_err(),
                "'{name}' must be refused"
            );
        }
    }

    #[test]
    fn test_client_table_synthesizes_stable_ids() {
        let server = test_server();
        let a = Request::new("ping", None).with_reply_to("/tmp/a.sock");
        let b = Request::new("ping", None).with_reply_to("/tmp/b.sock");

        let id_a1 = server.observe_client(&a);
        let id_b = server.observe_client(&b);
        let id_a2 = server.observe_client(&a);
        assert_eq!(id_a1, id_a2);
        assert_ne!(id_a1, id_b);
        assert_eq!(server.client_count(), 2);

        let rows = server.clients();
        let row_a = rows.iter().find(|c| c.client_id == id_a1).unwrap();
        assert_eq!(row_a.message_count, 2);
    }

    #[tokio::test]
    async fn test_respond_unknown_request_is_method_not_found() {
        let server = test_server();
        let ctx = dispatch_ctx(&server);
        let request = Request::new("does_not_exist", None);

        let response = ctx.respond(&request).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, -32601);
        assert_eq!(response.request_id, request.id);
    }

    #[tokio::test]
    async fn test_respond_runs_registered_handler() {
        let server = test_server();
        server
            .register_handler("double", int_handler(|req| {
                let n = req.arg("n").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(n * 2)
            }))
            .unwrap();

        let ctx = dispatch_ctx(&server);
        let mut args = HashMap::new();
        args.insert("n".to_string(), json!(21));
        let request = Request::new("double", Some(args));

        let response = ctx.respond(&request).await;
        assert!(response.success);
        assert_eq!(response.result.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_respond_rejects_stale_timestamp() {
        let server = test_server();
        let ctx = dispatch_ctx(&server);
        let mut request = Request::new("ping", None);
        request.timestamp = "2020-01-01T00:00:00.000Z".to_string();

        let response = ctx.respond(&request).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, -32009);
    }

    #[tokio::test]
    async fn test_respond_rejects_injection_args() {
        let server = test_server();
        let ctx = dispatch_ctx(&server);
        let mut args = HashMap::new();
        args.insert("q".to_string(), json!("1; DROP TABLE users"));
        let request = Request::new("ping", Some(args));

        let response = ctx.respond(&request).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, -32009);
    }

    #[tokio::test]
    async fn test_manifest_validation_maps_to_wire_codes() {
        let manifest = Manifest::parse_json(
            br#"{"requests": {"greet": {"args": {
                "name": {"type": "string", "required": true, "max_length": 8}
            }}}}"#,
        )
        .unwrap();
        let server = JanusServer::new(
            format!("/tmp/janus_server_unit_m_{}.sock", std::process::id()),
            manifest,
            ServerConfig::default(),
        )
        .unwrap();
        server
            .register_handler("greet", string_handler(|_| Ok("hi".to_string())))
            .unwrap();
        let ctx = dispatch_ctx(&server);

        // missing required arg -> InvalidParams
        let response = ctx.respond(&Request::new("greet", None)).await;
        assert_eq!(response.error.unwrap().code, -32602);

        // constraint violation -> ValidationFailed
        let mut args = HashMap::new();
        args.insert("name".to_string(), json!("waytoolongname"));
        let response = ctx.respond(&Request::new("greet", Some(args))).await;
        assert_eq!(response.error.unwrap().code, -32005);
    }

    #[tokio::test]
    async fn test_handler_held_to_declared_response_shape() {
        let manifest = Manifest::parse_json(
            br#"{"requests": {"flag": {
                "args": {},
                "response": {"type": "boolean"}
            }}}"#,
        )
        .unwrap();
        let server = JanusServer::new(
            format!("/tmp/janus_server_unit_r_{}.sock", std::process::id()),
            manifest,
            ServerConfig::default(),
        )
        .unwrap();
        server
            .register_handler("flag", string_handler(|_| Ok("not a bool".to_string())))
            .unwrap();
        let ctx = dispatch_ctx(&server);

        let response = ctx.respond(&Request::new("flag", None)).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, -32005);

        server.unregister_handler("flag");
        server
            .register_handler("flag", bool_handler(|_| Ok(true)))
            .unwrap();
        let response = ctx.respond(&Request::new("flag", None)).await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_error() {
        let server = test_server();
        server
            .register_handler(
                "explode",
                async_handler(|_request| async move { panic!("boom: {}", 42) }),
            )
            .unwrap();
        let ctx = dispatch_ctx(&server);

        let response = ctx.respond(&Request::new("explode", None)).await;
        assert!(!response.success);
        let error = response.error.unwrap();
        assert_eq!(error.code, -32603);
        assert!(error.data.unwrap().details.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_handler_timeout_is_enforced() {
        let server = JanusServer::new(
            format!("/tmp/janus_server_unit_t_{}.sock", std::process::id()),
            Manifest::default(),
            ServerConfig {
                default_handler_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        )
        .unwrap();
        server
            .register_handler(
                "stall",
                async_handler(|_request| async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(json!({}))
                }),
            )
            .unwrap();
        let ctx = dispatch_ctx(&server);

        let response = ctx.respond(&Request::new("stall", None)).await;
        assert_eq!(response.error.unwrap().code, -32006);
    }
}
