//! JanusClient — the public client API.
//!
//! Each exchange is connectionless: a fresh correlation id, a fresh reply
//! socket, one datagram out, one datagram back. The manifest is NOT
//! fetched eagerly — the first validated send performs the `manifest`
//! handshake and caches the parsed contract.
//!
//! Transport failures bubble up verbatim; they are never wrapped as
//! validation failures, so a missing server is always distinguishable
//! from a bad argument.

pub mod handle;

pub use handle::{RequestHandle, RequestStatus};

use crate::config::JanusClientConfig;
use crate::error::{JanusError, JsonRpcError, JsonRpcErrorCode};
use crate::manifest::{Manifest, ManifestValidator};
use crate::protocol::{MessageFraming, Request, Response};
use crate::security::SecurityValidator;
use crate::tracking::{ResponseTracker, TimeoutManager, TrackerConfig, TrackerStatistics, TimeoutStatistics};
use crate::transport::{DatagramTransport, TransportConfig};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify, RwLock};
use tracing::debug;
use uuid::Uuid;

/// One request in a parallel batch, with a caller-supplied id used to pair
/// results back up.
#[derive(Debug, Clone)]
pub struct ParallelRequest {
    pub id: String,
    pub request: String,
    pub args: Option<HashMap<String, Value>>,
    pub timeout: Option<Duration>,
}

/// Outcome of one parallel request, in input order.
#[derive(Debug)]
pub struct ParallelResult {
    pub id: String,
    pub result: Result<Response, JanusError>,
}

struct HandleEntry {
    handle: RequestHandle,
    status: RequestStatus,
    cancel: Arc<Notify>,
}

/// Connectionless request/response client for one server socket.
///
/// Cloning is cheap and clones share the tracker, timeout manager, and
/// handle registry.
#[derive(Clone)]
pub struct JanusClient {
    socket_path: String,
    config: JanusClientConfig,
    transport: DatagramTransport,
    tracker: Arc<ResponseTracker>,
    timeouts: Arc<TimeoutManager>,
    handles: Arc<Mutex<HashMap<String, HandleEntry>>>,
    manifest: Arc<RwLock<Option<Arc<Manifest>>>>,
}

impl std::fmt::Debug for JanusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JanusClient")
            .field("socket_path", &self.socket_path)
            .finish_non_exhaustive()
    }
}

impl JanusClient {
    pub async fn new(
        socket_path: impl Into<String>,
        config: JanusClientConfig,
    ) -> Result<Self, JanusError> {
        let socket_path = socket_path.into();
        SecurityValidator::validate_socket_path(&socket_path)?;
        config.validate()?;

        let transport = DatagramTransport::new(
            &socket_path,
            TransportConfig {
                datagram_timeout: config.datagram_timeout,
                max_message_size: config.max_message_size,
            },
        )?;
        let tracker = ResponseTracker::new(TrackerConfig {
            max_pending: config.max_pending_requests,
            default_timeout: config.default_timeout,
            ..Default::default()
        });

        Ok(Self {
            socket_path,
            config,
            transport,
            tracker,
            timeouts: TimeoutManager::new(),
            handles: Arc::new(Mutex::new(HashMap::new())),
            manifest: Arc::new(RwLock::new(None)),
        })
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    // ========================================================================
    // Primary Request Path
    // ========================================================================

    /// Send one request and wait for its response.
    pub async fn send_request(
        &self,
        request: &str,
        args: Option<HashMap<String, Value>>,
        timeout: Option<Duration>,
    ) -> Result<Response, JanusError> {
        self.validate_outbound(request, args.as_ref(), timeout)?;

        if self.config.enable_validation {
            let manifest = self.ensure_manifest().await?;
            if manifest.has_request(request) {
                let declared = manifest.get_request(request)?;
                let result =
                    ManifestValidator::new(&manifest).validate_request_args(declared, args.as_ref());
                if !result.valid {
                    return Err(JanusError::ValidationFailed(result.summary()));
                }
            }
            // Undeclared requests are sent anyway; the server answers
            // MethodNotFound if it doesn't know them either.
        }

        let effective = timeout.unwrap_or(self.config.default_timeout);
        let mut wire = Request::new(request, args);
        if let Some(t) = timeout {
            wire = wire.with_timeout(t.as_secs_f64());
        }
        self.exchange(wire, effective).await
    }

    /// Fire-and-forget: no reply socket, no response, no tracking.
    pub async fn send_request_no_reply(
        &self,
        request: &str,
        args: Option<HashMap<String, Value>>,
    ) -> Result<(), JanusError> {
        self.validate_outbound(request, args.as_ref(), None)?;
        let wire = Request::new(request, args);
        let payload = MessageFraming::encode_request(&wire)?;
        self.transport.send_datagram_no_reply(&payload).await
    }

    /// Convenience liveness probe over the `ping` built-in.
    pub async fn ping(&self) -> bool {
        self.send_request("ping", None, None)
            .await
            .map(|response| response.success)
            .unwrap_or(false)
    }

    /// Dial the server once to confirm reachability. No round trip.
    pub async fn test_connection(&self) -> Result<(), JanusError> {
        self.transport.test_connection().await
    }

    // ========================================================================
    // Handle-Based Dispatch
    // ========================================================================

    /// Dispatch a request on its own task and return a lifecycle handle
    /// plus result/error sinks. The handle stays queryable in the client's
    /// registry; a bilateral round-trip timer backstops the exchange.
    pub async fn send_request_with_handle(
        &self,
        request: &str,
        args: Option<HashMap<String, Value>>,
        timeout: Option<Duration>,
    ) -> Result<
        (
            RequestHandle,
            oneshot::Receiver<Response>,
            oneshot::Receiver<JanusError>,
        ),
        JanusError,
    > {
        self.validate_outbound(request, args.as_ref(), timeout)?;

        let internal_id = Uuid::new_v4().to_string();
        let handle = RequestHandle::new(internal_id.clone(), request);
        let cancel = Arc::new(Notify::new());
        self.handles.lock().insert(
            internal_id.clone(),
            HandleEntry {
                handle: handle.clone(),
                status: RequestStatus::Pending,
                cancel: cancel.clone(),
            },
        );

        let effective = timeout.unwrap_or(self.config.default_timeout);
        {
            // Backstop: if neither completion nor cancellation lands before
            // the round-trip deadline (plus grace), flag the handle.
            let handles = self.handles.clone();
            let flagged = internal_id.clone();
            self.timeouts.register_bilateral(
                &format!("{internal_id}-request"),
                &format!("{internal_id}-response"),
                effective + Duration::from_millis(100),
                move || {
                    mark_status(&handles, &flagged, RequestStatus::Timeout);
                },
            );
        }

        let (resolve_tx, resolve_rx) = oneshot::channel();
        let (reject_tx, reject_rx) = oneshot::channel();
        let client = self.clone();
        let name = request.to_string();
        let task_id = internal_id;
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = client.send_request(&name, args, timeout) => Some(result),
                _ = cancel.notified() => None,
            };
            match outcome {
                Some(Ok(response)) => {
                    mark_status(&client.handles, &task_id, RequestStatus::Completed);
                    let _ = resolve_tx.send(response);
                }
                Some(Err(error)) => {
                    let status = if matches!(error, JanusError::RequestTimeout { .. }) {
                        RequestStatus::Timeout
                    } else {
                        RequestStatus::Failed
                    };
                    mark_status(&client.handles, &task_id, status);
                    let _ = reject_tx.send(error);
                }
                None => {
                    mark_status(&client.handles, &task_id, RequestStatus::Cancelled);
                    let _ = reject_tx.send(JanusError::Cancelled(
                        "cancelled by caller".to_string(),
                    ));
                }
            }
            client.timeouts.cancel_bilateral(&task_id);
        });

        Ok((handle, resolve_rx, reject_rx))
    }

    /// Current status of a handle, if it is still in the registry.
    pub fn get_status(&self, handle: &RequestHandle) -> Option<RequestStatus> {
        self.handles
            .lock()
            .get(handle.internal_id())
            .map(|entry| entry.status)
    }

    /// Cancel a pending request. The dispatch task unwinds, the reply
    /// socket is unlinked, and the error sink fires with `Cancelled`.
    pub fn cancel_request(&self, handle: &RequestHandle) -> bool {
        let handles = self.handles.lock();
        match handles.get(handle.internal_id()) {
            Some(entry) if entry.status == RequestStatus::Pending => {
                entry.handle.mark_cancelled();
                entry.cancel.notify_one();
                true
            }
            _ => false,
        }
    }

    /// Handles still awaiting completion.
    pub fn pending_requests(&self) -> Vec<RequestHandle> {
        self.handles
            .lock()
            .values()
            .filter(|entry| entry.status == RequestStatus::Pending)
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Cancel every pending handle. Returns how many were signalled.
    pub fn cancel_all_requests(&self) -> usize {
        let handles = self.handles.lock();
        let mut count = 0;
        for entry in handles.values() {
            if entry.status == RequestStatus::Pending {
                entry.handle.mark_cancelled();
                entry.cancel.notify_one();
                count += 1;
            }
        }
        count
    }

    // ========================================================================
    // Correlated Dispatch (tracker path)
    // ========================================================================

    /// Dispatch through the response tracker: the returned sinks resolve
    /// when a response with this exchange's id arrives, or reject on
    /// timeout/cancellation. Returns the correlation id.
    pub async fn send_request_with_correlation(
        &self,
        request: &str,
        args: Option<HashMap<String, Value>>,
        timeout: Duration,
    ) -> Result<
        (
            oneshot::Receiver<Response>,
            oneshot::Receiver<JanusError>,
            String,
        ),
        JanusError,
    > {
        self.validate_outbound(request, args.as_ref(), Some(timeout))?;

        let wire = Request::new(request, args);
        let id = wire.id.clone();
        let (resolve_tx, resolve_rx) = oneshot::channel();
        let (reject_tx, reject_rx) = oneshot::channel();
        self.tracker.track(&id, resolve_tx, reject_tx, timeout)?;

        let client = self.clone();
        tokio::spawn(async move {
            let reply_path = DatagramTransport::generate_reply_socket_path();
            let request_id = wire.id.clone();
            let wire = wire.with_reply_to(&reply_path);

            let payload = match MessageFraming::encode_request(&wire) {
                Ok(payload) => payload,
                Err(error) => {
                    client.tracker.reject(&request_id, error);
                    return;
                }
            };
            match client.transport.send_datagram(&payload, &reply_path).await {
                Ok(bytes) => match MessageFraming::decode_response(&bytes) {
                    Ok(response) => {
                        // Matching is by request_id; a mismatched response
                        // is dropped and the tracker timeout reports it.
                        client.tracker.handle_response(response);
                    }
                    Err(error) => {
                        client.tracker.reject(&request_id, error);
                    }
                },
                Err(error) => {
                    client.tracker.reject(&request_id, error);
                }
            }
        });

        Ok((resolve_rx, reject_rx, id))
    }

    // ========================================================================
    // Parallel Dispatch
    // ========================================================================

    /// Fan a batch out concurrently and join. Results carry the caller's
    /// ids and come back in input order regardless of completion order.
    pub async fn execute_requests_in_parallel(
        &self,
        requests: Vec<ParallelRequest>,
    ) -> Vec<ParallelResult> {
        let mut tasks = Vec::with_capacity(requests.len());
        for spec in requests {
            let client = self.clone();
            let id = spec.id.clone();
            tasks.push((
                id,
                tokio::spawn(async move {
                    client
                        .send_request(&spec.request, spec.args, spec.timeout)
                        .await
                }),
            ));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (id, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(join_error) => Err(JanusError::Handler(format!(
                    "parallel dispatch task failed: {join_error}"
                ))),
            };
            results.push(ParallelResult { id, result });
        }
        results
    }

    // ========================================================================
    // Introspection & Shutdown
    // ========================================================================

    /// The cached manifest, fetching it on first use.
    pub async fn manifest(&self) -> Result<Arc<Manifest>, JanusError> {
        self.ensure_manifest().await
    }

    pub fn tracker_statistics(&self) -> TrackerStatistics {
        self.tracker.statistics()
    }

    pub fn timeout_statistics(&self) -> TimeoutStatistics {
        self.timeouts.statistics()
    }

    /// Shut down: cancel pending handles, reject tracked exchanges with
    /// `TrackerShutdown`, stop all timers, clear the registry.
    pub fn close(&self) {
        self.cancel_all_requests();
        self.tracker.shutdown();
        self.timeouts.close();
        self.handles.lock().clear();
        debug!(socket = %self.socket_path, "client closed");
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// One full exchange: bind reply socket, send, receive, decode, check
    /// correlation. The whole round trip is bounded by `effective`.
    async fn exchange(
        &self,
        wire: Request,
        effective: Duration,
    ) -> Result<Response, JanusError> {
        let reply_path = DatagramTransport::generate_reply_socket_path();
        let request_name = wire.request.clone();
        let expected_id = wire.id.clone();
        let wire = wire.with_reply_to(&reply_path);
        let payload = MessageFraming::encode_request(&wire)?;

        let outcome = tokio::time::timeout(
            effective,
            self.transport.send_datagram(&payload, &reply_path),
        )
        .await;
        let bytes = match outcome {
            // Dropping the transport future unlinks the reply socket.
            Err(_) => {
                return Err(JanusError::RequestTimeout {
                    request: request_name,
                    timeout: effective,
                })
            }
            Ok(result) => result?,
        };

        let response = MessageFraming::decode_response(&bytes)?;
        if response.request_id != expected_id {
            return Err(JanusError::CorrelationMismatch {
                expected: expected_id,
                actual: response.request_id,
            });
        }
        Ok(response)
    }

    /// Fetch-and-cache the contract via the `manifest` built-in. Double
    /// checked under the write lock so concurrent first sends fetch once.
    async fn ensure_manifest(&self) -> Result<Arc<Manifest>, JanusError> {
        if let Some(manifest) = self.manifest.read().await.clone() {
            return Ok(manifest);
        }

        let mut slot = self.manifest.write().await;
        if let Some(manifest) = slot.clone() {
            return Ok(manifest);
        }

        debug!(socket = %self.socket_path, "fetching manifest");
        let wire = Request::new("manifest", None);
        let response = self.exchange(wire, self.config.default_timeout).await?;
        if !response.success {
            let error = response
                .error
                .unwrap_or_else(|| JsonRpcError::new(JsonRpcErrorCode::InternalError));
            return Err(JanusError::Rpc(error));
        }
        let manifest = Arc::new(Manifest::from_value(
            response.result.unwrap_or(Value::Null),
        )?);
        *slot = Some(manifest.clone());
        Ok(manifest)
    }

    fn validate_outbound(
        &self,
        request: &str,
        args: Option<&HashMap<String, Value>>,
        timeout: Option<Duration>,
    ) -> Result<(), JanusError> {
        SecurityValidator::validate_request_name(request)?;
        if let Some(args) = args {
            SecurityValidator::validate_argument_map(args)?;
        }
        if let Some(timeout) = timeout {
            SecurityValidator::validate_timeout(timeout.as_secs_f64())?;
        }
        Ok(())
    }
}

/// One-shot status transition: only a `Pending` entry moves.
fn mark_status(
    handles: &Arc<Mutex<HashMap<String, HandleEntry>>>,
    internal_id: &str,
    status: RequestStatus,
) {
    let mut handles = handles.lock();
    if let Some(entry) = handles.get_mut(internal_id) {
        if entry.status == RequestStatus::Pending {
            entry.status = status;
        }
    }
}
