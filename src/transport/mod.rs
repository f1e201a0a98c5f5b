//! Datagram transport over `AF_UNIX`/`SOCK_DGRAM`.
//!
//! Connectionless: every exchange binds a fresh ephemeral reply socket,
//! sends one datagram to the server, and receives one datagram back on the
//! reply socket. The reply socket is wrapped in an RAII guard — whatever
//! path exits `send_datagram` (success, timeout, send failure, oversize,
//! task cancellation), the socket file is unlinked.

use crate::config::{DEFAULT_DATAGRAM_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::JanusError;
use crate::security::SecurityValidator;
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(test)]
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UnixDatagram;
use tokio::time::timeout;
use tracing::debug;

/// Per-process sequence number folded into reply socket names so two
/// exchanges in the same nanosecond cannot collide.
static REPLY_SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

/// Transport tuning.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Deadline applied independently to the send and the receive.
    pub datagram_timeout: Duration,
    /// Receive buffer size and per-datagram payload ceiling.
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            datagram_timeout: DEFAULT_DATAGRAM_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Ephemeral reply socket bound to a unique path. Dropping it closes the
/// descriptor and unlinks the path; unlinking an already-removed path is a
/// no-op.
struct ReplySocket {
    socket: UnixDatagram,
    path: String,
}

impl ReplySocket {
    fn bind(path: &str) -> Result<Self, JanusError> {
        let socket = UnixDatagram::bind(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => {
                JanusError::Transport(format!("reply socket path already in use: {path}"))
            }
            std::io::ErrorKind::PermissionDenied => {
                JanusError::Transport(format!("permission denied binding reply socket: {path}"))
            }
            _ => JanusError::Transport(format!("failed to bind reply socket {path}: {e}")),
        })?;
        Ok(Self {
            socket,
            path: path.to_string(),
        })
    }
}

impl Drop for ReplySocket {
    fn drop(&mut self) {
        // Best-effort unlink; NotFound means someone beat us to it.
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connectionless client-side transport addressing one server socket.
#[derive(Debug, Clone)]
pub struct DatagramTransport {
    server_path: String,
    config: TransportConfig,
}

impl DatagramTransport {
    pub fn new(server_path: impl Into<String>, config: TransportConfig) -> Result<Self, JanusError> {
        let server_path = server_path.into();
        SecurityValidator::validate_socket_path(&server_path)?;
        Ok(Self {
            server_path,
            config,
        })
    }

    pub fn server_path(&self) -> &str {
        &self.server_path
    }

    pub fn max_message_size(&self) -> usize {
        self.config.max_message_size
    }

    /// Unique reply socket path: `{tmpdir}/janus_r_{pid}_{nanos}_{seq}.sock`.
    ///
    /// The sequence number disambiguates calls within one nanosecond; it
    /// wraps at six digits to keep the filename inside the per-segment
    /// byte limit.
    pub fn generate_reply_socket_path() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = REPLY_SOCKET_SEQ.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        let tmpdir = std::env::temp_dir();
        format!(
            "{}/janus_r_{}_{}_{}.sock",
            tmpdir.display(),
            std::process::id(),
            nanos,
            seq
        )
    }

    /// Send one datagram and wait for one reply on `reply_path`.
    ///
    /// The reply socket is unlinked on every exit path, including the
    /// caller dropping this future mid-await.
    pub async fn send_datagram(
        &self,
        payload: &[u8],
        reply_path: &str,
    ) -> Result<Vec<u8>, JanusError> {
        self.check_payload_size(payload)?;
        SecurityValidator::validate_message_bytes(payload)?;
        SecurityValidator::validate_socket_path(reply_path)?;

        let reply = ReplySocket::bind(reply_path)?;

        self.send_to_server(payload).await?;

        let mut buffer = vec![0u8; self.config.max_message_size];
        let (len, _) = timeout(self.config.datagram_timeout, reply.socket.recv_from(&mut buffer))
            .await
            .map_err(|_| {
                JanusError::Transport(format!(
                    "timed out after {:?} waiting for a response on {reply_path}",
                    self.config.datagram_timeout
                ))
            })?
            .map_err(|e| JanusError::Transport(format!("failed to receive response: {e}")))?;
        buffer.truncate(len);
        debug!(bytes = len, reply_path, "received response datagram");
        Ok(buffer)
    }

    /// Fire-and-forget: no reply socket, no receive.
    pub async fn send_datagram_no_reply(&self, payload: &[u8]) -> Result<(), JanusError> {
        self.check_payload_size(payload)?;
        SecurityValidator::validate_message_bytes(payload)?;
        self.send_to_server(payload).await
    }

    /// Dial the server address once to confirm it is reachable. No
    /// request round trip.
    pub async fn test_connection(&self) -> Result<(), JanusError> {
        let socket = UnixDatagram::unbound()
            .map_err(|e| JanusError::Transport(format!("failed to create probe socket: {e}")))?;
        socket.connect(&self.server_path).map_err(|e| {
            JanusError::Transport(format!(
                "server socket {} is not reachable: {e}",
                self.server_path
            ))
        })?;
        Ok(())
    }

    async fn send_to_server(&self, payload: &[u8]) -> Result<(), JanusError> {
        let sender = UnixDatagram::unbound()
            .map_err(|e| JanusError::Transport(format!("failed to create send socket: {e}")))?;

        timeout(
            self.config.datagram_timeout,
            sender.send_to(payload, &self.server_path),
        )
        .await
        .map_err(|_| {
            JanusError::Transport(format!(
                "timed out after {:?} sending datagram to {}",
                self.config.datagram_timeout, self.server_path
            ))
        })?
        .map_err(|e| self.map_send_error(e, payload.len()))?;

        debug!(bytes = payload.len(), server = %self.server_path, "sent datagram");
        Ok(())
    }

    fn map_send_error(&self, error: std::io::Error, payload_len: usize) -> JanusError {
        let text = error.to_string();
        if text.to_ascii_lowercase().contains("message too long") {
            JanusError::PayloadTooLarge(format!(
                "payload of {payload_len} bytes exceeds the OS datagram limit"
            ))
        } else {
            JanusError::Transport(format!(
                "failed to send datagram to {}: {error}",
                self.server_path
            ))
        }
    }

    fn check_payload_size(&self, payload: &[u8]) -> Result<(), JanusError> {
        if payload.len() > self.config.max_message_size {
            return Err(JanusError::PayloadTooLarge(format!(
                "payload of {} bytes exceeds the {}-byte datagram limit",
                payload.len(),
                self.config.max_message_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    static TEST_SEQ: AtomicU32 = AtomicU32::new(0);

    fn test_path(tag: &str) -> String {
        format!(
            "{}/janus_transport_{}_{}_{}.sock",
            std::env::temp_dir().display(),
            tag,
            std::process::id(),
            TEST_SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn fast_config() -> TransportConfig {
        TransportConfig {
            datagram_timeout: Duration::from_millis(200),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    #[test]
    fn test_generated_reply_paths_are_unique_and_valid() {
        let a = DatagramTransport::generate_reply_socket_path();
        let b = DatagramTransport::generate_reply_socket_path();
        assert_ne!(a, b);
        assert!(SecurityValidator::validate_socket_path(&a).is_ok());
    }

    #[test]
    fn test_rejects_invalid_server_path() {
        assert!(DatagramTransport::new("/etc/evil.sock", TransportConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_roundtrip_exchange() {
        let server_path = test_path("server");
        let server = UnixDatagram::bind(&server_path).unwrap();

        let transport = DatagramTransport::new(&server_path, fast_config()).unwrap();
        let reply_path = DatagramTransport::generate_reply_socket_path();

        // Echo server: one datagram in, one datagram back to the reply path.
        let echo_reply_path = reply_path.clone();
        let server_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            let (len, _) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&buf[..len], &echo_reply_path).await.unwrap();
        });

        let payload = br#"{"id":"x","request":"ping","timestamp":"2026-08-01T00:00:00.000Z"}"#;
        let received = transport.send_datagram(payload, &reply_path).await.unwrap();
        assert_eq!(received, payload);
        assert!(
            !Path::new(&reply_path).exists(),
            "reply socket must be unlinked after a successful exchange"
        );

        server_task.await.unwrap();
        let _ = std::fs::remove_file(&server_path);
    }

    #[tokio::test]
    async fn test_reply_socket_cleaned_up_on_send_failure() {
        // No server bound at this path: the send fails immediately.
        let transport =
            DatagramTransport::new(test_path("missing"), fast_config()).unwrap();
        let reply_path = DatagramTransport::generate_reply_socket_path();

        let payload = br#"{"id":"x","request":"ping","timestamp":"2026-08-01T00:00:00.000Z"}"#;
        let err = transport
            .send_datagram(payload, &reply_path)
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::Transport(_)));
        assert!(
            !Path::new(&reply_path).exists(),
            "reply socket must be unlinked after a send failure"
        );
    }

    #[tokio::test]
    async fn test_reply_socket_cleaned_up_on_receive_timeout() {
        let server_path = test_path("silent");
        let _server = UnixDatagram::bind(&server_path).unwrap();

        let transport = DatagramTransport::new(&server_path, fast_config()).unwrap();
        let reply_path = DatagramTransport::generate_reply_socket_path();

        let payload = br#"{"id":"x","request":"ping","timestamp":"2026-08-01T00:00:00.000Z"}"#;
        let err = transport
            .send_datagram(payload, &reply_path)
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::Transport(_)));
        assert!(
            !Path::new(&reply_path).exists(),
            "reply socket must be unlinked after a receive timeout"
        );
        let _ = std::fs::remove_file(&server_path);
    }

    #[tokio::test]
    async fn test_oversized_payload_fails_before_any_socket_work() {
        let transport =
            DatagramTransport::new(test_path("unused"), fast_config()).unwrap();
        let reply_path = DatagramTransport::generate_reply_socket_path();

        let oversized = format!(
            r#"{{"id":"x","request":"ping","data":"{}"}}"#,
            "y".repeat(200 * 1024)
        );
        let err = transport
            .send_datagram(oversized.as_bytes(), &reply_path)
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::PayloadTooLarge(_)));
        assert!(
            !Path::new(&reply_path).exists(),
            "oversized payload must be refused before the reply socket is bound"
        );
    }

    #[tokio::test]
    async fn test_send_no_reply_leaves_no_socket_behind() {
        let server_path = test_path("noreply");
        let server = UnixDatagram::bind(&server_path).unwrap();

        let transport = DatagramTransport::new(&server_path, fast_config()).unwrap();
        let payload = br#"{"id":"x","request":"ping","timestamp":"2026-08-01T00:00:00.000Z"}"#;
        transport.send_datagram_no_reply(payload).await.unwrap();

        let mut buf = vec![0u8; 65536];
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], payload);
        let _ = std::fs::remove_file(&server_path);
    }

    #[tokio::test]
    async fn test_test_connection_reports_reachability() {
        let server_path = test_path("probe");
        let transport = DatagramTransport::new(&server_path, fast_config()).unwrap();
        assert!(transport.test_connection().await.is_err());

        let _server = UnixDatagram::bind(&server_path).unwrap();
        assert!(transport.test_connection().await.is_ok());
        let _ = std::fs::remove_file(&server_path);
    }

    #[tokio::test]
    async fn test_unlink_is_idempotent() {
        let reply_path = DatagramTransport::generate_reply_socket_path();
        let reply = ReplySocket::bind(&reply_path).unwrap();
        // Simulate an external cleanup racing the guard.
        std::fs::remove_file(&reply_path).unwrap();
        drop(reply); // must not panic
        assert!(!Path::new(&reply_path).exists());
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected_before_send() {
        let transport =
            DatagramTransport::new(test_path("unused2"), fast_config()).unwrap();
        let err = transport
            .send_datagram_no_reply(b"not json")
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::SecurityViolation(_)));
    }
}
