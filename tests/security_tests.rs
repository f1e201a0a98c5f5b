//! Boundary-enforcement tests: path traversal, input injection, protocol
//! hygiene, and resource limits, exercised through the public API.

use janus::server::handlers::{bool_handler, HandlerRegistry};
use janus::{
    JanusClient, JanusClientConfig, JanusError, MessageFraming, SecurityValidator,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

static SEQ: AtomicU32 = AtomicU32::new(0);

fn scratch_socket_path() -> String {
    format!(
        "{}/janus_sec_{}_{}.sock",
        std::env::temp_dir().display(),
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

fn fast_config() -> JanusClientConfig {
    JanusClientConfig {
        datagram_timeout: Duration::from_millis(200),
        default_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_malicious_socket_paths_rejected_at_construction() {
    let malicious = [
        "/tmp/../etc/passwd",
        "/etc/janus.sock",
        "relative/path.sock",
        "",
        "/tmp/\u{0}hidden.sock",
    ];
    for path in malicious {
        let result = JanusClient::new(path, fast_config()).await;
        assert!(result.is_err(), "should reject malicious path: {path:?}");
    }
}

#[tokio::test]
async fn test_control_character_path_injection_rejected() {
    for path in [
        "/tmp/socket\0injection.sock",
        "/tmp/socket\r\ninjection.sock",
        "/tmp/socket\tinjection.sock",
    ] {
        assert!(
            JanusClient::new(path, fast_config()).await.is_err(),
            "should reject control characters: {path:?}"
        );
    }
}

#[tokio::test]
async fn test_socket_path_length_limit() {
    let long_path = format!("/tmp/{}.sock", "x".repeat(200));
    match JanusClient::new(long_path, fast_config()).await.unwrap_err() {
        JanusError::InvalidSocketPath(msg) => assert!(msg.contains("too long")),
        other => panic!("expected InvalidSocketPath, got {other:?}"),
    }
}

#[tokio::test]
async fn test_command_injection_in_arguments_rejected_before_send() {
    let client = JanusClient::new(scratch_socket_path(), fast_config())
        .await
        .unwrap();

    let malicious = [
        "'; rm -rf /; --",
        "1 UNION SELECT password FROM users",
        "<script>alert(1)</script>",
        "javascript:void(0)",
        "x\" onerror=alert(1)",
        "DROP TABLE sessions",
    ];
    for payload in malicious {
        let mut args: HashMap<String, Value> = HashMap::new();
        args.insert("input".to_string(), Value::String(payload.to_string()));
        let err = client
            .send_request("echo", Some(args), Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(
            matches!(err, JanusError::SecurityViolation(_)),
            "payload {payload:?} must be refused before any datagram, got {err:?}"
        );
    }
}

#[tokio::test]
async fn test_dangerous_argument_names_rejected() {
    let client = JanusClient::new(scratch_socket_path(), fast_config())
        .await
        .unwrap();
    for name in ["__proto__", "constructor", "prototype", "eval", "function"] {
        let mut args: HashMap<String, Value> = HashMap::new();
        args.insert(name.to_string(), Value::Bool(true));
        let err = client
            .send_request("echo", Some(args), None)
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::SecurityViolation(_)));
    }
}

#[tokio::test]
async fn test_reserved_and_dangerous_request_names_rejected() {
    let client = JanusClient::new(scratch_socket_path(), fast_config())
        .await
        .unwrap();
    for name in [
        "admin",
        "root",
        "__proto__",
        "run_eval",
        "shell_out",
        "drop_everything",
        "bad name",
        "bad/name",
    ] {
        let err = client.send_request(name, None, None).await.unwrap_err();
        assert!(
            matches!(err, JanusError::SecurityViolation(_)),
            "name {name:?} must be refused"
        );
    }
}

#[test]
fn test_malformed_json_payloads_rejected() {
    let malformed: [&[u8]; 6] = [
        b"",
        b"not json at all",
        b"{\"unterminated\": ",
        b"[1, 2, 3]",
        b"42",
        b"\"just a string\"",
    ];
    for payload in malformed {
        assert!(
            SecurityValidator::validate_message_bytes(payload).is_err(),
            "payload {payload:?} must be refused"
        );
        assert!(MessageFraming::decode_request(payload).is_err());
    }
}

#[tokio::test]
async fn test_oversized_payloads_fail_without_a_server() {
    // Far over the datagram ceiling: refused client-side with a typed
    // error, never a crash.
    let client = JanusClient::new(
        scratch_socket_path(),
        JanusClientConfig {
            enable_validation: false,
            ..fast_config()
        },
    )
    .await
    .unwrap();

    let mut args: HashMap<String, Value> = HashMap::new();
    args.insert(
        "data".to_string(),
        Value::String("y".repeat(200 * 1024)),
    );
    let err = client
        .send_request("bulk_store", Some(args), None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, JanusError::PayloadTooLarge(_)),
        "expected PayloadTooLarge, got {err:?}"
    );
}

#[test]
fn test_resource_limit_on_handler_registration() {
    let registry = HandlerRegistry::new(3);
    for name in ["alpha", "beta", "gamma"] {
        registry.register(name, bool_handler(|_| Ok(true))).unwrap();
    }
    let err = registry
        .register("omega", bool_handler(|_| Ok(true)))
        .unwrap_err();
    assert!(matches!(err, JanusError::SecurityViolation(_)));
}

#[test]
fn test_builtin_requests_cannot_be_shadowed() {
    let registry = HandlerRegistry::new(100);
    for name in ["ping", "echo", "get_info", "manifest", "spec", "validate", "slow_process"] {
        assert!(
            registry.register(name, bool_handler(|_| Ok(true))).is_err(),
            "built-in {name:?} must not be registrable"
        );
    }
}

#[tokio::test]
async fn test_insecure_configuration_rejected() {
    let insecure = JanusClientConfig {
        max_concurrent_connections: 0,
        max_message_size: 0,
        datagram_timeout: Duration::ZERO,
        default_timeout: Duration::ZERO,
        max_pending_requests: 0,
        max_request_handlers: 0,
        max_args_data_size: 0,
        enable_validation: true,
    };
    match JanusClient::new(scratch_socket_path(), insecure).await {
        Err(JanusError::Configuration(_)) => {}
        other => panic!("expected Configuration error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_bounds_enforced_per_request() {
    let client = JanusClient::new(scratch_socket_path(), fast_config())
        .await
        .unwrap();

    let err = client
        .send_request("ping", None, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, JanusError::SecurityViolation(_)));

    let err = client
        .send_request("ping", None, Some(Duration::from_secs(301)))
        .await
        .unwrap_err();
    assert!(matches!(err, JanusError::SecurityViolation(_)));
}

#[test]
fn test_unicode_confusable_names_rejected_by_charset() {
    for name in [
        "café",
        "🚀launch",
        "name\u{200B}hidden",
        "name\u{FEFF}bom",
        "name\u{202E}reverse",
    ] {
        assert!(
            SecurityValidator::validate_request_name(name).is_err(),
            "confusable name {name:?} must be refused"
        );
    }
}
