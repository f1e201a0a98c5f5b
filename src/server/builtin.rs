//! Built-in requests.
//!
//! These exist on every server irrespective of manifest contents and are
//! resolved before the handler registry, so registration can never shadow
//! them. `spec` is accepted as an alias for `manifest`.

use crate::error::{JsonRpcError, JsonRpcErrorCode};
use crate::manifest::Manifest;
use crate::protocol::{wire_timestamp, Request};
use crate::server::handlers::HandlerResult;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Names dispatched by the server itself.
pub const BUILTIN_REQUESTS: &[&str] = &[
    "ping",
    "echo",
    "get_info",
    "manifest",
    "spec",
    "validate",
    "slow_process",
];

/// How long `slow_process` deliberately sleeps.
pub const SLOW_PROCESS_DELAY: Duration = Duration::from_secs(2);

/// `slow_process` gets a tighter handler bound than the default.
pub const SLOW_PROCESS_TIMEOUT: Duration = Duration::from_secs(5);

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_REQUESTS.contains(&name)
}

/// Handler-level timeout for a built-in.
pub fn builtin_timeout(name: &str, default: Duration) -> Duration {
    if name == "slow_process" {
        SLOW_PROCESS_TIMEOUT
    } else {
        default
    }
}

/// Server-side view handed to built-ins.
pub struct BuiltinContext {
    pub manifest: Arc<Manifest>,
    pub client_count: usize,
    pub client_id: Option<u64>,
}

/// Execute a built-in request. Callers have already checked `is_builtin`.
pub async fn handle_builtin(
    name: &str,
    request: &Request,
    ctx: &BuiltinContext,
) -> HandlerResult {
    match name {
        "ping" => {
            let echo = request
                .args
                .as_ref()
                .map(|args| serde_json::to_value(args).unwrap_or_else(|_| json!({})))
                .unwrap_or_else(|| json!({}));
            Ok(json!({ "pong": true, "echo": echo }))
        }

        "echo" => {
            let message = request.arg("message").cloned().ok_or_else(|| {
                JsonRpcError::with_details(
                    JsonRpcErrorCode::InvalidParams,
                    "echo requires a 'message' argument",
                )
            })?;
            Ok(json!({ "echo": message }))
        }

        "get_info" => Ok(json!({
            "implementation": "rust",
            "version": env!("CARGO_PKG_VERSION"),
            "protocol": "SOCK_DGRAM",
            "client_count": ctx.client_count,
            "client_id": ctx.client_id,
        })),

        "manifest" | "spec" => serde_json::to_value(&*ctx.manifest).map_err(|e| {
            JsonRpcError::with_details(
                JsonRpcErrorCode::InternalError,
                format!("manifest not serializable: {e}"),
            )
        }),

        "validate" => {
            let message = request
                .arg("message")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    JsonRpcError::with_details(
                        JsonRpcErrorCode::InvalidParams,
                        "validate requires a string 'message' argument",
                    )
                })?;
            match serde_json::from_str::<Value>(message) {
                Ok(data) => Ok(json!({ "valid": true, "data": data })),
                Err(e) => Ok(json!({
                    "valid": false,
                    "error": e.to_string(),
                    "reason": "malformed JSON",
                })),
            }
        }

        "slow_process" => {
            tokio::time::sleep(SLOW_PROCESS_DELAY).await;
            Ok(json!({
                "processed": true,
                "delay": "2000ms",
                "message": request.arg("message").cloned().unwrap_or(Value::Null),
                "timestamp": wire_timestamp(),
            }))
        }

        other => Err(JsonRpcError::with_details(
            JsonRpcErrorCode::MethodNotFound,
            format!("'{other}' is not a built-in request"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx() -> BuiltinContext {
        BuiltinContext {
            manifest: Arc::new(Manifest::default()),
            client_count: 3,
            client_id: Some(7),
        }
    }

    fn request(name: &str, pairs: &[(&str, Value)]) -> Request {
        let args: HashMap<String, Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Request::new(name, if args.is_empty() { None } else { Some(args) })
    }

    #[test]
    fn test_builtin_set() {
        for name in ["ping", "echo", "get_info", "manifest", "validate", "slow_process"] {
            assert!(is_builtin(name));
        }
        assert!(is_builtin("spec"));
        assert!(!is_builtin("custom"));
    }

    #[tokio::test]
    async fn test_ping_echoes_args() {
        let result = handle_builtin("ping", &request("ping", &[]), &ctx())
            .await
            .unwrap();
        assert_eq!(result["pong"], true);
        assert_eq!(result["echo"], json!({}));

        let result = handle_builtin("ping", &request("ping", &[("k", json!(1))]), &ctx())
            .await
            .unwrap();
        assert_eq!(result["echo"]["k"], 1);
    }

    #[tokio::test]
    async fn test_echo_requires_message() {
        let result = handle_builtin(
            "echo",
            &request("echo", &[("message", json!("hello"))]),
            &ctx(),
        )
        .await
        .unwrap();
        assert_eq!(result["echo"], "hello");

        let err = handle_builtin("echo", &request("echo", &[]), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn test_get_info_shape() {
        let result = handle_builtin("get_info", &request("get_info", &[]), &ctx())
            .await
            .unwrap();
        assert_eq!(result["protocol"], "SOCK_DGRAM");
        assert_eq!(result["implementation"], "rust");
        assert_eq!(result["client_count"], 3);
        assert_eq!(result["client_id"], 7);
    }

    #[tokio::test]
    async fn test_manifest_and_spec_alias_return_the_contract() {
        let context = ctx();
        let a = handle_builtin("manifest", &request("manifest", &[]), &context)
            .await
            .unwrap();
        let b = handle_builtin("spec", &request("spec", &[]), &context)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert!(a.get("requests").is_some());
    }

    #[tokio::test]
    async fn test_validate_parses_message() {
        let ok = handle_builtin(
            "validate",
            &request("validate", &[("message", json!("[1, 2, 3]"))]),
            &ctx(),
        )
        .await
        .unwrap();
        assert_eq!(ok["valid"], true);
        assert_eq!(ok["data"], json!([1, 2, 3]));

        let bad = handle_builtin(
            "validate",
            &request("validate", &[("message", json!("{nope"))]),
            &ctx(),
        )
        .await
        .unwrap();
        assert_eq!(bad["valid"], false);
        assert_eq!(bad["reason"], "malformed JSON");

        let err = handle_builtin("validate", &request("validate", &[]), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_process_reports_its_delay() {
        let result = handle_builtin(
            "slow_process",
            &request("slow_process", &[("message", json!("work"))]),
            &ctx(),
        )
        .await
        .unwrap();
        assert_eq!(result["processed"], true);
        assert_eq!(result["delay"], "2000ms");
        assert_eq!(result["message"], "work");
    }

    #[test]
    fn test_slow_process_timeout_is_tighter_than_default() {
        let default = Duration::from_secs(30);
        assert_eq!(builtin_timeout("slow_process", default), SLOW_PROCESS_TIMEOUT);
        assert_eq!(builtin_timeout("ping", default), default);
        assert!(SLOW_PROCESS_TIMEOUT > SLOW_PROCESS_DELAY);
    }
}
