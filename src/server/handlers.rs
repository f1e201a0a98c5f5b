//! RequestHandler — the ONE trait every handler implements.
//!
//! A handler consumes a `Request` and produces either a JSON value or a
//! structured wire error. The typed constructors (bool/string/int/float/
//! array/object) are sugar over that one shape: they wrap a plain function
//! and map its return into the generic result.

use crate::error::{JanusError, JsonRpcError, JsonRpcErrorCode};
use crate::protocol::Request;
use crate::security::SecurityValidator;
use crate::server::builtin;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What a handler produces: a result value or a wire error.
pub type HandlerResult = Result<Value, JsonRpcError>;

/// The one handler capability.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &Request) -> HandlerResult;
}

// ============================================================================
// Function Adapters
// ============================================================================

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

struct AsyncFnHandler {
    f: Box<dyn Fn(Request) -> BoxedHandlerFuture + Send + Sync>,
}

#[async_trait]
impl RequestHandler for AsyncFnHandler {
    async fn handle(&self, request: &Request) -> HandlerResult {
        (self.f)(request.clone()).await
    }
}

/// Wrap an async closure as a handler.
pub fn async_handler<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(AsyncFnHandler {
        f: Box::new(move |request| Box::pin(f(request))),
    })
}

struct SyncFnHandler<T> {
    f: Box<dyn Fn(&Request) -> Result<T, JsonRpcError> + Send + Sync>,
}

#[async_trait]
impl<T: serde::Serialize + Send + Sync + 'static> RequestHandler for SyncFnHandler<T> {
    async fn handle(&self, request: &Request) -> HandlerResult {
        let value = (self.f)(request)?;
        serde_json::to_value(value).map_err(|e| {
            JsonRpcError::with_details(
                JsonRpcErrorCode::InternalError,
                format!("handler result not serializable: {e}"),
            )
        })
    }
}

fn sync_handler<T, F>(f: F) -> Arc<dyn RequestHandler>
where
    T: serde::Serialize + Send + Sync + 'static,
    F: Fn(&Request) -> Result<T, JsonRpcError> + Send + Sync + 'static,
{
    Arc::new(SyncFnHandler { f: Box::new(f) })
}

/// Handler returning a boolean.
pub fn bool_handler<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(&Request) -> Result<bool, JsonRpcError> + Send + Sync + 'static,
{
    sync_handler(f)
}

/// Handler returning a string.
pub fn string_handler<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(&Request) -> Result<String, JsonRpcError> + Send + Sync + 'static,
{
    sync_handler(f)
}

/// Handler returning an integer.
pub fn int_handler<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(&Request) -> Result<i64, JsonRpcError> + Send + Sync + 'static,
{
    sync_handler(f)
}

/// Handler returning a float.
pub fn float_handler<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(&Request) -> Result<f64, JsonRpcError> + Send + Sync + 'static,
{
    sync_handler(f)
}

/// Handler returning an array.
pub fn array_handler<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(&Request) -> Result<Vec<Value>, JsonRpcError> + Send + Sync + 'static,
{
    sync_handler(f)
}

/// Handler returning an object.
pub fn object_handler<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(&Request) -> Result<serde_json::Map<String, Value>, JsonRpcError> + Send + Sync + 'static,
{
    sync_handler(f)
}

// ============================================================================
// Registry
// ============================================================================

/// Registered handlers by request name. Registration is rare compared to
/// dispatch; DashMap keeps lookups lock-free for the hot path.
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn RequestHandler>>,
    max_handlers: usize,
}

impl HandlerRegistry {
    pub fn new(max_handlers: usize) -> Self {
        Self {
            handlers: DashMap::new(),
            max_handlers,
        }
    }

    /// Register a handler. Built-in names can never be shadowed; names go
    /// through the same charset/reserved-word checks as wire requests.
    pub fn register(
        &self,
        name: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), JanusError> {
        SecurityValidator::validate_name(name)?;
        if builtin::is_builtin(name) {
            return Err(JanusError::SecurityViolation(format!(
                "'{name}' is a built-in request and cannot be overridden"
            )));
        }
        if !self.handlers.contains_key(name) && self.handlers.len() >= self.max_handlers {
            return Err(JanusError::SecurityViolation(format!(
                "handler limit of {} reached",
                self.max_handlers
            )));
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.get(name).map(|h| h.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
