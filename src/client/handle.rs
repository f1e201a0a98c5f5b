//! RequestHandle — user-facing lifecycle token for an in-flight request.
//!
//! The handle observes a request without exposing the wire correlation id;
//! the client's registry and the tracker's pending map are two independent
//! mappings over the same identity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle states. Transitions out of `Pending` are one-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

/// Cheap, cloneable observer of one dispatched request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    internal_id: String,
    request: String,
    created_at: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
}

impl RequestHandle {
    pub(crate) fn new(internal_id: String, request: impl Into<String>) -> Self {
        Self {
            internal_id,
            request: request.into(),
            created_at: Utc::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn internal_id(&self) -> &str {
        &self.internal_id
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_observes_cancellation_across_clones() {
        let handle = RequestHandle::new("h-1".to_string(), "ping");
        let observer = handle.clone();
        assert!(!observer.is_cancelled());

        handle.mark_cancelled();
        assert!(observer.is_cancelled());
        assert_eq!(observer.request(), "ping");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        for status in [
            RequestStatus::Completed,
            RequestStatus::Failed,
            RequestStatus::Cancelled,
            RequestStatus::Timeout,
        ] {
            assert!(status.is_terminal());
        }
    }
}
