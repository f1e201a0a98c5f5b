//! ResponseTracker — correlates replies to in-flight requests by id.
//!
//! Responses can arrive in any order; matching is solely by `request_id`.
//! A single mutex guards the pending map. Removal happens under the lock,
//! delivery happens outside it, so a synchronous receiver can never
//! deadlock the tracker.
//!
//! Each entry gets its own timeout task, and a periodic sweep catches
//! entries whose task was lost (e.g. a caller abandoned the receiver).

use crate::error::{JanusError, JsonRpcError, JsonRpcErrorCode};
use crate::protocol::Response;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tracker tuning.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Hard ceiling on simultaneously pending requests.
    pub max_pending: usize,
    /// Cadence of the background expiry sweep.
    pub cleanup_interval: Duration,
    /// Timeout applied when `track` is called with a zero duration.
    pub default_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_pending: crate::security::MAX_PENDING_REQUESTS,
            cleanup_interval: Duration::from_secs(30),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// One in-flight request awaiting its response.
struct PendingRequest {
    resolve: oneshot::Sender<Response>,
    reject: oneshot::Sender<JanusError>,
    registered_at: Instant,
    timeout: Duration,
    timeout_task: JoinHandle<()>,
}

/// Age snapshot of one pending entry.
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    pub id: String,
    pub age_seconds: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TrackerStatistics {
    pub pending_count: usize,
    pub average_age_seconds: f64,
    pub oldest: Option<PendingSnapshot>,
    pub newest: Option<PendingSnapshot>,
}

pub struct ResponseTracker {
    config: TrackerConfig,
    pending: Mutex<HashMap<String, PendingRequest>>,
    shut_down: AtomicBool,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseTracker {
    /// Create the tracker and start its background expiry sweep. The sweep
    /// holds only a weak reference, so dropping the tracker stops it.
    pub fn new(config: TrackerConfig) -> Arc<Self> {
        let tracker = Arc::new(Self {
            config: config.clone(),
            pending: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
            cleanup_task: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&tracker);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.cleanup_interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(tracker) = weak.upgrade() else { break };
                if tracker.shut_down.load(Ordering::SeqCst) {
                    break;
                }
                let swept = tracker.cleanup();
                if swept > 0 {
                    debug!(swept, "expired pending requests swept");
                }
            }
        });
        *tracker.cleanup_task.lock() = Some(handle);
        tracker
    }

    /// Register an in-flight request. Fails if the pending set is full or
    /// the id is already tracked. A zero timeout means the default.
    pub fn track(
        self: &Arc<Self>,
        id: &str,
        resolve: oneshot::Sender<Response>,
        reject: oneshot::Sender<JanusError>,
        timeout: Duration,
    ) -> Result<(), JanusError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(JanusError::TrackerShutdown);
        }

        let effective = if timeout.is_zero() {
            self.config.default_timeout
        } else {
            timeout
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let task_id = id.to_string();
        let timeout_task = tokio::spawn(async move {
            tokio::time::sleep(effective).await;
            if let Some(tracker) = weak.upgrade() {
                tracker.expire(&task_id);
            }
        });

        let mut pending = self.pending.lock();
        if pending.len() >= self.config.max_pending {
            drop(pending);
            timeout_task.abort();
            return Err(JanusError::PendingLimitExceeded(self.config.max_pending));
        }
        if pending.contains_key(id) {
            drop(pending);
            timeout_task.abort();
            return Err(JanusError::DuplicateRequestId(id.to_string()));
        }
        pending.insert(
            id.to_string(),
            PendingRequest {
                resolve,
                reject,
                registered_at: Instant::now(),
                timeout: effective,
                timeout_task,
            },
        );
        Ok(())
    }

    /// Route an inbound response to its pending entry. Returns `false` for
    /// late or unknown responses — a normal race after a timeout, dropped
    /// silently.
    pub fn handle_response(&self, response: Response) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            pending.remove(&response.request_id)
        };
        let Some(entry) = entry else {
            debug!(request_id = %response.request_id, "late response with no pending entry, dropped");
            return false;
        };
        entry.timeout_task.abort();

        if response.success {
            // A dropped receiver means the caller gave up; that's fine.
            let _ = entry.resolve.send(response);
        } else {
            let error = response
                .error
                .clone()
                .unwrap_or_else(|| JsonRpcError::new(JsonRpcErrorCode::InternalError));
            let _ = entry.reject.send(JanusError::Rpc(error));
        }
        true
    }

    /// Remove one entry and reject it as cancelled.
    pub fn cancel(&self, id: &str, reason: &str) -> bool {
        self.reject_entry(id, JanusError::Cancelled(reason.to_string()))
    }

    /// Remove one entry and reject it with an arbitrary error (used when a
    /// transport exchange fails after tracking began).
    pub fn reject(&self, id: &str, error: JanusError) -> bool {
        self.reject_entry(id, error)
    }

    /// Cancel every pending entry. Returns how many were cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        let count = drained.len();
        for (_, entry) in drained {
            entry.timeout_task.abort();
            let _ = entry
                .reject
                .send(JanusError::Cancelled(reason.to_string()));
        }
        count
    }

    /// Sweep entries whose age exceeds their timeout. Each one is rejected
    /// with the timeout error. Returns how many were swept.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, PendingRequest)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, e)| now.duration_since(e.registered_at) >= e.timeout)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|e| (id, e)))
                .collect()
        };
        let count = expired.len();
        for (id, entry) in expired {
            entry.timeout_task.abort();
            let _ = entry.reject.send(JanusError::RequestTimeout {
                request: id,
                timeout: entry.timeout,
            });
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_tracking(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn statistics(&self) -> TrackerStatistics {
        let pending = self.pending.lock();
        let now = Instant::now();
        let mut stats = TrackerStatistics {
            pending_count: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return stats;
        }

        let mut total = 0.0;
        for (id, entry) in pending.iter() {
            let age = now.duration_since(entry.registered_at).as_secs_f64();
            total += age;
            let snapshot = PendingSnapshot {
                id: id.clone(),
                age_seconds: age,
            };
            match &stats.oldest {
                Some(oldest) if oldest.age_seconds >= age => {}
                _ => stats.oldest = Some(snapshot.clone()),
            }
            match &stats.newest {
                Some(newest) if newest.age_seconds <= age => {}
                _ => stats.newest = Some(snapshot),
            }
        }
        stats.average_age_seconds = total / pending.len() as f64;
        stats
    }

    /// Stop tracking: reject every pending entry with `TrackerShutdown`
    /// and halt the background sweep. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        let drained: Vec<(String, PendingRequest)> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            warn!(count = drained.len(), "tracker shut down with pending requests");
        }
        for (_, entry) in drained {
            entry.timeout_task.abort();
            let _ = entry.reject.send(JanusError::TrackerShutdown);
        }
    }

    fn expire(&self, id: &str) {
        let entry = {
            let mut pending = self.pending.lock();
            pending.remove(id)
        };
        if let Some(entry) = entry {
            let _ = entry.reject.send(JanusError::RequestTimeout {
                request: id.to_string(),
                timeout: entry.timeout,
            });
        }
    }

    fn reject_entry(&self, id: &str, error: JanusError) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            pending.remove(id)
        };
        match entry {
            Some(entry) => {
                entry.timeout_task.abort();
                let _ = entry.reject.send(error);
                true
            }
            None => false,
        }
    }
}
