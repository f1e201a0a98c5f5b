//! TimeoutManager — keyed timers with replace, extend, and bilateral
//! semantics.
//!
//! A bilateral registration arms ONE timer guarding a request/response key
//! pair: firing removes both keys, cancelling either removes both. The
//! paired entry carries no timer of its own; the owner does.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;

struct ActiveTimeout {
    /// `Some` on the entry that owns the timer task; `None` on the paired
    /// side of a bilateral registration.
    timer: Option<JoinHandle<()>>,
    callback: TimeoutCallback,
    /// Invoked if the primary callback panics.
    error_callback: Option<TimeoutCallback>,
    registered_at: Instant,
    timeout: Duration,
    paired_with: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct TimeoutCounters {
    registered: u64,
    cancelled: u64,
    expired: u64,
}

/// Aggregate view over the manager's history and active set.
#[derive(Debug, Clone, Default)]
pub struct TimeoutStatistics {
    pub active: usize,
    pub registered: u64,
    pub cancelled: u64,
    pub expired: u64,
    pub average_timeout_seconds: f64,
    pub longest_timeout_seconds: f64,
    pub shortest_timeout_seconds: f64,
}

pub struct TimeoutManager {
    timeouts: Mutex<HashMap<String, ActiveTimeout>>,
    counters: Mutex<TimeoutCounters>,
}

impl TimeoutManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            timeouts: Mutex::new(HashMap::new()),
            counters: Mutex::new(TimeoutCounters::default()),
        })
    }

    /// Arm a timer for `key`. Re-registering an existing key cancels the
    /// previous timer first (counted as a cancellation).
    pub fn register(
        self: &Arc<Self>,
        key: &str,
        timeout: Duration,
        callback: impl Fn() + Send + Sync + 'static,
        error_callback: Option<Box<dyn Fn() + Send + Sync>>,
    ) {
        self.register_arc(key, timeout, Arc::new(callback), error_callback.map(Arc::from));
    }

    fn register_arc(
        self: &Arc<Self>,
        key: &str,
        timeout: Duration,
        callback: TimeoutCallback,
        error_callback: Option<TimeoutCallback>,
    ) {
        let timer = self.spawn_timer(key.to_string(), timeout);
        let mut timeouts = self.timeouts.lock();
        if let Some(old) = timeouts.insert(
            key.to_string(),
            ActiveTimeout {
                timer: Some(timer),
                callback,
                error_callback,
                registered_at: Instant::now(),
                timeout,
                paired_with: None,
            },
        ) {
            if let Some(task) = old.timer {
                task.abort();
            }
            self.counters.lock().cancelled += 1;
        }
        self.counters.lock().registered += 1;
    }

    /// Arm ONE timer guarding both keys. When it fires, both keys are
    /// removed and the callback runs once. Cancelling either key removes
    /// the pair.
    pub fn register_bilateral(
        self: &Arc<Self>,
        request_key: &str,
        response_key: &str,
        timeout: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) {
        // Replace any previous registrations under either key.
        self.cancel(request_key);
        self.cancel(response_key);

        let callback: TimeoutCallback = Arc::new(callback);
        let timer = self.spawn_timer(request_key.to_string(), timeout);
        let now = Instant::now();

        let mut timeouts = self.timeouts.lock();
        timeouts.insert(
            request_key.to_string(),
            ActiveTimeout {
                timer: Some(timer),
                callback: callback.clone(),
                error_callback: None,
                registered_at: now,
                timeout,
                paired_with: Some(response_key.to_string()),
            },
        );
        timeouts.insert(
            response_key.to_string(),
            ActiveTimeout {
                timer: None,
                callback,
                error_callback: None,
                registered_at: now,
                timeout,
                paired_with: Some(request_key.to_string()),
            },
        );
        self.counters.lock().registered += 2;
    }

    /// Cancel `key` (and its bilateral peer, if any). Returns whether
    /// anything was cancelled.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.take_with_peer(key);
        if removed.is_empty() {
            return false;
        }
        self.counters.lock().cancelled += removed.len() as u64;
        true
    }

    /// Cancel the `{base}-request` / `{base}-response` pair.
    pub fn cancel_bilateral(&self, base_key: &str) -> bool {
        let request = self.cancel(&format!("{base_key}-request"));
        let response = self.cancel(&format!("{base_key}-response"));
        request || response
    }

    /// Stop the timer for `key` and restart it with `timeout + delta`,
    /// preserving the original callback. Returns `false` for unknown keys.
    pub fn extend(self: &Arc<Self>, key: &str, delta: Duration) -> bool {
        let mut timeouts = self.timeouts.lock();
        let Some(entry) = timeouts.get_mut(key) else {
            return false;
        };

        let extended = entry.timeout + delta;
        entry.timeout = extended;
        entry.registered_at = Instant::now();

        // The timer may live on the bilateral peer; restart wherever it is.
        let owner_key = if entry.timer.is_some() {
            key.to_string()
        } else if let Some(peer) = entry.paired_with.clone() {
            peer
        } else {
            key.to_string()
        };
        if let Some(owner) = timeouts.get_mut(&owner_key) {
            if let Some(task) = owner.timer.take() {
                task.abort();
            }
            owner.timeout = extended;
            owner.timer = Some(self.spawn_timer(owner_key.clone(), extended));
        }
        debug!(key, ?extended, "timeout extended");
        true
    }

    /// Cancel everything.
    pub fn close(&self) {
        let drained: Vec<ActiveTimeout> = {
            let mut timeouts = self.timeouts.lock();
            timeouts.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len() as u64;
        for entry in &drained {
            if let Some(task) = &entry.timer {
                task.abort();
            }
        }
        if count > 0 {
            self.counters.lock().cancelled += count;
        }
    }

    pub fn active_count(&self) -> usize {
        self.timeouts.lock().len()
    }

    pub fn statistics(&self) -> TimeoutStatistics {
        let timeouts = self.timeouts.lock();
        let counters = *self.counters.lock();
        let mut stats = TimeoutStatistics {
            active: timeouts.len(),
            registered: counters.registered,
            cancelled: counters.cancelled,
            expired: counters.expired,
            ..Default::default()
        };
        if timeouts.is_empty() {
            return stats;
        }

        let mut total = 0.0;
        let mut longest = f64::MIN;
        let mut shortest = f64::MAX;
        for entry in timeouts.values() {
            let secs = entry.timeout.as_secs_f64();
            total += secs;
            longest = longest.max(secs);
            shortest = shortest.min(secs);
        }
        stats.average_timeout_seconds = total / timeouts.len() as f64;
        stats.longest_timeout_seconds = longest;
        stats.shortest_timeout_seconds = shortest;
        stats
    }

    fn spawn_timer(self: &Arc<Self>, key: String, timeout: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(manager) = weak.upgrade() {
                manager.fire(&key);
            }
        })
    }

    /// A timer fired: remove the key and its peer, then run the callback
    /// outside the lock.
    fn fire(&self, key: &str) {
        let removed = self.take_with_peer(key);
        if removed.is_empty() {
            return; // already resolved or cancelled
        }
        self.counters.lock().expired += removed.len() as u64;
        // One callback per firing, even for a pair: both entries share it.
        if let Some(entry) = removed.into_iter().next() {
            let callback = entry.callback.clone();
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || callback()));
            if outcome.is_err() {
                warn!(key, "timeout callback panicked");
                if let Some(error_callback) = &entry.error_callback {
                    error_callback();
                }
            }
        }
    }

    /// Remove `key` and, for bilateral entries, its peer. Aborts whichever
    /// entry owns the timer task.
    fn take_with_peer(&self, key: &str) -> Vec<ActiveTimeout> {
        let mut removed = Vec::new();
        let mut timeouts = self.timeouts.lock();
        if let Some(entry) = timeouts.remove(key) {
            if let Some(peer_key) = entry.paired_with.clone() {
                if let Some(peer) = timeouts.remove(&peer_key) {
                    removed.push(peer);
                }
            }
            removed.push(entry);
        }
        drop(timeouts);
        for entry in &removed {
            if let Some(task) = &entry.timer {
                task.abort();
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_callback() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let cloned = count.clone();
        (count, move || {
            cloned.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_timer_fires_once_and_removes_key() {
        let manager = TimeoutManager::new();
        let (fired, callback) = counter_callback();
        manager.register("t1", Duration::from_millis(30), callback, None);
        assert_eq!(manager.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.statistics().expired, 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let manager = TimeoutManager::new();
        let (fired, callback) = counter_callback();
        manager.register("t2", Duration::from_millis(30), callback, None);
        assert!(manager.cancel("t2"));
        assert!(!manager.cancel("t2"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(manager.statistics().cancelled, 1);
    }

    #[tokio::test]
    async fn test_reregistering_replaces_and_counts_cancellation() {
        let manager = TimeoutManager::new();
        let (first_fired, first) = counter_callback();
        let (second_fired, second) = counter_callback();

        manager.register("key", Duration::from_millis(500), first, None);
        manager.register("key", Duration::from_millis(30), second, None);
        assert_eq!(manager.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(first_fired.load(Ordering::SeqCst), 0);
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);

        let stats = manager.statistics();
        assert_eq!(stats.registered, 2);
        assert_eq!(stats.cancelled, 1);
    }

    #[tokio::test]
    async fn test_extend_pushes_out_the_deadline() {
        let manager = TimeoutManager::new();
        let (fired, callback) = counter_callback();
        manager.register("slow", Duration::from_millis(40), callback, None);
        assert!(manager.extend("slow", Duration::from_millis(500)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "extended timer fired early");
        assert_eq!(manager.active_count(), 1);

        assert!(!manager.extend("missing", Duration::from_millis(10)));
        manager.close();
    }

    #[tokio::test]
    async fn test_bilateral_fire_removes_both_keys_once() {
        let manager = TimeoutManager::new();
        let (fired, callback) = counter_callback();
        manager.register_bilateral(
            "id-request",
            "id-response",
            Duration::from_millis(30),
            callback,
        );
        assert_eq!(manager.active_count(), 2);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1, "pair shares one firing");
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelling_either_bilateral_key_removes_the_pair() {
        let manager = TimeoutManager::new();
        let (fired, callback) = counter_callback();
        manager.register_bilateral(
            "x-request",
            "x-response",
            Duration::from_millis(30),
            callback,
        );
        assert!(manager.cancel("x-response"));
        assert_eq!(manager.active_count(), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_bilateral_by_base_key() {
        let manager = TimeoutManager::new();
        let (fired, callback) = counter_callback();
        manager.register_bilateral(
            "req-9-request",
            "req-9-response",
            Duration::from_millis(30),
            callback,
        );
        assert!(manager.cancel_bilateral("req-9"));
        assert!(!manager.cancel_bilateral("req-9"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_cancels_everything() {
        let manager = TimeoutManager::new();
        let (fired, callback) = counter_callback();
        manager.register("a", Duration::from_millis(30), callback, None);
        let (fired_b, callback_b) = counter_callback();
        manager.register("b", Duration::from_millis(30), callback_b, None);

        manager.close();
        assert_eq!(manager.active_count(), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(fired_b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_callback_runs_when_callback_panics() {
        let manager = TimeoutManager::new();
        let (errored, error_callback) = counter_callback();
        manager.register(
            "fragile",
            Duration::from_millis(30),
            || panic!("callback exploded"),
            Some(Box::new(error_callback)),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(errored.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_statistics_over_active_set() {
        let manager = TimeoutManager::new();
        let (_, callback_a) = counter_callback();
        let (_, callback_b) = counter_callback();
        manager.register("a", Duration::from_secs(10), callback_a, None);
        manager.register("b", Duration::from_secs(20), callback_b, None);

        let stats = manager.statistics();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.registered, 2);
        assert!((stats.average_timeout_seconds - 15.0).abs() < 1e-9);
        assert!((stats.longest_timeout_seconds - 20.0).abs() < 1e-9);
        assert!((stats.shortest_timeout_seconds - 10.0).abs() < 1e-9);
        manager.close();
    }
}
