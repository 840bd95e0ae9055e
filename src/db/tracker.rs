//! Lease tracking for leak detection and acquire/hold timing.

use crate::stats::{OperationTimings, TimingSummary};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::warn;

pub const OP_ACQUIRE: &str = "acquire";
pub const OP_HOLD: &str = "hold";

/// Record for one leased connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionMetric {
    pub id: u64,
    pub created_at: Instant,
}

/// Lease older than the idle limit.
#[derive(Debug, Clone, Serialize)]
pub struct LeakCandidate {
    pub lease_id: u64,
    pub held_ms: u64,
}

#[derive(Debug)]
pub struct ConnectionTracker {
    pool_name: String,
    leak_threshold: Option<Duration>,
    next_id: AtomicU64,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
    leases: Mutex<HashMap<u64, ConnectionMetric>>,
    timings: OperationTimings,
}

impl ConnectionTracker {
    pub fn new(pool_name: impl Into<String>, leak_threshold: Option<Duration>) -> Self {
        Self {
            pool_name: pool_name.into(),
            leak_threshold,
            next_id: AtomicU64::new(1),
            acquired_total: AtomicU64::new(0),
            released_total: AtomicU64::new(0),
            leases: Mutex::new(HashMap::new()),
            timings: OperationTimings::new(),
        }
    }

    fn leases(&self) -> MutexGuard<'_, HashMap<u64, ConnectionMetric>> {
        self.leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new lease. The returned guard releases it exactly once on drop.
    pub fn lease(self: &Arc<Self>, acquire_elapsed: Duration) -> Lease {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let created_at = Instant::now();
        self.leases()
            .insert(id, ConnectionMetric { id, created_at });
        self.acquired_total.fetch_add(1, Ordering::Relaxed);
        self.timings.record(OP_ACQUIRE, acquire_elapsed);
        Lease {
            tracker: Arc::clone(self),
            id,
            created_at,
        }
    }

    fn release(&self, id: u64, created_at: Instant) {
        let held = created_at.elapsed();
        if self.leases().remove(&id).is_none() {
            return;
        }
        self.released_total.fetch_add(1, Ordering::Relaxed);
        self.timings.record(OP_HOLD, held);
        if let Some(threshold) = self.leak_threshold {
            if held > threshold {
                warn!(
                    pool = %self.pool_name,
                    lease_id = id,
                    held_ms = held.as_millis() as u64,
                    threshold_ms = threshold.as_millis() as u64,
                    "Connection held past leak detection threshold"
                );
            }
        }
    }

    /// Leases currently outstanding.
    pub fn active(&self) -> usize {
        self.leases().len()
    }

    pub fn acquired_total(&self) -> u64 {
        self.acquired_total.load(Ordering::Relaxed)
    }

    pub fn released_total(&self) -> u64 {
        self.released_total.load(Ordering::Relaxed)
    }

    /// Leases held longer than `max_idle`, oldest first.
    pub fn leak_candidates(&self, max_idle: Duration) -> Vec<LeakCandidate> {
        let now = Instant::now();
        let mut candidates: Vec<LeakCandidate> = self
            .leases()
            .values()
            .filter_map(|m| {
                let held = now.saturating_duration_since(m.created_at);
                (held > max_idle).then(|| LeakCandidate {
                    lease_id: m.id,
                    held_ms: held.as_millis() as u64,
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.held_ms.cmp(&a.held_ms));
        candidates
    }

    pub fn timing_summaries(&self) -> BTreeMap<String, TimingSummary> {
        self.timings.summaries()
    }
}

/// Outstanding lease on a pooled connection.
#[derive(Debug)]
pub struct Lease {
    tracker: Arc<ConnectionTracker>,
    id: u64,
    created_at: Instant,
}

impl Lease {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn held_for(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.tracker.release(self.id, self.created_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_lease_released_once() {
        let tracker = Arc::new(ConnectionTracker::new("main", None));
        let a = tracker.lease(Duration::from_millis(2));
        let b = tracker.lease(Duration::from_millis(4));
        assert_ne!(a.id(), b.id());
        assert_eq!(tracker.active(), 2);

        drop(a);
        assert_eq!(tracker.active(), 1);
        assert_eq!(tracker.released_total(), 1);

        drop(b);
        assert_eq!(tracker.active(), 0);
        assert_eq!(tracker.acquired_total(), 2);
        assert_eq!(tracker.released_total(), 2);

        let summaries = tracker.timing_summaries();
        assert_eq!(summaries[OP_ACQUIRE].count, 2);
        assert_eq!(summaries[OP_HOLD].count, 2);
        assert!((summaries[OP_ACQUIRE].avg_ms - 3.0).abs() < 0.01);
    }

    #[test]
    fn test_leak_candidates() {
        let tracker = Arc::new(ConnectionTracker::new("main", Some(Duration::ZERO)));
        let _held = tracker.lease(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(15));
        let _fresh = tracker.lease(Duration::ZERO);

        let candidates = tracker.leak_candidates(Duration::from_millis(10));
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].held_ms >= 10);
        assert!(tracker.leak_candidates(Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_release_during_panic_unwind() {
        let tracker = Arc::new(ConnectionTracker::new("main", None));
        let t = Arc::clone(&tracker);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _lease = t.lease(Duration::ZERO);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(tracker.active(), 0);
        assert_eq!(tracker.released_total(), 1);
    }
}
