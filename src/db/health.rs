//! Periodic pool health checks with self-healing.
//!
//! Each check acquires a probe connection and validates it:
//! - an invalid connection increments the failed-check counter; reaching
//!   `max_failed_checks` reinitializes the pool and resets the counter
//! - an error while probing increments a separate critical counter; reaching
//!   `critical_failure_threshold` reinitializes unconditionally
//! - a healthy probe resets both counters
//!
//! A reinitialization that itself fails halts automatic healing until an
//! operator calls [`HealthMonitor::reinitialize`] successfully.
//!
//! Checks are serialized. The monitor task holds only a `Weak` reference and
//! exits once the monitor is dropped or the pool closes.

use crate::config::HealthOptions;
use crate::db::scheduler::{ScheduledTask, Scheduler};
use crate::error::{DbError, DbResult};
use futures_util::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Result of one liveness probe.
#[derive(Debug)]
pub enum ProbeOutcome {
    Healthy,
    /// A connection was obtained but failed validation
    Invalid(String),
    /// The probe itself failed (acquire error, pool unavailable, ...)
    Error(DbError),
}

/// What the monitor watches. Implemented by `ConnectionPool`.
pub trait HealthTarget: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn probe(&self, timeout: Duration) -> impl Future<Output = ProbeOutcome> + Send;

    fn reinitialize(&self) -> impl Future<Output = DbResult<()>> + Send;

    fn mark_degraded(&self);

    fn mark_healthy(&self);

    /// Leases held longer than `max_idle`.
    fn idle_candidates(&self, max_idle: Duration) -> usize;

    /// Close idle connections, returning how many were closed.
    fn evict_idle(&self) -> impl Future<Output = usize> + Send;

    fn is_closed(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Healthy,
    Invalid,
    Error,
}

/// Outcome of one [`HealthMonitor::run_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub pool: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub failed_checks: u32,
    pub critical_failures: u32,
    pub reinitialized: bool,
    pub healing_halted: bool,
    pub idle_candidates: usize,
    pub evicted: usize,
}

pub struct HealthMonitor<T: HealthTarget> {
    target: Arc<T>,
    options: HealthOptions,
    failed_checks: AtomicU32,
    critical_failures: AtomicU32,
    healing_halted: AtomicBool,
    reinitializations: AtomicU64,
    checks: AtomicU64,
    check_lock: Mutex<()>,
}

impl<T: HealthTarget> HealthMonitor<T> {
    pub fn new(target: Arc<T>, options: HealthOptions) -> Self {
        Self {
            target,
            options,
            failed_checks: AtomicU32::new(0),
            critical_failures: AtomicU32::new(0),
            healing_halted: AtomicBool::new(false),
            reinitializations: AtomicU64::new(0),
            checks: AtomicU64::new(0),
            check_lock: Mutex::new(()),
        }
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    pub fn options(&self) -> &HealthOptions {
        &self.options
    }

    pub fn failed_checks(&self) -> u32 {
        self.failed_checks.load(Ordering::SeqCst)
    }

    pub fn critical_failures(&self) -> u32 {
        self.critical_failures.load(Ordering::SeqCst)
    }

    /// Automatic reinitializations attempted.
    pub fn reinitializations(&self) -> u64 {
        self.reinitializations.load(Ordering::SeqCst)
    }

    pub fn checks_run(&self) -> u64 {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn is_healing_halted(&self) -> bool {
        self.healing_halted.load(Ordering::SeqCst)
    }

    /// Run one health check now.
    pub async fn run_check(&self) -> HealthReport {
        let _serial = self.check_lock.lock().await;
        self.checks.fetch_add(1, Ordering::SeqCst);
        let pool = self.target.name().to_string();

        let mut heal_reason = None;
        let (status, message) = match self.target.probe(self.options.validation_timeout()).await {
            ProbeOutcome::Healthy => {
                self.failed_checks.store(0, Ordering::SeqCst);
                self.critical_failures.store(0, Ordering::SeqCst);
                self.target.mark_healthy();
                debug!(pool = %pool, "Health check passed");
                (CheckStatus::Healthy, None)
            }
            ProbeOutcome::Invalid(reason) => {
                let failed = self.failed_checks.fetch_add(1, Ordering::SeqCst) + 1;
                self.target.mark_degraded();
                warn!(
                    pool = %pool,
                    failed_checks = failed,
                    max_failed_checks = self.options.max_failed_checks,
                    reason = %reason,
                    "Health check failed"
                );
                if failed >= self.options.max_failed_checks {
                    heal_reason = Some("max failed checks reached");
                }
                (CheckStatus::Invalid, Some(reason))
            }
            ProbeOutcome::Error(e) => {
                let critical = self.critical_failures.fetch_add(1, Ordering::SeqCst) + 1;
                self.target.mark_degraded();
                warn!(
                    pool = %pool,
                    critical_failures = critical,
                    threshold = self.options.critical_failure_threshold,
                    error = %e,
                    "Health check probe error"
                );
                if critical >= self.options.critical_failure_threshold {
                    heal_reason = Some("critical failure threshold reached");
                }
                (CheckStatus::Error, Some(e.to_string()))
            }
        };

        let reinitialized = match heal_reason {
            Some(reason) => self.heal(reason).await,
            None => false,
        };

        let idle_candidates = self
            .target
            .idle_candidates(self.options.connection_max_idle_time());
        let evicted = if idle_candidates > self.options.idle_eviction_threshold {
            info!(
                pool = %pool,
                idle_candidates,
                threshold = self.options.idle_eviction_threshold,
                "Idle connection count above threshold, evicting"
            );
            self.target.evict_idle().await
        } else {
            0
        };

        HealthReport {
            pool,
            status,
            message,
            failed_checks: self.failed_checks(),
            critical_failures: self.critical_failures(),
            reinitialized,
            healing_halted: self.is_healing_halted(),
            idle_candidates,
            evicted,
        }
    }

    async fn heal(&self, reason: &str) -> bool {
        let pool = self.target.name();
        if self.is_healing_halted() {
            warn!(
                pool = %pool,
                reason,
                "Automatic healing halted after a failed reinitialization, operator action required"
            );
            return false;
        }

        self.failed_checks.store(0, Ordering::SeqCst);
        self.critical_failures.store(0, Ordering::SeqCst);
        self.reinitializations.fetch_add(1, Ordering::SeqCst);
        info!(pool = %pool, reason, "Reinitializing pool");

        match self.target.reinitialize().await {
            Ok(()) => true,
            Err(e) => {
                self.healing_halted.store(true, Ordering::SeqCst);
                error!(
                    pool = %pool,
                    error = %e,
                    "Pool reinitialization failed, automatic healing halted"
                );
                false
            }
        }
    }

    /// Operator-initiated reinitialization. Success resumes automatic healing.
    pub async fn reinitialize(&self) -> DbResult<()> {
        let _serial = self.check_lock.lock().await;
        self.target.reinitialize().await?;
        self.failed_checks.store(0, Ordering::SeqCst);
        self.critical_failures.store(0, Ordering::SeqCst);
        if self.healing_halted.swap(false, Ordering::SeqCst) {
            info!(pool = %self.target.name(), "Automatic healing resumed");
        }
        Ok(())
    }

    /// Run checks every `HealthOptions::interval` until the monitor is
    /// dropped, the target closes, or the returned task is cancelled.
    pub fn start(self: &Arc<Self>, scheduler: &dyn Scheduler) -> ScheduledTask {
        let weak = Arc::downgrade(self);
        let name = format!("health-check:{}", self.target.name());
        scheduler.schedule_repeating(
            &name,
            self.options.interval(),
            Box::new(move || {
                let weak = weak.clone();
                async move {
                    // Exit if the monitor was dropped
                    let Some(monitor) = weak.upgrade() else {
                        return ControlFlow::Break(());
                    };
                    if monitor.target.is_closed() {
                        return ControlFlow::Break(());
                    }
                    monitor.run_check().await;
                    ControlFlow::Continue(())
                }
                .boxed()
            }),
        )
    }
}

impl<T: HealthTarget> std::fmt::Debug for HealthMonitor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("pool", &self.target.name())
            .field("failed_checks", &self.failed_checks())
            .field("critical_failures", &self.critical_failures())
            .field("healing_halted", &self.is_healing_halted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::scheduler::TokioScheduler;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakePool {
        outcomes: std::sync::Mutex<VecDeque<ProbeOutcome>>,
        reinit_calls: AtomicUsize,
        fail_reinit: AtomicBool,
        degraded: AtomicBool,
        idle: AtomicUsize,
        evictions: AtomicUsize,
        closed: AtomicBool,
    }

    impl FakePool {
        fn script(&self, outcomes: impl IntoIterator<Item = ProbeOutcome>) {
            self.outcomes.lock().unwrap().extend(outcomes);
        }
    }

    fn invalid() -> ProbeOutcome {
        ProbeOutcome::Invalid("connection is not valid".to_string())
    }

    fn error() -> ProbeOutcome {
        ProbeOutcome::Error(DbError::connection("refused", "start the server"))
    }

    impl HealthTarget for FakePool {
        fn name(&self) -> &str {
            "fake"
        }

        async fn probe(&self, _timeout: Duration) -> ProbeOutcome {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ProbeOutcome::Healthy)
        }

        async fn reinitialize(&self) -> DbResult<()> {
            self.reinit_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_reinit.load(Ordering::SeqCst) {
                Err(DbError::connection("still down", "start the server"))
            } else {
                Ok(())
            }
        }

        fn mark_degraded(&self) {
            self.degraded.store(true, Ordering::SeqCst);
        }

        fn mark_healthy(&self) {
            self.degraded.store(false, Ordering::SeqCst);
        }

        fn idle_candidates(&self, _max_idle: Duration) -> usize {
            self.idle.load(Ordering::SeqCst)
        }

        async fn evict_idle(&self) -> usize {
            self.evictions.fetch_add(1, Ordering::SeqCst);
            self.idle.swap(0, Ordering::SeqCst)
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn monitor(options: HealthOptions) -> (Arc<FakePool>, HealthMonitor<FakePool>) {
        let pool = Arc::new(FakePool::default());
        let monitor = HealthMonitor::new(Arc::clone(&pool), options);
        (pool, monitor)
    }

    #[tokio::test]
    async fn test_reinitializes_once_after_max_failed_checks() {
        let (pool, monitor) = monitor(HealthOptions {
            max_failed_checks: 3,
            ..HealthOptions::default()
        });
        pool.script([invalid(), invalid(), invalid()]);

        for expected in 1..=2 {
            let report = monitor.run_check().await;
            assert_eq!(report.status, CheckStatus::Invalid);
            assert_eq!(report.failed_checks, expected);
            assert!(!report.reinitialized);
        }
        assert!(pool.degraded.load(Ordering::SeqCst));
        assert_eq!(pool.reinit_calls.load(Ordering::SeqCst), 0);

        let report = monitor.run_check().await;
        assert!(report.reinitialized);
        assert_eq!(pool.reinit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.failed_checks(), 0);
    }

    #[tokio::test]
    async fn test_success_resets_counters() {
        let (pool, monitor) = monitor(HealthOptions::default());
        pool.script([invalid(), error(), invalid(), ProbeOutcome::Healthy]);
        monitor.run_check().await;
        monitor.run_check().await;
        monitor.run_check().await;
        assert_eq!(monitor.failed_checks(), 2);
        assert_eq!(monitor.critical_failures(), 1);

        let report = monitor.run_check().await;
        assert_eq!(report.status, CheckStatus::Healthy);
        assert_eq!(monitor.failed_checks(), 0);
        assert_eq!(monitor.critical_failures(), 0);
        assert!(!pool.degraded.load(Ordering::SeqCst));
        assert_eq!(pool.reinit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_errors_use_critical_threshold() {
        let (pool, monitor) = monitor(HealthOptions {
            max_failed_checks: 2,
            critical_failure_threshold: 4,
            ..HealthOptions::default()
        });
        pool.script([error(), error(), error()]);
        for _ in 0..3 {
            assert!(!monitor.run_check().await.reinitialized);
        }
        // Errors never count toward the invalid-connection counter
        assert_eq!(monitor.failed_checks(), 0);

        pool.script([error()]);
        assert!(monitor.run_check().await.reinitialized);
        assert_eq!(pool.reinit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.critical_failures(), 0);
    }

    #[tokio::test]
    async fn test_failed_reinit_halts_healing() {
        let (pool, monitor) = monitor(HealthOptions {
            max_failed_checks: 1,
            ..HealthOptions::default()
        });
        pool.fail_reinit.store(true, Ordering::SeqCst);
        pool.script([invalid(), invalid(), invalid()]);

        let report = monitor.run_check().await;
        assert!(!report.reinitialized);
        assert!(report.healing_halted);
        monitor.run_check().await;
        monitor.run_check().await;
        assert_eq!(pool.reinit_calls.load(Ordering::SeqCst), 1);

        // Operator intervention
        pool.fail_reinit.store(false, Ordering::SeqCst);
        monitor.reinitialize().await.unwrap();
        assert!(!monitor.is_healing_halted());
        assert_eq!(pool.reinit_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idle_eviction_above_threshold() {
        let (pool, monitor) = monitor(HealthOptions {
            idle_eviction_threshold: 2,
            ..HealthOptions::default()
        });
        pool.idle.store(2, Ordering::SeqCst);
        let report = monitor.run_check().await;
        assert_eq!(report.evicted, 0);

        pool.idle.store(3, Ordering::SeqCst);
        let report = monitor.run_check().await;
        assert_eq!(report.idle_candidates, 3);
        assert_eq!(report.evicted, 3);
        assert_eq!(pool.evictions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_checks_stop_when_closed() {
        let (pool, monitor) = monitor(HealthOptions {
            interval_secs: 10,
            ..HealthOptions::default()
        });
        let monitor = Arc::new(monitor);
        let task = monitor.start(&TokioScheduler);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(monitor.checks_run(), 3);

        pool.closed.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(task.is_finished());
        assert_eq!(monitor.checks_run(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_checks_stop_when_dropped() {
        let (_pool, monitor) = monitor(HealthOptions {
            interval_secs: 1,
            ..HealthOptions::default()
        });
        let monitor = Arc::new(monitor);
        let task = monitor.start(&TokioScheduler);
        drop(monitor);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(task.is_finished());
    }
}
