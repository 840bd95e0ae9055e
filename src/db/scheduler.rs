//! Periodic task scheduling.
//!
//! The health monitor only needs "run this callback every N seconds". Hosts
//! with their own timer can implement [`Scheduler`]; [`TokioScheduler`] is the
//! default.

use futures_util::future::BoxFuture;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Callback run on every tick. Returning `Break` stops the schedule.
pub type RepeatingTask = Box<dyn Fn() -> BoxFuture<'static, ControlFlow<()>> + Send + Sync>;

pub trait Scheduler: Send + Sync {
    /// Run `task` every `period`, first after one full period.
    fn schedule_repeating(&self, name: &str, period: Duration, task: RepeatingTask) -> ScheduledTask;
}

/// Handle to a running schedule.
#[derive(Debug)]
pub struct ScheduledTask {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle: Some(handle),
        }
    }

    /// Handle for a schedule managed elsewhere (e.g. a host timer).
    pub fn detached(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
            debug!(task = %self.name, "Scheduled task cancelled");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, name: &str, period: Duration, task: RepeatingTask) -> ScheduledTask {
        let label = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if task().await.is_break() {
                    debug!(task = %label, "Scheduled task stopped");
                    return;
                }
            }
        });
        ScheduledTask::new(name, handle)
    }
}
