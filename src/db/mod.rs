//! Database access layer.
//!
//! This module provides:
//! - Named connection pools with a lifecycle state machine and lease tracking
//! - Periodic health checks with self-healing reinitialization
//! - Statement execution over MySQL, PostgreSQL, SQLite and H2 (PostgreSQL wire)
//! - Transactions bound to one connection
//! - The [`Database`] facade with plain, async (cancellable) and fail-soft calls
//! - A pre-execution statement guard

pub mod database;
pub mod executor;
pub mod guard;
pub mod health;
#[macro_use]
pub mod macros;
pub(crate) mod params;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod tracker;
pub mod transaction;
pub mod types;
pub mod worker;

pub use database::Database;
pub use executor::ExecOutcome;
pub use guard::{StatementGuard, Violation};
pub use health::{CheckStatus, HealthMonitor, HealthReport, HealthTarget, ProbeOutcome};
pub use pool::{Connection, ConnectionPool, DbPool, PoolState, PoolStatistics};
pub use registry::{MAIN_POOL, PoolRegistry};
pub use scheduler::{RepeatingTask, ScheduledTask, Scheduler, TokioScheduler};
pub use tracker::{ConnectionTracker, LeakCandidate, Lease};
pub use transaction::Transaction;
pub use worker::{AsyncExecutor, CancellationToken, QueryTask, TaskOptions};
