//! Named pool registry.
//!
//! Holds the main pool plus lazily created secondary pools keyed by logical
//! name ("reports", "shared", ...). Secondary pools are created at most once
//! per name:
//!
//! - **`OnceCell` per name**: concurrent first requests for an unseen name
//!   converge on a single construction; losers wait for the winner's result
//! - **Double-checked map insert**: the cell is looked up under a read lock
//!   and only inserted under the write lock after re-checking
//! - **Failed construction leaves the cell empty**: the next request retries
//!
//! Locks are never held across pool construction; only the cell is.

use crate::config::DatabaseConfig;
use crate::db::health::HealthMonitor;
use crate::db::pool::ConnectionPool;
use crate::error::{DbError, DbResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{OnceCell, RwLock as TokioRwLock};
use tracing::{debug, info};

/// Name of the pool a [`PoolRegistry`] is created with.
pub const MAIN_POOL: &str = "main";

type PoolCell = Arc<OnceCell<Arc<ConnectionPool>>>;

pub struct PoolRegistry {
    main: Arc<ConnectionPool>,
    /// Per-name configs registered up front. Uses std::sync (never held across await).
    configs: RwLock<HashMap<String, DatabaseConfig>>,
    pools: TokioRwLock<HashMap<String, PoolCell>>,
    monitors: Mutex<HashMap<String, Arc<HealthMonitor<ConnectionPool>>>>,
    created: AtomicUsize,
}

impl PoolRegistry {
    pub fn new(main: Arc<ConnectionPool>) -> Self {
        Self {
            main,
            configs: RwLock::new(HashMap::new()),
            pools: TokioRwLock::new(HashMap::new()),
            monitors: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        }
    }

    pub fn main(&self) -> &Arc<ConnectionPool> {
        &self.main
    }

    /// Use `config` instead of the derived one when `name` is first requested.
    ///
    /// Has no effect on a pool that already exists.
    pub fn register_config(&self, name: impl Into<String>, config: DatabaseConfig) {
        let name = name.into();
        debug!(pool = %name, url = %config.masked_connection_string(), "Registered pool config");
        self.configs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, config);
    }

    fn config_for(&self, name: &str) -> DbResult<DatabaseConfig> {
        let registered = self
            .configs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned();
        match registered {
            Some(config) => Ok(config),
            None => self
                .main
                .config()
                .for_database(name)
                .map_err(DbError::invalid_input),
        }
    }

    /// Get the pool for `name`, creating and initializing it on first use.
    pub async fn get_or_create(&self, name: &str) -> DbResult<Arc<ConnectionPool>> {
        if name == MAIN_POOL {
            return Ok(Arc::clone(&self.main));
        }
        if name.trim().is_empty() {
            return Err(DbError::invalid_input("Pool name cannot be empty"));
        }

        let cell = {
            let pools = self.pools.read().await;
            if let Some(cell) = pools.get(name) {
                Arc::clone(cell)
            } else {
                drop(pools);
                let mut pools = self.pools.write().await;
                // Double-check after acquiring write lock
                if let Some(cell) = pools.get(name) {
                    Arc::clone(cell)
                } else {
                    let cell = Arc::new(OnceCell::new());
                    pools.insert(name.to_string(), Arc::clone(&cell));
                    cell
                }
            }
        };

        let pool = cell
            .get_or_try_init(|| async {
                let config = self.config_for(name)?;
                let pool = ConnectionPool::new(name, config);
                pool.initialize().await?;
                self.created.fetch_add(1, Ordering::SeqCst);
                info!(pool = %name, "Created named pool");
                Ok::<_, DbError>(Arc::new(pool))
            })
            .await?;
        Ok(Arc::clone(pool))
    }

    /// Look up an existing pool without creating it.
    pub async fn get(&self, name: &str) -> DbResult<Arc<ConnectionPool>> {
        if name == MAIN_POOL {
            return Ok(Arc::clone(&self.main));
        }
        let pools = self.pools.read().await;
        pools
            .get(name)
            .and_then(|cell| cell.get().cloned())
            .ok_or_else(|| DbError::pool_not_found(name))
    }

    /// Names of all constructed pools, main first.
    pub async fn names(&self) -> Vec<String> {
        let pools = self.pools.read().await;
        let mut secondary: Vec<String> = pools
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        secondary.sort();
        std::iter::once(MAIN_POOL.to_string())
            .chain(secondary)
            .collect()
    }

    /// Secondary pools constructed so far.
    pub fn pools_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// The health monitor of `pool`, created on first request.
    pub fn health_monitor(&self, pool: &Arc<ConnectionPool>) -> Arc<HealthMonitor<ConnectionPool>> {
        let mut monitors = self
            .monitors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(monitors.entry(pool.name().to_string()).or_insert_with(|| {
            Arc::new(HealthMonitor::new(
                Arc::clone(pool),
                pool.config().health.clone(),
            ))
        }))
    }

    /// Close every pool, main included, and drop their health monitors.
    ///
    /// Scheduled checks hold only weak references and stop on their next tick.
    pub async fn close_all(&self) {
        let monitors: Vec<_> = self
            .monitors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .collect();
        debug!(monitors = monitors.len(), "Dropping health monitors");
        drop(monitors);

        // Drain under lock, close outside lock
        let cells: Vec<_> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        };
        for (name, cell) in cells {
            if let Some(pool) = cell.get() {
                info!(pool = %name, "Closing named pool");
                pool.close().await;
            }
        }
        self.main.close().await;
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("main", &self.main.name())
            .field("created", &self.pools_created())
            .finish()
    }
}
