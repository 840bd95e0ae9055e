//! The database facade.
//!
//! [`Database`] unifies statement execution over one named pool. Three call
//! families share the same semantics and differ only in how failures reach
//! the caller:
//!
//! - plain calls (`query`, `update`, ...) are awaited by the caller and return
//!   `DbResult`
//! - `_async` calls run on the bounded worker pool and return a cancellable
//!   [`QueryTask`]
//! - `_safe` calls log failures and return an empty or zero default
//!
//! Every call leases a connection for its own duration only; the lease is
//! released on every exit path. Statements pass the [`StatementGuard`] before
//! any network round-trip, and every executed statement is recorded in the
//! shared [`QueryStatistics`].

use crate::config::DatabaseConfig;
use crate::db::executor::ExecOutcome;
use crate::db::guard::StatementGuard;
use crate::db::health::HealthMonitor;
use crate::db::pool::{ConnectionPool, PoolStatistics};
use crate::db::registry::{MAIN_POOL, PoolRegistry};
use crate::db::scheduler::{ScheduledTask, Scheduler};
use crate::db::transaction::Transaction;
use crate::db::worker::{AsyncExecutor, QueryTask, TaskOptions};
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use crate::query::{DeleteBuilder, InsertBuilder, SelectBuilder, UpdateBuilder};
use crate::stats::QueryStatistics;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// State shared by every facade created from one [`Database::connect`].
struct Shared {
    registry: PoolRegistry,
    stats: Arc<QueryStatistics>,
    workers: AsyncExecutor,
}

/// Facade over one pool. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
    pool: Arc<ConnectionPool>,
    guard: StatementGuard,
}

impl Database {
    /// Create and initialize the main pool.
    pub async fn connect(config: DatabaseConfig) -> DbResult<Self> {
        config.validate().map_err(DbError::invalid_input)?;
        let guard = StatementGuard::new(&config.guard);
        let workers = AsyncExecutor::new(&config.async_options);
        let pool = Arc::new(ConnectionPool::new(MAIN_POOL, config));
        pool.initialize().await?;

        Ok(Self {
            shared: Arc::new(Shared {
                registry: PoolRegistry::new(Arc::clone(&pool)),
                stats: Arc::new(QueryStatistics::new()),
                workers,
            }),
            pool,
            guard,
        })
    }

    pub async fn connect_url(url: &str) -> DbResult<Self> {
        let config = DatabaseConfig::parse(url).map_err(DbError::invalid_input)?;
        Self::connect(config).await
    }

    /// Facade over the named pool, created on first use.
    ///
    /// Shares statistics and async workers with `self`.
    pub async fn named(&self, name: &str) -> DbResult<Database> {
        let pool = self.shared.registry.get_or_create(name).await?;
        let guard = StatementGuard::new(&pool.config().guard);
        Ok(Self {
            shared: Arc::clone(&self.shared),
            pool,
            guard,
        })
    }

    /// Like [`Database::named`], but fails with `PoolNotFound` instead of
    /// creating the pool.
    pub async fn existing(&self, name: &str) -> DbResult<Database> {
        let pool = self.shared.registry.get(name).await?;
        let guard = StatementGuard::new(&pool.config().guard);
        Ok(Self {
            shared: Arc::clone(&self.shared),
            pool,
            guard,
        })
    }

    /// Replace the statement guard for calls through this facade.
    pub fn with_guard(mut self, guard: StatementGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    pub fn name(&self) -> &str {
        self.pool.name()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.shared.registry
    }

    pub fn workers(&self) -> &AsyncExecutor {
        &self.shared.workers
    }

    fn record(&self, sql: &str, start: Instant, success: bool) {
        self.shared.stats.record(sql, start.elapsed(), success);
    }

    // =========================================================================
    // Statement execution
    // =========================================================================

    /// Run a query and map every row.
    pub async fn query<T, F>(&self, sql: &str, params: &[SqlValue], mapper: F) -> DbResult<Vec<T>>
    where
        F: Fn(&Row) -> DbResult<T>,
    {
        self.guard.check(sql, self.dialect())?;
        let start = Instant::now();
        let result = async {
            let mut conn = self.pool.acquire().await?;
            conn.query(sql, params).await
        }
        .await;
        self.record(sql, start, result.is_ok());
        result?.iter().map(mapper).collect()
    }

    /// Run a query and map the first row, if any.
    pub async fn query_first<T, F>(
        &self,
        sql: &str,
        params: &[SqlValue],
        mapper: F,
    ) -> DbResult<Option<T>>
    where
        F: Fn(&Row) -> DbResult<T>,
    {
        self.guard.check(sql, self.dialect())?;
        let start = Instant::now();
        let result = async {
            let mut conn = self.pool.acquire().await?;
            conn.query(sql, params).await
        }
        .await;
        self.record(sql, start, result.is_ok());
        result?.first().map(mapper).transpose()
    }

    /// Run a write and report rows affected plus any generated key.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<ExecOutcome> {
        self.guard.check(sql, self.dialect())?;
        let start = Instant::now();
        let result = async {
            let mut conn = self.pool.acquire().await?;
            conn.execute(sql, params).await
        }
        .await;
        self.record(sql, start, result.is_ok());
        result
    }

    /// Run a write and return rows affected.
    pub async fn update(&self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        Ok(self.execute(sql, params).await?.rows_affected)
    }

    /// Run one statement once per parameter set, all in a single transaction.
    ///
    /// Returns rows affected per set. Any failure rolls every set back.
    pub async fn batch_update(
        &self,
        sql: &str,
        param_sets: Vec<Vec<SqlValue>>,
    ) -> DbResult<Vec<u64>> {
        self.guard.check(sql, self.dialect())?;
        if param_sets.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let result = async {
            let mut tx = self.pool.begin().await?;
            let mut counts = Vec::with_capacity(param_sets.len());
            for params in &param_sets {
                counts.push(tx.update(sql, params).await?);
            }
            tx.commit().await?;
            Ok::<_, DbError>(counts)
        }
        .await;
        self.record(sql, start, result.is_ok());
        debug!(pool = %self.name(), sets = param_sets.len(), ok = result.is_ok(), "Batch update");
        result
    }

    /// Run a single-row INSERT and return the generated key of column `id`.
    ///
    /// See [`Database::insert_returning_key`].
    pub async fn insert_returning_id(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<i64>> {
        self.insert_returning_key(sql, params, "id").await
    }

    /// Run a single-row INSERT and return the generated key.
    ///
    /// MySQL and SQLite take the key the driver reports. PostgreSQL and H2
    /// read `key_column` back from the INSERT itself, so a key left behind
    /// by an earlier statement on the pooled connection is never returned.
    pub async fn insert_returning_key(
        &self,
        sql: &str,
        params: &[SqlValue],
        key_column: &str,
    ) -> DbResult<Option<i64>> {
        self.guard.check(sql, self.dialect())?;
        let start = Instant::now();
        let result = async {
            let mut conn = self.pool.acquire().await?;
            match self.dialect().generated_key_query(sql, key_column) {
                Some(keyed) => {
                    let rows = conn.query(&keyed, params).await?;
                    Ok(rows.first().and_then(|row| row.get_at::<i64>(0).ok()))
                }
                None => Ok(conn.execute(sql, params).await?.last_insert_id),
            }
        }
        .await;
        self.record(sql, start, result.is_ok());
        result
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begin a transaction on a dedicated connection.
    ///
    /// Dropping the transaction without committing rolls it back.
    pub async fn begin(&self) -> DbResult<Transaction> {
        Ok(self
            .pool
            .begin()
            .await?
            .with_stats(Arc::clone(&self.shared.stats))
            .with_guard(self.guard.clone()))
    }

    /// Begin a transaction that skips the statement guard (migrations).
    pub(crate) async fn begin_unguarded(&self) -> DbResult<Transaction> {
        Ok(self
            .pool
            .begin()
            .await?
            .with_stats(Arc::clone(&self.shared.stats)))
    }

    /// Run `work` in one transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// ```no_run
    /// # use sql_toolkit::{params, Database, DbResult};
    /// # use futures_util::FutureExt;
    /// # async fn demo(db: &Database) -> DbResult<()> {
    /// db.execute_transaction(|tx| {
    ///     async move {
    ///         tx.update("UPDATE accounts SET balance = balance - ? WHERE id = ?", &params![10, 1]).await?;
    ///         tx.update("UPDATE accounts SET balance = balance + ? WHERE id = ?", &params![10, 2]).await?;
    ///         Ok(())
    ///     }
    ///     .boxed()
    /// })
    /// .await
    /// # }
    /// ```
    pub async fn execute_transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, DbResult<T>>,
    {
        let mut tx = self.begin().await?;
        match work(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(pool = %self.name(), error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // Async variants
    // =========================================================================

    /// Spawn arbitrary work against this database on the worker pool.
    pub fn spawn_task<T, F, Fut>(&self, options: TaskOptions, work: F) -> QueryTask<T>
    where
        T: Send + 'static,
        F: FnOnce(Database) -> Fut,
        Fut: Future<Output = DbResult<T>> + Send + 'static,
    {
        self.shared.workers.spawn(options, work(self.clone()))
    }

    pub fn query_async<T, F>(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
        mapper: F,
    ) -> QueryTask<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(&Row) -> DbResult<T> + Send + Sync + 'static,
    {
        let sql = sql.into();
        self.spawn_task(TaskOptions::new(), move |db| async move {
            db.query(&sql, &params, mapper).await
        })
    }

    pub fn update_async(&self, sql: impl Into<String>, params: Vec<SqlValue>) -> QueryTask<u64> {
        let sql = sql.into();
        self.spawn_task(TaskOptions::new(), move |db| async move {
            db.update(&sql, &params).await
        })
    }

    pub fn batch_update_async(
        &self,
        sql: impl Into<String>,
        param_sets: Vec<Vec<SqlValue>>,
    ) -> QueryTask<Vec<u64>> {
        let sql = sql.into();
        self.spawn_task(TaskOptions::new(), move |db| async move {
            db.batch_update(&sql, param_sets).await
        })
    }

    /// Cancelling the returned task rolls the transaction back.
    pub fn execute_transaction_async<T, F>(&self, options: TaskOptions, work: F) -> QueryTask<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, DbResult<T>> + Send + 'static,
    {
        self.spawn_task(options, move |db| async move {
            db.execute_transaction(work).await
        })
    }

    // =========================================================================
    // Safe variants
    // =========================================================================

    /// Like [`query`](Self::query), but logs failures and returns no rows.
    pub async fn query_safe<T, F>(&self, sql: &str, params: &[SqlValue], mapper: F) -> Vec<T>
    where
        F: Fn(&Row) -> DbResult<T>,
    {
        self.query(sql, params, mapper)
            .await
            .unwrap_or_else(|e| self.swallow("query", sql, e))
    }

    pub async fn query_first_safe<T, F>(&self, sql: &str, params: &[SqlValue], mapper: F) -> Option<T>
    where
        F: Fn(&Row) -> DbResult<T>,
    {
        self.query_first(sql, params, mapper)
            .await
            .unwrap_or_else(|e| self.swallow("query", sql, e))
    }

    pub async fn update_safe(&self, sql: &str, params: &[SqlValue]) -> u64 {
        self.update(sql, params)
            .await
            .unwrap_or_else(|e| self.swallow("update", sql, e))
    }

    pub async fn batch_update_safe(&self, sql: &str, param_sets: Vec<Vec<SqlValue>>) -> Vec<u64> {
        self.batch_update(sql, param_sets)
            .await
            .unwrap_or_else(|e| self.swallow("batch update", sql, e))
    }

    /// `None` when the transaction failed and was rolled back.
    pub async fn execute_transaction_safe<T, F>(&self, work: F) -> Option<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, DbResult<T>>,
    {
        match self.execute_transaction(work).await {
            Ok(value) => Some(value),
            Err(e) => self.swallow("transaction", "", e),
        }
    }

    fn swallow<T: Default>(&self, operation: &str, sql: &str, error: DbError) -> T {
        warn!(
            pool = %self.name(),
            operation,
            sql = %crate::stats::normalize_signature(sql),
            error = %error,
            "Operation failed, returning default"
        );
        T::default()
    }

    // =========================================================================
    // Schema helpers
    // =========================================================================

    pub async fn table_exists(&self, table: &str) -> DbResult<bool> {
        let count = self
            .query_first(
                self.dialect().table_exists_sql(),
                &[SqlValue::from(table)],
                |row| row.get_at::<i64>(0),
            )
            .await?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Create `table` unless it exists. Returns whether it was created.
    pub async fn create_table_if_not_exists<S: AsRef<str>>(
        &self,
        table: &str,
        column_defs: &[S],
    ) -> DbResult<bool> {
        if column_defs.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Table '{}' needs at least one column",
                table
            )));
        }
        if self.table_exists(table).await? {
            return Ok(false);
        }
        let defs = column_defs
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TABLE {} ({})",
            self.dialect().format_table_name(table),
            defs
        );
        self.update(&sql, &[]).await?;
        info!(pool = %self.name(), table, "Created table");
        Ok(true)
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn select(&self) -> SelectBuilder {
        SelectBuilder::bound(self.clone())
    }

    pub fn insert(&self) -> InsertBuilder {
        InsertBuilder::bound(self.clone())
    }

    pub fn update_table(&self) -> UpdateBuilder {
        UpdateBuilder::bound(self.clone())
    }

    pub fn delete(&self) -> DeleteBuilder {
        DeleteBuilder::bound(self.clone())
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    pub fn query_statistics(&self) -> &Arc<QueryStatistics> {
        &self.shared.stats
    }

    pub fn pool_statistics(&self) -> PoolStatistics {
        self.pool.statistics()
    }

    pub fn health_monitor(&self) -> Arc<HealthMonitor<ConnectionPool>> {
        self.shared.registry.health_monitor(&self.pool)
    }

    /// Run this pool's health checks on `scheduler` until the pool closes.
    pub fn start_health_monitor(&self, scheduler: &dyn Scheduler) -> ScheduledTask {
        self.health_monitor().start(scheduler)
    }

    /// Close every pool in the registry.
    pub async fn close(&self) {
        self.shared.registry.close_all().await;
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool", &self.pool.name())
            .field("dialect", &self.dialect())
            .field("state", &self.pool.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::worker::CancellationToken;
    use crate::params;
    use futures_util::FutureExt;
    use std::time::Duration;

    async fn players() -> Database {
        let db = Database::connect(DatabaseConfig::sqlite_memory()).await.unwrap();
        db.update(
            "CREATE TABLE players (id INTEGER PRIMARY KEY AUTOINCREMENT, uuid TEXT UNIQUE NOT NULL, name TEXT, kills INTEGER DEFAULT 0)",
            &[],
        )
        .await
        .unwrap();
        db
    }

    async fn count(db: &Database) -> i64 {
        db.query_first("SELECT COUNT(*) AS n FROM players", &[], |r| r.get::<i64>("n"))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_query_and_update() {
        let db = players().await;
        let inserted = db
            .update(
                "INSERT INTO players (uuid, name) VALUES (?, ?)",
                &params!["abc-123", "Alex"],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let names = db
            .query("SELECT name FROM players WHERE uuid = ?", &params!["abc-123"], |r| {
                r.get::<String>("name")
            })
            .await
            .unwrap();
        assert_eq!(names, vec!["Alex"]);

        let missing = db
            .query_first("SELECT name FROM players WHERE uuid = ?", &params!["nope"], |r| {
                r.get::<String>("name")
            })
            .await
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(db.pool_statistics().active_leases, 0);
    }

    #[tokio::test]
    async fn test_statistics_record_failures() {
        let db = players().await;
        let _ = db.query("SELECT * FROM missing_table", &[], |_| Ok(())).await;
        let stat = db.query_statistics().get("SELECT * FROM missing_table").unwrap();
        assert_eq!(stat.count, 1);
        assert_eq!(stat.failures, 1);
        assert_eq!(db.pool_statistics().active_leases, 0);
    }

    #[tokio::test]
    async fn test_guard_rejects_before_execution() {
        let db = players().await;
        let err = db.update("DELETE FROM players", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
        assert!(db.query_statistics().get("DELETE FROM players").is_none());

        let err = db.update("SELECT 1; DROP TABLE players", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
        assert!(db.table_exists("players").await.unwrap());

        let relaxed = db.clone().with_guard(StatementGuard::disabled());
        assert_eq!(relaxed.update("DELETE FROM players", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_update_is_atomic() {
        let db = players().await;
        let sql = "INSERT INTO players (uuid, name) VALUES (?, ?)";
        let counts = db
            .batch_update(sql, vec![params!["a", "A"], params!["b", "B"]])
            .await
            .unwrap();
        assert_eq!(counts, vec![1, 1]);

        let err = db
            .batch_update(sql, vec![params!["c", "C"], params!["a", "dup"]])
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(count(&db).await, 2);
        assert!(db.batch_update(sql, Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_returning_id() {
        let db = players().await;
        let first = db
            .insert_returning_id("INSERT INTO players (uuid) VALUES (?)", &params!["a"])
            .await
            .unwrap();
        let second = db
            .insert_returning_id("INSERT INTO players (uuid) VALUES (?)", &params!["b"])
            .await
            .unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let db = players().await;
        let id = db
            .execute_transaction(|tx| {
                async move {
                    tx.update("INSERT INTO players (uuid) VALUES (?)", &params!["a"])
                        .await?;
                    tx.query_first("SELECT id FROM players WHERE uuid = ?", &params!["a"], |r| {
                        r.get::<i64>("id")
                    })
                    .await
                }
                .boxed()
            })
            .await
            .unwrap();
        assert_eq!(id, Some(1));

        let err = db
            .execute_transaction(|tx| {
                async move {
                    tx.update("INSERT INTO players (uuid) VALUES (?)", &params!["b"])
                        .await?;
                    tx.update("INSERT INTO players (uuid) VALUES (?)", &params!["a"])
                        .await?;
                    Ok(())
                }
                .boxed()
            })
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(count(&db).await, 1);
        assert_eq!(db.pool_statistics().active_leases, 0);
    }

    #[tokio::test]
    async fn test_safe_variants_return_defaults() {
        let db = players().await;
        let rows: Vec<i64> = db
            .query_safe("SELECT nope FROM nowhere", &[], |r| r.get_at(0))
            .await;
        assert!(rows.is_empty());
        assert_eq!(db.update_safe("UPDATE nowhere SET a = 1 WHERE b = 2", &[]).await, 0);
        assert!(
            db.query_first_safe("SELECT nope FROM nowhere", &[], |r| r.get_at::<i64>(0))
                .await
                .is_none()
        );
        assert!(
            db.batch_update_safe("INSERT INTO nowhere VALUES (?)", vec![params![1]])
                .await
                .is_empty()
        );
        let outcome: Option<()> = db
            .execute_transaction_safe(|tx| {
                async move {
                    tx.update("INSERT INTO nowhere VALUES (1)", &[]).await?;
                    Ok(())
                }
                .boxed()
            })
            .await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_create_table_if_not_exists() {
        let db = Database::connect(DatabaseConfig::sqlite_memory()).await.unwrap();
        assert!(!db.table_exists("kills").await.unwrap());
        let defs = [
            db.dialect().auto_increment_primary_key("id"),
            "victim TEXT NOT NULL".to_string(),
        ];
        assert!(db.create_table_if_not_exists("kills", &defs).await.unwrap());
        assert!(!db.create_table_if_not_exists("kills", &defs).await.unwrap());
        assert!(db.table_exists("kills").await.unwrap());
        assert!(
            db.create_table_if_not_exists::<&str>("empty", &[])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_async_variants() {
        let db = players().await;
        let inserted = db
            .update_async("INSERT INTO players (uuid) VALUES (?)", params!["a"])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let uuids = db
            .query_async("SELECT uuid FROM players", Vec::new(), |r| r.get::<String>("uuid"))
            .await
            .unwrap();
        assert_eq!(uuids, vec!["a"]);

        let counts = db
            .batch_update_async(
                "UPDATE players SET kills = kills + ? WHERE uuid = ?",
                vec![params![1, "a"], params![2, "a"]],
            )
            .await
            .unwrap();
        assert_eq!(counts, vec![1, 1]);
    }

    #[tokio::test]
    async fn test_cancelled_transaction_rolls_back() {
        let db = players().await;
        let token = CancellationToken::new();
        let task = db.execute_transaction_async(
            TaskOptions::new().with_token(token.clone()),
            |tx| {
                async move {
                    tx.update("INSERT INTO players (uuid) VALUES (?)", &params!["ghost"])
                        .await?;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
                .boxed()
            },
        );
        // Wait until the insert holds the only connection
        while db.pool_statistics().active_leases == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        assert!(matches!(task.await, Err(DbError::Cancelled { .. })));
        assert_eq!(count(&db).await, 0);
        assert_eq!(db.pool_statistics().active_leases, 0);
    }

    #[tokio::test]
    async fn test_bound_builders_execute() {
        let db = players().await;
        db.insert()
            .into("players")
            .column_values([("uuid", SqlValue::from("abc-123")), ("name", SqlValue::from("Alex"))])
            .execute_update()
            .await
            .unwrap();
        db.update_table()
            .table("players")
            .set("kills", 5)
            .where_("uuid = ?", params!["abc-123"])
            .execute_update()
            .await
            .unwrap();
        let kills = db
            .select()
            .column("kills")
            .from("players")
            .where_("uuid = ?", params!["abc-123"])
            .fetch_first(|r| r.get::<i64>("kills"))
            .await
            .unwrap();
        assert_eq!(kills, Some(5));
        let removed = db
            .delete()
            .from("players")
            .where_("kills > ?", params![1])
            .execute_update()
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_named_database_shares_statistics() {
        let db = players().await;
        assert!(matches!(
            db.existing("reports").await.unwrap_err(),
            DbError::PoolNotFound { .. }
        ));
        let reports = db.named("reports").await.unwrap();
        assert_eq!(reports.name(), "reports");
        assert_eq!(db.existing("reports").await.unwrap().name(), "reports");
        assert_eq!(db.registry().pools_created(), 1);
        reports.query("SELECT 1", &[], |_| Ok(())).await.unwrap();
        assert!(db.query_statistics().get("SELECT 1").is_some());
        assert_eq!(db.registry().pools_created(), 1);
        db.close().await;
        assert!(reports.query("SELECT 1", &[], |_| Ok(())).await.is_err());
    }
}
