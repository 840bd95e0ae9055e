//! Transactions bound to a single pooled connection.
//!
//! A [`Transaction`] owns its connection for its whole lifetime. Dropping it
//! without calling [`Transaction::commit`] rolls the work back and returns the
//! connection to the pool in autocommit mode.

use crate::db::executor::{self, ExecOutcome};
use crate::db::guard::StatementGuard;
use crate::db::pool::ConnRef;
use crate::db::tracker::Lease;
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use crate::query::Statement;
use crate::stats::QueryStatistics;
use sqlx::{MySql, Postgres, Sqlite};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Database-specific transaction (H2 uses the `Postgres` variant).
pub(crate) enum TxInner {
    MySql(sqlx::Transaction<'static, MySql>),
    Postgres(sqlx::Transaction<'static, Postgres>),
    Sqlite(sqlx::Transaction<'static, Sqlite>),
}

pub struct Transaction {
    inner: TxInner,
    dialect: Dialect,
    pool_name: String,
    stats: Option<Arc<QueryStatistics>>,
    guard: StatementGuard,
    started: Instant,
    lease: Lease,
}

impl Transaction {
    pub(crate) fn new(inner: TxInner, dialect: Dialect, pool_name: String, lease: Lease) -> Self {
        debug!(pool = %pool_name, lease_id = lease.id(), "Transaction started");
        Self {
            inner,
            dialect,
            pool_name,
            stats: None,
            guard: StatementGuard::disabled(),
            started: Instant::now(),
            lease,
        }
    }

    pub(crate) fn with_stats(mut self, stats: Arc<QueryStatistics>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub(crate) fn with_guard(mut self, guard: StatementGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    fn conn(&mut self) -> ConnRef<'_> {
        match &mut self.inner {
            TxInner::MySql(tx) => ConnRef::MySql(&mut **tx),
            TxInner::Postgres(tx) => ConnRef::Postgres(&mut **tx),
            TxInner::Sqlite(tx) => ConnRef::Sqlite(&mut **tx),
        }
    }

    fn record(&self, sql: &str, start: Instant, success: bool) {
        if let Some(stats) = &self.stats {
            stats.record(sql, start.elapsed(), success);
        }
    }

    pub async fn query<T, F>(&mut self, sql: &str, params: &[SqlValue], mapper: F) -> DbResult<Vec<T>>
    where
        F: Fn(&Row) -> DbResult<T>,
    {
        self.guard.check(sql, self.dialect)?;
        let dialect = self.dialect;
        let start = Instant::now();
        let result = executor::fetch_rows(self.conn(), dialect, sql, params).await;
        self.record(sql, start, result.is_ok());
        result?.iter().map(mapper).collect()
    }

    pub async fn query_first<T, F>(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        mapper: F,
    ) -> DbResult<Option<T>>
    where
        F: Fn(&Row) -> DbResult<T>,
    {
        self.guard.check(sql, self.dialect)?;
        let dialect = self.dialect;
        let start = Instant::now();
        let result = executor::fetch_rows(self.conn(), dialect, sql, params).await;
        self.record(sql, start, result.is_ok());
        result?.first().map(mapper).transpose()
    }

    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<ExecOutcome> {
        self.guard.check(sql, self.dialect)?;
        let dialect = self.dialect;
        let start = Instant::now();
        let result = executor::execute(self.conn(), dialect, sql, params).await;
        self.record(sql, start, result.is_ok());
        result
    }

    /// Rows affected by a write.
    pub async fn update(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        Ok(self.execute(sql, params).await?.rows_affected)
    }

    /// Run a statement rendered by a builder.
    pub async fn execute_statement(&mut self, statement: &Statement) -> DbResult<u64> {
        self.update(&statement.sql, &statement.params).await
    }

    pub async fn commit(self) -> DbResult<()> {
        let Self {
            inner,
            pool_name,
            started,
            lease,
            ..
        } = self;
        let result = match inner {
            TxInner::MySql(tx) => tx.commit().await,
            TxInner::Postgres(tx) => tx.commit().await,
            TxInner::Sqlite(tx) => tx.commit().await,
        };
        debug!(
            pool = %pool_name,
            lease_id = lease.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Transaction commit"
        );
        result.map_err(|e| DbError::transaction(format!("Commit failed: {}", e)))
    }

    pub async fn rollback(self) -> DbResult<()> {
        let Self {
            inner,
            pool_name,
            lease,
            ..
        } = self;
        let result = match inner {
            TxInner::MySql(tx) => tx.rollback().await,
            TxInner::Postgres(tx) => tx.rollback().await,
            TxInner::Sqlite(tx) => tx.rollback().await,
        };
        debug!(pool = %pool_name, lease_id = lease.id(), "Transaction rolled back");
        result.map_err(|e| DbError::transaction(format!("Rollback failed: {}", e)))
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("pool", &self.pool_name)
            .field("dialect", &self.dialect)
            .field("lease", &self.lease.id())
            .finish()
    }
}
