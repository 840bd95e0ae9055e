//! Statement execution on a single connection.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL fetch and execute
//! - `postgres`: PostgreSQL (and H2 over the PostgreSQL wire protocol)
//! - `sqlite`: SQLite fetch and execute
//!
//! Each submodule provides identical functionality adapted to the database's
//! type system. `?` placeholders are rewritten for the dialect before binding.

use crate::db::pool::ConnRef;
use crate::db::types::decode_rows;
use crate::dialect::Dialect;
use crate::error::DbResult;
use crate::models::{Row, SqlValue};
use tracing::debug;

/// Result of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Generated key reported by the driver (MySQL, SQLite). PostgreSQL and H2
    /// report none; use `RETURNING` or the dialect's last-id query instead.
    pub last_insert_id: Option<i64>,
}

/// Run a statement and decode every returned row.
pub(crate) async fn fetch_rows(
    conn: ConnRef<'_>,
    dialect: Dialect,
    sql: &str,
    params: &[SqlValue],
) -> DbResult<Vec<Row>> {
    let sql = dialect.bind_placeholders(sql);
    debug!(dialect = %dialect, sql = %sql, params = params.len(), "Executing query");

    match conn {
        ConnRef::MySql(c) => mysql::fetch_rows(c, &sql, params).await,
        ConnRef::Postgres(c) => postgres::fetch_rows(c, &sql, params).await,
        ConnRef::Sqlite(c) => sqlite::fetch_rows(c, &sql, params).await,
    }
}

/// Run a write statement (INSERT, UPDATE, DELETE, DDL).
pub(crate) async fn execute(
    conn: ConnRef<'_>,
    dialect: Dialect,
    sql: &str,
    params: &[SqlValue],
) -> DbResult<ExecOutcome> {
    let sql = dialect.bind_placeholders(sql);
    debug!(dialect = %dialect, sql = %sql, params = params.len(), "Executing write operation");

    match conn {
        ConnRef::MySql(c) => mysql::execute(c, &sql, params).await,
        ConnRef::Postgres(c) => postgres::execute(c, &sql, params).await,
        ConnRef::Sqlite(c) => sqlite::execute(c, &sql, params).await,
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use crate::db::params::mysql_query;
    use sqlx::{Executor, MySqlConnection};

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<Row>> {
        // When params is empty, use raw SQL to avoid prepared statement issues
        let rows = if params.is_empty() {
            conn.fetch_all(sql).await?
        } else {
            mysql_query(sql, params).fetch_all(conn).await?
        };
        Ok(decode_rows(&rows))
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecOutcome> {
        // Some SQL (CREATE PROCEDURE, ...) can't be prepared
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            mysql_query(sql, params).execute(conn).await?
        };
        Ok(ExecOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: i64::try_from(result.last_insert_id())
                .ok()
                .filter(|id| *id != 0),
        })
    }
}

mod postgres {
    use super::*;
    use crate::db::params::postgres_query;
    use sqlx::{Executor, PgConnection};

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<Row>> {
        let rows = if params.is_empty() {
            conn.fetch_all(sql).await?
        } else {
            postgres_query(sql, params).fetch_all(conn).await?
        };
        Ok(decode_rows(&rows))
    }

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecOutcome> {
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            postgres_query(sql, params).execute(conn).await?
        };
        Ok(ExecOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::sqlite_query;
    use sqlx::{Executor, SqliteConnection};

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<Row>> {
        let rows = if params.is_empty() {
            conn.fetch_all(sql).await?
        } else {
            sqlite_query(sql, params).fetch_all(conn).await?
        };
        Ok(decode_rows(&rows))
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecOutcome> {
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            sqlite_query(sql, params).execute(conn).await?
        };
        Ok(ExecOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()).filter(|id| *id != 0),
        })
    }
}
