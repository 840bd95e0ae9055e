//! SQL Toolkit Library
//!
//! Pooled SQL access for MySQL, PostgreSQL, SQLite and H2: named connection
//! pools with health monitoring and self-healing, dialect-aware query
//! builders, transactions, a fail-soft facade variant and versioned
//! migrations.
//!
//! ```no_run
//! use sql_toolkit::{params, Database, DbResult};
//!
//! # async fn demo() -> DbResult<()> {
//! let db = Database::connect_url("sqlite:data/stats.db").await?;
//! let names = db
//!     .select()
//!     .column("name")
//!     .from("players")
//!     .where_("kills > ?", params![10])
//!     .limit(5)
//!     .execute_query(|row| row.get::<String>("name"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod migration;
pub mod models;
pub mod query;
pub mod stats;

pub use config::{Config, DatabaseConfig};
pub use db::{
    CancellationToken, ConnectionPool, Database, ExecOutcome, HealthMonitor, PoolState,
    QueryTask, TaskOptions, Transaction,
};
pub use dialect::{Dialect, Feature};
pub use error::{DbError, DbResult};
pub use migration::{Migration, MigrationManager, SqlMigration};
pub use models::{FromSqlValue, Row, SqlValue};
pub use query::{
    DeleteBuilder, InsertBuilder, Order, Predicate, SelectBuilder, Statement, UpdateBuilder,
};
