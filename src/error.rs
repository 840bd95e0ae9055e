//! Error types for the SQL toolkit.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants follow the failure taxonomy of the access layer: connection and pool
//! failures, driver errors, pre-execution validation, transactions, migrations,
//! and async task control (timeouts and cancellation).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Pool '{pool}' exhausted: no connection available after {waited_ms}ms")]
    PoolExhausted { pool: String, waited_ms: u64 },

    #[error("Pool '{pool}' is not accepting connections (state: {state})")]
    PoolUnavailable { pool: String, state: String },

    #[error("Pool not found: {pool}")]
    PoolNotFound { pool: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for a unique violation on PostgreSQL
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Statement rejected: {message}")]
    Validation { message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error(
        "Migration {version} for '{namespace}' failed after {applied} applied migration(s): {message}"
    )]
    Migration {
        namespace: String,
        version: i64,
        applied: usize,
        message: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Unsupported: {feature} is not available for {dialect}")]
    Unsupported { feature: String, dialect: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a pool exhaustion error.
    pub fn pool_exhausted(pool: impl Into<String>, waited: std::time::Duration) -> Self {
        Self::PoolExhausted {
            pool: pool.into(),
            waited_ms: waited.as_millis() as u64,
        }
    }

    /// Create a pool unavailable error.
    pub fn pool_unavailable(pool: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::PoolUnavailable {
            pool: pool.into(),
            state: state.to_string(),
        }
    }

    pub fn pool_not_found(pool: impl Into<String>) -> Self {
        Self::PoolNotFound { pool: pool.into() }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a validation error (statement rejected before execution).
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a migration error.
    pub fn migration(
        namespace: impl Into<String>,
        version: i64,
        applied: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::Migration {
            namespace: namespace.into(),
            version,
            applied,
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an unsupported feature error.
    pub fn unsupported(feature: impl Into<String>, dialect: impl std::fmt::Display) -> Self {
        Self::Unsupported {
            feature: feature.into(),
            dialect: dialect.to_string(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Increase max_pool_size or release connections sooner")
            }
            _ => None,
        }
    }

    /// SQLSTATE (or engine error code) reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is a constraint violation (unique, foreign key, not null, check).
    ///
    /// PostgreSQL and H2 report SQLSTATE class 23, MySQL reports 23000, SQLite
    /// reports extended result codes derived from SQLITE_CONSTRAINT (19).
    pub fn is_constraint_violation(&self) -> bool {
        match self.sql_state() {
            Some(code) => {
                code.starts_with("23")
                    || code
                        .parse::<i32>()
                        .map(|c| c & 0xff == 19)
                        .unwrap_or(false)
            }
            None => false,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::PoolExhausted { .. }
                | Self::PoolUnavailable { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax, constraints and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted {
                pool: "unknown".to_string(),
                waited_ms: 0,
            },
            sqlx::Error::PoolClosed => DbError::pool_unavailable("unknown", "closed"),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::invalid_input(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::invalid_input(
                format!("Column index {} out of bounds (len: {})", index, len),
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(err.sql_state(), Some("42601"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", Duration::from_secs(30)).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(DbError::pool_exhausted("main", Duration::from_millis(5)).is_retryable());
        assert!(!DbError::validation("stacked statements").is_retryable());
        assert!(!DbError::migration("core", 2, 1, "boom").is_retryable());
    }

    #[test]
    fn test_constraint_violation_codes() {
        let pg = DbError::database("dup", Some("23505".to_string()), "");
        let mysql = DbError::database("dup", Some("23000".to_string()), "");
        // SQLITE_CONSTRAINT_UNIQUE = 2067, SQLITE_CONSTRAINT_PRIMARYKEY = 1555
        let sqlite_unique = DbError::database("dup", Some("2067".to_string()), "");
        let sqlite_pk = DbError::database("dup", Some("1555".to_string()), "");
        let syntax = DbError::database("syntax", Some("42601".to_string()), "");

        assert!(pg.is_constraint_violation());
        assert!(mysql.is_constraint_violation());
        assert!(sqlite_unique.is_constraint_violation());
        assert!(sqlite_pk.is_constraint_violation());
        assert!(!syntax.is_constraint_violation());
        assert!(!DbError::internal("x").is_constraint_violation());
    }

    #[test]
    fn test_migration_error_message() {
        let err = DbError::migration("stats", 2, 1, "table exists");
        let msg = err.to_string();
        assert!(msg.contains("Migration 2"));
        assert!(msg.contains("'stats'"));
        assert!(msg.contains("1 applied"));
    }

    #[test]
    fn test_pool_timeout_maps_to_exhausted() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::PoolExhausted { .. }));
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::PoolUnavailable { .. }));
    }
}
