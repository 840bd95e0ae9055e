//! Fluent SQL builders.
//!
//! Builders accumulate clauses and positional parameters, then render SQL text
//! for one [`Dialect`]. A builder created from a [`Database`] is bound to it
//! and can execute itself; a builder created from a bare dialect only renders.
//!
//! Parameters are returned in the same order as their `?` placeholders appear
//! in the rendered SQL.

mod delete;
mod insert;
pub mod predicate;
mod select;
mod update;

pub use delete::DeleteBuilder;
pub use insert::InsertBuilder;
pub use predicate::Predicate;
pub use select::SelectBuilder;
pub use update::UpdateBuilder;

use crate::db::Database;
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::SqlValue;

/// Rendered SQL plus its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: impl IntoIterator<Item = SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params: params.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Sort direction for ORDER BY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Target of a builder: the dialect it renders for and, optionally, the
/// database it executes against.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub dialect: Dialect,
    pub db: Option<Database>,
}

impl Target {
    pub fn unbound(dialect: Dialect) -> Self {
        Self { dialect, db: None }
    }

    pub fn bound(db: Database) -> Self {
        Self {
            dialect: db.dialect(),
            db: Some(db),
        }
    }

    pub fn database(&self) -> DbResult<&Database> {
        self.db.as_ref().ok_or_else(|| {
            DbError::invalid_input("Builder is not bound to a database; create it from a Database")
        })
    }
}

pub(crate) fn render_order_by(dialect: Dialect, order_by: &[(String, Order)]) -> Option<String> {
    if order_by.is_empty() {
        return None;
    }
    let parts = order_by
        .iter()
        .map(|(col, dir)| format!("{} {}", dialect.format_column_name(col), dir.as_sql()))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("ORDER BY {}", parts))
}

pub(crate) fn render_columns(dialect: Dialect, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| dialect.format_column_name(c))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn require_table(table: &str, kind: &str) -> DbResult<()> {
    if table.trim().is_empty() {
        return Err(DbError::invalid_input(format!("{} requires a table", kind)));
    }
    Ok(())
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
