use super::predicate::where_chain_methods;
use super::{Order, Predicate, Statement, Target, render_order_by, require_table};
use crate::db::{Database, QueryTask};
use crate::dialect::{Dialect, Feature};
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use tracing::debug;

#[derive(Debug, Clone)]
struct Assignment {
    column: String,
    expr: String,
    params: Vec<SqlValue>,
}

/// UPDATE builder.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    target: Target,
    table: String,
    assignments: Vec<Assignment>,
    predicate: Option<Predicate>,
    order_by: Vec<(String, Order)>,
    limit: Option<u64>,
    returning: Vec<String>,
}

impl UpdateBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self::with_target(Target::unbound(dialect))
    }

    pub(crate) fn bound(db: Database) -> Self {
        Self::with_target(Target::bound(db))
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            table: String::new(),
            assignments: Vec::new(),
            predicate: None,
            order_by: Vec::new(),
            limit: None,
            returning: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// `column = ?`
    pub fn set(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.assignments.push(Assignment {
            column: column.into(),
            expr: "?".to_string(),
            params: vec![value.into()],
        });
        self
    }

    /// `column = <expr>` with raw SQL, e.g. `set_expr("kills", "kills + ?", params![1])`.
    pub fn set_expr(
        mut self,
        column: impl Into<String>,
        expr: impl Into<String>,
        params: impl IntoIterator<Item = SqlValue>,
    ) -> Self {
        self.assignments.push(Assignment {
            column: column.into(),
            expr: expr.into(),
            params: params.into_iter().collect(),
        });
        self
    }

    pub fn set_all<I, S>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, SqlValue)>,
        S: Into<String>,
    {
        pairs
            .into_iter()
            .fold(self, |builder, (column, value)| builder.set(column, value))
    }

    where_chain_methods!();

    /// MySQL only; dropped elsewhere.
    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    /// MySQL only; dropped elsewhere.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.target.dialect
    }

    fn render(&self) -> Statement {
        let dialect = self.target.dialect;
        let mut sql = format!("UPDATE {} SET ", dialect.format_table_name(&self.table));
        let mut params = Vec::new();

        for (i, a) in self.assignments.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&dialect.format_column_name(&a.column));
            sql.push_str(" = ");
            sql.push_str(&a.expr);
            params.extend(a.params.iter().cloned());
        }
        if let Some(predicate) = &self.predicate {
            sql.push_str(" WHERE ");
            predicate.render_into(&mut sql, &mut params);
        }
        render_write_tail(
            dialect,
            &self.order_by,
            self.limit,
            &self.returning,
            &mut sql,
        );
        Statement { sql, params }
    }

    pub fn sql(&self) -> String {
        self.render().sql
    }

    pub fn parameters(&self) -> Vec<SqlValue> {
        self.render().params
    }

    pub fn build(&self) -> DbResult<Statement> {
        require_table(&self.table, "UPDATE")?;
        if self.assignments.is_empty() {
            return Err(DbError::invalid_input("UPDATE requires at least one SET"));
        }
        Ok(self.render())
    }

    pub async fn execute_update(self) -> DbResult<u64> {
        let stmt = self.build()?;
        self.target
            .database()?
            .update(&stmt.sql, &stmt.params)
            .await
    }

    /// Execute with RETURNING and map the returned rows.
    pub async fn execute_query<T, F>(self, mapper: F) -> DbResult<Vec<T>>
    where
        F: Fn(&Row) -> DbResult<T>,
    {
        let stmt = self.build()?;
        self.target
            .database()?
            .query(&stmt.sql, &stmt.params, mapper)
            .await
    }

    pub async fn fetch_first<T, F>(self, mapper: F) -> DbResult<Option<T>>
    where
        F: Fn(&Row) -> DbResult<T>,
    {
        let stmt = self.build()?;
        self.target
            .database()?
            .query_first(&stmt.sql, &stmt.params, mapper)
            .await
    }

    pub fn execute_update_async(self) -> DbResult<QueryTask<u64>> {
        let stmt = self.build()?;
        Ok(self
            .target
            .database()?
            .update_async(stmt.sql, stmt.params))
    }

    pub fn execute_query_async<T, F>(self, mapper: F) -> DbResult<QueryTask<Vec<T>>>
    where
        T: Send + 'static,
        F: Fn(&Row) -> DbResult<T> + Send + Sync + 'static,
    {
        let stmt = self.build()?;
        Ok(self
            .target
            .database()?
            .query_async(stmt.sql, stmt.params, mapper))
    }
}

/// ORDER BY / LIMIT (MySQL only) and RETURNING for UPDATE and DELETE.
pub(super) fn render_write_tail(
    dialect: Dialect,
    order_by: &[(String, Order)],
    limit: Option<u64>,
    returning: &[String],
    sql: &mut String,
) {
    if dialect.supports(Feature::OrderedWrites) {
        if let Some(order) = render_order_by(dialect, order_by) {
            sql.push(' ');
            sql.push_str(&order);
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
    } else if !order_by.is_empty() || limit.is_some() {
        debug!(dialect = %dialect, "ORDER BY/LIMIT on writes not supported, omitted");
    }

    if !returning.is_empty() {
        match dialect.returning_clause(returning) {
            Some(clause) => {
                sql.push(' ');
                sql.push_str(&clause);
            }
            None => debug!(dialect = %dialect, "RETURNING not supported, omitted"),
        }
    }
}
