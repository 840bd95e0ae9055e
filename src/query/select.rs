use super::predicate::where_chain_methods;
use super::{Order, Predicate, Statement, Target, render_columns, render_order_by, require_table};
use crate::db::{Database, QueryTask};
use crate::dialect::{Dialect, Feature};
use crate::error::DbResult;
use crate::models::{Row, SqlValue};
use tracing::debug;

/// SELECT builder.
///
/// ```
/// use sql_toolkit::{params, Dialect, SelectBuilder};
///
/// let select = SelectBuilder::new(Dialect::MySql)
///     .columns(["id", "name"])
///     .from("players")
///     .where_("uuid = ?", params!["abc-123"])
///     .limit(1);
/// assert_eq!(select.sql(), "SELECT `id`, `name` FROM `players` WHERE uuid = ? LIMIT 1");
/// ```
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    target: Target,
    distinct: bool,
    columns: Vec<String>,
    table: String,
    joins: Vec<String>,
    predicate: Option<Predicate>,
    group_by: Vec<String>,
    having: Option<Predicate>,
    order_by: Vec<(String, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
    for_update: bool,
}

impl SelectBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self::with_target(Target::unbound(dialect))
    }

    pub(crate) fn bound(db: Database) -> Self {
        Self::with_target(Target::bound(db))
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            distinct: false,
            columns: Vec::new(),
            table: String::new(),
            joins: Vec::new(),
            predicate: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            for_update: false,
        }
    }

    pub(super) fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Append columns. No columns selects `*`.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Raw join clause, e.g. `LEFT JOIN stats s ON s.player_id = p.id`.
    pub fn join(mut self, clause: impl Into<String>) -> Self {
        self.joins.push(clause.into());
        self
    }

    pub fn inner_join(self, table: &str, on: &str) -> Self {
        self.typed_join("INNER JOIN", table, on)
    }

    pub fn left_join(self, table: &str, on: &str) -> Self {
        self.typed_join("LEFT JOIN", table, on)
    }

    pub fn right_join(self, table: &str, on: &str) -> Self {
        self.typed_join("RIGHT JOIN", table, on)
    }

    fn typed_join(mut self, kind: &str, table: &str, on: &str) -> Self {
        let table = self.target.dialect.format_table_name(table);
        self.joins.push(format!("{} {} ON {}", kind, table, on));
        self
    }

    where_chain_methods!();

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Replace the HAVING condition.
    pub fn having(
        mut self,
        condition: impl Into<String>,
        params: impl IntoIterator<Item = SqlValue>,
    ) -> Self {
        self.having = Some(Predicate::condition(condition, params));
        self
    }

    pub fn and_having(
        mut self,
        condition: impl Into<String>,
        params: impl IntoIterator<Item = SqlValue>,
    ) -> Self {
        let leaf = Predicate::condition(condition, params);
        self.having = Some(match self.having.take() {
            Some(existing) => existing.and(leaf),
            None => leaf,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn order_by_desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, Order::Desc)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Lock selected rows. Dropped on engines without row locking.
    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.target.dialect
    }

    pub(super) fn render(&self) -> Statement {
        let dialect = self.target.dialect;
        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();

        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&render_columns(dialect, &self.columns));
        }
        if !self.table.is_empty() {
            sql.push_str(" FROM ");
            sql.push_str(&dialect.format_table_name(&self.table));
        }
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if let Some(predicate) = &self.predicate {
            sql.push_str(" WHERE ");
            predicate.render_into(&mut sql, &mut params);
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&render_columns(dialect, &self.group_by));
        }
        if let Some(having) = &self.having {
            sql.push_str(" HAVING ");
            having.render_into(&mut sql, &mut params);
        }
        if let Some(order) = render_order_by(dialect, &self.order_by) {
            sql.push(' ');
            sql.push_str(&order);
        }
        if let Some(paging) = dialect.limit_clause(self.limit, self.offset) {
            sql.push(' ');
            sql.push_str(&paging);
        }
        if self.for_update {
            if dialect.supports(Feature::RowLocking) {
                sql.push_str(" FOR UPDATE");
            } else {
                debug!(dialect = %dialect, "FOR UPDATE not supported, omitted");
            }
        }
        Statement { sql, params }
    }

    pub fn sql(&self) -> String {
        self.render().sql
    }

    pub fn parameters(&self) -> Vec<SqlValue> {
        self.render().params
    }

    /// Validate and render.
    pub fn build(&self) -> DbResult<Statement> {
        require_table(&self.table, "SELECT")?;
        Ok(self.render())
    }

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
