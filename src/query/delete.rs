use super::predicate::where_chain_methods;
use super::update::render_write_tail;
use super::{Order, Predicate, Statement, Target, require_table};
use crate::db::{Database, QueryTask};
use crate::dialect::Dialect;
use crate::error::DbResult;
use crate::models::{Row, SqlValue};

/// DELETE builder.
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    target: Target,
    table: String,
    predicate: Option<Predicate>,
    order_by: Vec<(String, Order)>,
    limit: Option<u64>,
    returning: Vec<String>,
}

impl DeleteBuilder {
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
            predicate: None,
            order_by: Vec::new(),
            limit: None,
            returning: Vec::new(),
        }
    }

    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    where_chain_methods!();

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

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
        let mut sql = format!("DELETE FROM {}", dialect.format_table_name(&self.table));
        let mut params = Vec::new();
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
        require_table(&self.table, "DELETE")?;
        Ok(self.render())
    }

    pub async fn execute_update(self) -> DbResult<u64> {
        let stmt = self.build()?;
        self.target
            .database()?
            .update(&stmt.sql, &stmt.params)
            .await
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

    pub fn execute_update_async(self) -> DbResult<QueryTask<u64>> {
        let stmt = self.build()?;
        Ok(self
            .target
            .database()?
            .update_async(stmt.sql, stmt.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn test_delete_with_where_chain() {
        let stmt = DeleteBuilder::new(Dialect::Sqlite)
            .from("sessions")
            .where_("expires_at < ?", params![1000])
            .or("revoked = ?", params![true])
            .build()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "DELETE FROM \"sessions\" WHERE expires_at < ? OR revoked = ?"
        );
        assert_eq!(stmt.params, params![1000, true]);
    }

    #[test]
    fn test_and_not() {
        let sql = DeleteBuilder::new(Dialect::H2)
            .from("t")
            .where_("a = ?", params![1])
            .and_not("b = ?", params![2])
            .sql();
        assert_eq!(sql, "DELETE FROM t WHERE a = ? AND NOT (b = ?)");
    }

    #[test]
    fn test_mysql_limit() {
        let sql = DeleteBuilder::new(Dialect::MySql)
            .from("log")
            .order_by("created_at", Order::Asc)
            .limit(100)
            .sql();
        assert_eq!(sql, "DELETE FROM `log` ORDER BY `created_at` ASC LIMIT 100");
        let sql = DeleteBuilder::new(Dialect::Sqlite).from("log").limit(100).sql();
        assert_eq!(sql, "DELETE FROM \"log\"");
    }
}
