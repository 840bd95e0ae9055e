use super::{SelectBuilder, Statement, Target, placeholders, render_columns, require_table};
use crate::db::{Database, QueryTask};
use crate::dialect::{Dialect, Feature};
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use tracing::{debug, warn};

/// INSERT builder with multi-row VALUES, INSERT ... SELECT and upsert.
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    target: Target,
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    source: Option<Box<SelectBuilder>>,
    upsert: Vec<(String, SqlValue)>,
    conflict_target: Vec<String>,
    returning: Vec<String>,
}

impl InsertBuilder {
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
            columns: Vec::new(),
            rows: Vec::new(),
            source: None,
            upsert: Vec::new(),
            conflict_target: Vec::new(),
            returning: Vec::new(),
        }
    }

    pub fn into(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add one row. Call repeatedly for a multi-row insert.
    pub fn values(mut self, row: impl IntoIterator<Item = SqlValue>) -> Self {
        self.rows.push(row.into_iter().collect());
        self
    }

    /// Set columns and a single row from ordered pairs.
    ///
    /// Replaces any columns and rows set before.
    pub fn column_values<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, SqlValue)>,
        S: Into<String>,
    {
        let (columns, row): (Vec<String>, Vec<SqlValue>) =
            pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        self.columns = columns;
        self.rows = vec![row];
        self
    }

    /// `INSERT INTO t (cols) SELECT ...`
    pub fn from_select(mut self, select: SelectBuilder) -> Self {
        self.source = Some(Box::new(select));
        self
    }

    /// Update `column` to `value` when the row already exists.
    ///
    /// Renders `ON DUPLICATE KEY UPDATE` on MySQL and `ON CONFLICT(..) DO
    /// UPDATE SET` on PostgreSQL and SQLite. Engines without upsert get a
    /// plain INSERT.
    pub fn on_duplicate_key_update(
        mut self,
        column: impl Into<String>,
        value: impl Into<SqlValue>,
    ) -> Self {
        self.upsert.push((column.into(), value.into()));
        self
    }

    /// Conflict target for `ON CONFLICT`. Defaults to the first insert column.
    pub fn on_conflict<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conflict_target = columns.into_iter().map(Into::into).collect();
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

    fn render_rows(&self, rows: &[Vec<SqlValue>]) -> Statement {
        let dialect = self.target.dialect;
        let mut sql = format!("INSERT INTO {}", dialect.format_table_name(&self.table));
        let mut params = Vec::new();

        if !self.columns.is_empty() {
            sql.push_str(" (");
            sql.push_str(&render_columns(dialect, &self.columns));
            sql.push(')');
        }

        if let Some(select) = &self.source {
            // SQLite reads `ON CONFLICT` after a bare FROM as a join constraint
            let stmt = if dialect == Dialect::Sqlite && self.has_upsert() && !select.has_predicate() {
                (**select).clone().where_("true", Vec::new()).render()
            } else {
                select.render()
            };
            sql.push(' ');
            sql.push_str(&stmt.sql);
            params.extend(stmt.params);
        } else {
            let groups = rows
                .iter()
                .map(|row| format!("({})", placeholders(row.len())))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" VALUES ");
            sql.push_str(&groups);
            for row in rows {
                params.extend(row.iter().cloned());
            }
        }

        self.render_upsert(&mut sql, &mut params);

        if !self.returning.is_empty() {
            match dialect.returning_clause(&self.returning) {
                Some(clause) => {
                    sql.push(' ');
                    sql.push_str(&clause);
                }
                None => debug!(dialect = %dialect, "RETURNING not supported, omitted"),
            }
        }

        Statement { sql, params }
    }

    /// Whether an upsert tail is rendered for this dialect.
    fn has_upsert(&self) -> bool {
        !self.upsert.is_empty() && self.target.dialect.supports(Feature::Upsert)
    }

    /// Explicit conflict target, else the first insert column.
    fn conflict_target(&self) -> Vec<&str> {
        if self.conflict_target.is_empty() {
            self.columns.iter().take(1).map(String::as_str).collect()
        } else {
            self.conflict_target.iter().map(String::as_str).collect()
        }
    }

    fn render_upsert(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        if self.upsert.is_empty() {
            return;
        }
        let dialect = self.target.dialect;
        let update_columns: Vec<&str> = self.upsert.iter().map(|(c, _)| c.as_str()).collect();

        match dialect.upsert_clause(&self.conflict_target(), &update_columns) {
            Some(clause) => {
                sql.push(' ');
                sql.push_str(&clause);
                params.extend(self.upsert.iter().map(|(_, v)| v.clone()));
            }
            None => warn!(
                dialect = %dialect,
                table = %self.table,
                "Upsert not supported by dialect, rendering plain INSERT"
            ),
        }
    }

    fn render(&self) -> Statement {
        self.render_rows(&self.rows)
    }

    pub fn sql(&self) -> String {
        self.render().sql
    }

    pub fn parameters(&self) -> Vec<SqlValue> {
        self.render().params
    }

    fn validate(&self) -> DbResult<()> {
        require_table(&self.table, "INSERT")?;
        if self.has_upsert()
            && self.target.dialect.requires_conflict_target()
            && self.conflict_target().is_empty()
        {
            return Err(DbError::invalid_input(
                "Upsert needs a conflict target: call on_conflict() or name the insert columns",
            ));
        }
        if let Some(select) = &self.source {
            if !self.rows.is_empty() {
                return Err(DbError::invalid_input(
                    "INSERT cannot combine VALUES rows with a SELECT source",
                ));
            }
            select.build()?;
            return Ok(());
        }
        if self.columns.is_empty() {
            return Err(DbError::invalid_input("INSERT requires at least one column"));
        }
        if self.rows.is_empty() {
            return Err(DbError::invalid_input("INSERT requires at least one row of values"));
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(DbError::invalid_input(format!(
                    "INSERT row {} has {} values for {} columns",
                    i + 1,
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }

    /// Validate and render as one statement.
    pub fn build(&self) -> DbResult<Statement> {
        self.validate()?;
        if self.rows.len() > 1 && !self.target.dialect.supports(Feature::MultiRowInsert) {
            return Err(DbError::unsupported(
                "multi-row INSERT (use statements())",
                self.target.dialect,
            ));
        }
        Ok(self.render())
    }

    /// Render as one statement, or one per row when the engine cannot take
    /// several rows in one VALUES list.
    pub fn statements(&self) -> DbResult<Vec<Statement>> {
        self.validate()?;
        if self.source.is_some()
            || self.rows.len() <= 1
            || self.target.dialect.supports(Feature::MultiRowInsert)
        {
            return Ok(vec![self.render()]);
        }
        Ok(self
            .rows
            .iter()
            .map(|row| self.render_rows(std::slice::from_ref(row)))
            .collect())
    }

    /// Execute and return the number of inserted (or upserted) rows.
    pub async fn execute_update(self) -> DbResult<u64> {
        let statements = self.statements()?;
        let db = self.target.database()?;
        if statements.len() == 1 {
            let stmt = &statements[0];
            return db.update(&stmt.sql, &stmt.params).await;
        }
        let sql = statements[0].sql.clone();
        let counts = db
            .batch_update(&sql, statements.into_iter().map(|s| s.params).collect())
            .await?;
        Ok(counts.iter().sum())
    }

    /// Execute a single-row insert and return the generated key.
    ///
    /// The key column is the first `returning` column, else `id`.
    pub async fn execute_returning_id(self) -> DbResult<Option<i64>> {
        let stmt = self.build()?;
        let key_column = self.returning.first().map_or("id", String::as_str);
        self.target
            .database()?
            .insert_returning_key(&stmt.sql, &stmt.params, key_column)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    fn player(dialect: Dialect) -> InsertBuilder {
        InsertBuilder::new(dialect)
            .into("players")
            .columns(["uuid", "name"])
            .values(params!["abc-123", "Steve"])
    }

    #[test]
    fn test_single_row() {
        let stmt = player(Dialect::Sqlite).build().unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"players\" (\"uuid\", \"name\") VALUES (?, ?)"
        );
        assert_eq!(stmt.params, params!["abc-123", "Steve"]);
    }

    #[test]
    fn test_multi_row() {
        let stmt = player(Dialect::MySql)
            .values(params!["def-456", "Alex"])
            .build()
            .unwrap();
        assert!(stmt.sql.ends_with("VALUES (?, ?), (?, ?)"));
        assert_eq!(stmt.params, params!["abc-123", "Steve", "def-456", "Alex"]);
        assert_eq!(player(Dialect::MySql).statements().unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_mysql_vs_sqlite() {
        let mysql = player(Dialect::MySql)
            .on_duplicate_key_update("name", "Steve")
            .build()
            .unwrap();
        assert!(mysql.sql.ends_with("ON DUPLICATE KEY UPDATE `name` = ?"));
        assert_eq!(mysql.params, params!["abc-123", "Steve", "Steve"]);

        let sqlite = player(Dialect::Sqlite)
            .on_duplicate_key_update("name", "Steve")
            .build()
            .unwrap();
        assert!(
            sqlite
                .sql
                .ends_with("ON CONFLICT(\"uuid\") DO UPDATE SET \"name\" = ?")
        );
    }

    #[test]
    fn test_upsert_dropped_on_h2() {
        let stmt = player(Dialect::H2)
            .on_duplicate_key_update("name", "Steve")
            .build()
            .unwrap();
        assert_eq!(stmt.sql, "INSERT INTO players (uuid, name) VALUES (?, ?)");
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_explicit_conflict_target() {
        let stmt = InsertBuilder::new(Dialect::PostgreSql)
            .into("scores")
            .columns(["player_id", "world", "score"])
            .values(params![1, "overworld", 10])
            .on_conflict(["player_id", "world"])
            .on_duplicate_key_update("score", 10)
            .returning(["id"])
            .build()
            .unwrap();
        assert!(stmt.sql.ends_with(
            "ON CONFLICT(\"player_id\", \"world\") DO UPDATE SET \"score\" = ? RETURNING \"id\""
        ));
    }

    #[test]
    fn test_column_values() {
        let stmt = InsertBuilder::new(Dialect::MySql)
            .into("t")
            .column_values([("a", SqlValue::from(1)), ("b", SqlValue::from("x"))])
            .build()
            .unwrap();
        assert_eq!(stmt.sql, "INSERT INTO `t` (`a`, `b`) VALUES (?, ?)");
        assert_eq!(stmt.params, params![1, "x"]);
    }

    #[test]
    fn test_insert_from_select() {
        let select = SelectBuilder::new(Dialect::Sqlite)
            .columns(["uuid", "name"])
            .from("staging")
            .where_("imported = ?", params![false]);
        let stmt = InsertBuilder::new(Dialect::Sqlite)
            .into("players")
            .columns(["uuid", "name"])
            .from_select(select)
            .build()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"players\" (\"uuid\", \"name\") SELECT \"uuid\", \"name\" \
             FROM \"staging\" WHERE imported = ?"
        );
        assert_eq!(stmt.params, params![false]);
    }

    #[test]
    fn test_upsert_requires_conflict_target() {
        let select = SelectBuilder::new(Dialect::Sqlite).from("staging");
        let no_target = InsertBuilder::new(Dialect::Sqlite)
            .into("players")
            .from_select(select.clone())
            .on_duplicate_key_update("name", "x");
        assert!(matches!(no_target.build(), Err(DbError::InvalidInput { .. })));

        let targeted = no_target.on_conflict(["uuid"]).build().unwrap();
        assert!(targeted.sql.contains("ON CONFLICT(\"uuid\")"));

        // MySQL needs no target
        let mysql = InsertBuilder::new(Dialect::MySql)
            .into("players")
            .from_select(SelectBuilder::new(Dialect::MySql).from("staging"))
            .on_duplicate_key_update("name", "x")
            .build()
            .unwrap();
        assert!(mysql.sql.ends_with("ON DUPLICATE KEY UPDATE `name` = ?"));
    }

    #[test]
    fn test_sqlite_upsert_from_select_gets_where() {
        let select = SelectBuilder::new(Dialect::Sqlite)
            .columns(["uuid", "name"])
            .from("staging")
            .order_by("uuid", crate::query::Order::Asc);
        let stmt = InsertBuilder::new(Dialect::Sqlite)
            .into("players")
            .columns(["uuid", "name"])
            .from_select(select.clone())
            .on_duplicate_key_update("name", "x")
            .build()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"players\" (\"uuid\", \"name\") SELECT \"uuid\", \"name\" \
             FROM \"staging\" WHERE true ORDER BY \"uuid\" ASC \
             ON CONFLICT(\"uuid\") DO UPDATE SET \"name\" = ?"
        );
        assert_eq!(stmt.params, params!["x"]);

        // Plain INSERT ... SELECT is left alone
        let plain = InsertBuilder::new(Dialect::Sqlite)
            .into("players")
            .columns(["uuid", "name"])
            .from_select(select)
            .build()
            .unwrap();
        assert!(!plain.sql.contains("WHERE"));
    }

    #[test]
    fn test_returning_dropped_without_support() {
        let stmt = player(Dialect::MySql).returning(["id"]).build().unwrap();
        assert!(!stmt.sql.contains("RETURNING"));
    }

    #[test]
    fn test_validation() {
        assert!(InsertBuilder::new(Dialect::MySql).build().is_err());
        let mismatched = InsertBuilder::new(Dialect::MySql)
            .into("t")
            .columns(["a", "b"])
            .values(params![1]);
        assert!(mismatched.build().is_err());
        let no_rows = InsertBuilder::new(Dialect::MySql).into("t").columns(["a"]);
        assert!(no_rows.build().is_err());
    }
}
