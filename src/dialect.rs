//! Per-engine SQL syntax rules.
//!
//! A `Dialect` is selected once when a pool is created and never changes for
//! that pool. Builders ask it how to quote identifiers, how to render paging,
//! and which optional clauses the engine understands. Capabilities live in a
//! static table rather than in scattered conditionals.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Supported SQL engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Includes MariaDB
    MySql,
    PostgreSql,
    Sqlite,
    /// Reached through its PostgreSQL wire-compatible server mode
    H2,
}

/// Optional SQL features gated per dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Insert-or-update on key conflict
    Upsert,
    /// `RETURNING` on INSERT/UPDATE/DELETE
    ReturningClause,
    /// `VALUES (..), (..)` in one INSERT
    MultiRowInsert,
    /// `ORDER BY` / `LIMIT` on UPDATE and DELETE
    OrderedWrites,
    /// `SELECT ... FOR UPDATE`
    RowLocking,
}

#[derive(Debug, Clone, Copy)]
struct Capabilities {
    upsert: bool,
    returning: bool,
    multi_row_insert: bool,
    ordered_writes: bool,
    row_locking: bool,
}

const MYSQL: Capabilities = Capabilities {
    upsert: true,
    returning: false,
    multi_row_insert: true,
    ordered_writes: true,
    row_locking: true,
};

const POSTGRESQL: Capabilities = Capabilities {
    upsert: true,
    returning: true,
    multi_row_insert: true,
    ordered_writes: false,
    row_locking: true,
};

const SQLITE: Capabilities = Capabilities {
    upsert: true,
    returning: false,
    multi_row_insert: true,
    ordered_writes: false,
    row_locking: false,
};

const H2: Capabilities = Capabilities {
    upsert: false,
    returning: false,
    multi_row_insert: true,
    ordered_writes: false,
    row_locking: true,
};

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::MySql,
        Dialect::PostgreSql,
        Dialect::Sqlite,
        Dialect::H2,
    ];

    /// Detect the dialect from a connection URL scheme.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.trim().to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSql)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySql)
        } else if lower.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else if lower.starts_with("h2://") || lower.starts_with("h2:") {
            Some(Self::H2)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::PostgreSql => "PostgreSQL",
            Self::Sqlite => "SQLite",
            Self::H2 => "H2",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::PostgreSql => Some(5432),
            Self::Sqlite => None,
            Self::H2 => Some(5435),
        }
    }

    fn capabilities(&self) -> &'static Capabilities {
        match self {
            Self::MySql => &MYSQL,
            Self::PostgreSql => &POSTGRESQL,
            Self::Sqlite => &SQLITE,
            Self::H2 => &H2,
        }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        let caps = self.capabilities();
        match feature {
            Feature::Upsert => caps.upsert,
            Feature::ReturningClause => caps.returning,
            Feature::MultiRowInsert => caps.multi_row_insert,
            Feature::OrderedWrites => caps.ordered_writes,
            Feature::RowLocking => caps.row_locking,
        }
    }

    /// Quote character for identifiers, `None` when the engine uses bare names.
    pub fn quote_char(&self) -> Option<char> {
        match self {
            Self::MySql => Some('`'),
            Self::PostgreSql | Self::Sqlite => Some('"'),
            Self::H2 => None,
        }
    }

    pub fn format_table_name(&self, name: &str) -> String {
        self.quote_identifier(name)
    }

    pub fn format_column_name(&self, name: &str) -> String {
        self.quote_identifier(name)
    }

    /// Quote a plain or qualified identifier.
    ///
    /// Anything that is not a dotted chain of simple names (expressions,
    /// aliases, `*`, already quoted text) is returned unchanged.
    pub fn quote_identifier(&self, name: &str) -> String {
        let Some(q) = self.quote_char() else {
            return name.to_string();
        };
        let trimmed = name.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();
        let simple = parts
            .iter()
            .enumerate()
            .all(|(i, p)| is_simple_identifier(p) || (*p == "*" && i == parts.len() - 1));
        if !simple || trimmed == "*" {
            return name.to_string();
        }
        parts
            .iter()
            .map(|p| {
                if *p == "*" {
                    "*".to_string()
                } else {
                    let escaped = p.replace(q, &format!("{q}{q}"));
                    format!("{q}{escaped}{q}")
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Render the paging clause, `None` when neither bound is set.
    pub fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("LIMIT {}", l)),
            (Some(l), Some(o)) => Some(format!("LIMIT {} OFFSET {}", l, o)),
            (None, Some(o)) => Some(match self {
                Self::MySql => format!("LIMIT 18446744073709551615 OFFSET {}", o),
                Self::Sqlite => format!("LIMIT -1 OFFSET {}", o),
                Self::PostgreSql | Self::H2 => format!("OFFSET {}", o),
            }),
        }
    }

    /// `RETURNING` fragment for engines that support it.
    pub fn returning_clause<S: AsRef<str>>(&self, columns: &[S]) -> Option<String> {
        if !self.supports(Feature::ReturningClause) || columns.is_empty() {
            return None;
        }
        let cols = columns
            .iter()
            .map(|c| self.format_column_name(c.as_ref()))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("RETURNING {}", cols))
    }

    /// Upsert tail for an INSERT.
    ///
    /// `conflict_target` is only used by engines with `ON CONFLICT` syntax.
    /// Every assignment binds one positional parameter.
    pub fn upsert_clause<S: AsRef<str>>(
        &self,
        conflict_target: &[S],
        update_columns: &[S],
    ) -> Option<String> {
        if !self.supports(Feature::Upsert) || update_columns.is_empty() {
            return None;
        }
        let assignments = update_columns
            .iter()
            .map(|c| format!("{} = ?", self.format_column_name(c.as_ref())))
            .collect::<Vec<_>>()
            .join(", ");
        match self {
            Self::MySql => Some(format!("ON DUPLICATE KEY UPDATE {}", assignments)),
            Self::PostgreSql | Self::Sqlite => {
                let target = conflict_target
                    .iter()
                    .map(|c| self.format_column_name(c.as_ref()))
                    .collect::<Vec<_>>()
                    .join(", ");
                Some(format!("ON CONFLICT({}) DO UPDATE SET {}", target, assignments))
            }
            Self::H2 => None,
        }
    }

    /// Whether the upsert tail names a conflict target (`ON CONFLICT(..)`).
    pub fn requires_conflict_target(&self) -> bool {
        matches!(self, Self::PostgreSql | Self::Sqlite)
    }

    /// Session-scoped last-id function.
    ///
    /// Only meaningful right after an insert that produced a key on the same
    /// connection. `CALL IDENTITY()` needs H2 1.4 or LEGACY mode.
    pub fn last_insert_id_sql(&self) -> &'static str {
        match self {
            Self::MySql => "SELECT LAST_INSERT_ID()",
            Self::PostgreSql => "SELECT lastval()",
            Self::Sqlite => "SELECT last_insert_rowid()",
            Self::H2 => "CALL IDENTITY()",
        }
    }

    /// Rewrite a single-row INSERT so the statement itself yields `key_column`.
    ///
    /// `None` on MySQL and SQLite, whose drivers report the key with the
    /// result. PostgreSQL appends `RETURNING` unless the INSERT already has
    /// one; H2 selects from the `FINAL TABLE` of the insert.
    pub fn generated_key_query(&self, insert_sql: &str, key_column: &str) -> Option<String> {
        let insert_sql = insert_sql.trim().trim_end_matches(';').trim_end();
        let col = self.format_column_name(key_column);
        match self {
            Self::MySql | Self::Sqlite => None,
            Self::PostgreSql if has_keyword(insert_sql, "RETURNING") => Some(insert_sql.to_string()),
            Self::PostgreSql => Some(format!("{} RETURNING {}", insert_sql, col)),
            Self::H2 => Some(format!("SELECT {} FROM FINAL TABLE ({})", col, insert_sql)),
        }
    }

    /// Column definition for a surrogate auto-increment primary key.
    pub fn auto_increment_primary_key(&self, column: &str) -> String {
        let col = self.format_column_name(column);
        match self {
            Self::MySql => format!("{} BIGINT AUTO_INCREMENT PRIMARY KEY", col),
            Self::PostgreSql => format!("{} BIGSERIAL PRIMARY KEY", col),
            Self::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", col),
            Self::H2 => format!("{} BIGINT AUTO_INCREMENT PRIMARY KEY", col),
        }
    }

    pub fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    /// Count query taking the table name as its single parameter.
    pub fn table_exists_sql(&self) -> &'static str {
        match self {
            Self::MySql => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?"
            }
            Self::PostgreSql => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = ?"
            }
            Self::Sqlite => "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            Self::H2 => {
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE UPPER(TABLE_NAME) = UPPER(?)"
            }
        }
    }

    /// Liveness probe statement.
    pub fn validation_query(&self) -> &'static str {
        "SELECT 1"
    }

    /// Rewrite `?` placeholders for engines that expect numbered ones.
    ///
    /// Placeholders inside string literals, quoted identifiers and comments
    /// are left alone.
    pub fn bind_placeholders<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        match self {
            Self::PostgreSql | Self::H2 if sql.contains('?') => {
                Cow::Owned(number_placeholders(sql))
            }
            _ => Cow::Borrowed(sql),
        }
    }

    /// Parser dialect used by the statement guard.
    pub fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        use sqlparser::dialect::{GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
        match self {
            Self::MySql => Box::new(MySqlDialect {}),
            Self::PostgreSql => Box::new(PostgreSqlDialect {}),
            Self::Sqlite => Box::new(SQLiteDialect {}),
            Self::H2 => Box::new(GenericDialect {}),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Self::PostgreSql),
            "sqlite" => Ok(Self::Sqlite),
            "h2" => Ok(Self::H2),
            other => Err(format!("Unknown dialect: {}", other)),
        }
    }
}

fn is_simple_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    let mut n = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(c);
                // Doubled quote chars are an escaped quote and keep us inside.
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    if inner == c {
                        if chars.peek() == Some(&c) {
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                out.push(c);
                for inner in chars.by_ref() {
                    out.push(inner);
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                out.push(c);
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    out.push(inner);
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            '?' => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

/// Whole-word, case-insensitive keyword match outside quoted literals.
fn has_keyword(sql: &str, keyword: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut word = String::new();
    for c in sql.chars().chain(std::iter::once(' ')) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if matches!(c, '\'' | '"' | '`') => {
                quote = Some(c);
                word.clear();
            }
            None if c.is_ascii_alphanumeric() || c == '_' => word.push(c),
            None => {
                if word.eq_ignore_ascii_case(keyword) {
                    return true;
                }
                word.clear();
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_connection_string() {
        assert_eq!(
            Dialect::from_connection_string("mysql://localhost/db"),
            Some(Dialect::MySql)
        );
        assert_eq!(
            Dialect::from_connection_string("mariadb://localhost/db"),
            Some(Dialect::MySql)
        );
        assert_eq!(
            Dialect::from_connection_string("postgresql://localhost/db"),
            Some(Dialect::PostgreSql)
        );
        assert_eq!(
            Dialect::from_connection_string("sqlite::memory:"),
            Some(Dialect::Sqlite)
        );
        assert_eq!(
            Dialect::from_connection_string("h2://localhost:5435/db"),
            Some(Dialect::H2)
        );
        assert_eq!(Dialect::from_connection_string("oracle://x"), None);
    }

    #[test]
    fn test_quoting_per_engine() {
        assert_eq!(Dialect::MySql.format_table_name("players"), "`players`");
        assert_eq!(Dialect::PostgreSql.format_table_name("players"), "\"players\"");
        assert_eq!(Dialect::Sqlite.format_column_name("name"), "\"name\"");
        assert_eq!(Dialect::H2.format_column_name("name"), "name");
    }

    #[test]
    fn test_quoting_passes_expressions_through() {
        let d = Dialect::MySql;
        assert_eq!(d.format_column_name("COUNT(*)"), "COUNT(*)");
        assert_eq!(d.format_column_name("*"), "*");
        assert_eq!(d.format_column_name("name AS n"), "name AS n");
        assert_eq!(d.format_column_name("`already`"), "`already`");
        assert_eq!(d.format_table_name("stats.players"), "`stats`.`players`");
        assert_eq!(d.format_column_name("p.*"), "`p`.*");
    }

    #[test]
    fn test_limit_clause() {
        for d in Dialect::ALL {
            assert_eq!(d.limit_clause(None, None), None);
            assert_eq!(d.limit_clause(Some(1), None).as_deref(), Some("LIMIT 1"));
            assert_eq!(
                d.limit_clause(Some(10), Some(20)).as_deref(),
                Some("LIMIT 10 OFFSET 20")
            );
        }
        assert_eq!(
            Dialect::Sqlite.limit_clause(None, Some(5)).as_deref(),
            Some("LIMIT -1 OFFSET 5")
        );
        assert_eq!(
            Dialect::PostgreSql.limit_clause(None, Some(5)).as_deref(),
            Some("OFFSET 5")
        );
        assert!(
            Dialect::MySql
                .limit_clause(None, Some(5))
                .unwrap()
                .starts_with("LIMIT 18446744073709551615")
        );
    }

    #[test]
    fn test_capability_table() {
        assert!(Dialect::PostgreSql.supports(Feature::ReturningClause));
        assert!(!Dialect::MySql.supports(Feature::ReturningClause));
        assert!(!Dialect::H2.supports(Feature::Upsert));
        assert!(Dialect::MySql.supports(Feature::OrderedWrites));
        assert!(!Dialect::Sqlite.supports(Feature::OrderedWrites));
        assert!(!Dialect::Sqlite.supports(Feature::RowLocking));
        for d in Dialect::ALL {
            assert!(d.supports(Feature::MultiRowInsert));
        }
    }

    #[test]
    fn test_returning_clause() {
        assert_eq!(
            Dialect::PostgreSql.returning_clause(&["id"]).as_deref(),
            Some("RETURNING \"id\"")
        );
        assert_eq!(Dialect::Sqlite.returning_clause(&["id"]), None);
        assert_eq!(Dialect::PostgreSql.returning_clause::<&str>(&[]), None);
    }

    #[test]
    fn test_upsert_clause() {
        assert_eq!(
            Dialect::MySql
                .upsert_clause(&["uuid"], &["name"])
                .as_deref(),
            Some("ON DUPLICATE KEY UPDATE `name` = ?")
        );
        assert_eq!(
            Dialect::Sqlite
                .upsert_clause(&["uuid"], &["name", "score"])
                .as_deref(),
            Some("ON CONFLICT(\"uuid\") DO UPDATE SET \"name\" = ?, \"score\" = ?")
        );
        assert_eq!(Dialect::H2.upsert_clause(&["uuid"], &["name"]), None);
    }

    #[test]
    fn test_generated_key_query() {
        let insert = "INSERT INTO players (uuid) VALUES (?);";
        assert_eq!(Dialect::MySql.generated_key_query(insert, "id"), None);
        assert_eq!(Dialect::Sqlite.generated_key_query(insert, "id"), None);
        assert_eq!(
            Dialect::PostgreSql.generated_key_query(insert, "id").unwrap(),
            "INSERT INTO players (uuid) VALUES (?) RETURNING \"id\""
        );
        assert_eq!(
            Dialect::H2.generated_key_query(insert, "id").unwrap(),
            "SELECT id FROM FINAL TABLE (INSERT INTO players (uuid) VALUES (?))"
        );

        let returning = "INSERT INTO players (uuid) VALUES (?) returning player_id";
        assert_eq!(
            Dialect::PostgreSql.generated_key_query(returning, "id").unwrap(),
            returning
        );
        // Keyword inside a literal does not count
        let literal = "INSERT INTO motd (text) VALUES ('returning soon')";
        assert!(
            Dialect::PostgreSql
                .generated_key_query(literal, "id")
                .unwrap()
                .ends_with("RETURNING \"id\"")
        );
    }

    #[test]
    fn test_bind_placeholders() {
        assert_eq!(
            Dialect::PostgreSql.bind_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"),
            "SELECT * FROM t WHERE a = $1 AND b = $2"
        );
        assert_eq!(
            Dialect::PostgreSql.bind_placeholders("SELECT '?', \"a?\" FROM t WHERE x = ?"),
            "SELECT '?', \"a?\" FROM t WHERE x = $1"
        );
        assert_eq!(
            Dialect::H2.bind_placeholders("SELECT 'it''s ?' -- why?\n, ? /* ? */"),
            "SELECT 'it''s ?' -- why?\n, $1 /* ? */"
        );
        assert!(matches!(
            Dialect::MySql.bind_placeholders("SELECT ?"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn test_from_str_and_display() {
        assert_eq!("MariaDB".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::PostgreSql);
        assert!("oracle".parse::<Dialect>().is_err());
        assert_eq!(Dialect::H2.to_string(), "H2");
    }
}
