//! Pre-execution statement guard.
//!
//! Rejects statements that are obviously unsafe before any network round-trip:
//! empty text, stacked statements (`a; b`), and UPDATE/DELETE without a WHERE
//! clause. Detection is AST-based through sqlparser so formatting and comments
//! cannot hide a statement. SQL the parser does not understand (vendor
//! extensions, procedural DDL) passes through after a lexical stacked-statement
//! check.

use crate::config::GuardOptions;
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use sqlparser::ast::Statement;
use sqlparser::parser::Parser;
use tracing::debug;

/// Type of unsafe statement detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    Empty,
    Stacked,
    UpdateWithoutWhere,
    DeleteWithoutWhere,
}

impl Violation {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Empty => "Empty SQL statement",
            Self::Stacked => "Multiple statements in one call are not allowed",
            Self::UpdateWithoutWhere => "UPDATE without WHERE would modify every row",
            Self::DeleteWithoutWhere => "DELETE without WHERE would remove every row",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatementGuard {
    enabled: bool,
    allow_unbounded_writes: bool,
}

impl StatementGuard {
    pub fn new(options: &GuardOptions) -> Self {
        Self {
            enabled: options.enabled,
            allow_unbounded_writes: options.allow_unbounded_writes,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            allow_unbounded_writes: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check one statement, returning `DbError::Validation` when it is rejected.
    pub fn check(&self, sql: &str, dialect: Dialect) -> DbResult<()> {
        if !self.enabled {
            return Ok(());
        }
        match self.inspect(sql, dialect) {
            Some(violation) => {
                debug!(dialect = %dialect, violation = ?violation, "Statement rejected by guard");
                Err(DbError::validation(violation.reason()))
            }
            None => Ok(()),
        }
    }

    /// Find the first violation in `sql`, if any.
    pub fn inspect(&self, sql: &str, dialect: Dialect) -> Option<Violation> {
        let segments = split_statements(sql);
        if segments.is_empty() {
            return Some(Violation::Empty);
        }
        if segments.len() > 1 {
            return Some(Violation::Stacked);
        }

        let parser_dialect = dialect.parser_dialect();
        let statements = match Parser::parse_sql(parser_dialect.as_ref(), sql) {
            Ok(statements) => statements,
            Err(e) => {
                debug!(dialect = %dialect, error = %e, "Guard could not parse statement, passing through");
                return None;
            }
        };
        if statements.len() > 1 {
            return Some(Violation::Stacked);
        }
        statements
            .first()
            .and_then(|stmt| self.check_statement(stmt))
    }

    fn check_statement(&self, stmt: &Statement) -> Option<Violation> {
        if self.allow_unbounded_writes {
            return None;
        }
        match stmt {
            Statement::Delete(delete) if delete.selection.is_none() => {
                Some(Violation::DeleteWithoutWhere)
            }
            Statement::Update(update) if update.selection.is_none() => {
                Some(Violation::UpdateWithoutWhere)
            }
            _ => None,
        }
    }
}

impl Default for StatementGuard {
    fn default() -> Self {
        Self::new(&GuardOptions::default())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Lex {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Split SQL text on top-level `;`, ignoring semicolons inside string
/// literals, quoted identifiers and comments. Segments holding only
/// whitespace or comments are dropped.
pub(crate) fn split_statements(sql: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut state = Lex::Code;
    let mut start = 0;
    let mut significant = false;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match state {
            Lex::Code => match c {
                '\'' | '"' | '`' => {
                    state = Lex::Quoted(c);
                    significant = true;
                }
                '-' if chars.peek().map(|(_, n)| *n) == Some('-') => {
                    chars.next();
                    state = Lex::LineComment;
                }
                '/' if chars.peek().map(|(_, n)| *n) == Some('*') => {
                    chars.next();
                    state = Lex::BlockComment;
                }
                ';' => {
                    if significant {
                        segments.push(sql[start..i].trim());
                    }
                    start = i + 1;
                    significant = false;
                }
                c if !c.is_whitespace() => significant = true,
                _ => {}
            },
            // Doubled quotes re-enter the same state on the next char
            Lex::Quoted(q) if c == q => state = Lex::Code,
            Lex::Quoted(_) => {}
            Lex::LineComment if c == '\n' => state = Lex::Code,
            Lex::LineComment => {}
            Lex::BlockComment if c == '*' && chars.peek().map(|(_, n)| *n) == Some('/') => {
                chars.next();
                state = Lex::Code;
            }
            Lex::BlockComment => {}
        }
    }
    if significant {
        segments.push(sql[start..].trim());
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> StatementGuard {
        StatementGuard::default()
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(guard().inspect("", Dialect::MySql), Some(Violation::Empty));
        assert_eq!(
            guard().inspect("  -- nothing here\n", Dialect::Sqlite),
            Some(Violation::Empty)
        );
    }

    #[test]
    fn test_stacked_statements_rejected() {
        let g = guard();
        assert_eq!(
            g.inspect("SELECT 1; DROP TABLE users", Dialect::MySql),
            Some(Violation::Stacked)
        );
        assert!(g.check("SELECT 1;", Dialect::PostgreSql).is_ok());
        assert!(
            g.check("SELECT * FROM t WHERE name = 'a;b'", Dialect::Sqlite)
                .is_ok()
        );
    }

    #[test]
    fn test_stacked_detected_when_unparseable() {
        // Vendor syntax the parser rejects still gets the lexical check
        assert_eq!(
            guard().inspect("FROBNICATE x; FROBNICATE y", Dialect::H2),
            Some(Violation::Stacked)
        );
        assert_eq!(guard().inspect("FROBNICATE x", Dialect::H2), None);
    }

    #[test]
    fn test_unbounded_writes_rejected() {
        let g = guard();
        assert_eq!(
            g.inspect("DELETE FROM users", Dialect::MySql),
            Some(Violation::DeleteWithoutWhere)
        );
        assert_eq!(
            g.inspect("UPDATE users SET active = ?", Dialect::Sqlite),
            Some(Violation::UpdateWithoutWhere)
        );
        assert_eq!(
            g.inspect("DELETE /* c */ FROM users WHERE id = ?", Dialect::MySql),
            None
        );
        let err = g.check("DELETE FROM users", Dialect::MySql).unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
    }

    #[test]
    fn test_allow_unbounded_writes() {
        let g = StatementGuard::new(&GuardOptions {
            enabled: true,
            allow_unbounded_writes: true,
        });
        assert!(g.check("DELETE FROM users", Dialect::MySql).is_ok());
        assert!(g.check("SELECT 1; SELECT 2", Dialect::MySql).is_err());
    }

    #[test]
    fn test_disabled_guard_accepts_everything() {
        let g = StatementGuard::disabled();
        assert!(g.check("", Dialect::MySql).is_ok());
        assert!(g.check("DELETE FROM users; DELETE FROM t", Dialect::MySql).is_ok());
    }

    #[test]
    fn test_split_statements() {
        let sql = "CREATE TABLE a (id INT); -- trailing\nINSERT INTO a VALUES (';');\n/* done */";
        let parts = split_statements(sql);
        assert_eq!(
            parts,
            vec!["CREATE TABLE a (id INT)", "-- trailing\nINSERT INTO a VALUES (';')"]
        );
    }
}
