//! WHERE/HAVING expression tree.
//!
//! Leaves hold raw SQL text with `?` placeholders and their parameters.
//! Groups render with parentheses only where precedence needs them: an OR
//! group inside an AND, and anything under NOT.

use crate::models::SqlValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Condition { sql: String, params: Vec<SqlValue> },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Parent {
    Top,
    And,
    Or,
    Not,
}

impl Predicate {
    pub fn condition(sql: impl Into<String>, params: impl IntoIterator<Item = SqlValue>) -> Self {
        Predicate::Condition {
            sql: sql.into().trim().to_string(),
            params: params.into_iter().collect(),
        }
    }

    /// Append with AND, flattening an existing AND group.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut children) => {
                children.push(other);
                Predicate::And(children)
            }
            p => Predicate::And(vec![p, other]),
        }
    }

    /// Append with OR, flattening an existing OR group.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut children) => {
                children.push(other);
                Predicate::Or(children)
            }
            p => Predicate::Or(vec![p, other]),
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Predicate::Not(inner) => *inner,
            p => Predicate::Not(Box::new(p)),
        }
    }

    /// Render into `sql`, appending parameters in placeholder order.
    pub fn render_into(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        self.render(Parent::Top, sql, params);
    }

    pub fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.render_into(&mut sql, &mut params);
        (sql, params)
    }

    /// Parameters in placeholder order.
    pub fn parameters(&self) -> Vec<SqlValue> {
        self.to_sql().1
    }

    fn render(&self, parent: Parent, sql: &mut String, params: &mut Vec<SqlValue>) {
        match self {
            Predicate::Condition { sql: text, params: p } => {
                let group = parent == Parent::Not
                    || (matches!(parent, Parent::And) && has_top_level_or(text));
                if group {
                    sql.push('(');
                }
                sql.push_str(text);
                if group {
                    sql.push(')');
                }
                params.extend(p.iter().cloned());
            }
            Predicate::And(children) => {
                let group = parent == Parent::Not && children.len() > 1;
                render_group(children, " AND ", Parent::And, group, sql, params);
            }
            Predicate::Or(children) => {
                let group =
                    matches!(parent, Parent::And | Parent::Not) && children.len() > 1;
                render_group(children, " OR ", Parent::Or, group, sql, params);
            }
            Predicate::Not(inner) => {
                sql.push_str("NOT ");
                let wrap = matches!(**inner, Predicate::And(ref c) | Predicate::Or(ref c) if c.len() <= 1);
                if wrap {
                    sql.push('(');
                }
                inner.render(Parent::Not, sql, params);
                if wrap {
                    sql.push(')');
                }
            }
        }
    }
}

fn render_group(
    children: &[Predicate],
    separator: &str,
    me: Parent,
    group: bool,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) {
    if group {
        sql.push('(');
    }
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            sql.push_str(separator);
        }
        // A single-child group behaves like its child in the parent's position.
        child.render(me, sql, params);
    }
    if group {
        sql.push(')');
    }
}

/// Whether raw condition text contains an OR outside parentheses and quotes.
fn has_top_level_or(text: &str) -> bool {
    let upper = text.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'(' => depth += 1,
                b')' => depth -= 1,
                b'O' if depth == 0
                    && upper[i..].starts_with("OR")
                    && (i == 0 || !is_word(bytes[i - 1]))
                    && bytes.get(i + 2).is_none_or(|c| !is_word(*c)) =>
                {
                    return true;
                }
                _ => {}
            },
        }
        i += 1;
    }
    false
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Fluent WHERE-chain shared by the SELECT, UPDATE and DELETE builders.
///
/// Expands inside an `impl` block of a type with a `predicate: Option<Predicate>`
/// field. `where_` replaces whatever was accumulated; `and`/`or` fold onto it,
/// or act like `where_` when nothing is there yet.
macro_rules! where_chain_methods {
    () => {
        /// Replace the predicate with a single condition.
        pub fn where_(
            mut self,
            condition: impl Into<String>,
            params: impl IntoIterator<Item = $crate::models::SqlValue>,
        ) -> Self {
            self.predicate = Some($crate::query::Predicate::condition(condition, params));
            self
        }

        pub fn and(
            self,
            condition: impl Into<String>,
            params: impl IntoIterator<Item = $crate::models::SqlValue>,
        ) -> Self {
            self.and_predicate($crate::query::Predicate::condition(condition, params))
        }

        pub fn or(
            self,
            condition: impl Into<String>,
            params: impl IntoIterator<Item = $crate::models::SqlValue>,
        ) -> Self {
            self.or_predicate($crate::query::Predicate::condition(condition, params))
        }

        pub fn and_not(
            self,
            condition: impl Into<String>,
            params: impl IntoIterator<Item = $crate::models::SqlValue>,
        ) -> Self {
            self.and_predicate($crate::query::Predicate::condition(condition, params).negate())
        }

        pub fn or_not(
            self,
            condition: impl Into<String>,
            params: impl IntoIterator<Item = $crate::models::SqlValue>,
        ) -> Self {
            self.or_predicate($crate::query::Predicate::condition(condition, params).negate())
        }

        /// Replace the predicate with a prebuilt tree.
        pub fn where_predicate(mut self, predicate: $crate::query::Predicate) -> Self {
            self.predicate = Some(predicate);
            self
        }

        pub fn and_predicate(mut self, predicate: $crate::query::Predicate) -> Self {
            self.predicate = Some(match self.predicate.take() {
                Some(existing) => existing.and(predicate),
                None => predicate,
            });
            self
        }

        pub fn or_predicate(mut self, predicate: $crate::query::Predicate) -> Self {
            self.predicate = Some(match self.predicate.take() {
                Some(existing) => existing.or(predicate),
                None => predicate,
            });
            self
        }
    };
}

pub(crate) use where_chain_methods;
