//! Plain-SQL migrations and the directory loader.
//!
//! Files are named `V<version>__<description>.sql`. Everything above a line
//! reading `-- down` is the forward script; everything below it is the
//! rollback script. Scripts may hold several `;`-separated statements.

use super::Migration;
use crate::db::Transaction;
use crate::db::guard::split_statements;
use crate::error::{DbError, DbResult};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::path::Path;
use tracing::debug;

const DOWN_MARKER: &str = "-- down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    version: i64,
    description: String,
    up: Vec<String>,
    down: Vec<String>,
}

impl SqlMigration {
    pub fn new(version: i64, description: impl Into<String>) -> Self {
        Self {
            version,
            description: description.into(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    /// Append forward statements.
    pub fn up(mut self, sql: &str) -> Self {
        self.up
            .extend(split_statements(sql).into_iter().map(String::from));
        self
    }

    /// Append rollback statements, run in the order given.
    pub fn down(mut self, sql: &str) -> Self {
        self.down
            .extend(split_statements(sql).into_iter().map(String::from));
        self
    }

    pub fn up_statements(&self) -> &[String] {
        &self.up
    }

    pub fn down_statements(&self) -> &[String] {
        &self.down
    }

    /// Parse one migration file.
    pub fn parse(file_name: &str, contents: &str) -> DbResult<Self> {
        let (version, description) = parse_file_name(file_name)?;
        let mut up = String::new();
        let mut down = String::new();
        let mut in_down = false;
        for line in contents.lines() {
            if line.trim().eq_ignore_ascii_case(DOWN_MARKER) {
                in_down = true;
                continue;
            }
            let target = if in_down { &mut down } else { &mut up };
            target.push_str(line);
            target.push('\n');
        }
        let migration = Self::new(version, description).up(&up).down(&down);
        if migration.up.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Migration file {} has no statements",
                file_name
            )));
        }
        Ok(migration)
    }
}

impl Migration for SqlMigration {
    fn version(&self) -> i64 {
        self.version
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn migrate<'t>(&'t self, tx: &'t mut Transaction) -> BoxFuture<'t, DbResult<()>> {
        async move {
            for sql in &self.up {
                tx.execute(sql, &[]).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn rollback<'t>(&'t self, tx: &'t mut Transaction) -> BoxFuture<'t, DbResult<()>> {
        async move {
            if self.down.is_empty() {
                return Err(DbError::invalid_input(format!(
                    "Migration {} has no rollback statements",
                    self.version
                )));
            }
            for sql in &self.down {
                tx.execute(sql, &[]).await?;
            }
            Ok(())
        }
        .boxed()
    }
}

/// `V12__add_kill_streaks.sql` -> (12, "add kill streaks")
fn parse_file_name(file_name: &str) -> DbResult<(i64, String)> {
    let invalid = || {
        DbError::invalid_input(format!(
            "Invalid migration file name '{}', expected V<version>__<description>.sql",
            file_name
        ))
    };
    let stem = file_name.strip_suffix(".sql").ok_or_else(invalid)?;
    let rest = stem.strip_prefix(['V', 'v']).ok_or_else(invalid)?;
    let (version, description) = rest.split_once("__").ok_or_else(invalid)?;
    let version: i64 = version.parse().map_err(|_| invalid())?;
    Ok((version, description.replace('_', " ").trim().to_string()))
}

/// Load every `V*.sql` file in `dir`, sorted by version.
///
/// Other files are ignored.
pub fn load_dir(dir: impl AsRef<Path>) -> DbResult<Vec<Box<dyn Migration>>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| {
        DbError::invalid_input(format!(
            "Cannot read migration directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let mut migrations = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| DbError::internal(format!("Failed to list {}: {}", dir.display(), e)))?
            .path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_file() || !file_name.ends_with(".sql") || !file_name.starts_with(['V', 'v']) {
            continue;
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            DbError::invalid_input(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let migration = SqlMigration::parse(file_name, &contents)?;
        debug!(file = %file_name, version = migration.version, "Loaded migration");
        migrations.push(migration);
    }
    migrations.sort_by_key(|m| m.version);
    Ok(migrations
        .into_iter()
        .map(|m| Box::new(m) as Box<dyn Migration>)
        .collect())
}
