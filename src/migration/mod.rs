//! Versioned, namespaced schema migrations.
//!
//! Each namespace (one per owning component) registers an ordered list of
//! [`Migration`]s. The highest applied version per namespace is persisted in a
//! version table:
//!
//! ```text
//! schema_versions(namespace PRIMARY KEY, version, applied_at)
//! ```
//!
//! Forward runs apply pending migrations in ascending order, each together with
//! its version bump in one transaction, and stop at the first failure. Rollback
//! is explicit and never triggered by a forward run.
//!
//! MySQL commits DDL implicitly, so a failing MySQL migration may leave part of
//! its own DDL behind; the version table still only records completed versions.

mod sql;

pub use sql::{SqlMigration, load_dir};

use crate::config::DEFAULT_VERSION_TABLE;
use crate::db::{Database, Transaction};
use crate::error::{DbError, DbResult};
use crate::params;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// One schema change.
pub trait Migration: Send + Sync {
    /// Strictly positive, unique within a namespace.
    fn version(&self) -> i64;

    fn description(&self) -> &str;

    fn migrate<'t>(&'t self, tx: &'t mut Transaction) -> BoxFuture<'t, DbResult<()>>;

    /// Undo [`migrate`](Self::migrate). Fails unless overridden.
    fn rollback<'t>(&'t self, _tx: &'t mut Transaction) -> BoxFuture<'t, DbResult<()>> {
        let version = self.version();
        async move {
            Err(DbError::invalid_input(format!(
                "Migration {} does not support rollback",
                version
            )))
        }
        .boxed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationInfo {
    pub version: i64,
    pub description: String,
}

impl MigrationInfo {
    fn of(migration: &dyn Migration) -> Self {
        Self {
            version: migration.version(),
            description: migration.description().to_string(),
        }
    }
}

/// Applied and pending migrations of one namespace.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub namespace: String,
    pub current_version: i64,
    pub applied: Vec<MigrationInfo>,
    pub pending: Vec<MigrationInfo>,
}

type MigrationList = Arc<[Arc<dyn Migration>]>;

pub struct MigrationManager {
    db: Database,
    version_table: String,
    registered: RwLock<BTreeMap<String, MigrationList>>,
    /// Serializes runs and rollbacks
    run_lock: Mutex<()>,
}

impl MigrationManager {
    pub fn new(db: Database) -> Self {
        Self::with_version_table(db, DEFAULT_VERSION_TABLE)
    }

    pub fn with_version_table(db: Database, version_table: impl Into<String>) -> Self {
        Self {
            db,
            version_table: version_table.into(),
            registered: RwLock::new(BTreeMap::new()),
            run_lock: Mutex::new(()),
        }
    }

    pub fn version_table(&self) -> &str {
        &self.version_table
    }

    /// Associate `migrations` with `namespace`, replacing any earlier list.
    ///
    /// Versions must be positive and unique; the list is sorted ascending.
    pub fn register_migrations<I>(&self, namespace: &str, migrations: I) -> DbResult<()>
    where
        I: IntoIterator<Item = Box<dyn Migration>>,
    {
        if namespace.trim().is_empty() {
            return Err(DbError::invalid_input("Migration namespace cannot be empty"));
        }
        let mut list: Vec<Arc<dyn Migration>> = migrations.into_iter().map(Arc::from).collect();
        let mut seen = BTreeSet::new();
        for m in &list {
            if m.version() <= 0 {
                return Err(DbError::invalid_input(format!(
                    "Migration version must be positive, got {} in '{}'",
                    m.version(),
                    namespace
                )));
            }
            if !seen.insert(m.version()) {
                return Err(DbError::invalid_input(format!(
                    "Duplicate migration version {} in '{}'",
                    m.version(),
                    namespace
                )));
            }
        }
        list.sort_by_key(|m| m.version());

        debug!(namespace, count = list.len(), "Registered migrations");
        self.registered
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(namespace.to_string(), list.into());
        Ok(())
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.registered
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn migrations(&self, namespace: &str) -> DbResult<MigrationList> {
        self.registered
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(namespace)
            .cloned()
            .ok_or_else(|| {
                DbError::invalid_input(format!(
                    "No migrations registered for '{}'",
                    namespace
                ))
            })
    }

    async fn ensure_version_table(&self) -> DbResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             namespace VARCHAR(255) NOT NULL PRIMARY KEY, \
             version BIGINT NOT NULL, \
             applied_at TIMESTAMP NOT NULL DEFAULT {})",
            self.table(),
            self.db.dialect().current_timestamp()
        );
        self.db.update(&sql, &[]).await.map(|_| ())
    }

    fn table(&self) -> String {
        self.db.dialect().format_table_name(&self.version_table)
    }

    /// Highest applied version, 0 when nothing was applied.
    pub async fn current_version(&self, namespace: &str) -> DbResult<i64> {
        self.ensure_version_table().await?;
        let sql = format!("SELECT version FROM {} WHERE namespace = ?", self.table());
        let version = self
            .db
            .query_first(&sql, &params![namespace], |row| row.get_at::<i64>(0))
            .await?;
        Ok(version.unwrap_or(0))
    }

    async fn record_version(&self, tx: &mut Transaction, namespace: &str, version: i64) -> DbResult<()> {
        let table = self.table();
        let now = tx.dialect().current_timestamp();
        let updated = tx
            .update(
                &format!(
                    "UPDATE {} SET version = ?, applied_at = {} WHERE namespace = ?",
                    table, now
                ),
                &params![version, namespace],
            )
            .await?;
        if updated == 0 {
            tx.update(
                &format!(
                    "INSERT INTO {} (namespace, version, applied_at) VALUES (?, ?, {})",
                    table, now
                ),
                &params![namespace, version],
            )
            .await?;
        }
        Ok(())
    }

    /// Registered migrations above the current version, ascending.
    pub async fn pending(&self, namespace: &str) -> DbResult<Vec<MigrationInfo>> {
        let migrations = self.migrations(namespace)?;
        let current = self.current_version(namespace).await?;
        Ok(migrations
            .iter()
            .filter(|m| m.version() > current)
            .map(|m| MigrationInfo::of(m.as_ref()))
            .collect())
    }

    pub async fn status(&self, namespace: &str) -> DbResult<MigrationStatus> {
        let migrations = self.migrations(namespace)?;
        let current = self.current_version(namespace).await?;
        let (applied, pending): (Vec<_>, Vec<_>) = migrations
            .iter()
            .map(|m| MigrationInfo::of(m.as_ref()))
            .partition(|m| m.version <= current);
        Ok(MigrationStatus {
            namespace: namespace.to_string(),
            current_version: current,
            applied,
            pending,
        })
    }

    /// Apply every pending migration of `namespace` in ascending order.
    ///
    /// Returns how many were applied. The first failure stops the run with
    /// [`DbError::Migration`]; earlier migrations stay applied.
    pub async fn run_migrations_for(&self, namespace: &str) -> DbResult<usize> {
        let _run = self.run_lock.lock().await;
        let migrations = self.migrations(namespace)?;
        let current = self.current_version(namespace).await?;
        let pending: Vec<_> = migrations
            .iter()
            .filter(|m| m.version() > current)
            .cloned()
            .collect();
        if pending.is_empty() {
            debug!(namespace, version = current, "Schema up to date");
            return Ok(0);
        }
        info!(namespace, from = current, pending = pending.len(), "Applying migrations");

        let mut applied = 0;
        for migration in pending {
            let version = migration.version();
            let start = Instant::now();
            let result = async {
                let mut tx = self.db.begin_unguarded().await?;
                migration.migrate(&mut tx).await?;
                self.record_version(&mut tx, namespace, version).await?;
                tx.commit().await
            }
            .await;

            match result {
                Ok(()) => {
                    applied += 1;
                    info!(
                        namespace,
                        version,
                        description = migration.description(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Applied migration"
                    );
                }
                Err(e) => {
                    error!(
                        namespace,
                        version,
                        applied,
                        error = %e,
                        "Migration failed, stopping"
                    );
                    return Err(DbError::migration(namespace, version, applied, e.to_string()));
                }
            }
        }
        Ok(applied)
    }

    /// Run every registered namespace, in name order.
    pub async fn run_all(&self) -> DbResult<BTreeMap<String, usize>> {
        let mut results = BTreeMap::new();
        for namespace in self.namespaces() {
            let applied = self.run_migrations_for(&namespace).await?;
            results.insert(namespace, applied);
        }
        Ok(results)
    }

    /// Roll `namespace` back to `target`, newest migration first.
    ///
    /// Each rollback runs in its own transaction together with the version
    /// change. Returns how many migrations were rolled back.
    pub async fn rollback_to(&self, namespace: &str, target: i64) -> DbResult<usize> {
        if target < 0 {
            return Err(DbError::invalid_input("Rollback target cannot be negative"));
        }
        let _run = self.run_lock.lock().await;
        let migrations = self.migrations(namespace)?;
        let current = self.current_version(namespace).await?;
        let mut to_undo: Vec<_> = migrations
            .iter()
            .filter(|m| m.version() > target && m.version() <= current)
            .cloned()
            .collect();
        to_undo.reverse();
        if to_undo.is_empty() {
            debug!(namespace, version = current, target, "Nothing to roll back");
            return Ok(0);
        }
        info!(namespace, from = current, target, "Rolling back migrations");

        let mut rolled_back = 0;
        for migration in to_undo {
            let version = migration.version();
            let previous = migrations
                .iter()
                .map(|m| m.version())
                .filter(|v| *v < version)
                .max()
                .unwrap_or(0)
                .max(target);
            let result = async {
                let mut tx = self.db.begin_unguarded().await?;
                migration.rollback(&mut tx).await?;
                self.record_version(&mut tx, namespace, previous).await?;
                tx.commit().await
            }
            .await;

            match result {
                Ok(()) => {
                    rolled_back += 1;
                    info!(namespace, version, now = previous, "Rolled back migration");
                }
                Err(e) => {
                    error!(namespace, version, error = %e, "Rollback failed, stopping");
                    return Err(DbError::migration(
                        namespace,
                        version,
                        rolled_back,
                        format!("rollback failed: {}", e),
                    ));
                }
            }
        }
        Ok(rolled_back)
    }
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("version_table", &self.version_table)
            .field("namespaces", &self.namespaces())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    struct Failing(i64);

    impl Migration for Failing {
        fn version(&self) -> i64 {
            self.0
        }

        fn description(&self) -> &str {
            "always fails"
        }

        fn migrate<'t>(&'t self, tx: &'t mut Transaction) -> BoxFuture<'t, DbResult<()>> {
            async move {
                tx.update("INSERT INTO no_such_table VALUES (1)", &[]).await?;
                Ok(())
            }
            .boxed()
        }
    }

    fn players_v1() -> Box<dyn Migration> {
        Box::new(
            SqlMigration::new(1, "create players")
                .up("CREATE TABLE players (id INTEGER PRIMARY KEY, name TEXT)")
                .down("DROP TABLE players"),
        )
    }

    fn players_v2() -> Box<dyn Migration> {
        Box::new(
            SqlMigration::new(2, "add kills")
                .up("ALTER TABLE players ADD COLUMN kills INTEGER DEFAULT 0")
                .down("ALTER TABLE players DROP COLUMN kills"),
        )
    }

    async fn manager() -> MigrationManager {
        let db = Database::connect(DatabaseConfig::sqlite_memory()).await.unwrap();
        MigrationManager::new(db)
    }

    #[tokio::test]
    async fn test_applies_each_version_once() {
        let manager = manager().await;
        manager
            .register_migrations("stats", vec![players_v2(), players_v1()])
            .unwrap();
        assert_eq!(manager.current_version("stats").await.unwrap(), 0);
        assert_eq!(manager.pending("stats").await.unwrap().len(), 2);

        assert_eq!(manager.run_migrations_for("stats").await.unwrap(), 2);
        assert_eq!(manager.run_migrations_for("stats").await.unwrap(), 0);
        assert_eq!(manager.current_version("stats").await.unwrap(), 2);

        let status = manager.status("stats").await.unwrap();
        assert_eq!(status.applied.len(), 2);
        assert!(status.pending.is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_version() {
        let manager = manager().await;
        manager
            .register_migrations("stats", vec![players_v1(), Box::new(Failing(2))])
            .unwrap();
        let err = manager.run_migrations_for("stats").await.unwrap_err();
        match err {
            DbError::Migration {
                namespace,
                version,
                applied,
                ..
            } => {
                assert_eq!(namespace, "stats");
                assert_eq!(version, 2);
                assert_eq!(applied, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manager.current_version("stats").await.unwrap(), 1);
        assert!(manager.db.table_exists("players").await.unwrap());
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let manager = manager().await;
        manager.register_migrations("stats", vec![players_v1()]).unwrap();
        manager
            .register_migrations(
                "achievements",
                vec![Box::new(
                    SqlMigration::new(7, "create achievements")
                        .up("CREATE TABLE achievements (id INTEGER PRIMARY KEY)"),
                ) as Box<dyn Migration>],
            )
            .unwrap();
        let results = manager.run_all().await.unwrap();
        assert_eq!(results["stats"], 1);
        assert_eq!(results["achievements"], 1);
        assert_eq!(manager.current_version("achievements").await.unwrap(), 7);
        assert_eq!(manager.current_version("stats").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_descends() {
        let manager = manager().await;
        manager
            .register_migrations("stats", vec![players_v1(), players_v2()])
            .unwrap();
        manager.run_migrations_for("stats").await.unwrap();

        assert_eq!(manager.rollback_to("stats", 1).await.unwrap(), 1);
        assert_eq!(manager.current_version("stats").await.unwrap(), 1);
        assert_eq!(manager.rollback_to("stats", 0).await.unwrap(), 1);
        assert_eq!(manager.current_version("stats").await.unwrap(), 0);
        assert!(!manager.db.table_exists("players").await.unwrap());
        assert_eq!(manager.rollback_to("stats", 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_versions() {
        let manager = manager().await;
        let dup = manager.register_migrations("stats", vec![players_v1(), players_v1()]);
        assert!(dup.is_err());
        let zero = manager.register_migrations(
            "stats",
            vec![Box::new(SqlMigration::new(0, "zero")) as Box<dyn Migration>],
        );
        assert!(zero.is_err());
        assert!(manager.register_migrations("", Vec::new()).is_err());
        assert!(manager.namespaces().is_empty());
    }
}
