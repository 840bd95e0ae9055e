//! SQL Toolkit - operator CLI.
//!
//! Checks connectivity, prints pool statistics, runs versioned migrations and
//! runs the health monitor in the foreground.

use sql_toolkit::config::{Command, Config};
use sql_toolkit::db::{Database, TokioScheduler};
use sql_toolkit::migration::{MigrationManager, load_dir};
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn migrations(
    db: &Database,
    config: &Config,
    namespace: &str,
    dir: &Path,
) -> Result<MigrationManager, Box<dyn std::error::Error>> {
    let manager = MigrationManager::with_version_table(db.clone(), &config.version_table);
    manager.register_migrations(namespace, load_dir(dir)?)?;
    Ok(manager)
}

async fn run(config: &Config, db: &Database) -> Result<(), Box<dyn std::error::Error>> {
    match &config.command {
        Command::Check => {
            let report = db.health_monitor().run_check().await;
            print_json(&report)?;
            if report.message.is_some() {
                return Err(format!("Pool '{}' is not healthy", report.pool).into());
            }
        }
        Command::Stats => {
            print_json(&db.pool_statistics())?;
        }
        Command::Migrate { namespace, dir } => {
            let manager = migrations(db, config, namespace, dir)?;
            let applied = manager.run_migrations_for(namespace).await?;
            let version = manager.current_version(namespace).await?;
            info!(namespace = %namespace, applied, version, "Migrations complete");
        }
        Command::Rollback {
            namespace,
            dir,
            target,
        } => {
            let manager = migrations(db, config, namespace, dir)?;
            let rolled_back = manager.rollback_to(namespace, *target).await?;
            info!(namespace = %namespace, rolled_back, version = *target, "Rollback complete");
        }
        Command::Status { namespace, dir } => {
            let manager = migrations(db, config, namespace, dir)?;
            print_json(&manager.status(namespace).await?)?;
        }
        Command::Monitor { .. } => {
            let task = db.start_health_monitor(&TokioScheduler);
            info!(
                pool = %db.name(),
                interval_secs = db.pool().config().health.interval_secs,
                "Health monitor running, press Ctrl-C to stop"
            );
            tokio::signal::ctrl_c().await?;
            task.cancel();
            print_json(&db.pool_statistics())?;
            print_json(&db.query_statistics().snapshot())?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    let mut db_config = config.database_config()?;
    if let Command::Monitor {
        interval: Some(secs),
    } = &config.command
    {
        db_config.health.interval_secs = *secs;
    }

    info!(
        dialect = %db_config.dialect,
        url = %db_config.masked_connection_string(),
        "Starting SQL Toolkit v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db = Database::connect(db_config).await?;
    let result = run(&config, &db).await;
    db.close().await;

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
