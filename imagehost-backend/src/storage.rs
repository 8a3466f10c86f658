//! Database setup.
//!

use std::path::Path;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::{debug, info};

use crate::migration::Migrator;

const SLOW_QUERY_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum DBError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Opens (creating if needed) the database at `db_path` and brings the schema up to date.
pub async fn new(db_path: &Path) -> Result<DatabaseConnection, DBError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("Creating database directory {}", parent.display());
            std::fs::create_dir_all(parent)?;
        }
    }
    start_db(Some(db_path)).await
}

/// Starts a database connection, `None` gives a private in-memory database.
pub async fn start_db(db_path: Option<&Path>) -> Result<DatabaseConnection, DBError> {
    let (db_url, max_connections) = match db_path {
        Some(path) if path.as_os_str() != ":memory:" => {
            (format!("sqlite://{}?mode=rwc", path.display()), 10)
        }
        // every pooled connection to :memory: would see its own empty database
        _ => ("sqlite::memory:".to_string(), 1),
    };
    debug!("Opening Database: {db_url}");

    let mut options = ConnectOptions::new(db_url);
    options
        .max_connections(max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Trace)
        .sqlx_slow_statements_logging_settings(
            log::LevelFilter::Warn,
            Duration::from_millis(SLOW_QUERY_MS),
        );

    let conn = Database::connect(options).await?;

    Migrator::up(&conn, None).await?;
    info!("Database ready, schema up to date");

    Ok(conn)
}
