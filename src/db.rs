//! Database connection and pool management for the job queue.
//!
//! This module provides functionality to initialize and manage a SeaORM
//! connection pool with configurable parameters, plus the timestamp helpers
//! every repository uses so stored values share one format.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, SubsecRound, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;
use crate::error::QueueError;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Database connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Initializes a database connection pool with the given configuration.
///
/// Transient connection failures are retried with exponential backoff
/// before giving up.
///
/// # Examples
///
/// ```no_run
/// use media_jobs::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600)) // 10 minutes
        .max_lifetime(Duration::from_secs(1800)) // 30 minutes
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let max_retries = 5;
    let mut retry_delay = Duration::from_millis(100);

    for attempt in 1..=max_retries {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("Successfully connected to database (attempt {})", attempt);
                return Ok(conn);
            }
            Err(e) => {
                if attempt == max_retries {
                    log::error!(
                        "Failed to connect to database after {} attempts: {}",
                        max_retries,
                        e
                    );
                    return Err(DatabaseError::ConnectionFailed { source: e }.into());
                }

                log::warn!(
                    "Database connection attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    retry_delay
                );

                sleep(retry_delay).await;
                retry_delay *= 2;
            }
        }
    }

    Err(DatabaseError::ConnectionTimeout {
        timeout_ms: cfg.db_acquire_timeout_ms,
    }
    .into())
}

/// Verifies that the database connection is still usable.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    use sea_orm::Statement;

    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}

/// Converts a UTC instant into the column representation: explicit `+00:00`
/// offset, microsecond precision (what Postgres `timestamptz` keeps).
pub fn to_db_time(dt: DateTime<Utc>) -> DateTime<FixedOffset> {
    dt.trunc_subsecs(6).fixed_offset()
}

/// Current time in column representation.
pub fn db_now() -> DateTime<FixedOffset> {
    to_db_time(Utc::now())
}

/// `now - older_than`, rejecting thresholds chrono cannot represent.
pub fn cutoff(
    now: DateTime<Utc>,
    older_than: Duration,
) -> Result<DateTime<FixedOffset>, QueueError> {
    let age = chrono::Duration::from_std(older_than).map_err(|_| {
        QueueError::InvalidInput(format!("age threshold {:?} is out of range", older_than))
    })?;
    now.checked_sub_signed(age)
        .map(to_db_time)
        .ok_or_else(|| {
            QueueError::InvalidInput(format!("age threshold {:?} is out of range", older_than))
        })
}
