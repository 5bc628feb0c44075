//! Connection pool construction and schema migration.

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::error::{CoreError, Result};

/// Build a pool tuned for batch ingest. Pool sizing can be overridden via
/// `DB_MAX_CONNECTIONS` / `DB_MIN_CONNECTIONS`.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let max_connections = std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(10);

    let min_connections = std::env::var("DB_MIN_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(2);

    let connect_options = database_url
        .trim()
        .parse::<PgConnectOptions>()
        .map_err(|e| {
            CoreError::Internal(format!("Invalid PostgreSQL connection string: {e}"))
        })?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(1800))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect_with(connect_options)
        .await
        .map_err(|e| CoreError::Internal(format!("Database connection failed: {e}")))?;

    info!(max_connections, min_connections, "Database pool initialized");
    Ok(pool)
}

/// Apply the embedded migrations.
pub async fn initialize_schema(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| CoreError::Internal(format!("Migration failed: {e}")))?;
    Ok(())
}
