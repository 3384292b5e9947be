//! Database connection pool management.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::EngineResult;

/// Type alias for the PostgreSQL connection pool.
pub type DbPool = PgPool;

const SCHEMA: &str = include_str!("../../../migrations/0001_workflow.sql");

/// Create a new database connection pool.
///
/// # Errors
///
/// Returns `Config` for unusable settings and `Database` if connecting fails.
pub async fn create_pool(config: &DatabaseConfig) -> EngineResult<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout))
        .connect_with(config.connect_options()?)
        .await?;

    tracing::info!(
        database = %config.describe(),
        max_connections = config.max_connections,
        statement_timeout_ms = config.statement_timeout_ms,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Create the `flowgate` schema and tables if they do not exist.
pub async fn init_schema(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::info!("Workflow schema ready");
    Ok(())
}
