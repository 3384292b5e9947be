//! Flowgate Sweeper binary.
//!
//! Runs the SLA sweep on an interval against the PostgreSQL store.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowgate_engine::config::{DatabaseConfig, EngineConfig};
use flowgate_engine::store::postgres::{create_pool, init_schema};
use flowgate_engine::store::PgWorkflowStore;
use flowgate_sweeper::{Sweeper, SweeperConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowgate_engine=debug,flowgate_sweeper=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    tracing::info!("Starting Flowgate Sweeper");

    let config = SweeperConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;
    let db_config = DatabaseConfig::from_env()?;
    tracing::info!(
        instance_id = %config.instance_id,
        interval_secs = config.interval.as_secs(),
        collaborator_url = %config.collaborator_url,
        "Sweeper configuration loaded"
    );

    db_config.check_lease(engine_config.lock_ttl())?;
    let pool = create_pool(&db_config).await?;
    init_schema(&pool).await?;

    let store = Arc::new(PgWorkflowStore::new(pool));
    let sweeper = Sweeper::new(config, engine_config, store)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    tokio::select! {
        result = sweeper.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Sweeper error");
                return Err(e);
            }
        }
        _ = shutdown => {
            tracing::info!("Shutting down sweeper");
        }
    }

    tracing::info!("Sweeper stopped");
    Ok(())
}
