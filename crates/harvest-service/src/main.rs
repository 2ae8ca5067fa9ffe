//! Harvest service - periodic reward accrual over the deposit ledger.
//!
//! This is the main entry point for the harvest service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvest_ledger::{Engine, SystemClock};
use harvest_service::{notifier_from_config, ServiceConfig};
use harvest_store::{MemoryStore, PgStore, Store};

/// How long to wait for a pooled database connection.
const ACQUIRE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvest=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting harvest service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        database_configured = %config.database_url.is_some(),
        accrual_interval_secs = %config.accrual_interval_secs,
        call_timeout_ms = %config.call_timeout_ms,
        approval_timeout_ms = %config.approval_timeout_ms,
        webhook_configured = %config.notify_webhook_url.is_some(),
        identity_configured = %config.jwt_secret.is_some(),
        "Service configuration loaded"
    );

    if let Some(url) = &config.database_url {
        tracing::info!(max_connections = %config.max_connections, "Connecting to PostgreSQL");
        let store = PgStore::connect(url, config.max_connections, ACQUIRE_TIMEOUT).await?;
        store.migrate().await?;
        run(store, &config).await
    } else {
        tracing::warn!("DATABASE_URL not set, using the in-memory store");
        run(MemoryStore::new(), &config).await
    }
}

async fn run<S: Store>(store: S, config: &ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let notifier = notifier_from_config(config)?;
    let engine = Engine::new(store, Arc::new(SystemClock), notifier, config.ledger());

    engine
        .scheduler(config.accrual_interval())
        .run_until(shutdown_signal())
        .await;

    tracing::info!("Harvest service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
