//! xpresso control plane
//!
//! Runs the allocation reconciler against the Postgres stores so that every
//! environment recorded on an active project ends up bound to a cluster.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use xpr_control_plane::{
    config,
    db::Database,
    env::EnvAllocator,
    reconcile::{AllocationReconciler, ReconcilerWorker},
    state::Stores,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to XPR_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting xpresso control plane");
    info!(
        environments = %config.environments,
        enforce_undeploy_order = config.ordering.enforce_undeploy_order,
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        "Configuration loaded"
    );

    // Connect to database
    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let stores = Stores::postgres(&db);
    let allocator = Arc::new(EnvAllocator::new(
        stores.clusters.clone(),
        stores.allocations.clone(),
        config.environments.clone(),
    ));
    let reconciler = AllocationReconciler::new(allocator, stores.projects.clone());

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = ReconcilerWorker::new(reconciler, config.reconcile_interval);
    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    // Signal shutdown to the worker
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, worker_handle).await {
        warn!(error = %e, "Reconciler worker did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
