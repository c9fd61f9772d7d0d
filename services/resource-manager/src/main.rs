//! corral resource manager.
//!
//! Serves the allocation ledger and worker lifecycle API, and runs the
//! background TTL expiry sweep.

use std::sync::Arc;

use anyhow::Result;
use corral_ledger::AllocationRegistry;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use corral_resource_manager::{
    api,
    classifier::WorkerClassifier,
    cluster::{ClusterClient, HttpClusterClient, MockClusterClient},
    config::Config,
    guard::WorkerSafetyGuard,
    manager::WorkerManager,
    provisioner::{HttpProvisioner, MockProvisioner, VmProvisioner},
    state::AppState,
    sweeper,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to CORRAL_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting corral resource manager");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    let registry = Arc::new(AllocationRegistry::new(config.ledger.clone()));

    let cluster: Arc<dyn ClusterClient> = match &config.cluster_api_url {
        Some(url) => {
            info!(url = %url, "Using HTTP cluster client");
            Arc::new(HttpClusterClient::new(url.clone()))
        }
        None => {
            warn!("CORRAL_CLUSTER_API_URL not set; using in-memory mock cluster");
            Arc::new(MockClusterClient::new())
        }
    };

    let provisioner: Arc<dyn VmProvisioner> = match &config.provisioner_api_url {
        Some(url) => {
            info!(url = %url, "Using HTTP VM provisioner");
            Arc::new(HttpProvisioner::new(url.clone()))
        }
        None => {
            warn!("CORRAL_PROVISIONER_API_URL not set; using in-memory mock provisioner");
            Arc::new(MockProvisioner::new())
        }
    };

    let guard = WorkerSafetyGuard::new(WorkerClassifier::new(config.protected_prefixes.clone()));
    let workers = Arc::new(WorkerManager::new(
        cluster,
        provisioner,
        guard,
        config.worker_ops.clone(),
    ));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the expiry sweep in background
    let sweep_handle = tokio::spawn(sweeper::run_sweep_loop(
        Arc::clone(&registry),
        config.sweep_interval_secs,
        shutdown_rx.clone(),
    ));

    // Build and run the server
    let state = AppState::new(registry, workers);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to the sweep loop
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, sweep_handle).await {
        warn!(error = %e, "Sweep loop did not shut down in time");
    }

    info!("Resource manager shutdown complete");
    Ok(())
}
