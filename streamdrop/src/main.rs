use std::sync::Arc;

use streamdrop::config::SupervisorConfig;
use streamdrop::logging::init_logging;
use streamdrop::platforms::PlatformCatalog;
use streamdrop::store::{PipelineRepository, SqliteStore};
use streamdrop::supervisor::{SupervisorContext, SupervisorMonitor, SupervisorRegistry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = SupervisorConfig::from_env()?;

    // Keep the guard alive so the file writer flushes on exit
    let (logging, _log_guard) = init_logging(&config.log_dir)?;

    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    let catalog = Arc::new(PlatformCatalog::from_entries(store.list_platforms().await?));
    info!(platforms = catalog.len(), "Platform catalog loaded");

    let ctx = Arc::new(SupervisorContext::from_config(
        &config,
        catalog,
        store.clone(),
        store.clone(),
    ));
    let registry = Arc::new(SupervisorRegistry::new(ctx));

    let monitor = SupervisorMonitor::from_config(Arc::clone(&registry), &config);
    let cancel = monitor.cancellation_token();
    logging.start_retention_cleanup(cancel.clone());
    let monitor_task = monitor.spawn();

    info!(
        database = %config.database_url,
        capture_mode = ?config.capture_mode,
        "streamdrop initialized successfully"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    cancel.cancel();
    registry.shutdown().await;
    if let Err(e) = monitor_task.await {
        warn!(error = %e, "Monitor task ended abnormally");
    }

    info!("streamdrop stopped");
    Ok(())
}
