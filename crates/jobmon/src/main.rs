//! jobmon - HPC job metric data service
//!
//! Serves job metric data from live backends and the job archive, and runs
//! footprint aggregation and retention in the background.

use anyhow::{Context, Result};
use jobmon::{api, config::ServiceConfig};
use jobmon_lib::{
    archive::{Archive, FsArchive},
    cluster::ClusterCatalog,
    collector::{BackendRegistry, CollectorFactory},
    health::{components, HealthRegistry},
    observability::{ServiceMetrics, StructuredLogger},
    repository::{JobRepository, MemoryJobRepository},
    tasks::{FootprintWorker, RetentionWorker, Schedule, Scheduler},
    MetricDispatcher,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting jobmon");

    let config = ServiceConfig::load()?;
    info!(instance = %config.instance, clusters = config.clusters.len(), "Service configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::METRIC_STORE).await;
    health_registry.register(components::ARCHIVE).await;
    health_registry.register(components::FOOTPRINT_WORKER).await;

    let metrics = ServiceMetrics::new();
    let logger = StructuredLogger::new(&config.instance);

    // A cluster that cannot get its backend cannot be served at all
    let registry = Arc::new(
        BackendRegistry::from_clusters(&CollectorFactory::with_builtin(), &config.clusters)
            .context("Failed to initialise metric data repositories")?,
    );
    info!(clusters = ?registry.clusters(), "Metric data repositories ready");
    if registry.is_empty() {
        health_registry
            .set_unhealthy(components::METRIC_STORE, "No metric data repository configured")
            .await;
    }

    let fs_archive = Arc::new(FsArchive::new(&config.archive_path));
    if !config.disable_archive && !fs_archive.root().is_dir() {
        warn!(path = %config.archive_path.display(), "Job archive directory missing");
        health_registry
            .set_unhealthy(components::ARCHIVE, "Job archive directory missing")
            .await;
    }
    let archive: Arc<dyn Archive> = fs_archive;

    let catalog = Arc::new(ClusterCatalog::new(config.clusters.clone()));
    let dispatcher = Arc::new(
        MetricDispatcher::builder()
            .registry(registry)
            .archive(Arc::clone(&archive))
            .catalog(Arc::clone(&catalog))
            .archive_enabled(!config.disable_archive)
            .live_ttl(config.live_cache_ttl())
            .cache_capacity(config.cache_capacity_bytes)
            .health(health_registry.clone())
            .build()?,
    );

    let repository: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::with_persistence(
        Arc::clone(&catalog),
        config.job_store_path.clone(),
    ));

    let mut scheduler = Scheduler::new().with_health(health_registry.clone());
    scheduler.register(
        Arc::new(FootprintWorker::new(
            Arc::clone(&dispatcher),
            Arc::clone(&repository),
            logger.clone(),
        )),
        Schedule::Every(config.footprint_interval()?),
    );
    if let Some((retention, schedule)) = config.retention()? {
        health_registry.register(components::RETENTION).await;
        scheduler.register(
            Arc::new(RetentionWorker::new(
                Arc::clone(&archive),
                Arc::clone(&repository),
                retention,
                logger.clone(),
            )),
            schedule,
        );
    }
    scheduler.start();

    logger.log_startup(SERVICE_VERSION, catalog.clusters().len(), !config.disable_archive);

    let app_state = Arc::new(
        api::AppState::new(health_registry.clone(), metrics).with_dispatcher(Arc::clone(&dispatcher)),
    );

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            "SIGINT received"
        }
        served = api_handle => {
            match served {
                Ok(Ok(())) => "API server stopped",
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    "API server failed"
                }
                Err(e) => {
                    error!(error = %e, "API server task aborted");
                    "API server task aborted"
                }
            }
        }
    };

    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;
    scheduler.stop().await;
    info!("Shutdown complete");

    Ok(())
}
