//! Acquisition worker daemon.

use anyhow::{Context, Result};
use std::sync::Arc;

use autos_core::stores::{DocumentStore, JobStore};
use autos_core::Config;
use autos_db::{DocumentRepository, JobRepository};
use autos_infra::webhook::DispatcherConfig;
use autos_infra::{DownloadGate, WebhookDispatcher};
use autos_upstream::{DownloaderOptions, HttpDocumentSource};
use autos_worker::{AcquisitionQueue, Orchestrator, OrchestratorConfig, QueueConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    autos_infra::init_telemetry();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(environment = ?config.environment, "Starting acquisition worker");

    let pool = autos_db::create_pool(&config).await?;

    let jobs: Arc<dyn JobStore> = Arc::new(JobRepository::new(pool.clone()));
    let documents: Arc<dyn DocumentStore> = Arc::new(DocumentRepository::new(pool.clone()));

    let storage = autos_storage::create_storage(&config)
        .await
        .context("Failed to initialize storage backend")?;

    let source = Arc::new(HttpDocumentSource::new(
        config.upstream_base_url.clone(),
        config.upstream_api_key.clone(),
        config.environment.request_timeout(),
    )?);

    let dispatcher = WebhookDispatcher::new(DispatcherConfig {
        max_attempts: config.webhook_max_attempts,
        production_profile: config.is_production(),
        ..DispatcherConfig::default()
    })?;

    let gate = Arc::new(DownloadGate::new(config.max_concurrent_downloads_per_actor));

    let downloader_options = DownloaderOptions {
        max_concurrent_chunks: config.max_concurrent_chunks,
        ..DownloaderOptions::default()
    };

    let orchestrator = Arc::new(Orchestrator::new(
        jobs.clone(),
        documents,
        source,
        storage,
        dispatcher,
        gate,
        downloader_options,
        OrchestratorConfig::from_config(&config),
    ));

    let queue = AcquisitionQueue::start(
        jobs,
        orchestrator,
        QueueConfig::from_config(&config),
        Some(pool),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    queue.shutdown().await;

    Ok(())
}
