//! Durable worker pool: claims Pending jobs and runs them.
//!
//! Shutdown signals the pool to stop claiming; it does not wait for in-flight
//! jobs. Coordinate with the runtime to give running jobs time to finish
//! before process exit.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;

use autos_core::stores::JobStore;
use autos_core::Config;
use autos_db::JOB_NOTIFY_CHANNEL;

use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct QueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.queue_max_workers,
            poll_interval_ms: config.queue_poll_interval_ms,
        }
    }
}

pub struct AcquisitionQueue {
    shutdown_tx: mpsc::Sender<()>,
}

impl AcquisitionQueue {
    /// Start the pool. With a `pool`, PostgreSQL LISTEN/NOTIFY wakes the loop
    /// as soon as a job is inserted, on top of the polling fallback; without
    /// one, only polling is used.
    pub fn start(
        jobs: Arc<dyn JobStore>,
        orchestrator: Arc<Orchestrator>,
        config: QueueConfig,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(worker_pool(jobs, orchestrator, config, shutdown_rx, pool));
        Self { shutdown_tx }
    }

    /// Signal the pool to stop claiming new jobs. Returns immediately;
    /// already-running jobs continue to their terminal status.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating acquisition queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn worker_pool(
    jobs: Arc<dyn JobStore>,
    orchestrator: Arc<Orchestrator>,
    config: QueueConfig,
    mut shutdown_rx: mpsc::Receiver<()>,
    pool: Option<sqlx::PgPool>,
) {
    let use_listen = pool.is_some();
    tracing::info!(
        max_workers = config.max_workers,
        poll_interval_ms = config.poll_interval_ms,
        listen_notify = use_listen,
        "Acquisition worker pool started"
    );

    let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
    if let Some(pool) = pool {
        tokio::spawn(async move {
            loop {
                match sqlx::postgres::PgListener::connect_with(&pool).await {
                    Ok(mut listener) => {
                        if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                            tracing::warn!(error = %e, "LISTEN failed, will retry");
                            sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                        while listener.recv().await.is_ok() {
                            let _ = notify_tx.send(()).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "PgListener connect failed, will retry");
                        sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Acquisition worker pool shutting down");
                break;
            }
            _ = notify_rx.recv() => {
                claim_and_dispatch_one(&jobs, &orchestrator, &semaphore).await;
            }
            _ = sleep(poll_interval) => {
                claim_and_dispatch_one(&jobs, &orchestrator, &semaphore).await;
            }
        }
    }

    tracing::info!("Acquisition worker pool stopped");
}

async fn claim_and_dispatch_one(
    jobs: &Arc<dyn JobStore>,
    orchestrator: &Arc<Orchestrator>,
    semaphore: &Arc<Semaphore>,
) {
    let permit = match semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::debug!("No workers available, skipping claim");
            return;
        }
    };

    match jobs.claim_pending().await {
        Ok(Some(job)) => {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = orchestrator.run_job(job).await {
                    tracing::error!(error = %e, "Job run ended in failure");
                }
            });
        }
        Ok(None) => {
            drop(permit);
            tracing::trace!("No pending jobs to claim");
        }
        Err(e) => {
            drop(permit);
            tracing::error!(error = %e, "Failed to claim job");
        }
    }
}
