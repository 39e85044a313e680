//! Job orchestrator: idempotent job creation and the batched run loop.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

use autos_core::error::ErrorKind;
use autos_core::models::{
    CompletionPayload, DeliveryOutcome, Document, DocumentStatus, DocumentSummary, Job, JobStatus,
};
use autos_core::retry::{BackoffStrategy, RetryCondition, RetryLimits, RetryPolicy};
use autos_core::stores::{DocumentStore, JobStore};
use autos_core::{Config, PipelineError};
use autos_infra::webhook::validate_webhook_url;
use autos_infra::{DownloadGate, WebhookDispatcher};
use autos_storage::keys::document_storage_key;
use autos_storage::Storage;
use autos_upstream::{ChunkedDownloader, DocumentSource, DownloaderOptions};

#[derive(Clone)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub presign_expiry: Duration,
    /// Per-attempt ceiling for one full document download.
    pub download_timeout: Duration,
    pub production_profile: bool,
    pub retry_limits: RetryLimits,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_pause: Duration::from_secs(1),
            presign_expiry: Duration::from_secs(3600),
            download_timeout: Duration::from_secs(300),
            production_profile: false,
            retry_limits: RetryLimits {
                max_attempts_ceiling: 10,
                max_delay_ceiling: Duration::from_secs(300),
            },
        }
    }
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_pause: config.environment.batch_pause(),
            presign_expiry: Duration::from_secs(config.presign_expiry_seconds),
            download_timeout: config.environment.download_timeout(),
            production_profile: config.is_production(),
            retry_limits: config.retry_limits(),
        }
    }
}

/// Result of an acquisition request.
#[derive(Debug)]
pub enum AcquisitionOutcome {
    /// A new job was created and queued.
    Created(Job),
    /// A Pending or Processing job already covers this process.
    Active(Job),
    /// Every known document is already Available; no job was created.
    AlreadyComplete {
        process_number: String,
        refreshed_urls: usize,
    },
}

#[derive(Clone)]
pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentStore>,
    source: Arc<dyn DocumentSource>,
    storage: Arc<dyn Storage>,
    downloader: Arc<ChunkedDownloader>,
    dispatcher: WebhookDispatcher,
    gate: Arc<DownloadGate>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentStore>,
        source: Arc<dyn DocumentSource>,
        storage: Arc<dyn Storage>,
        dispatcher: WebhookDispatcher,
        gate: Arc<DownloadGate>,
        downloader_options: DownloaderOptions,
        config: OrchestratorConfig,
    ) -> Self {
        let downloader = Arc::new(ChunkedDownloader::new(source.clone(), downloader_options));
        Self {
            jobs,
            documents,
            source,
            storage,
            downloader,
            dispatcher,
            gate,
            config,
        }
    }

    /// Idempotent entry point: at most one active job per process.
    ///
    /// 1. An active job exists -> returned unchanged.
    /// 2. Every known document is Available (and there is at least one) ->
    ///    no job; presigned URLs are refreshed instead.
    /// 3. Otherwise a Pending job is created, with every non-Available
    ///    document reset ahead of the run.
    #[tracing::instrument(skip(self, webhook_url))]
    pub async fn request_acquisition(
        &self,
        process_number: &str,
        webhook_url: Option<String>,
    ) -> Result<AcquisitionOutcome, PipelineError> {
        if process_number.trim().is_empty() {
            return Err(PipelineError::Validation(
                "Process number must not be empty".to_string(),
            ));
        }
        if let Some(url) = &webhook_url {
            validate_webhook_url(url, self.config.production_profile)?;
        }

        if let Some(job) = self.jobs.find_active(process_number).await? {
            tracing::info!(job_id = %job.id, status = %job.status, "Active job already covers process");
            return Ok(AcquisitionOutcome::Active(job));
        }

        self.sync_catalog(process_number).await?;

        let docs = self.documents.list_for_process(process_number).await?;
        let total = docs.len();
        let available = docs.iter().filter(|d| d.is_available()).count();

        if total > 0 && available == total {
            let refreshed_urls = self.refresh_urls(&docs).await?;
            tracing::info!(process_number, refreshed_urls, "Process already complete");
            return Ok(AcquisitionOutcome::AlreadyComplete {
                process_number: process_number.to_string(),
                refreshed_urls,
            });
        }

        // Without a webhook the caller polls, so work may start immediately;
        // the run loop treats both labels the same.
        let reset_to = if webhook_url.is_some() {
            DocumentStatus::Pending
        } else {
            DocumentStatus::Processing
        };
        self.documents
            .reset_unavailable(process_number, reset_to)
            .await?;

        let job = new_job(process_number, webhook_url, total as i32);
        self.jobs.insert(&job).await?;
        tracing::info!(job_id = %job.id, total_documents = total, "Acquisition job created");
        Ok(AcquisitionOutcome::Created(job))
    }

    /// Run one claimed job to a terminal status. Accepts a Pending job or one
    /// the queue already moved to Processing while claiming it.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, process_number = %job.process_number))]
    pub async fn run_job(&self, job: Job) -> Result<(), PipelineError> {
        let job = match job.status {
            JobStatus::Pending => {
                self.jobs
                    .transition(job.id, JobStatus::Pending, JobStatus::Processing)
                    .await?
            }
            JobStatus::Processing => job,
            other => {
                tracing::warn!(status = %other, "Refusing to run job outside Pending/Processing");
                return Ok(());
            }
        };

        match self.run_job_inner(&job).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "Job run failed");
                if let Err(fail_err) = self
                    .jobs
                    .fail(job.id, JobStatus::Processing, &e.to_string())
                    .await
                {
                    tracing::error!(error = %fail_err, "Could not record job failure");
                }
                Err(e)
            }
        }
    }

    async fn run_job_inner(&self, job: &Job) -> Result<(), PipelineError> {
        let docs = self.documents.list_for_process(&job.process_number).await?;
        let total = docs.len() as i32;
        if total != job.total_documents {
            self.jobs.set_total_documents(job.id, total).await?;
        }

        let mut completed = docs.iter().filter(|d| d.is_available()).count() as i32;
        let mut failed = 0i32;
        let work: Vec<Document> = docs.into_iter().filter(|d| d.needs_acquisition()).collect();

        let progress_retry = RetryPolicy::storage().clamp_to(&self.config.retry_limits);

        for (batch_index, batch) in work.chunks(self.config.batch_size.max(1)).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(self.config.batch_pause).await;
            }

            // Cancellation is observed between batches; in-flight work is
            // never aborted and Available stays Available.
            if let Some(current) = self.jobs.get(job.id).await? {
                if current.status == JobStatus::Cancelled {
                    tracing::info!(completed, failed, "Job cancelled, stopping further batches");
                    return Ok(());
                }
            }

            let mut tasks = JoinSet::new();
            for doc in batch {
                let this = self.clone();
                let doc = doc.clone();
                tasks.spawn(async move { this.acquire_document(doc).await });
            }
            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok(true) => completed += 1,
                    Ok(false) => failed += 1,
                    Err(e) => {
                        failed += 1;
                        tracing::error!(error = %e, "Document task aborted");
                    }
                }
            }

            progress_retry
                .execute("update_progress", || {
                    self.jobs.update_progress(job.id, completed, failed)
                })
                .await?;
        }

        // Join barrier reached: every document is terminal.
        let final_job = if failed == 0 {
            self.jobs
                .transition(job.id, JobStatus::Processing, JobStatus::Completed)
                .await?
        } else {
            let message = format!("{} of {} documents failed to acquire", failed, total);
            self.jobs
                .fail(job.id, JobStatus::Processing, &message)
                .await?
        };
        tracing::info!(
            status = %final_job.status,
            completed,
            failed,
            "Job reached terminal status"
        );

        self.deliver_webhook(&final_job, completed).await
    }

    /// Acquire one document end to end. Never propagates: a failure is
    /// recorded on the document and reported as `false`.
    async fn acquire_document(&self, doc: Document) -> bool {
        let doc = match doc.status {
            DocumentStatus::Processing => doc,
            DocumentStatus::Available => return true,
            from => match self
                .documents
                .transition(doc.id, from, DocumentStatus::Processing)
                .await
            {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::error!(document_id = %doc.document_id, error = %e, "Could not start document");
                    return false;
                }
            },
        };

        let Some(source_ref) = doc.source_ref.clone() else {
            // Failed without consuming any download attempt.
            if let Err(persist_err) = self
                .documents
                .mark_failed(
                    doc.id,
                    DocumentStatus::Processing,
                    "Document has no source reference",
                )
                .await
            {
                tracing::error!(error = %persist_err, "Could not record document failure");
            }
            return false;
        };

        match self.fetch_and_store(&doc, &source_ref).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    document_id = %doc.document_id,
                    error = %e,
                    "Document acquisition failed"
                );
                if let Err(persist_err) = self
                    .documents
                    .mark_failed(doc.id, DocumentStatus::Processing, &e.to_string())
                    .await
                {
                    tracing::error!(error = %persist_err, "Could not record document failure");
                }
                false
            }
        }
    }

    async fn fetch_and_store(
        &self,
        doc: &Document,
        source_ref: &str,
    ) -> Result<(), PipelineError> {
        // Backpressure from the per-actor gate is waited out, not failed.
        let permit = gate_backoff()
            .execute("download_slot", || {
                self.gate.acquire(&doc.process_number)
            })
            .await?
            .value;

        let mut download_retry = RetryPolicy::upstream_http().clamp_to(&self.config.retry_limits);
        download_retry.attempt_timeout = Some(self.config.download_timeout);

        let expected_size = doc.size.map(|s| s as u64);
        let bytes = download_retry
            .execute("acquire_document", || async {
                self.downloader
                    .acquire(source_ref, expected_size)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?
            .value;
        drop(permit);

        let storage_key = document_storage_key(&doc.process_number, &doc.document_id, &doc.name);
        let storage_retry = RetryPolicy::storage().clamp_to(&self.config.retry_limits);
        storage_retry
            .execute("store_document", || async {
                self.storage
                    .put(&storage_key, bytes.clone(), &doc.mime_type)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;

        let download_url = self
            .storage
            .presigned_url(&storage_key, self.config.presign_expiry)
            .await
            .map_err(PipelineError::from)?;

        self.documents
            .mark_available(doc.id, &storage_key, &download_url, bytes.len() as i64)
            .await?;
        tracing::info!(
            document_id = %doc.document_id,
            size_bytes = bytes.len(),
            storage_key,
            "Document acquired"
        );
        Ok(())
    }

    /// Hand the completion payload to the dispatcher. Delivery never touches
    /// the job's terminal status; with zero successes there are no salvageable
    /// URLs, so dispatch is skipped and the reason recorded.
    async fn deliver_webhook(&self, job: &Job, completed: i32) -> Result<(), PipelineError> {
        let Some(url) = &job.webhook_url else {
            return Ok(());
        };

        if completed == 0 {
            let outcome = DeliveryOutcome::failed(
                None,
                "Delivery skipped: no documents were acquired".to_string(),
                0,
            );
            self.jobs.record_webhook_outcome(job.id, &outcome).await?;
            return Ok(());
        }

        let docs = self.documents.list_for_process(&job.process_number).await?;
        let summaries: Vec<DocumentSummary> = docs.iter().map(DocumentSummary::from).collect();
        let payload = CompletionPayload::from_job(job, summaries);

        let outcome = self.dispatcher.send(url, &payload).await;
        self.jobs.record_webhook_outcome(job.id, &outcome).await?;
        Ok(())
    }

    /// Move an active job to Cancelled. The run loop observes this between
    /// batches and stops scheduling further documents.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<Job, PipelineError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| PipelineError::Validation(format!("Job {} not found", job_id)))?;
        self.jobs
            .transition(job_id, job.status, JobStatus::Cancelled)
            .await
    }

    /// Refresh upstream metadata into the document catalog. Status and
    /// storage fields of known documents are untouched.
    async fn sync_catalog(&self, process_number: &str) -> Result<(), PipelineError> {
        let listing = RetryPolicy::upstream_http()
            .clamp_to(&self.config.retry_limits)
            .execute("list_documents", || {
                self.source.list_documents(process_number)
            })
            .await?
            .value;

        tracing::debug!(process_number, count = listing.len(), "Upstream listing fetched");
        for meta in listing {
            let now = Utc::now();
            let document = Document {
                id: Uuid::new_v4(),
                document_id: meta.id,
                process_number: process_number.to_string(),
                name: meta.name,
                mime_type: meta.mime_type,
                size: meta.size.map(|s| s as i64),
                source_ref: meta.source_ref,
                status: DocumentStatus::Pending,
                storage_key: None,
                download_url: None,
                error_message: None,
                download_started_at: None,
                download_completed_at: None,
                created_at: now,
                updated_at: now,
            };
            self.documents.upsert(&document).await?;
        }
        Ok(())
    }

    async fn refresh_urls(&self, docs: &[Document]) -> Result<usize, PipelineError> {
        let mut refreshed = 0;
        for doc in docs {
            if let Some(key) = &doc.storage_key {
                let url = self
                    .storage
                    .presigned_url(key, self.config.presign_expiry)
                    .await
                    .map_err(PipelineError::from)?;
                self.documents.update_download_url(doc.id, &url).await?;
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }
}

fn new_job(process_number: &str, webhook_url: Option<String>, total_documents: i32) -> Job {
    let now = Utc::now();
    Job {
        id: Uuid::new_v4(),
        process_number: process_number.to_string(),
        status: JobStatus::Pending,
        total_documents,
        completed_documents: 0,
        failed_documents: 0,
        webhook_url,
        webhook_sent: false,
        webhook_sent_at: None,
        webhook_attempts: 0,
        webhook_last_error: None,
        error_message: None,
        created_at: now,
        started_at: None,
        completed_at: None,
        updated_at: now,
    }
}

/// Short fixed backoff while waiting for a per-actor download slot.
fn gate_backoff() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 40,
        base_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(2),
        backoff_multiplier: 1.0,
        jitter_ratio: 0.1,
        strategy: BackoffStrategy::Fixed,
        condition: RetryCondition::ErrorKinds(vec![ErrorKind::Capacity]),
        attempt_timeout: None,
    }
}
