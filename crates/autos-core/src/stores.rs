//! Persistence seams for jobs and documents.
//!
//! The orchestrator and worker pool talk to these traits, never to SQL
//! directly. `autos-db` provides the Postgres implementation; tests use
//! in-memory doubles.
//!
//! Status-changing operations take the expected current status and must apply
//! the change only when it still holds (`WHERE status = expected` in SQL), so
//! a concurrent racer surfaces as [`PipelineError::State`] instead of silently
//! clobbering the row.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{DeliveryOutcome, Document, DocumentStatus, Job, JobStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), PipelineError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, PipelineError>;

    /// Most recent Pending or Processing job for a process, if any. Drives the
    /// idempotency check on job creation.
    async fn find_active(&self, process_number: &str) -> Result<Option<Job>, PipelineError>;

    /// Guarded status transition. Sets `started_at` when entering Processing
    /// for the first time and `completed_at` when entering a terminal status.
    /// Fails with a `State` error when the row is no longer in `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<Job, PipelineError>;

    /// Terminal transition carrying a bounded failure cause.
    async fn fail(
        &self,
        id: Uuid,
        from: JobStatus,
        error_message: &str,
    ) -> Result<Job, PipelineError>;

    /// Persist aggregate counters after a batch.
    async fn update_progress(
        &self,
        id: Uuid,
        completed_documents: i32,
        failed_documents: i32,
    ) -> Result<(), PipelineError>;

    async fn set_total_documents(&self, id: Uuid, total: i32) -> Result<(), PipelineError>;

    /// Record the webhook delivery outcome. Never touches the job status.
    async fn record_webhook_outcome(
        &self,
        id: Uuid,
        outcome: &DeliveryOutcome,
    ) -> Result<(), PipelineError>;

    /// Claim the oldest Pending job for a worker and atomically transition it
    /// to Processing with `started_at` stamped. The Postgres implementation
    /// uses `FOR UPDATE SKIP LOCKED` so concurrent workers never double-claim.
    async fn claim_pending(&self) -> Result<Option<Job>, PipelineError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or refresh a document keyed by `(process_number, document_id)`.
    /// Metadata fields are updated on conflict; status and storage fields of
    /// an existing row are left alone.
    async fn upsert(&self, document: &Document) -> Result<Document, PipelineError>;

    async fn get(&self, id: Uuid) -> Result<Option<Document>, PipelineError>;

    async fn list_for_process(&self, process_number: &str)
        -> Result<Vec<Document>, PipelineError>;

    async fn list_for_process_with_status(
        &self,
        process_number: &str,
        status: DocumentStatus,
    ) -> Result<Vec<Document>, PipelineError>;

    /// Guarded status transition, same contract as [`JobStore::transition`].
    /// Sets `download_started_at` when entering Processing.
    async fn transition(
        &self,
        id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
    ) -> Result<Document, PipelineError>;

    /// Processing -> Available with the storage outcome, stamping
    /// `download_completed_at`.
    async fn mark_available(
        &self,
        id: Uuid,
        storage_key: &str,
        download_url: &str,
        size: i64,
    ) -> Result<Document, PipelineError>;

    /// -> Failed with a bounded error message.
    async fn mark_failed(
        &self,
        id: Uuid,
        from: DocumentStatus,
        error_message: &str,
    ) -> Result<Document, PipelineError>;

    /// Reset every non-Available document of a process to `to` ahead of a new
    /// run. Available rows are never touched.
    async fn reset_unavailable(
        &self,
        process_number: &str,
        to: DocumentStatus,
    ) -> Result<u64, PipelineError>;

    /// Refresh the presigned URL of an Available document.
    async fn update_download_url(&self, id: Uuid, url: &str) -> Result<(), PipelineError>;
}
