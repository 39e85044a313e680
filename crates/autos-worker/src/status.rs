//! Read-only job status projection for polling clients.

use std::sync::Arc;
use uuid::Uuid;

use autos_core::models::{DocumentSummary, JobResponse};
use autos_core::stores::{DocumentStore, JobStore};
use autos_core::PipelineError;

pub struct JobStatusView {
    jobs: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentStore>,
}

impl JobStatusView {
    pub fn new(jobs: Arc<dyn JobStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self { jobs, documents }
    }

    pub async fn job(&self, id: Uuid) -> Result<Option<JobResponse>, PipelineError> {
        Ok(self.jobs.get(id).await?.map(JobResponse::from))
    }

    /// Job with its per-document summaries, or `None` for an unknown id.
    pub async fn job_with_documents(
        &self,
        id: Uuid,
    ) -> Result<Option<(JobResponse, Vec<DocumentSummary>)>, PipelineError> {
        let Some(job) = self.jobs.get(id).await? else {
            return Ok(None);
        };
        let documents = self
            .documents
            .list_for_process(&job.process_number)
            .await?
            .iter()
            .map(DocumentSummary::from)
            .collect();
        Ok(Some((JobResponse::from(job), documents)))
    }
}
