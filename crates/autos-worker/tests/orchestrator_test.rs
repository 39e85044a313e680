//! End-to-end orchestrator runs against in-memory stores, a scripted source,
//! an in-memory storage backend, and a wiremock webhook receiver.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use autos_core::models::{DeliveryOutcome, Document, DocumentStatus, Job, JobStatus};
use autos_core::retry::RetryLimits;
use autos_core::stores::{DocumentStore, JobStore};
use autos_core::{PipelineError, StorageBackendKind};
use autos_infra::webhook::DispatcherConfig;
use autos_infra::{DownloadGate, WebhookDispatcher};
use autos_storage::{Storage, StorageResult};
use autos_upstream::{ByteRange, DocumentMeta, DocumentSource, DownloaderOptions, SourceProbe};
use autos_worker::{AcquisitionOutcome, Orchestrator, OrchestratorConfig};

const PROCESS: &str = "0001234-56.2024.8.26.0100";

// ---------------------------------------------------------------------------
// In-memory doubles

#[derive(Default)]
struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), PipelineError> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, PipelineError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn find_active(&self, process_number: &str) -> Result<Option<Job>, PipelineError> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.process_number == process_number && j.status.is_active())
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<Job, PipelineError> {
        from.ensure_transition(to)?;
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| PipelineError::Validation(format!("Job {} not found", id)))?;
        if job.status != from {
            return Err(PipelineError::State {
                entity: "job",
                from: job.status.to_string(),
                to: to.to_string(),
            });
        }
        job.status = to;
        if to == JobStatus::Processing && job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        if to.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn fail(
        &self,
        id: Uuid,
        from: JobStatus,
        error_message: &str,
    ) -> Result<Job, PipelineError> {
        let mut job = self.transition(id, from, JobStatus::Failed).await?;
        let mut jobs = self.jobs.lock().await;
        if let Some(stored) = jobs.get_mut(&id) {
            stored.error_message = Some(error_message.to_string());
            job = stored.clone();
        }
        Ok(job)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        completed_documents: i32,
        failed_documents: i32,
    ) -> Result<(), PipelineError> {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.completed_documents = completed_documents;
            job.failed_documents = failed_documents;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_total_documents(&self, id: Uuid, total: i32) -> Result<(), PipelineError> {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.total_documents = total;
        }
        Ok(())
    }

    async fn record_webhook_outcome(
        &self,
        id: Uuid,
        outcome: &DeliveryOutcome,
    ) -> Result<(), PipelineError> {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.webhook_sent = outcome.success;
            if outcome.success {
                job.webhook_sent_at = Some(Utc::now());
            }
            job.webhook_attempts += outcome.attempts as i32;
            job.webhook_last_error = outcome.error.clone();
        }
        Ok(())
    }

    async fn claim_pending(&self) -> Result<Option<Job>, PipelineError> {
        let mut jobs = self.jobs.lock().await;
        let candidate = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| j.created_at)
            .map(|j| j.id);
        Ok(candidate.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.status = JobStatus::Processing;
                job.started_at.get_or_insert_with(Utc::now);
                job.clone()
            })
        }))
    }
}

#[derive(Default)]
struct InMemoryDocumentStore {
    docs: Mutex<HashMap<Uuid, Document>>,
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert(&self, document: &Document) -> Result<Document, PipelineError> {
        let mut docs = self.docs.lock().await;
        let existing = docs
            .values_mut()
            .find(|d| {
                d.process_number == document.process_number
                    && d.document_id == document.document_id
            })
            .map(|d| {
                d.name = document.name.clone();
                d.mime_type = document.mime_type.clone();
                d.size = document.size;
                d.source_ref = document.source_ref.clone();
                d.updated_at = Utc::now();
                d.clone()
            });
        match existing {
            Some(doc) => Ok(doc),
            None => {
                docs.insert(document.id, document.clone());
                Ok(document.clone())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>, PipelineError> {
        Ok(self.docs.lock().await.get(&id).cloned())
    }

    async fn list_for_process(
        &self,
        process_number: &str,
    ) -> Result<Vec<Document>, PipelineError> {
        let mut docs: Vec<Document> = self
            .docs
            .lock()
            .await
            .values()
            .filter(|d| d.process_number == process_number)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.document_id.clone());
        Ok(docs)
    }

    async fn list_for_process_with_status(
        &self,
        process_number: &str,
        status: DocumentStatus,
    ) -> Result<Vec<Document>, PipelineError> {
        Ok(self
            .list_for_process(process_number)
            .await?
            .into_iter()
            .filter(|d| d.status == status)
            .collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
    ) -> Result<Document, PipelineError> {
        from.ensure_transition(to)?;
        let mut docs = self.docs.lock().await;
        let doc = docs
            .get_mut(&id)
            .ok_or_else(|| PipelineError::Validation(format!("Document {} not found", id)))?;
        if doc.status != from {
            return Err(PipelineError::State {
                entity: "document",
                from: doc.status.to_string(),
                to: to.to_string(),
            });
        }
        doc.status = to;
        if to == DocumentStatus::Processing && doc.download_started_at.is_none() {
            doc.download_started_at = Some(Utc::now());
        }
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn mark_available(
        &self,
        id: Uuid,
        storage_key: &str,
        download_url: &str,
        size: i64,
    ) -> Result<Document, PipelineError> {
        let mut docs = self.docs.lock().await;
        let doc = docs
            .get_mut(&id)
            .ok_or_else(|| PipelineError::Validation(format!("Document {} not found", id)))?;
        if doc.status != DocumentStatus::Processing {
            return Err(PipelineError::State {
                entity: "document",
                from: doc.status.to_string(),
                to: DocumentStatus::Available.to_string(),
            });
        }
        doc.status = DocumentStatus::Available;
        doc.storage_key = Some(storage_key.to_string());
        doc.download_url = Some(download_url.to_string());
        doc.size = Some(size);
        doc.error_message = None;
        doc.download_completed_at = Some(Utc::now());
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        from: DocumentStatus,
        error_message: &str,
    ) -> Result<Document, PipelineError> {
        let mut doc = self.transition(id, from, DocumentStatus::Failed).await?;
        let mut docs = self.docs.lock().await;
        if let Some(stored) = docs.get_mut(&id) {
            stored.error_message = Some(error_message.to_string());
            doc = stored.clone();
        }
        Ok(doc)
    }

    async fn reset_unavailable(
        &self,
        process_number: &str,
        to: DocumentStatus,
    ) -> Result<u64, PipelineError> {
        let mut docs = self.docs.lock().await;
        let mut reset = 0;
        for doc in docs.values_mut() {
            if doc.process_number == process_number && doc.status != DocumentStatus::Available {
                doc.status = to;
                doc.error_message = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn update_download_url(&self, id: Uuid, url: &str) -> Result<(), PipelineError> {
        if let Some(doc) = self.docs.lock().await.get_mut(&id) {
            doc.download_url = Some(url.to_string());
        }
        Ok(())
    }
}

/// Scripted upstream: fixed listing, per-ref failure injection, fetch counts.
struct ScriptedSource {
    docs: Mutex<Vec<DocumentMeta>>,
    failing_refs: Mutex<HashSet<String>>,
    fetch_counts: Mutex<HashMap<String, u32>>,
    fetch_delay: Duration,
}

impl ScriptedSource {
    fn new(docs: Vec<DocumentMeta>) -> Self {
        Self {
            docs: Mutex::new(docs),
            failing_refs: Mutex::new(HashSet::new()),
            fetch_counts: Mutex::new(HashMap::new()),
            fetch_delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    async fn fail_ref(&self, source_ref: &str) {
        self.failing_refs.lock().await.insert(source_ref.to_string());
    }

    async fn heal_ref(&self, source_ref: &str) {
        self.failing_refs.lock().await.remove(source_ref);
    }

    async fn fetches(&self, source_ref: &str) -> u32 {
        self.fetch_counts
            .lock()
            .await
            .get(source_ref)
            .copied()
            .unwrap_or(0)
    }
}

const DOC_BYTES: usize = 256;

#[async_trait]
impl DocumentSource for ScriptedSource {
    async fn list_documents(
        &self,
        _process_number: &str,
    ) -> Result<Vec<DocumentMeta>, PipelineError> {
        Ok(self.docs.lock().await.clone())
    }

    async fn fetch_bytes(
        &self,
        source_ref: &str,
        _range: Option<ByteRange>,
    ) -> Result<Bytes, PipelineError> {
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        *self
            .fetch_counts
            .lock()
            .await
            .entry(source_ref.to_string())
            .or_insert(0) += 1;
        if self.failing_refs.lock().await.contains(source_ref) {
            return Err(PipelineError::UpstreamStatus {
                status: 404,
                message: format!("{} not found", source_ref),
            });
        }
        Ok(Bytes::from(vec![0xAB; DOC_BYTES]))
    }

    async fn probe(&self, _source_ref: &str) -> Result<SourceProbe, PipelineError> {
        Ok(SourceProbe {
            size: Some(DOC_BYTES as u64),
            accepts_ranges: false,
        })
    }
}

#[derive(Default)]
struct InMemoryStorage {
    objects: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn put(&self, storage_key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .await
            .insert(storage_key.to_string(), data);
        Ok(())
    }

    async fn get(&self, storage_key: &str) -> StorageResult<Bytes> {
        self.objects
            .lock()
            .await
            .get(storage_key)
            .cloned()
            .ok_or_else(|| autos_storage::StorageError::NotFound(storage_key.to_string()))
    }

    async fn presigned_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(format!(
            "https://files.test/{}?expires={}&nonce={}",
            storage_key,
            expires_in.as_secs(),
            Uuid::new_v4()
        ))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        self.objects.lock().await.remove(storage_key);
        Ok(())
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().await.contains_key(storage_key))
    }

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        Ok(self.get(storage_key).await?.len() as u64)
    }

    fn backend_type(&self) -> StorageBackendKind {
        StorageBackendKind::Local
    }
}

// ---------------------------------------------------------------------------
// Harness

struct Harness {
    jobs: Arc<InMemoryJobStore>,
    documents: Arc<InMemoryDocumentStore>,
    source: Arc<ScriptedSource>,
    storage: Arc<InMemoryStorage>,
    orchestrator: Orchestrator,
}

fn meta(id: &str, source_ref: Option<&str>) -> DocumentMeta {
    DocumentMeta {
        id: id.to_string(),
        name: format!("{}.pdf", id.to_lowercase()),
        mime_type: "application/pdf".to_string(),
        size: Some(DOC_BYTES as u64),
        source_ref: source_ref.map(str::to_string),
    }
}

fn harness(source: ScriptedSource) -> Harness {
    harness_with_batch(source, 2)
}

fn harness_with_batch(source: ScriptedSource, batch_size: usize) -> Harness {
    let jobs = Arc::new(InMemoryJobStore::default());
    let documents = Arc::new(InMemoryDocumentStore::default());
    let source = Arc::new(source);
    let storage = Arc::new(InMemoryStorage::default());

    let dispatcher = WebhookDispatcher::new(DispatcherConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(2),
        production_profile: false,
    })
    .unwrap();

    let orchestrator = Orchestrator::new(
        jobs.clone(),
        documents.clone(),
        source.clone(),
        storage.clone(),
        dispatcher,
        Arc::new(DownloadGate::new(8)),
        DownloaderOptions::default(),
        OrchestratorConfig {
            batch_size,
            batch_pause: Duration::from_millis(5),
            presign_expiry: Duration::from_secs(60),
            download_timeout: Duration::from_secs(2),
            production_profile: false,
            retry_limits: RetryLimits {
                max_attempts_ceiling: 10,
                max_delay_ceiling: Duration::from_secs(1),
            },
        },
    );

    Harness {
        jobs,
        documents,
        source,
        storage,
        orchestrator,
    }
}

fn created(outcome: AcquisitionOutcome) -> Job {
    match outcome {
        AcquisitionOutcome::Created(job) => job,
        other => panic!("expected Created, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Scenarios

#[tokio::test]
async fn partial_failure_then_rerun_touches_only_the_failed_document() {
    let hook = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&hook)
        .await;
    let hook_url = format!("{}/hook", hook.uri());

    let source = ScriptedSource::new(vec![
        meta("DOC-1", Some("ref-1")),
        meta("DOC-2", Some("ref-2")),
        meta("DOC-3", Some("ref-3")),
    ]);
    source.fail_ref("ref-3").await;
    let h = harness(source);

    // First run: two documents succeed, one fails.
    let job = created(
        h.orchestrator
            .request_acquisition(PROCESS, Some(hook_url.clone()))
            .await
            .unwrap(),
    );
    assert_eq!(job.total_documents, 3);
    h.orchestrator.run_job(job.clone()).await.unwrap();

    let job = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.completed_documents, 2);
    assert_eq!(job.failed_documents, 1);
    assert!(job.error_message.unwrap().contains("1 of 3"));
    assert!(job.webhook_sent);
    assert!(job.completed_at.is_some());

    let docs = h.documents.list_for_process(PROCESS).await.unwrap();
    let available: Vec<_> = docs.iter().filter(|d| d.is_available()).collect();
    assert_eq!(available.len(), 2);
    for doc in &available {
        let key = doc.storage_key.as_ref().unwrap();
        assert!(key.starts_with(&format!("processes/{}/documents/", PROCESS)));
        assert!(h.storage.exists(key).await.unwrap());
        assert!(doc.download_url.is_some());
    }
    let failed = docs
        .iter()
        .find(|d| d.status == DocumentStatus::Failed)
        .unwrap();
    assert_eq!(failed.document_id, "DOC-3");
    assert!(failed.error_message.as_ref().unwrap().contains("404"));

    // The webhook carried the partial result.
    let requests = hook.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["processNumber"], PROCESS);
    assert_eq!(body["completedDocuments"], 2);
    assert_eq!(body["failedDocuments"], 1);
    assert_eq!(body["documents"].as_array().unwrap().len(), 3);

    // Second run after the upstream recovers: only DOC-3 is re-fetched.
    h.source.heal_ref("ref-3").await;
    let rerun = created(
        h.orchestrator
            .request_acquisition(PROCESS, Some(hook_url))
            .await
            .unwrap(),
    );
    assert_ne!(rerun.id, job.id);
    h.orchestrator.run_job(rerun.clone()).await.unwrap();

    let rerun = h.jobs.get(rerun.id).await.unwrap().unwrap();
    assert_eq!(rerun.status, JobStatus::Completed);
    assert_eq!(rerun.completed_documents, 3);
    assert_eq!(rerun.failed_documents, 0);

    assert_eq!(h.source.fetches("ref-1").await, 1);
    assert_eq!(h.source.fetches("ref-2").await, 1);
    assert_eq!(h.source.fetches("ref-3").await, 2);

    let docs = h.documents.list_for_process(PROCESS).await.unwrap();
    assert!(docs.iter().all(|d| d.is_available()));
    assert_eq!(hook.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn second_request_returns_the_active_job_unchanged() {
    let h = harness(ScriptedSource::new(vec![meta("DOC-1", Some("ref-1"))]));

    let first = created(
        h.orchestrator
            .request_acquisition(PROCESS, None)
            .await
            .unwrap(),
    );
    match h
        .orchestrator
        .request_acquisition(PROCESS, None)
        .await
        .unwrap()
    {
        AcquisitionOutcome::Active(job) => assert_eq!(job.id, first.id),
        other => panic!("expected Active, got {:?}", other),
    }
}

#[tokio::test]
async fn fully_available_process_refreshes_urls_without_a_job() {
    let h = harness(ScriptedSource::new(vec![
        meta("DOC-1", Some("ref-1")),
        meta("DOC-2", Some("ref-2")),
    ]));

    let job = created(
        h.orchestrator
            .request_acquisition(PROCESS, None)
            .await
            .unwrap(),
    );
    h.orchestrator.run_job(job).await.unwrap();

    let before: Vec<_> = h
        .documents
        .list_for_process(PROCESS)
        .await
        .unwrap()
        .iter()
        .map(|d| d.download_url.clone().unwrap())
        .collect();

    match h
        .orchestrator
        .request_acquisition(PROCESS, None)
        .await
        .unwrap()
    {
        AcquisitionOutcome::AlreadyComplete { refreshed_urls, .. } => {
            assert_eq!(refreshed_urls, 2)
        }
        other => panic!("expected AlreadyComplete, got {:?}", other),
    }
    assert!(h.jobs.find_active(PROCESS).await.unwrap().is_none());

    // URLs were regenerated.
    let after: Vec<_> = h
        .documents
        .list_for_process(PROCESS)
        .await
        .unwrap()
        .iter()
        .map(|d| d.download_url.clone().unwrap())
        .collect();
    assert_ne!(before, after);

    // No document was fetched twice.
    assert_eq!(h.source.fetches("ref-1").await, 1);
    assert_eq!(h.source.fetches("ref-2").await, 1);
}

#[tokio::test]
async fn invalid_webhook_url_is_refused_before_any_work() {
    let h = harness(ScriptedSource::new(vec![meta("DOC-1", Some("ref-1"))]));
    let err = h
        .orchestrator
        .request_acquisition(PROCESS, Some("ftp://nope".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(h.jobs.find_active(PROCESS).await.unwrap().is_none());
}

#[tokio::test]
async fn empty_process_number_is_refused() {
    let h = harness(ScriptedSource::new(vec![]));
    let err = h
        .orchestrator
        .request_acquisition("  ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn document_without_source_ref_fails_before_any_fetch() {
    let h = harness(ScriptedSource::new(vec![
        meta("DOC-1", Some("ref-1")),
        meta("DOC-2", None),
    ]));

    let job = created(
        h.orchestrator
            .request_acquisition(PROCESS, None)
            .await
            .unwrap(),
    );
    h.orchestrator.run_job(job.clone()).await.unwrap();

    let job = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.completed_documents, 1);
    assert_eq!(job.failed_documents, 1);

    let docs = h.documents.list_for_process(PROCESS).await.unwrap();
    let unfetchable = docs.iter().find(|d| d.document_id == "DOC-2").unwrap();
    assert_eq!(unfetchable.status, DocumentStatus::Failed);
    assert!(unfetchable
        .error_message
        .as_ref()
        .unwrap()
        .contains("source reference"));
}

#[tokio::test]
async fn job_without_webhook_completes_without_dispatch() {
    let h = harness(ScriptedSource::new(vec![meta("DOC-1", Some("ref-1"))]));

    let job = created(
        h.orchestrator
            .request_acquisition(PROCESS, None)
            .await
            .unwrap(),
    );
    h.orchestrator.run_job(job.clone()).await.unwrap();

    let job = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!job.webhook_sent);
    assert_eq!(job.webhook_attempts, 0);
}

#[tokio::test]
async fn webhook_skipped_when_nothing_succeeded() {
    let hook = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&hook)
        .await;

    let source = ScriptedSource::new(vec![meta("DOC-1", Some("ref-1"))]);
    source.fail_ref("ref-1").await;
    let h = harness(source);

    let job = created(
        h.orchestrator
            .request_acquisition(PROCESS, Some(format!("{}/hook", hook.uri())))
            .await
            .unwrap(),
    );
    h.orchestrator.run_job(job.clone()).await.unwrap();

    let job = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(!job.webhook_sent);
    assert!(job.webhook_last_error.unwrap().contains("skipped"));
}

#[tokio::test]
async fn cancellation_between_batches_stops_further_scheduling() {
    let source = ScriptedSource::new(vec![
        meta("DOC-1", Some("ref-1")),
        meta("DOC-2", Some("ref-2")),
        meta("DOC-3", Some("ref-3")),
        meta("DOC-4", Some("ref-4")),
    ])
    .with_delay(Duration::from_millis(100));
    let h = harness_with_batch(source, 1);

    let job = created(
        h.orchestrator
            .request_acquisition(PROCESS, None)
            .await
            .unwrap(),
    );

    let runner = h.orchestrator.clone();
    let run = tokio::spawn({
        let job = job.clone();
        async move { runner.run_job(job).await }
    });

    // Cancel while the first document is still in flight.
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.orchestrator.cancel_job(job.id).await.unwrap();
    run.await.unwrap().unwrap();

    let job = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);

    // The in-flight document finished; the rest were never scheduled.
    let docs = h.documents.list_for_process(PROCESS).await.unwrap();
    let available = docs.iter().filter(|d| d.is_available()).count();
    assert_eq!(available, 1);
    assert_eq!(h.source.fetches("ref-1").await + h.source.fetches("ref-2").await, 1);
    assert!(docs
        .iter()
        .filter(|d| !d.is_available())
        .all(|d| d.status == DocumentStatus::Processing));
}

#[tokio::test]
async fn rerun_of_terminal_job_is_refused_quietly() {
    let h = harness(ScriptedSource::new(vec![meta("DOC-1", Some("ref-1"))]));
    let job = created(
        h.orchestrator
            .request_acquisition(PROCESS, None)
            .await
            .unwrap(),
    );
    h.orchestrator.run_job(job.clone()).await.unwrap();

    let done = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    // Running a terminal job again must not disturb it.
    h.orchestrator.run_job(done.clone()).await.unwrap();
    let after = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(h.source.fetches("ref-1").await, 1);
}
