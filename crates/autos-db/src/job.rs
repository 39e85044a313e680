//! Job repository.

use async_trait::async_trait;
use autos_core::models::{DeliveryOutcome, Job, JobStatus};
use autos_core::stores::JobStore;
use autos_core::{truncate_message, PipelineError};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

/// Channel name for PostgreSQL LISTEN/NOTIFY when a new job is created.
pub const JOB_NOTIFY_CHANNEL: &str = "autos_new_job";

#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: Uuid) -> Result<Option<JobStatus>, PipelineError> {
        let status: Option<(JobStatus,)> =
            sqlx::query_as("SELECT status FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(status.map(|(s,)| s))
    }

    /// Build the state error for a guarded update that matched no row:
    /// either the job is gone or a racer moved it first.
    async fn state_conflict(
        &self,
        id: Uuid,
        expected: JobStatus,
        to: JobStatus,
    ) -> PipelineError {
        match self.current_status(id).await {
            Ok(Some(actual)) => {
                tracing::warn!(
                    job_id = %id,
                    expected = %expected,
                    actual = %actual,
                    to = %to,
                    "Job transition lost a race"
                );
                PipelineError::State {
                    entity: "job",
                    from: actual.to_string(),
                    to: to.to_string(),
                }
            }
            Ok(None) => PipelineError::Validation(format!("Job {} not found", id)),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, process_number = %job.process_number))]
    async fn insert(&self, job: &Job) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, process_number, status,
                total_documents, completed_documents, failed_documents,
                webhook_url, webhook_sent, webhook_sent_at,
                webhook_attempts, webhook_last_error, error_message,
                created_at, started_at, completed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(job.id)
        .bind(&job.process_number)
        .bind(job.status)
        .bind(job.total_documents)
        .bind(job.completed_documents)
        .bind(job.failed_documents)
        .bind(&job.webhook_url)
        .bind(job.webhook_sent)
        .bind(job.webhook_sent_at)
        .bind(job.webhook_attempts)
        .bind(&job.webhook_last_error)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        // Wake the worker pool without waiting for the next poll.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(JOB_NOTIFY_CHANNEL)
            .bind(job.id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, PipelineError> {
        let job = sqlx::query_as::<Postgres, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn find_active(&self, process_number: &str) -> Result<Option<Job>, PipelineError> {
        let job = sqlx::query_as::<Postgres, Job>(
            r#"
            SELECT * FROM jobs
            WHERE process_number = $1 AND status IN ('pending', 'processing')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(process_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    #[tracing::instrument(skip(self), fields(job_id = %id))]
    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<Job, PipelineError> {
        from.ensure_transition(to)?;

        let job = sqlx::query_as::<Postgres, Job>(
            r#"
            UPDATE jobs
            SET status = $3,
                started_at = CASE
                    WHEN $3 = 'processing'::job_status THEN COALESCE(started_at, NOW())
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN $3 IN ('completed'::job_status, 'failed'::job_status, 'cancelled'::job_status)
                        THEN COALESCE(completed_at, NOW())
                    ELSE completed_at
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => Err(self.state_conflict(id, from, to).await),
        }
    }

    #[tracing::instrument(skip(self, error_message), fields(job_id = %id))]
    async fn fail(
        &self,
        id: Uuid,
        from: JobStatus,
        error_message: &str,
    ) -> Result<Job, PipelineError> {
        from.ensure_transition(JobStatus::Failed)?;

        let job = sqlx::query_as::<Postgres, Job>(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error_message = $3,
                completed_at = COALESCE(completed_at, NOW()),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(truncate_message(error_message))
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => Err(self.state_conflict(id, from, JobStatus::Failed).await),
        }
    }

    async fn update_progress(
        &self,
        id: Uuid,
        completed_documents: i32,
        failed_documents: i32,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET completed_documents = $2, failed_documents = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(completed_documents)
        .bind(failed_documents)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_total_documents(&self, id: Uuid, total: i32) -> Result<(), PipelineError> {
        sqlx::query("UPDATE jobs SET total_documents = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(total)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, outcome), fields(job_id = %id, success = outcome.success))]
    async fn record_webhook_outcome(
        &self,
        id: Uuid,
        outcome: &DeliveryOutcome,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET webhook_sent = $2,
                webhook_sent_at = CASE WHEN $2 THEN NOW() ELSE webhook_sent_at END,
                webhook_attempts = webhook_attempts + $3,
                webhook_last_error = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(outcome.success)
        .bind(outcome.attempts as i32)
        .bind(outcome.error.as_deref().map(truncate_message))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn claim_pending(&self) -> Result<Option<Job>, PipelineError> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<Postgres, Job>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let claimed = sqlx::query_as::<Postgres, Job>(
            r#"
            UPDATE jobs
            SET status = 'processing',
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(candidate.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(job_id = %claimed.id, process_number = %claimed.process_number, "Claimed job");
        Ok(Some(claimed))
    }
}
