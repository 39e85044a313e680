//! Document repository.

use async_trait::async_trait;
use autos_core::models::{Document, DocumentStatus};
use autos_core::stores::DocumentStore;
use autos_core::{truncate_message, PipelineError};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

#[derive(Clone)]
pub struct DocumentRepository {
    pool: PgPool,
}

impl DocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: Uuid) -> Result<Option<DocumentStatus>, PipelineError> {
        let status: Option<(DocumentStatus,)> =
            sqlx::query_as("SELECT status FROM documents WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(status.map(|(s,)| s))
    }

    async fn state_conflict(
        &self,
        id: Uuid,
        expected: DocumentStatus,
        to: DocumentStatus,
    ) -> PipelineError {
        match self.current_status(id).await {
            Ok(Some(actual)) => {
                tracing::warn!(
                    document_id = %id,
                    expected = %expected,
                    actual = %actual,
                    to = %to,
                    "Document transition lost a race"
                );
                PipelineError::State {
                    entity: "document",
                    from: actual.to_string(),
                    to: to.to_string(),
                }
            }
            Ok(None) => PipelineError::Validation(format!("Document {} not found", id)),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl DocumentStore for DocumentRepository {
    #[tracing::instrument(skip(self, document), fields(document_id = %document.document_id, process_number = %document.process_number))]
    async fn upsert(&self, document: &Document) -> Result<Document, PipelineError> {
        // Metadata is refreshed on conflict; status and storage fields of an
        // existing row stay as they are so Available documents survive re-runs.
        let row = sqlx::query_as::<Postgres, Document>(
            r#"
            INSERT INTO documents (
                id, document_id, process_number, name, mime_type, size,
                source_ref, status, storage_key, download_url, error_message,
                download_started_at, download_completed_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (process_number, document_id) DO UPDATE SET
                name = EXCLUDED.name,
                mime_type = EXCLUDED.mime_type,
                size = EXCLUDED.size,
                source_ref = EXCLUDED.source_ref,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(document.id)
        .bind(&document.document_id)
        .bind(&document.process_number)
        .bind(&document.name)
        .bind(&document.mime_type)
        .bind(document.size)
        .bind(&document.source_ref)
        .bind(document.status)
        .bind(&document.storage_key)
        .bind(&document.download_url)
        .bind(&document.error_message)
        .bind(document.download_started_at)
        .bind(document.download_completed_at)
        .bind(document.created_at)
        .bind(document.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>, PipelineError> {
        let doc = sqlx::query_as::<Postgres, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    async fn list_for_process(
        &self,
        process_number: &str,
    ) -> Result<Vec<Document>, PipelineError> {
        let docs = sqlx::query_as::<Postgres, Document>(
            "SELECT * FROM documents WHERE process_number = $1 ORDER BY created_at ASC",
        )
        .bind(process_number)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    async fn list_for_process_with_status(
        &self,
        process_number: &str,
        status: DocumentStatus,
    ) -> Result<Vec<Document>, PipelineError> {
        let docs = sqlx::query_as::<Postgres, Document>(
            r#"
            SELECT * FROM documents
            WHERE process_number = $1 AND status = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(process_number)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    #[tracing::instrument(skip(self), fields(document_id = %id))]
    async fn transition(
        &self,
        id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
    ) -> Result<Document, PipelineError> {
        from.ensure_transition(to)?;

        let doc = sqlx::query_as::<Postgres, Document>(
            r#"
            UPDATE documents
            SET status = $3,
                download_started_at = CASE
                    WHEN $3 = 'processing'::document_status
                        THEN COALESCE(download_started_at, NOW())
                    ELSE download_started_at
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

        match doc {
            Some(doc) => Ok(doc),
            None => Err(self.state_conflict(id, from, to).await),
        }
    }

    #[tracing::instrument(skip(self, storage_key, download_url), fields(document_id = %id, size_bytes = size))]
    async fn mark_available(
        &self,
        id: Uuid,
        storage_key: &str,
        download_url: &str,
        size: i64,
    ) -> Result<Document, PipelineError> {
        let doc = sqlx::query_as::<Postgres, Document>(
            r#"
            UPDATE documents
            SET status = 'available',
                storage_key = $2,
                download_url = $3,
                size = $4,
                error_message = NULL,
                download_completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(storage_key)
        .bind(download_url)
        .bind(size)
        .fetch_optional(&self.pool)
        .await?;

        match doc {
            Some(doc) => Ok(doc),
            None => Err(self
                .state_conflict(id, DocumentStatus::Processing, DocumentStatus::Available)
                .await),
        }
    }

    #[tracing::instrument(skip(self, error_message), fields(document_id = %id))]
    async fn mark_failed(
        &self,
        id: Uuid,
        from: DocumentStatus,
        error_message: &str,
    ) -> Result<Document, PipelineError> {
        from.ensure_transition(DocumentStatus::Failed)?;

        let doc = sqlx::query_as::<Postgres, Document>(
            r#"
            UPDATE documents
            SET status = 'failed',
                error_message = $3,
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

        match doc {
            Some(doc) => Ok(doc),
            None => Err(self.state_conflict(id, from, DocumentStatus::Failed).await),
        }
    }

    #[tracing::instrument(skip(self), fields(process_number = %process_number))]
    async fn reset_unavailable(
        &self,
        process_number: &str,
        to: DocumentStatus,
    ) -> Result<u64, PipelineError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = $2, error_message = NULL, updated_at = NOW()
            WHERE process_number = $1 AND status != 'available'
            "#,
        )
        .bind(process_number)
        .bind(to)
        .execute(&self.pool)
        .await?;

        let reset = result.rows_affected();
        if reset > 0 {
            tracing::debug!(process_number, reset, "Reset documents for re-acquisition");
        }
        Ok(reset)
    }

    async fn update_download_url(&self, id: Uuid, url: &str) -> Result<(), PipelineError> {
        sqlx::query("UPDATE documents SET download_url = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
