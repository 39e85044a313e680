use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PipelineError;

/// Per-document acquisition status.
///
/// Legal transitions:
/// ```text
/// Pending    -> Processing   (acquisition attempt starts)
/// Pending    -> Failed       (failed before any attempt, e.g. missing source ref)
/// Processing -> Available    (download + persist succeeded)
/// Processing -> Failed       (download, persist, or verification failed)
/// Failed     -> Processing   (explicit retry)
/// Available  -> (none)       (terminal)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "document_status", rename_all = "lowercase")
)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Available,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Available | DocumentStatus::Failed)
    }

    /// Exhaustive transition table. Illegal pairs are refused, never coerced.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        match (self, next) {
            (Pending, Processing) | (Pending, Failed) => true,
            (Processing, Available) | (Processing, Failed) => true,
            (Failed, Processing) => true,
            (Available, _) => false,
            _ => false,
        }
    }

    pub fn ensure_transition(&self, next: DocumentStatus) -> Result<(), PipelineError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(PipelineError::State {
                entity: "document",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl Display for DocumentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DocumentStatus::Pending => write!(f, "pending"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Available => write!(f, "available"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "available" => Ok(DocumentStatus::Available),
            "failed" => Ok(DocumentStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid document status: {}", s)),
        }
    }
}

/// One binary artifact belonging to a process.
///
/// Tracked independently of jobs so that already-acquired documents survive
/// across job retries. `Available` documents are never re-acquired; the
/// presigned `download_url` is regenerable and not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    /// External reference id assigned by the upstream source.
    pub document_id: String,
    pub process_number: String,
    pub name: String,
    pub mime_type: String,
    pub size: Option<i64>,
    /// Upstream locator used to fetch the bytes. Absent when the source
    /// listed the document without a usable reference.
    pub source_ref: Option<String>,
    pub status: DocumentStatus,
    pub storage_key: Option<String>,
    pub download_url: Option<String>,
    pub error_message: Option<String>,
    pub download_started_at: Option<DateTime<Utc>>,
    pub download_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Document {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Document {
            id: row.get("id"),
            document_id: row.get("document_id"),
            process_number: row.get("process_number"),
            name: row.get("name"),
            mime_type: row.get("mime_type"),
            size: row.get("size"),
            source_ref: row.get("source_ref"),
            status: row.get("status"),
            storage_key: row.get("storage_key"),
            download_url: row.get("download_url"),
            error_message: row.get("error_message"),
            download_started_at: row.get("download_started_at"),
            download_completed_at: row.get("download_completed_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl Document {
    pub fn is_available(&self) -> bool {
        self.status == DocumentStatus::Available
    }

    /// Whether a new acquisition run should attempt this document.
    pub fn needs_acquisition(&self) -> bool {
        !self.is_available()
    }
}

/// Per-document entry of the completion webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub uuid: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: Option<i64>,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.document_id.clone(),
            uuid: doc.id,
            name: doc.name.clone(),
            mime_type: doc.mime_type.clone(),
            size: doc.size,
            status: doc.status,
            download_url: doc.download_url.clone(),
            error_message: doc.error_message.clone(),
        }
    }
}
