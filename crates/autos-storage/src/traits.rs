//! Storage abstraction trait
//!
//! All storage backends (S3-compatible, local filesystem) implement this
//! trait so the orchestrator never couples to a specific provider.

use async_trait::async_trait;
use autos_core::{PipelineError, StorageBackendKind};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StorageError> for PipelineError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidKey(key) => PipelineError::InvalidStorageKey(key),
            other => PipelineError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction trait
///
/// **Key format:** `processes/{process_number}/documents/{document_id}/{filename}`.
/// See the crate root documentation.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write an object at the given storage key, replacing any existing one.
    async fn put(&self, storage_key: &str, data: Bytes, content_type: &str)
        -> StorageResult<()>;

    /// Read an object by its storage key.
    async fn get(&self, storage_key: &str) -> StorageResult<Bytes>;

    /// Generate a presigned/temporary URL for direct GET access.
    ///
    /// The URL is regenerable at will and never authoritative; callers refresh
    /// it whenever a stale one is handed out again.
    async fn presigned_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Check whether an object exists.
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Size in bytes of an existing object.
    async fn content_length(&self, storage_key: &str) -> StorageResult<u64>;

    /// Backend identifier for logs.
    fn backend_type(&self) -> StorageBackendKind;
}
