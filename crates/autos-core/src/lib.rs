//! Autos core library
//!
//! Domain models and shared machinery for the document acquisition pipeline:
//! - Job and Document entities with their status state machines
//! - The `PipelineError` taxonomy
//! - The retry/backoff policy engine
//! - Store traits implemented by the database layer
//! - Configuration loading

pub mod config;
pub mod error;
pub mod models;
pub mod retry;
pub mod stores;

pub use config::{Config, EnvironmentTier, StorageBackendKind};
pub use error::{truncate_message, ErrorKind, PipelineError, MAX_PERSISTED_ERROR_LEN};
pub use retry::{BackoffStrategy, Retried, RetryCondition, RetryLimits, RetryPolicy};
pub use stores::{DocumentStore, JobStore};
