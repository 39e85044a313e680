//! Storage backends for acquired documents.
//!
//! All backends implement the [`Storage`] trait and share the same key
//! layout: `processes/{process_number}/documents/{document_id}/{filename}`.
//! Keys must not contain `..` or a leading `/`; key generation is centralized
//! in the `keys` module so all backends stay consistent.

pub mod factory;
pub mod keys;
pub mod local;
pub mod s3;
pub mod traits;

pub use autos_core::StorageBackendKind;
pub use factory::create_storage;
pub use keys::{document_storage_key, sanitize_filename};
pub use local::LocalStorage;
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
