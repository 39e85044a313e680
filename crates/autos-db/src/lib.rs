//! Postgres persistence for jobs and documents.
//!
//! Repositories implement the `JobStore`/`DocumentStore` traits from
//! `autos-core` with runtime `sqlx::query` calls. Status changes are guarded
//! by `WHERE status = $expected` so concurrent racers surface as state errors
//! instead of silently overwriting each other.

pub mod document;
pub mod job;
pub mod pool;

pub use document::DocumentRepository;
pub use job::{JobRepository, JOB_NOTIFY_CHANNEL};
pub use pool::create_pool;
