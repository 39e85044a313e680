pub mod document;
pub mod job;
pub mod webhook;

pub use document::{Document, DocumentStatus, DocumentSummary};
pub use job::{Job, JobResponse, JobStatus};
pub use webhook::{CompletionPayload, DeliveryOutcome};
