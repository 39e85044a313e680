//! Acquisition pipeline: job orchestrator, durable worker pool, and the
//! read-only job status surface.

pub mod orchestrator;
pub mod queue;
pub mod status;

pub use orchestrator::{AcquisitionOutcome, Orchestrator, OrchestratorConfig};
pub use queue::{AcquisitionQueue, QueueConfig};
pub use status::JobStatusView;
