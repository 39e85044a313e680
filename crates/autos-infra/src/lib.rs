//! Cross-cutting infrastructure: telemetry, rate limiting, download
//! backpressure, and webhook delivery.

pub mod gate;
pub mod ip;
pub mod rate_limit;
pub mod telemetry;
pub mod webhook;

pub use gate::DownloadGate;
pub use ip::extract_client_ip;
pub use rate_limit::{InMemoryWindowStore, SlidingWindowLimiter, WindowStore};
pub use telemetry::init_telemetry;
pub use webhook::{validate_webhook_url, DispatcherConfig, WebhookDispatcher};
