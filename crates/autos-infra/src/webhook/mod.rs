pub mod dispatcher;
pub mod validate;

pub use dispatcher::{DispatcherConfig, WebhookDispatcher};
pub use validate::validate_webhook_url;
