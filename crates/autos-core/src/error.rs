//! Error types for the acquisition pipeline.
//!
//! All pipeline components report failures through [`PipelineError`]. The
//! variants mirror the failure taxonomy of the system: validation problems are
//! rejected before any side effect, upstream/storage/integrity failures are
//! retry-eligible, state violations are refused, and webhook delivery failures
//! are recorded without escalating.

/// Upper bound on error messages persisted to Job/Document records. Upstream
/// error bodies can be arbitrarily large; anything longer is truncated.
pub const MAX_PERSISTED_ERROR_LEN: usize = 500;

/// Truncate a message to [`MAX_PERSISTED_ERROR_LEN`], respecting char boundaries.
pub fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_PERSISTED_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_PERSISTED_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}

/// Coarse classification of a [`PipelineError`], used by retry conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Upstream,
    Timeout,
    Connection,
    Integrity,
    Storage,
    State,
    Delivery,
    Capacity,
    Database,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Upstream request failed with status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Reassembled size {actual} does not match expected size {expected}")]
    Integrity { expected: u64, actual: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid storage key: {0}")]
    InvalidStorageKey(String),

    #[error("Illegal {entity} transition: {from} -> {to}")]
    State {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Webhook delivery failed: {0}")]
    Delivery(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::UpstreamStatus { .. } | PipelineError::Upstream(_) => {
                ErrorKind::Upstream
            }
            PipelineError::Timeout(_) => ErrorKind::Timeout,
            PipelineError::Connection(_) => ErrorKind::Connection,
            PipelineError::Integrity { .. } => ErrorKind::Integrity,
            PipelineError::Storage(_) | PipelineError::InvalidStorageKey(_) => ErrorKind::Storage,
            PipelineError::State { .. } => ErrorKind::State,
            PipelineError::Delivery(_) => ErrorKind::Delivery,
            PipelineError::Capacity(_) => ErrorKind::Capacity,
            PipelineError::Database(_) => ErrorKind::Database,
        }
    }

    /// HTTP status carried by the error, if any. Used by status-based retry
    /// conditions.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            PipelineError::UpstreamStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure class is retry-eligible at all. Retry policies
    /// apply their own, narrower conditions on top of this.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Validation(_)
            | PipelineError::InvalidStorageKey(_)
            | PipelineError::State { .. }
            | PipelineError::Delivery(_) => false,
            PipelineError::UpstreamStatus { status, .. } => *status >= 500 || *status == 429,
            PipelineError::Upstream(_)
            | PipelineError::Timeout(_)
            | PipelineError::Connection(_)
            | PipelineError::Integrity { .. }
            | PipelineError::Storage(_)
            | PipelineError::Capacity(_)
            | PipelineError::Database(_) => true,
        }
    }

    /// Message truncated for persistence onto Job/Document records.
    pub fn persisted_message(&self) -> String {
        truncate_message(&self.to_string())
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Database(err)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Storage(format!("IO error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_messages() {
        let long = "x".repeat(2 * MAX_PERSISTED_ERROR_LEN);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.len(), MAX_PERSISTED_ERROR_LEN + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn short_messages_untouched() {
        assert_eq!(truncate_message("boom"), "boom");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_PERSISTED_ERROR_LEN);
        let truncated = truncate_message(&long);
        assert!(truncated.len() <= MAX_PERSISTED_ERROR_LEN + 3);
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!PipelineError::Validation("bad url".into()).is_retryable());
        assert_eq!(
            PipelineError::Validation("bad url".into()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn upstream_5xx_and_429_are_retryable() {
        assert!(PipelineError::UpstreamStatus {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(PipelineError::UpstreamStatus {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(!PipelineError::UpstreamStatus {
            status: 404,
            message: "gone".into()
        }
        .is_retryable());
    }

    #[test]
    fn state_violations_are_refused_not_retried() {
        let err = PipelineError::State {
            entity: "job",
            from: "completed".into(),
            to: "processing".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn integrity_mismatch_is_retryable_download_failure() {
        let err = PipelineError::Integrity {
            expected: 100,
            actual: 90,
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn invalid_storage_key_fails_immediately() {
        assert!(!PipelineError::InvalidStorageKey("../../etc".into()).is_retryable());
    }
}
