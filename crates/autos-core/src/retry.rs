//! Retry/backoff policy engine.
//!
//! Every component that talks to the network goes through a [`RetryPolicy`]:
//! upstream fetches, storage writes, webhook delivery, chunk downloads. A
//! policy decides how long to wait between attempts ([`RetryPolicy::next_delay`]),
//! whether a given failure is worth another attempt
//! ([`RetryPolicy::should_retry`]), and provides a generic
//! [`RetryPolicy::execute`] loop that drives an async operation to success,
//! exhaustion, or a non-retryable error.
//!
//! Operator-wide ceilings ([`RetryLimits`]) cap attempts and delays so no call
//! site can exceed the configured maximums regardless of its own preset.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{ErrorKind, PipelineError};

/// Floor applied to every computed delay to avoid busy-looping.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

/// Which failures a policy considers retryable. All conditions are further
/// gated by [`PipelineError::is_retryable`], so e.g. a validation error never
/// retries even under `AllErrors`.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryCondition {
    AllErrors,
    ErrorKinds(Vec<ErrorKind>),
    /// Retry when the error carries one of these HTTP statuses. Transport
    /// failures with no status (connection refused, timed out) also match:
    /// a status-based condition implies a network call that may never have
    /// produced a status at all.
    HttpStatusIn(Vec<u16>),
    TimeoutOnly,
    StatusEquals(u16),
}

impl RetryCondition {
    fn matches(&self, error: &PipelineError) -> bool {
        match self {
            RetryCondition::AllErrors => true,
            RetryCondition::ErrorKinds(kinds) => kinds.contains(&error.kind()),
            RetryCondition::HttpStatusIn(statuses) => match error.http_status() {
                Some(status) => statuses.contains(&status),
                None => matches!(error.kind(), ErrorKind::Connection | ErrorKind::Timeout),
            },
            RetryCondition::TimeoutOnly => error.kind() == ErrorKind::Timeout,
            RetryCondition::StatusEquals(expected) => error.http_status() == Some(*expected),
        }
    }
}

/// Environment-wide retry ceilings, applied on top of per-call-site presets.
#[derive(Debug, Clone, Copy)]
pub struct RetryLimits {
    pub max_attempts_ceiling: u32,
    pub max_delay_ceiling: Duration,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_attempts_ceiling: 10,
            max_delay_ceiling: Duration::from_secs(300),
        }
    }
}

/// Successful result of [`RetryPolicy::execute`], carrying how many attempts
/// were consumed (1 for a first-try success).
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_ratio: f64,
    pub strategy: BackoffStrategy,
    pub condition: RetryCondition,
    /// Per-attempt timeout applied inside `execute`. `None` leaves the
    /// operation's own timeouts in charge.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.1,
            strategy: BackoffStrategy::Exponential,
            condition: RetryCondition::AllErrors,
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Upstream HTTP calls: 5 attempts, retry on 5xx/429, 30s per attempt.
    pub fn upstream_http() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.2,
            strategy: BackoffStrategy::Exponential,
            condition: RetryCondition::HttpStatusIn(vec![429, 500, 502, 503, 504]),
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Rate-limited endpoints: 7 attempts, larger delays, 429 only.
    pub fn rate_limited() -> Self {
        Self {
            max_attempts: 7,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.3,
            strategy: BackoffStrategy::Exponential,
            condition: RetryCondition::StatusEquals(429),
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Timeout recovery: 3 attempts, linear spacing.
    pub fn timeouts() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.0,
            jitter_ratio: 0.1,
            strategy: BackoffStrategy::Linear,
            condition: RetryCondition::TimeoutOnly,
            attempt_timeout: None,
        }
    }

    /// Storage/database calls: 4 attempts, connection/timeout failures only.
    pub fn storage() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.1,
            strategy: BackoffStrategy::Exponential,
            condition: RetryCondition::ErrorKinds(vec![
                ErrorKind::Connection,
                ErrorKind::Timeout,
                ErrorKind::Database,
            ]),
            attempt_timeout: None,
        }
    }

    /// Local file operations: 3 attempts, fixed delay.
    pub fn local_file() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(250),
            backoff_multiplier: 1.0,
            jitter_ratio: 0.0,
            strategy: BackoffStrategy::Fixed,
            condition: RetryCondition::AllErrors,
            attempt_timeout: None,
        }
    }

    /// Apply operator ceilings on attempts and delay.
    pub fn clamp_to(mut self, limits: &RetryLimits) -> Self {
        self.max_attempts = self.max_attempts.min(limits.max_attempts_ceiling);
        self.max_delay = self.max_delay.min(limits.max_delay_ceiling);
        self
    }

    /// Deterministic delay for a 1-indexed attempt: strategy curve clamped to
    /// `max_delay` and floored at [`MIN_RETRY_DELAY`]. No jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_secs_f64();
        let raw = match self.strategy {
            BackoffStrategy::Exponential => {
                base * self.backoff_multiplier.powi(attempt as i32 - 1)
            }
            BackoffStrategy::Linear => base * attempt as f64,
            BackoffStrategy::Fixed => base,
        };
        let clamped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped.max(MIN_RETRY_DELAY.as_secs_f64()))
    }

    /// Delay for the attempt with uniform jitter of `±delay * jitter_ratio`,
    /// still floored at [`MIN_RETRY_DELAY`].
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt).as_secs_f64();
        if self.jitter_ratio <= 0.0 {
            return Duration::from_secs_f64(delay);
        }
        let spread = delay * self.jitter_ratio;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((delay + offset).max(MIN_RETRY_DELAY.as_secs_f64()))
    }

    /// Whether another attempt should follow a failure on the given 1-indexed
    /// attempt. False once `attempt >= max_attempts` or the error does not
    /// match the configured condition.
    pub fn should_retry(&self, error: &PipelineError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_retryable() && self.condition.matches(error)
    }

    /// Drive an async operation until it succeeds, exhausts `max_attempts`, or
    /// fails with a non-retryable error. Sleeps `next_delay` between attempts.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        mut f: F,
    ) -> Result<Retried<T>, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let result = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, f()).await {
                    Ok(inner) => inner,
                    Err(_) => Err(PipelineError::Timeout(format!(
                        "{} exceeded {}ms on attempt {}",
                        operation,
                        limit.as_millis(),
                        attempt
                    ))),
                },
                None => f().await,
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(operation, attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(Retried { value, attempts: attempt });
                }
                Err(error) => {
                    if !self.should_retry(&error, attempt) {
                        tracing::warn!(
                            operation,
                            attempts = attempt,
                            error = %error,
                            "Operation failed, not retrying"
                        );
                        return Err(error);
                    }
                    let delay = self.next_delay(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
