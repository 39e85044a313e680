//! Completion webhook delivery.
//!
//! Delivery failure is recorded, never propagated as a pipeline failure; the
//! job keeps its terminal status regardless of what the callback endpoint
//! does.

use reqwest::Client;
use std::time::Duration;
use uuid::Uuid;

use autos_core::models::{CompletionPayload, DeliveryOutcome};
use autos_core::PipelineError;

use super::validate::validate_webhook_url;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct DispatcherConfig {
    pub max_attempts: u32,
    /// First retry waits this long; subsequent waits double it.
    pub base_delay: Duration,
    pub request_timeout: Duration,
    /// Rejects plain-http callback URLs outside loopback.
    pub production_profile: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            production_profile: false,
        }
    }
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    client: Client,
    config: DispatcherConfig,
}

impl WebhookDispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| PipelineError::Delivery(format!("HTTP client build failed: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Deliver the completion payload. Success is a status in `[200, 300)`;
    /// any other status, transport error or timeout consumes an attempt and
    /// waits out the backoff. TLS verification is never bypassed.
    #[tracing::instrument(skip(self, payload), fields(job_id = %payload.job_id))]
    pub async fn send(&self, url: &str, payload: &CompletionPayload) -> DeliveryOutcome {
        if let Err(e) = validate_webhook_url(url, self.config.production_profile) {
            return DeliveryOutcome::failed(None, e.to_string(), 0);
        }

        // Same delivery id across attempts so the receiver can deduplicate.
        let delivery_id = Uuid::new_v4();
        let mut last_status: Option<u16> = None;
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=self.config.max_attempts {
            match self.post(url, payload, delivery_id, attempt).await {
                Ok(status) if (200..300).contains(&status) => {
                    tracing::info!(url, status, attempt, "Webhook delivered");
                    return DeliveryOutcome::succeeded(status, attempt);
                }
                Ok(status) => {
                    last_status = Some(status);
                    last_error = format!("Webhook returned status {}", status);
                    tracing::warn!(url, status, attempt, "Webhook attempt rejected");
                }
                Err(e) => {
                    last_status = None;
                    last_error = e;
                    tracing::warn!(url, attempt, error = %last_error, "Webhook attempt failed");
                }
            }

            if attempt < self.config.max_attempts {
                let delay = self.config.base_delay * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(
            url,
            attempts = self.config.max_attempts,
            error = %last_error,
            "Webhook delivery exhausted"
        );
        DeliveryOutcome::failed(last_status, last_error, self.config.max_attempts)
    }

    /// Pre-flight connectivity check: one request, short fixed timeout, a
    /// payload the receiver can tell apart from a real delivery.
    pub async fn probe(&self, url: &str) -> DeliveryOutcome {
        if let Err(e) = validate_webhook_url(url, self.config.production_profile) {
            return DeliveryOutcome::failed(None, e.to_string(), 0);
        }

        let body = serde_json::json!({
            "test": true,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let result = self
            .client
            .post(url)
            .timeout(PROBE_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Test", "true")
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    DeliveryOutcome::succeeded(status, 1)
                } else {
                    DeliveryOutcome::failed(
                        Some(status),
                        format!("Probe returned status {}", status),
                        1,
                    )
                }
            }
            Err(e) => DeliveryOutcome::failed(None, format!("Probe failed: {}", e), 1),
        }
    }

    async fn post(
        &self,
        url: &str,
        payload: &CompletionPayload,
        delivery_id: Uuid,
        attempt: u32,
    ) -> Result<u16, String> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Attempt", attempt.to_string())
            .header("X-Webhook-Timestamp", chrono::Utc::now().to_rfc3339())
            .header("X-Delivery-Id", delivery_id.to_string())
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("Webhook request timed out: {}", e)
                } else {
                    format!("Webhook request failed: {}", e)
                }
            })?;

        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autos_core::models::{Job, JobStatus};
    use chrono::Utc;
    use wiremock::matchers::{body_json_string, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_dispatcher() -> WebhookDispatcher {
        WebhookDispatcher::new(DispatcherConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(2),
            production_profile: false,
        })
        .unwrap()
    }

    fn payload() -> CompletionPayload {
        let job = Job {
            id: Uuid::new_v4(),
            process_number: "0001234-56.2024.8.26.0100".to_string(),
            status: JobStatus::Completed,
            total_documents: 2,
            completed_documents: 2,
            failed_documents: 0,
            webhook_url: None,
            webhook_sent: false,
            webhook_sent_at: None,
            webhook_attempts: 0,
            webhook_last_error: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            updated_at: Utc::now(),
        };
        CompletionPayload::from_job(&job, vec![])
    }

    #[tokio::test]
    async fn delivers_with_attempt_and_correlation_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(header("x-webhook-attempt", "1"))
            .and(header_exists("x-webhook-timestamp"))
            .and(header_exists("x-delivery-id"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = test_dispatcher()
            .send(&format!("{}/hook", server.uri()), &payload())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn payload_body_uses_contract_field_names() {
        let server = MockServer::start().await;
        let p = payload();
        let expected = serde_json::to_string(&p).unwrap();
        assert!(expected.contains("processNumber"));

        Mock::given(method("POST"))
            .and(body_json_string(&expected))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = test_dispatcher().send(&server.uri(), &p).await;
        assert!(outcome.success);
        assert_eq!(outcome.status_code, Some(204));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = test_dispatcher().send(&server.uri(), &payload()).await;
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_structured_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = test_dispatcher().send(&server.uri(), &payload()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(503));
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn transport_failure_retries_and_reports_no_status() {
        // Nothing listens on this port.
        let outcome = test_dispatcher()
            .send("http://127.0.0.1:9/hook", &payload())
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn invalid_url_fails_before_any_attempt() {
        let outcome = test_dispatcher().send("ftp://nope", &payload()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn probe_sends_distinguishable_payload_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-webhook-test", "true"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = test_dispatcher().probe(&server.uri()).await;
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn probe_failure_does_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = test_dispatcher().probe(&server.uri()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
    }
}
