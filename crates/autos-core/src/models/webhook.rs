use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::DocumentSummary;
use super::job::{Job, JobStatus};

/// JSON body of the completion callback. Field names follow the external
/// contract (camelCase), not the internal persistence naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    pub process_number: String,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_documents: i32,
    pub completed_documents: i32,
    pub failed_documents: i32,
    pub progress_percentage: f64,
    pub documents: Vec<DocumentSummary>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CompletionPayload {
    pub fn from_job(job: &Job, documents: Vec<DocumentSummary>) -> Self {
        Self {
            process_number: job.process_number.clone(),
            job_id: job.id,
            status: job.status,
            total_documents: job.total_documents,
            completed_documents: job.completed_documents,
            failed_documents: job.failed_documents,
            progress_percentage: job.progress_percentage(),
            documents,
            completed_at: job.completed_at,
        }
    }
}

/// Result of a webhook delivery attempt set, recorded on the job. Delivery
/// failure never alters the job's terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl DeliveryOutcome {
    pub fn succeeded(status_code: u16, attempts: u32) -> Self {
        Self {
            success: true,
            status_code: Some(status_code),
            error: None,
            attempts,
        }
    }

    pub fn failed(status_code: Option<u16>, error: String, attempts: u32) -> Self {
        Self {
            success: false,
            status_code,
            error: Some(error),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_camel_case_contract_keys() {
        let job = Job {
            id: Uuid::new_v4(),
            process_number: "0001234-56.2024.8.26.0100".to_string(),
            status: JobStatus::Failed,
            total_documents: 3,
            completed_documents: 2,
            failed_documents: 1,
            webhook_url: Some("https://caller.example/hook".to_string()),
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

        let value = serde_json::to_value(CompletionPayload::from_job(&job, vec![])).unwrap();
        assert_eq!(value["processNumber"], "0001234-56.2024.8.26.0100");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["totalDocuments"], 3);
        assert_eq!(value["completedDocuments"], 2);
        assert_eq!(value["failedDocuments"], 1);
        assert!((value["progressPercentage"].as_f64().unwrap() - 66.66).abs() < 1.0);
        assert!(value["jobId"].is_string());
        assert!(value["completedAt"].is_string());
    }

    #[test]
    fn delivery_outcome_constructors() {
        let ok = DeliveryOutcome::succeeded(204, 1);
        assert!(ok.success);
        assert_eq!(ok.status_code, Some(204));
        assert_eq!(ok.attempts, 1);

        let bad = DeliveryOutcome::failed(Some(500), "server error".into(), 3);
        assert!(!bad.success);
        assert_eq!(bad.attempts, 3);
        assert_eq!(bad.error.as_deref(), Some("server error"));
    }
}
