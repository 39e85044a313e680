use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PipelineError;

/// Status of one acquisition run.
///
/// Legal transitions:
/// ```text
/// Pending    -> Processing, Cancelled, Failed
/// Processing -> Completed, Failed, Cancelled
/// Completed  -> (none)
/// Failed     -> Processing   (retry the whole job)
/// Cancelled  -> Processing   (reactivate)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "job_status", rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the job counts as active for the idempotency check.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    /// Exhaustive transition table. Anything not listed here is illegal and
    /// must be refused, never coerced.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Processing) | (Pending, Cancelled) | (Pending, Failed) => true,
            (Processing, Completed) | (Processing, Failed) | (Processing, Cancelled) => true,
            (Failed, Processing) => true,
            (Cancelled, Processing) => true,
            (Completed, _) => false,
            _ => false,
        }
    }

    /// Validate a transition, returning a `State` error on an illegal pair.
    pub fn ensure_transition(&self, next: JobStatus) -> Result<(), PipelineError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(PipelineError::State {
                entity: "job",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// One acquisition run for all documents of a process.
///
/// Created by the orchestrator, mutated only during the run, terminal exactly
/// once. After a terminal status only the webhook bookkeeping fields may still
/// change: delivery is a side effect of completion, not a precondition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub process_number: String,
    pub status: JobStatus,
    pub total_documents: i32,
    pub completed_documents: i32,
    pub failed_documents: i32,
    pub webhook_url: Option<String>,
    pub webhook_sent: bool,
    pub webhook_sent_at: Option<DateTime<Utc>>,
    pub webhook_attempts: i32,
    pub webhook_last_error: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Job {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Job {
            id: row.get("id"),
            process_number: row.get("process_number"),
            status: row.get("status"),
            total_documents: row.get("total_documents"),
            completed_documents: row.get("completed_documents"),
            failed_documents: row.get("failed_documents"),
            webhook_url: row.get("webhook_url"),
            webhook_sent: row.get("webhook_sent"),
            webhook_sent_at: row.get("webhook_sent_at"),
            webhook_attempts: row.get("webhook_attempts"),
            webhook_last_error: row.get("webhook_last_error"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl Job {
    /// Derived progress: `completed / total * 100`, 0 when total is 0.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_documents == 0 {
            return 0.0;
        }
        (self.completed_documents as f64 / self.total_documents as f64) * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Read-only projection for polling clients.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub process_number: String,
    pub status: JobStatus,
    pub total_documents: i32,
    pub completed_documents: i32,
    pub failed_documents: i32,
    pub progress_percentage: f64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let progress_percentage = job.progress_percentage();
        Self {
            id: job.id,
            process_number: job.process_number,
            status: job.status,
            total_documents: job.total_documents,
            completed_documents: job.completed_documents,
            failed_documents: job.failed_documents,
            progress_percentage,
            error_message: job.error_message,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    fn legal_pairs() -> Vec<(JobStatus, JobStatus)> {
        use JobStatus::*;
        vec![
            (Pending, Processing),
            (Pending, Cancelled),
            (Pending, Failed),
            (Processing, Completed),
            (Processing, Failed),
            (Processing, Cancelled),
            (Failed, Processing),
            (Cancelled, Processing),
        ]
    }

    #[test]
    fn transition_table_matches_legal_pairs_exactly() {
        let legal = legal_pairs();
        for from in ALL {
            for to in ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{} -> {} expected {}",
                    from,
                    to,
                    expected
                );
            }
        }
    }

    #[test]
    fn completed_is_terminal_with_no_exits() {
        assert!(JobStatus::Completed.is_terminal());
        for to in ALL {
            assert!(!JobStatus::Completed.can_transition_to(to));
        }
    }

    #[test]
    fn ensure_transition_rejects_illegal_pair() {
        let err = JobStatus::Completed
            .ensure_transition(JobStatus::Processing)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::PipelineError::State { entity: "job", .. }
        ));
    }

    #[test]
    fn active_statuses() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Processing.is_active());
        assert!(!JobStatus::Failed.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(!JobStatus::Cancelled.is_active());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in ALL {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    fn job_with_counts(total: i32, completed: i32) -> Job {
        Job {
            id: Uuid::new_v4(),
            process_number: "0001234-56.2024.8.26.0100".to_string(),
            status: JobStatus::Processing,
            total_documents: total,
            completed_documents: completed,
            failed_documents: 0,
            webhook_url: None,
            webhook_sent: false,
            webhook_sent_at: None,
            webhook_attempts: 0,
            webhook_last_error: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn progress_is_zero_for_empty_job() {
        assert_eq!(job_with_counts(0, 0).progress_percentage(), 0.0);
    }

    #[test]
    fn progress_derivation() {
        assert_eq!(job_with_counts(4, 1).progress_percentage(), 25.0);
        assert_eq!(job_with_counts(3, 3).progress_percentage(), 100.0);
    }

    #[test]
    fn response_projection_carries_progress() {
        let response = JobResponse::from(job_with_counts(4, 2));
        assert_eq!(response.progress_percentage, 50.0);
        assert_eq!(response.total_documents, 4);
    }
}
