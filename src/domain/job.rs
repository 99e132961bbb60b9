use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, ErrorCode};

/// The fixed set of work kinds, one per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Parsing,
    Optimization,
    Generation,
    Ats,
    WebhookDelivery,
}

impl JobType {
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobType::Parsing => "parsing",
            JobType::Optimization => "optimization",
            JobType::Generation => "generation",
            JobType::Ats => "ats",
            JobType::WebhookDelivery => "webhook_delivery",
        }
    }

    /// Prefix for the `*.completed` / `*.failed` events this job kind emits.
    /// Webhook deliveries do not emit events themselves.
    pub fn event_prefix(&self) -> Option<&'static str> {
        match self {
            JobType::Parsing => Some("parse"),
            JobType::Optimization => Some("optimize"),
            JobType::Generation => Some("generation"),
            JobType::Ats => Some("ats"),
            JobType::WebhookDelivery => None,
        }
    }

    pub fn all() -> [JobType; 5] {
        [
            JobType::Parsing,
            JobType::Optimization,
            JobType::Generation,
            JobType::Ats,
            JobType::WebhookDelivery,
        ]
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.queue_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }

    /// Legal transitions: `pending -> processing -> terminal`, plus direct
    /// cancellation/failure from `pending`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Pending, JobStatus::Cancelled) => true,
            (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Processing, n) if n.is_terminal() => true,
            _ => false,
        }
    }
}

/// Error summary stored on a job and inside attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&CoreError> for JobErrorInfo {
    fn from(err: &CoreError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            details: err.context.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttempt {
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorInfo>,
}

/// The generic queued work record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub user_id: String,
    pub status: JobStatus,
    pub priority: u8,
    pub progress: u8,
    pub current_step: Option<String>,
    pub total_steps: u32,
    #[serde(default)]
    pub attempts: Vec<JobAttempt>,
    pub data: Value,
    pub result: Option<Value>,
    pub error: Option<JobErrorInfo>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub max_retries: u32,
    pub retry_count: u32,
    /// Set when this job was created by `job.retry` on a failed one.
    pub retry_of: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub revision: u64,
}

impl Job {
    pub fn new(job_type: JobType, user_id: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            job_type,
            user_id: user_id.into(),
            status: JobStatus::Pending,
            priority: 5,
            progress: 0,
            current_step: None,
            total_steps: 1,
            attempts: Vec::new(),
            data,
            result: None,
            error: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            max_retries: 3,
            retry_count: 0,
            retry_of: None,
            cancel_requested: false,
            revision: 0,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Progress as `round(100 * steps_done / total_steps)`.
    pub fn progress_for_step(steps_done: u32, total_steps: u32) -> u8 {
        if total_steps == 0 {
            return 0;
        }
        let pct = (steps_done as f64 / total_steps as f64 * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }
}
