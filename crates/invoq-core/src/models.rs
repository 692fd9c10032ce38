//! Job model shared by the scheduler, the stores, and the handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a job in the queue.
///
/// ```text
/// Pending    --select-->  Processing
/// Processing --success--> Completed
/// Processing --failure--> Retrying --backoff--> Pending
/// Processing --failure, attempts exhausted--> Failed
/// Pending|Processing|Retrying --cancel--> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Retrying,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Job priority. Declaration order is selection order: `Critical` first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Selection rank, ascending = picked first.
    pub fn rank(&self) -> u8 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Critical => "critical",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid job priority: {}", s)),
        }
    }
}

/// Type of job to process. Selects the registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Run the extraction pipeline over an uploaded invoice
    InvoiceProcessing,
    /// Pull invoice attachments from a mailbox
    EmailIngestion,
    /// Build a report over processed invoices
    ReportGeneration,
    /// Export processed invoice data
    Export,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::InvoiceProcessing,
        JobType::EmailIngestion,
        JobType::ReportGeneration,
        JobType::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::InvoiceProcessing => "invoice-processing",
            JobType::EmailIngestion => "email-ingestion",
            JobType::ReportGeneration => "report-generation",
            JobType::Export => "export",
        }
    }

    /// Default priority used when the caller does not pick one.
    pub fn default_priority(&self) -> JobPriority {
        match self {
            // Uploads are user-facing, process them ahead of background work
            JobType::InvoiceProcessing => JobPriority::High,
            JobType::EmailIngestion => JobPriority::Normal,
            JobType::ReportGeneration => JobPriority::Normal,
            JobType::Export => JobPriority::Low,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "invoice-processing" | "process-invoice" => Ok(Self::InvoiceProcessing),
            "email-ingestion" => Ok(Self::EmailIngestion),
            "report-generation" | "generate-report" => Ok(Self::ReportGeneration),
            "export" | "export-data" => Ok(Self::Export),
            _ => Err(format!("Invalid job type: {}", s)),
        }
    }
}

/// A job in the processing queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub attempts: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub result: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a fresh `Pending` job with a new UUIDv7 identifier.
    pub fn new(
        job_type: JobType,
        payload: JsonValue,
        priority: JobPriority,
        max_retries: i32,
    ) -> Self {
        Self {
            id: crate::new_v7(),
            job_type,
            payload,
            status: JobStatus::Pending,
            priority,
            attempts: 0,
            max_retries: max_retries.max(0),
            error_message: None,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Attempt ceiling: the first run plus `max_retries` retries.
    pub fn max_attempts(&self) -> i32 {
        self.max_retries + 1
    }

    /// Whether another attempt is allowed after the current one fails.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts()
    }
}

/// Parameters for admitting a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub payload: JsonValue,
    pub priority: JobPriority,
    pub max_retries: i32,
}

impl NewJob {
    /// New job with the type's default priority and the default retry ceiling.
    pub fn new(job_type: JobType, payload: JsonValue) -> Self {
        Self {
            job_type,
            payload,
            priority: job_type.default_priority(),
            max_retries: defaults::JOB_MAX_RETRIES,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Queue statistics summary, counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

impl QueueStats {
    /// Count one job with the given status.
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Retrying => self.retrying += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
        self.total += 1;
    }
}
