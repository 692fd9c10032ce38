//! Job handlers for each job type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use invoq_core::{Error, Job, JobType};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// Snapshot of the job as claimed.
    pub job: Job,
    progress_callback: Option<ProgressCallback>,
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            progress_callback: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share the scheduler's cancellation flag for this job.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    /// Whether cancellation was requested while this job was processing.
    /// Handlers check this between steps and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.job.payload
    }

    /// Attempt number of this execution, starting at 1.
    pub fn attempt(&self) -> i32 {
        self.job.attempts
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed and must not be retried.
    Failed(String),
    /// Job failed transiently and may be retried.
    Retry(String),
}

impl JobResult {
    /// Classify an error: permanent and configuration errors fail the job,
    /// everything else goes back through the retry state machine.
    pub fn from_error(error: &Error) -> Self {
        if error.is_retryable() {
            JobResult::Retry(error.to_string())
        } else {
            JobResult::Failed(error.to_string())
        }
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// Handler that succeeds immediately. Placeholder for job types whose real
/// processing lives in another service.
pub struct NoOpHandler {
    job_type: JobType,
    result: Option<JsonValue>,
}

impl NoOpHandler {
    pub fn new(job_type: JobType) -> Self {
        Self {
            job_type,
            result: None,
        }
    }

    /// Result recorded on the completed job.
    pub fn with_result(mut self, result: JsonValue) -> Self {
        self.result = Some(result);
        self
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(100, Some("Done"));
        JobResult::Success(self.result.clone())
    }
}

/// Handler for a job type whose backing service is not configured in this
/// process. Jobs are admitted and fail with `reason` without retrying.
pub struct UnavailableHandler {
    job_type: JobType,
    reason: String,
}

impl UnavailableHandler {
    pub fn new(job_type: JobType, reason: impl Into<String>) -> Self {
        Self {
            job_type,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl JobHandler for UnavailableHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Failed(self.reason.clone())
    }
}
