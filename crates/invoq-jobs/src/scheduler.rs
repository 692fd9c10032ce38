//! Priority job scheduler.
//!
//! The scheduler owns the live working set of jobs behind a single lock. Every
//! state transition happens under that lock and is written to the
//! [`JobStore`] before the lock is released, so the store always reflects a
//! prefix of the in-memory history.
//!
//! Selection order is priority rank first (`Critical` before `Low`), then
//! `created_at`, then admission sequence. There is no aging: a steady stream
//! of high-priority work starves lower bands.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use invoq_core::defaults::{EVENT_BUS_CAPACITY, JOB_RETENTION_SECS, JOB_TIMEOUT_SECS};
use invoq_core::{Error, Job, JobStatus, JobStore, NewJob, QueueStats, Result};

use crate::backoff::RetryPolicy;
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::registry::HandlerRegistry;
use crate::worker::WorkerEvent;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Backoff between a failed attempt and the job becoming `Pending` again.
    pub retry: RetryPolicy,
    /// Upper bound on a single handler invocation.
    pub job_timeout: Duration,
    /// How long terminal jobs stay in memory before eviction.
    pub retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            job_timeout: Duration::from_secs(JOB_TIMEOUT_SECS),
            retention: Duration::from_secs(JOB_RETENTION_SECS),
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_TIMEOUT_SECS` | `300` | Handler timeout |
    /// | `JOB_RETENTION_SECS` | `3600` | In-memory retention of terminal jobs |
    /// | `JOB_BACKOFF_BASE_MS` | `1000` | Backoff base unit |
    /// | `JOB_BACKOFF_MAX_MS` | `300000` | Backoff ceiling |
    /// | `JOB_BACKOFF_JITTER` | `false` | Full jitter on backoff |
    pub fn from_env() -> Self {
        let job_timeout = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_TIMEOUT_SECS)
            .max(1);
        let retention = std::env::var("JOB_RETENTION_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_RETENTION_SECS);

        Self {
            retry: RetryPolicy::from_env(),
            job_timeout: Duration::from_secs(job_timeout),
            retention: Duration::from_secs(retention),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

struct Slot {
    job: Job,
    /// Admission order, breaks `created_at` ties.
    seq: u64,
    cancel: Arc<AtomicBool>,
    /// When the job reached a terminal state.
    finished_at: Option<Instant>,
}

#[derive(Default)]
struct Index {
    slots: HashMap<Uuid, Slot>,
    next_seq: u64,
}

impl Index {
    fn insert(&mut self, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let finished_at = job.status.is_terminal().then(Instant::now);
        self.slots.insert(
            job.id,
            Slot {
                job,
                seq,
                cancel: Arc::new(AtomicBool::new(false)),
                finished_at,
            },
        );
    }
}

/// In-process job scheduler backed by a durable [`JobStore`].
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    registry: HandlerRegistry,
    config: SchedulerConfig,
    index: Mutex<Index>,
    running: AtomicBool,
    /// Signalled when a job becomes `Pending`.
    job_notify: Notify,
    /// Signalled on cancel and shutdown, wakes backoff sleepers.
    cancel_notify: Notify,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, registry: HandlerRegistry, config: SchedulerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            store,
            registry,
            config,
            index: Mutex::new(Index::default()),
            running: AtomicBool::new(true),
            job_notify: Notify::new(),
            cancel_notify: Notify::new(),
            event_tx,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn events(&self) -> &broadcast::Sender<WorkerEvent> {
        &self.event_tx
    }

    /// Completes when a job may have become selectable, or at once if the
    /// scheduler has stopped.
    pub async fn job_available(&self) {
        let notified = self.job_notify.notified();
        tokio::pin!(notified);
        // Register before checking so a concurrent shutdown is not missed.
        notified.as_mut().enable();
        if !self.is_running() {
            return;
        }
        notified.await
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::SchedulerNotRunning)
        }
    }

    fn evict_expired(&self, index: &mut Index) {
        let retention = self.config.retention;
        let before = index.slots.len();
        index
            .slots
            .retain(|_, slot| slot.finished_at.map_or(true, |t| t.elapsed() < retention));
        let evicted = before - index.slots.len();
        if evicted > 0 {
            debug!(
                subsystem = "scheduler",
                op = "evict",
                evicted,
                "Evicted terminal jobs from working set"
            );
        }
    }

    /// Persist a transition made during execution. Failures are logged and the
    /// in-memory transition stands.
    async fn persist_logged(&self, job: &Job) {
        if let Err(e) = self.store.save(job).await {
            error!(
                subsystem = "scheduler",
                op = "persist",
                job_id = %job.id,
                status = %job.status,
                error = %e,
                "Failed to persist job transition"
            );
        }
    }

    // =========================================================================
    // ADMISSION
    // =========================================================================

    /// Admit a job in `Pending` and return its id.
    ///
    /// Fails with `HandlerNotRegistered` for job types without a handler,
    /// `InvalidPayload` when the payload is not a JSON object, and
    /// `SchedulerNotRunning` after [`shutdown`](Self::shutdown). A store
    /// failure is returned and the job is not admitted.
    pub async fn add_job(&self, new_job: NewJob) -> Result<Uuid> {
        self.ensure_running()?;

        if !self.registry.contains(new_job.job_type) {
            return Err(Error::HandlerNotRegistered(new_job.job_type.to_string()));
        }
        if !new_job.payload.is_object() {
            return Err(Error::InvalidPayload(format!(
                "payload must be a JSON object, got {}",
                json_kind(&new_job.payload)
            )));
        }

        let job = Job::new(
            new_job.job_type,
            new_job.payload,
            new_job.priority,
            new_job.max_retries,
        );
        let job_id = job.id;

        let mut index = self.index.lock().await;
        self.evict_expired(&mut index);
        self.store.save(&job).await.map_err(|e| {
            error!(
                subsystem = "scheduler",
                op = "add_job",
                job_id = %job_id,
                error = %e,
                "Failed to persist new job"
            );
            e
        })?;

        info!(
            subsystem = "scheduler",
            op = "add_job",
            job_id = %job_id,
            job_type = %job.job_type,
            priority = %job.priority,
            max_retries = job.max_retries,
            "Job queued"
        );
        index.insert(job);
        drop(index);

        self.job_notify.notify_one();
        Ok(job_id)
    }

    // =========================================================================
    // SELECTION
    // =========================================================================

    /// Claim the next pending job: highest priority first, oldest first within
    /// a priority band.
    ///
    /// The claim moves the job to `Processing`, increments `attempts`, and
    /// stamps `started_at` on the first claim, all under the scheduler lock.
    pub async fn select_next(&self) -> Result<Option<Job>> {
        self.ensure_running()?;

        let mut index = self.index.lock().await;
        self.evict_expired(&mut index);

        let next = index
            .slots
            .values()
            .filter(|s| s.job.status == JobStatus::Pending)
            .min_by_key(|s| (s.job.priority, s.job.created_at, s.seq))
            .map(|s| s.job.id);

        let Some(job_id) = next else {
            return Ok(None);
        };
        let Some(slot) = index.slots.get_mut(&job_id) else {
            return Ok(None);
        };

        let mut claimed = slot.job.clone();
        claimed.status = JobStatus::Processing;
        claimed.attempts += 1;
        if claimed.started_at.is_none() {
            claimed.started_at = Some(Utc::now());
        }

        self.persist_logged(&claimed).await;
        slot.job = claimed.clone();

        debug!(
            subsystem = "scheduler",
            op = "select_next",
            job_id = %job_id,
            job_type = %claimed.job_type,
            priority = %claimed.priority,
            attempt = claimed.attempts,
            "Job claimed"
        );
        Ok(Some(claimed))
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Run the handler for a claimed job and apply the outcome.
    ///
    /// A retryable failure with attempts left moves the job to `Retrying`,
    /// waits out the backoff, then returns it to `Pending`. The wait ends early
    /// when `stop` fires (the job is released to `Pending` at once) or the job
    /// is cancelled. Returns the job's status when this call finishes.
    pub async fn execute(&self, job: Job, stop: &mut watch::Receiver<bool>) -> JobStatus {
        let job_id = job.id;
        let job_type = job.job_type;
        let attempt = job.attempts;
        let start = Instant::now();

        let cancel_flag = {
            let index = self.index.lock().await;
            index.slots.get(&job_id).map(|s| s.cancel.clone())
        };
        let Some(cancel_flag) = cancel_flag else {
            warn!(
                subsystem = "scheduler",
                op = "execute",
                job_id = %job_id,
                "Job is not in the working set, skipping"
            );
            return job.status;
        };

        info!(
            subsystem = "scheduler",
            op = "execute",
            job_id = %job_id,
            job_type = %job_type,
            attempt,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            job_type,
            attempt,
        });

        let outcome = match self.registry.get(job_type) {
            Some(handler) => self.run_handler(handler, job, cancel_flag).await,
            None => JobResult::Failed(Error::HandlerNotRegistered(job_type.to_string()).to_string()),
        };

        let (status, backoff) = self.apply_outcome(job_id, outcome, start).await;
        if status != JobStatus::Retrying {
            return status;
        }

        self.wait_backoff(job_id, attempt, backoff, stop).await;
        self.release_retry(job_id).await
    }

    async fn run_handler(
        &self,
        handler: Arc<dyn JobHandler>,
        job: Job,
        cancel_flag: Arc<AtomicBool>,
    ) -> JobResult {
        let job_id = job.id;
        let event_tx = self.event_tx.clone();
        let ctx = JobContext::new(job)
            .with_cancel_flag(cancel_flag)
            .with_progress_callback(move |percent, message| {
                let _ = event_tx.send(WorkerEvent::JobProgress {
                    job_id,
                    percent,
                    message: message.map(String::from),
                });
            });

        let task = tokio::spawn(async move { handler.execute(ctx).await });
        let abort = task.abort_handle();
        let timeout = self.config.job_timeout;

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(
                    subsystem = "scheduler",
                    op = "execute",
                    job_id = %job_id,
                    error = %e,
                    "Job handler panicked"
                );
                JobResult::Retry(format!("Job handler panicked: {}", e))
            }
            Err(_) => {
                abort.abort();
                warn!(
                    subsystem = "scheduler",
                    op = "execute",
                    job_id = %job_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Job exceeded timeout"
                );
                JobResult::Retry(format!("Job exceeded timeout of {:?}", timeout))
            }
        }
    }

    /// Commit the handler outcome. The returned delay is the backoff to wait
    /// when the job moved to `Retrying`, zero otherwise.
    async fn apply_outcome(
        &self,
        job_id: Uuid,
        outcome: JobResult,
        start: Instant,
    ) -> (JobStatus, Duration) {
        let mut index = self.index.lock().await;
        let Some(slot) = index.slots.get_mut(&job_id) else {
            warn!(subsystem = "scheduler", job_id = %job_id, "Job vanished during execution");
            return (JobStatus::Failed, Duration::ZERO);
        };
        if slot.job.status != JobStatus::Processing {
            return (slot.job.status, Duration::ZERO);
        }
        let mut backoff = Duration::ZERO;

        let mut job = slot.job.clone();
        let now = Utc::now();
        let duration_ms = start.elapsed().as_millis() as u64;

        let event = if slot.cancel.load(Ordering::SeqCst) {
            job.status = JobStatus::Cancelled;
            job.error_message = Some("Cancelled while processing".to_string());
            job.completed_at = Some(now);
            WorkerEvent::JobCancelled {
                job_id,
                job_type: job.job_type,
            }
        } else {
            match outcome {
                JobResult::Success(result) => {
                    job.status = JobStatus::Completed;
                    job.result = Some(result.unwrap_or_else(|| json!({})));
                    job.error_message = None;
                    job.completed_at = Some(now);
                    WorkerEvent::JobCompleted {
                        job_id,
                        job_type: job.job_type,
                        duration_ms,
                    }
                }
                JobResult::Retry(error) if job.can_retry() => {
                    backoff = self.config.retry.delay(job.attempts);
                    let delay_ms = backoff.as_millis() as u64;
                    job.status = JobStatus::Retrying;
                    job.error_message = Some(error.clone());
                    WorkerEvent::JobRetrying {
                        job_id,
                        job_type: job.job_type,
                        attempt: job.attempts,
                        delay_ms,
                        error,
                    }
                }
                JobResult::Retry(error) | JobResult::Failed(error) => {
                    job.status = JobStatus::Failed;
                    job.error_message = Some(error.clone());
                    job.completed_at = Some(now);
                    WorkerEvent::JobFailed {
                        job_id,
                        job_type: job.job_type,
                        error,
                    }
                }
            }
        };

        self.persist_logged(&job).await;
        if job.status.is_terminal() {
            slot.finished_at = Some(Instant::now());
        }
        slot.job = job.clone();
        drop(index);

        match job.status {
            JobStatus::Completed => info!(
                subsystem = "scheduler",
                job_id = %job_id,
                job_type = %job.job_type,
                attempt = job.attempts,
                duration_ms,
                "Job completed"
            ),
            JobStatus::Retrying => warn!(
                subsystem = "scheduler",
                job_id = %job_id,
                job_type = %job.job_type,
                attempt = job.attempts,
                max_attempts = job.max_attempts(),
                backoff_ms = backoff.as_millis() as u64,
                error = job.error_message.as_deref().unwrap_or_default(),
                "Job failed, will retry"
            ),
            JobStatus::Failed => warn!(
                subsystem = "scheduler",
                job_id = %job_id,
                job_type = %job.job_type,
                attempt = job.attempts,
                error = job.error_message.as_deref().unwrap_or_default(),
                duration_ms,
                "Job failed"
            ),
            _ => info!(
                subsystem = "scheduler",
                job_id = %job_id,
                status = %job.status,
                "Job finished"
            ),
        }
        let _ = self.event_tx.send(event);
        (job.status, backoff)
    }

    async fn wait_backoff(
        &self,
        job_id: Uuid,
        attempts: i32,
        delay: Duration,
        stop: &mut watch::Receiver<bool>,
    ) {
        if *stop.borrow() {
            return;
        }
        debug!(
            subsystem = "scheduler",
            op = "backoff",
            job_id = %job_id,
            attempt = attempts,
            backoff_ms = delay.as_millis() as u64,
            "Waiting before retry"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                _ = stop.changed() => return,
                _ = self.cancel_notify.notified() => {
                    if !self.is_running()
                        || self.status_of(job_id).await != Some(JobStatus::Retrying)
                    {
                        return;
                    }
                }
            }
        }
    }

    /// `Retrying -> Pending`. No-op if the job left `Retrying` meanwhile.
    async fn release_retry(&self, job_id: Uuid) -> JobStatus {
        let mut index = self.index.lock().await;
        let Some(slot) = index.slots.get_mut(&job_id) else {
            return JobStatus::Cancelled;
        };
        if slot.job.status != JobStatus::Retrying {
            return slot.job.status;
        }

        let mut job = slot.job.clone();
        job.status = JobStatus::Pending;
        self.persist_logged(&job).await;
        slot.job = job;
        drop(index);

        self.job_notify.notify_one();
        JobStatus::Pending
    }

    async fn status_of(&self, job_id: Uuid) -> Option<JobStatus> {
        let index = self.index.lock().await;
        index.slots.get(&job_id).map(|s| s.job.status)
    }

    // =========================================================================
    // CONTROL & INSPECTION
    // =========================================================================

    /// Cancel a job.
    ///
    /// `Pending` and `Retrying` jobs become `Cancelled` immediately. For a
    /// `Processing` job cancellation is requested through the handler's
    /// cancel flag and the job becomes `Cancelled` when the handler returns;
    /// `Processing` is returned in that case. Terminal jobs are left alone and
    /// their status returned.
    pub async fn cancel(&self, job_id: Uuid) -> Result<JobStatus> {
        self.ensure_running()?;

        let mut index = self.index.lock().await;
        let Some(slot) = index.slots.get_mut(&job_id) else {
            drop(index);
            return match self.store.load(job_id).await? {
                Some(job) => Ok(job.status),
                None => Err(Error::JobNotFound(job_id)),
            };
        };

        match slot.job.status {
            JobStatus::Pending | JobStatus::Retrying => {
                let mut job = slot.job.clone();
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                self.store.save(&job).await?;
                slot.finished_at = Some(Instant::now());
                slot.job = job.clone();
                drop(index);

                self.cancel_notify.notify_waiters();
                info!(
                    subsystem = "scheduler",
                    op = "cancel",
                    job_id = %job_id,
                    "Job cancelled"
                );
                let _ = self.event_tx.send(WorkerEvent::JobCancelled {
                    job_id,
                    job_type: job.job_type,
                });
                Ok(JobStatus::Cancelled)
            }
            JobStatus::Processing => {
                slot.cancel.store(true, Ordering::SeqCst);
                info!(
                    subsystem = "scheduler",
                    op = "cancel",
                    job_id = %job_id,
                    "Cancellation requested for running job"
                );
                Ok(JobStatus::Processing)
            }
            status => Ok(status),
        }
    }

    /// Look up a job in the working set, falling back to the store for
    /// evicted jobs.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        if let Some(job) = self
            .index
            .lock()
            .await
            .slots
            .get(&job_id)
            .map(|s| s.job.clone())
        {
            return Ok(job);
        }
        self.store
            .load(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Counts by status over the live working set.
    pub async fn get_stats(&self) -> QueueStats {
        let mut index = self.index.lock().await;
        self.evict_expired(&mut index);
        let mut stats = QueueStats::default();
        for slot in index.slots.values() {
            stats.record(slot.job.status);
        }
        stats
    }

    /// Reload non-terminal jobs from the store after a restart.
    ///
    /// `Processing` and `Retrying` jobs go back to `Pending`. An attempt that
    /// was interrupted while `Processing` is not counted. Jobs already in the
    /// working set are skipped, so the worker's rescan task calls this
    /// repeatedly to pick up jobs admitted by other processes. Returns the
    /// number of jobs loaded.
    pub async fn recover(&self) -> Result<usize> {
        let jobs = self
            .store
            .list_by_status(&[JobStatus::Pending, JobStatus::Processing, JobStatus::Retrying])
            .await?;

        let mut index = self.index.lock().await;
        let mut loaded = 0usize;
        let mut reset = 0usize;
        for mut job in jobs {
            if index.slots.contains_key(&job.id) {
                continue;
            }
            if job.status != JobStatus::Pending {
                if job.status == JobStatus::Processing {
                    job.attempts = (job.attempts - 1).max(0);
                }
                job.status = JobStatus::Pending;
                self.store.save(&job).await?;
                reset += 1;
            }
            index.insert(job);
            loaded += 1;
        }
        drop(index);

        if loaded > 0 {
            self.job_notify.notify_waiters();
            info!(
                subsystem = "scheduler",
                op = "recover",
                loaded,
                reset,
                "Recovered jobs from store"
            );
        } else {
            debug!(subsystem = "scheduler", op = "recover", "No new jobs in store");
        }
        Ok(loaded)
    }

    /// Stop admitting and selecting work. Jobs already executing finish
    /// normally.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(subsystem = "scheduler", op = "shutdown", "Scheduler stopped");
        }
        self.job_notify.notify_waiters();
        self.cancel_notify.notify_waiters();
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoOpHandler;
    use async_trait::async_trait;
    use invoq_core::{JobPriority, JobType};
    use tokio::sync::RwLock;

    /// Minimal store so unit tests do not depend on invoq-db.
    #[derive(Default)]
    struct VecStore {
        jobs: RwLock<HashMap<Uuid, Job>>,
    }

    #[async_trait]
    impl JobStore for VecStore {
        async fn save(&self, job: &Job) -> Result<()> {
            self.jobs.write().await.insert(job.id, job.clone());
            Ok(())
        }
        async fn load(&self, id: Uuid) -> Result<Option<Job>> {
            Ok(self.jobs.read().await.get(&id).cloned())
        }
        async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
            let mut jobs: Vec<Job> = self
                .jobs
                .read()
                .await
                .values()
                .filter(|j| statuses.contains(&j.status))
                .cloned()
                .collect();
            jobs.sort_by_key(|j| j.created_at);
            Ok(jobs)
        }
    }

    fn scheduler_with(store: Arc<VecStore>) -> Scheduler {
        let registry = HandlerRegistry::builder()
            .with_handler(NoOpHandler::new(JobType::InvoiceProcessing))
            .with_handler(NoOpHandler::new(JobType::Export))
            .build();
        Scheduler::new(
            store,
            registry,
            SchedulerConfig::default().with_retry(RetryPolicy::immediate()),
        )
    }

    fn scheduler() -> Scheduler {
        scheduler_with(Arc::new(VecStore::default()))
    }

    fn invoice(priority: JobPriority) -> NewJob {
        NewJob::new(JobType::InvoiceProcessing, json!({"invoice_id": "x"})).with_priority(priority)
    }

    #[tokio::test]
    async fn test_add_job_rejects_unregistered_type() {
        let s = scheduler();
        let err = s
            .add_job(NewJob::new(JobType::EmailIngestion, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandlerNotRegistered(t) if t == "email-ingestion"));
    }

    #[tokio::test]
    async fn test_add_job_rejects_non_object_payload() {
        let s = scheduler();
        let err = s
            .add_job(NewJob::new(JobType::Export, json!(["a", "b"])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
        assert!(err.to_string().contains("array"));
    }

    #[tokio::test]
    async fn test_add_job_persists_pending() {
        let store = Arc::new(VecStore::default());
        let s = scheduler_with(store.clone());
        let id = s.add_job(invoice(JobPriority::Normal)).await.unwrap();

        let stored = store.load(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 0);
        assert_eq!(s.get_stats().await.pending, 1);
    }

    #[tokio::test]
    async fn test_critical_selected_before_high() {
        let s = scheduler();
        let high = s.add_job(invoice(JobPriority::High)).await.unwrap();
        let critical = s.add_job(invoice(JobPriority::Critical)).await.unwrap();

        assert_eq!(s.select_next().await.unwrap().unwrap().id, critical);
        assert_eq!(s.select_next().await.unwrap().unwrap().id, high);
        assert!(s.select_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fifo_within_band() {
        let s = scheduler();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(s.add_job(invoice(JobPriority::Normal)).await.unwrap());
        }
        for expected in ids {
            assert_eq!(s.select_next().await.unwrap().unwrap().id, expected);
        }
    }

    #[tokio::test]
    async fn test_claim_sets_processing_attempts_and_started_at() {
        let s = scheduler();
        let id = s.add_job(invoice(JobPriority::Low)).await.unwrap();
        let job = s.select_next().await.unwrap().unwrap();

        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());
        assert_eq!(s.get_stats().await.processing, 1);
    }

    #[tokio::test]
    async fn test_execute_success_completes_with_result() {
        let s = scheduler();
        let (_tx, mut stop) = watch::channel(false);
        let id = s.add_job(invoice(JobPriority::High)).await.unwrap();
        let job = s.select_next().await.unwrap().unwrap();

        assert_eq!(s.execute(job, &mut stop).await, JobStatus::Completed);
        let job = s.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.result.is_some());
        assert!(job.error_message.is_none());
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_pending_is_never_selected() {
        let s = scheduler();
        let id = s.add_job(invoice(JobPriority::Critical)).await.unwrap();
        assert_eq!(s.cancel(id).await.unwrap(), JobStatus::Cancelled);
        assert!(s.select_next().await.unwrap().is_none());

        // Cancelling again is a no-op.
        assert_eq!(s.cancel(id).await.unwrap(), JobStatus::Cancelled);
        assert_eq!(s.get_stats().await.cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_processing_requests_cooperative_stop() {
        let s = scheduler();
        let (_tx, mut stop) = watch::channel(false);
        let id = s.add_job(invoice(JobPriority::Normal)).await.unwrap();
        let job = s.select_next().await.unwrap().unwrap();

        assert_eq!(s.cancel(id).await.unwrap(), JobStatus::Processing);
        assert_eq!(s.execute(job, &mut stop).await, JobStatus::Cancelled);
        assert_eq!(s.get_job(id).await.unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let s = scheduler();
        let id = Uuid::new_v4();
        assert!(matches!(s.get_job(id).await, Err(Error::JobNotFound(x)) if x == id));
        assert!(matches!(s.cancel(id).await, Err(Error::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_admission_and_selection() {
        let s = scheduler();
        let id = s.add_job(invoice(JobPriority::Normal)).await.unwrap();
        s.shutdown();

        assert!(!s.is_running());
        assert!(matches!(
            s.add_job(invoice(JobPriority::Normal)).await,
            Err(Error::SchedulerNotRunning)
        ));
        assert!(matches!(s.select_next().await, Err(Error::SchedulerNotRunning)));
        // Inspection keeps working.
        assert_eq!(s.get_job(id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_jobs_evicted_after_retention() {
        let store = Arc::new(VecStore::default());
        let registry = HandlerRegistry::builder()
            .with_handler(NoOpHandler::new(JobType::Export))
            .build();
        let s = Scheduler::new(
            store.clone(),
            registry,
            SchedulerConfig::default().with_retention(Duration::from_secs(60)),
        );
        let (_tx, mut stop) = watch::channel(false);

        let id = s
            .add_job(NewJob::new(JobType::Export, json!({})))
            .await
            .unwrap();
        let job = s.select_next().await.unwrap().unwrap();
        s.execute(job, &mut stop).await;
        assert_eq!(s.get_stats().await.completed, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(s.get_stats().await.total, 0);

        // Still reachable through the store.
        let job = s.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(s.cancel(id).await.unwrap(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_resets_in_flight_jobs() {
        let store = Arc::new(VecStore::default());

        let mut processing = Job::new(JobType::Export, json!({}), JobPriority::Low, 3);
        processing.status = JobStatus::Processing;
        processing.attempts = 2;
        let mut retrying = Job::new(JobType::Export, json!({}), JobPriority::Low, 3);
        retrying.status = JobStatus::Retrying;
        retrying.attempts = 1;
        let mut done = Job::new(JobType::Export, json!({}), JobPriority::Low, 3);
        done.status = JobStatus::Completed;
        for job in [&processing, &retrying, &done] {
            store.save(job).await.unwrap();
        }

        let s = scheduler_with(store.clone());
        assert_eq!(s.recover().await.unwrap(), 2);
        // Second call finds nothing new.
        assert_eq!(s.recover().await.unwrap(), 0);

        let p = s.get_job(processing.id).await.unwrap();
        assert_eq!(p.status, JobStatus::Pending);
        assert_eq!(p.attempts, 1);
        let r = store.load(retrying.id).await.unwrap().unwrap();
        assert_eq!(r.status, JobStatus::Pending);
        assert_eq!(r.attempts, 1);
        assert_eq!(s.get_stats().await.pending, 2);
    }
}
