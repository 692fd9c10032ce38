//! Worker loops that pull jobs from the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use invoq_core::defaults::{JOB_POLL_INTERVAL_MS, JOB_RESCAN_INTERVAL_MS, JOB_WORKERS};
use invoq_core::{Error, JobType};

use crate::scheduler::Scheduler;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker loops. Each runs one job at a time.
    pub workers: usize,
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Interval between store rescans picking up jobs written by other
    /// processes. Zero disables the rescan task.
    pub rescan_interval_ms: u64,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: JOB_WORKERS,
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            rescan_interval_ms: JOB_RESCAN_INTERVAL_MS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_WORKERS` | `2` | Worker loops |
    /// | `JOB_POLL_INTERVAL_MS` | `5000` | Polling interval when queue is empty |
    /// | `JOB_RESCAN_INTERVAL_MS` | `5000` | Store rescan interval, `0` disables |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let workers = std::env::var("JOB_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(JOB_WORKERS)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_POLL_INTERVAL_MS);

        let rescan_interval_ms = std::env::var("JOB_RESCAN_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_RESCAN_INTERVAL_MS);

        Self {
            workers,
            poll_interval_ms,
            rescan_interval_ms,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_rescan_interval(mut self, ms: u64) -> Self {
        self.rescan_interval_ms = ms;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the scheduler and its workers.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker loop started.
    WorkerStarted { worker_id: usize },
    /// A worker loop exited.
    WorkerStopped { worker_id: usize },
    /// A job was claimed and its handler invoked.
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
    },
    /// Job progress was updated.
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        job_type: JobType,
        duration_ms: u64,
    },
    /// An attempt failed and the job will run again after `delay_ms`.
    JobRetrying {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
        delay_ms: u64,
        error: String,
    },
    /// A job failed for good.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// A job was cancelled.
    JobCancelled { job_id: Uuid, job_type: JobType },
}

/// Handle for controlling running worker loops.
pub struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
    rescan: Option<JoinHandle<()>>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Ask every loop to stop after its current job. Sleeping loops wake at
    /// once.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for all loops to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Worker loop panicked");
            }
        }
        if let Some(rescan) = self.rescan.take() {
            if let Err(e) = rescan.await {
                error!(error = ?e, "Store rescan task panicked");
            }
        }
        info!("All worker loops stopped");
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Number of worker loops spawned and not yet joined.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }
}

/// Runs [`WorkerConfig::workers`] loops against a shared scheduler.
pub struct JobWorker {
    scheduler: Arc<Scheduler>,
    config: WorkerConfig,
}

impl JobWorker {
    pub fn new(scheduler: Arc<Scheduler>, config: WorkerConfig) -> Self {
        Self { scheduler, config }
    }

    /// Spawn the worker loops.
    pub fn start(self) -> WorkerHandle {
        let (stop_tx, _) = watch::channel(false);
        let event_rx = self.scheduler.subscribe();
        let mut tasks = JoinSet::new();
        let mut rescan = None;

        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
        } else {
            info!(
                workers = self.config.workers,
                poll_interval_ms = self.config.poll_interval_ms,
                job_types = ?self.scheduler.registry().job_types(),
                "Job worker started"
            );
            let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
            for worker_id in 0..self.config.workers {
                let scheduler = self.scheduler.clone();
                let stop_rx = stop_tx.subscribe();
                tasks.spawn(run_loop(scheduler, worker_id, poll_interval, stop_rx));
            }
            if self.config.rescan_interval_ms > 0 {
                rescan = Some(tokio::spawn(rescan_loop(
                    self.scheduler.clone(),
                    Duration::from_millis(self.config.rescan_interval_ms),
                    stop_tx.subscribe(),
                )));
            }
        }

        WorkerHandle {
            stop_tx,
            tasks,
            rescan,
            event_rx,
        }
    }
}

/// One worker: select, execute, repeat; sleep when idle.
async fn run_loop(
    scheduler: Arc<Scheduler>,
    worker_id: usize,
    poll_interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let _ = scheduler.events().send(WorkerEvent::WorkerStarted { worker_id });
    debug!(worker_id, "Worker loop started");

    loop {
        if *stop.borrow() {
            info!(worker_id, "Worker received stop signal");
            break;
        }

        match scheduler.select_next().await {
            Ok(Some(job)) => {
                scheduler.execute(job, &mut stop).await;
            }
            Ok(None) => {
                // Queue empty: sleep until the poll interval elapses, a job
                // arrives, or we are told to stop.
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = scheduler.job_available() => {}
                    _ = sleep(poll_interval) => {}
                }
            }
            Err(Error::SchedulerNotRunning) => {
                info!(worker_id, "Scheduler stopped, exiting worker loop");
                break;
            }
            Err(e) => {
                warn!(worker_id, error = %e, "Failed to select next job");
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep(poll_interval) => {}
                }
            }
        }
    }

    let _ = scheduler.events().send(WorkerEvent::WorkerStopped { worker_id });
    debug!(worker_id, "Worker loop stopped");
}

/// Periodically pull jobs other processes wrote to the store into the
/// scheduler's working set.
async fn rescan_loop(
    scheduler: Arc<Scheduler>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes at once; startup recovery already ran.
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if !scheduler.is_running() {
                    break;
                }
                if let Err(e) = scheduler.recover().await {
                    warn!(error = %e, "Store rescan failed");
                }
            }
        }
    }
    debug!("Store rescan stopped");
}
