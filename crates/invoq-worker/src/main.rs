//! invoq worker process.
//!
//! Wires the job store, document fetcher, structuring backend, extraction
//! pipeline and scheduler together, then runs worker loops until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invoq_core::{DocumentFetcher, ExtractionSink, JobStore, StructuringBackend};
use invoq_db::{
    log_pool_metrics, Database, FilesystemFetcher, HttpFetcher, HttpStorageConfig, MemoryJobStore,
    PoolConfig,
};
use invoq_inference::{GeminiBackend, OpenAIBackend};
use invoq_jobs::{
    HandlerRegistry, InvoiceProcessingHandler, JobType, JobWorker, NoOpHandler, PipelineConfig,
    PipelineRunner, Scheduler, SchedulerConfig, UnavailableHandler, WorkerConfig, WorkerEvent,
};
use serde_json::json;

/// Which generative backend structures extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StructuringProvider {
    Gemini,
    OpenAI,
    None,
}

impl StructuringProvider {
    /// `STRUCTURING_PROVIDER` wins; otherwise Gemini when a key is present.
    fn resolve(provider: Option<&str>, gemini_key_set: bool) -> anyhow::Result<Self> {
        match provider.map(|p| p.trim().to_ascii_lowercase()).as_deref() {
            Some("gemini") => Ok(Self::Gemini),
            Some("openai") => Ok(Self::OpenAI),
            Some("none") | Some("") => Ok(Self::None),
            Some(other) => anyhow::bail!(
                "Unknown STRUCTURING_PROVIDER '{}' (expected gemini, openai or none)",
                other
            ),
            None if gemini_key_set => Ok(Self::Gemini),
            None => Ok(Self::None),
        }
    }

    fn from_env() -> anyhow::Result<Self> {
        Self::resolve(
            std::env::var("STRUCTURING_PROVIDER").ok().as_deref(),
            std::env::var("GEMINI_API_KEY").is_ok(),
        )
    }

    fn build(self) -> anyhow::Result<Option<Arc<dyn StructuringBackend>>> {
        let backend: Option<Arc<dyn StructuringBackend>> = match self {
            Self::Gemini => Some(Arc::new(
                GeminiBackend::from_env().context("Failed to configure Gemini backend")?,
            )),
            Self::OpenAI => Some(Arc::new(
                OpenAIBackend::from_env().context("Failed to configure OpenAI backend")?,
            )),
            Self::None => None,
        };
        Ok(backend)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "invoq_worker=info,invoq_jobs=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "invoq_worker=info,invoq_jobs=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("invoq-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Job store and extraction sink
    let mut pool = None;
    let (store, sink): (Arc<dyn JobStore>, Option<Arc<dyn ExtractionSink>>) =
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                let db = Database::connect_with_config(&url, PoolConfig::from_env())
                    .await
                    .context("Failed to connect to database")?;
                db.migrate().await.context("Failed to run migrations")?;
                info!("Using PostgreSQL job store");
                pool = Some(db.pool.clone());
                (Arc::new(db.jobs), Some(Arc::new(db.extractions)))
            }
            Err(_) => {
                warn!("DATABASE_URL not set, jobs will not survive a restart");
                (Arc::new(MemoryJobStore::new()), None)
            }
        };

    // Document storage
    let fetcher: Arc<dyn DocumentFetcher> = match HttpStorageConfig::from_env() {
        Some(config) => {
            info!(url = %config.base_url, "Using HTTP object storage");
            Arc::new(HttpFetcher::new(config).context("Failed to configure object storage")?)
        }
        None => {
            let root = std::env::var("DOCUMENT_ROOT").unwrap_or_else(|_| "./uploads".to_string());
            info!(root = %root, "Using filesystem document storage");
            Arc::new(FilesystemFetcher::new(root))
        }
    };

    let provider = StructuringProvider::from_env()?;
    info!(provider = ?provider, "Structuring provider selected");
    let backend = provider.build()?;

    let pipeline = PipelineRunner::builder(PipelineConfig::from_env())
        .structuring(backend)
        .build();

    let mut handler = InvoiceProcessingHandler::new(fetcher, Arc::new(pipeline));
    if let Some(sink) = sink {
        handler = handler.with_sink(sink);
    }
    let registry = build_registry(handler);

    let scheduler = Arc::new(Scheduler::new(store, registry, SchedulerConfig::from_env()));
    let recovered = scheduler
        .recover()
        .await
        .context("Failed to recover persisted jobs")?;
    info!(recovered, "Scheduler recovered persisted jobs");

    let handle = JobWorker::new(scheduler.clone(), WorkerConfig::from_env()).start();
    tokio::spawn(log_worker_events(handle.events()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, draining workers");

    scheduler.shutdown();
    handle.shutdown().await;

    if let Some(pool) = pool {
        log_pool_metrics(&pool);
        pool.close().await;
    }
    let stats = scheduler.get_stats().await;
    info!(stats = ?stats, "invoq worker stopped");
    Ok(())
}

/// One handler per job type. Reports and exports are placeholders; mailbox
/// ingestion has no transport in this process.
fn build_registry(invoice: InvoiceProcessingHandler) -> HandlerRegistry {
    HandlerRegistry::builder()
        .with_handler(invoice)
        .with_handler(
            NoOpHandler::new(JobType::ReportGeneration).with_result(json!({"report_generated": true})),
        )
        .with_handler(NoOpHandler::new(JobType::Export).with_result(json!({"export_completed": true})))
        .with_handler(UnavailableHandler::new(
            JobType::EmailIngestion,
            "Email service not configured",
        ))
        .build()
}

/// Mirror terminal job events into the log.
async fn log_worker_events(mut events: broadcast::Receiver<WorkerEvent>) {
    loop {
        match events.recv().await {
            Ok(WorkerEvent::JobCompleted {
                job_id,
                job_type,
                duration_ms,
            }) => {
                info!(%job_id, job_type = ?job_type, duration_ms, "Job completed");
            }
            Ok(WorkerEvent::JobRetrying {
                job_id,
                attempt,
                delay_ms,
                error,
                ..
            }) => {
                warn!(%job_id, attempt, backoff_ms = delay_ms, error = %error, "Job will retry");
            }
            Ok(WorkerEvent::JobFailed { job_id, error, .. }) => {
                warn!(%job_id, error = %error, "Job failed");
            }
            Ok(event) => debug!(event = ?event, "Worker event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_provider() {
        assert_eq!(
            StructuringProvider::resolve(Some("OpenAI"), true).unwrap(),
            StructuringProvider::OpenAI
        );
        assert_eq!(
            StructuringProvider::resolve(Some("none"), true).unwrap(),
            StructuringProvider::None
        );
        assert_eq!(
            StructuringProvider::resolve(Some(" gemini "), false).unwrap(),
            StructuringProvider::Gemini
        );
    }

    #[test]
    fn test_provider_defaults_follow_gemini_key() {
        assert_eq!(
            StructuringProvider::resolve(None, true).unwrap(),
            StructuringProvider::Gemini
        );
        assert_eq!(
            StructuringProvider::resolve(None, false).unwrap(),
            StructuringProvider::None
        );
    }

    #[test]
    fn test_registry_covers_every_job_type() {
        let pipeline = PipelineRunner::builder(PipelineConfig::default()).build();
        let invoice = InvoiceProcessingHandler::new(
            Arc::new(FilesystemFetcher::new("./uploads")),
            Arc::new(pipeline),
        );
        let registry = build_registry(invoice);
        for job_type in JobType::ALL {
            assert!(registry.contains(job_type), "{job_type} has no handler");
        }
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = StructuringProvider::resolve(Some("claude"), false).unwrap_err();
        assert!(err.to_string().contains("claude"));
    }
}
