//! # invoq-jobs
//!
//! Job scheduling and invoice extraction for invoq.
//!
//! This crate provides:
//! - A priority scheduler with a durable [`JobStore`] behind it
//! - Worker loops with cooperative stop and broadcast events
//! - Capped exponential retry backoff
//! - The staged extraction pipeline (text layer, OCR, AI, regex)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use invoq_jobs::*;
//!
//! let pipeline = Arc::new(PipelineRunner::builder(PipelineConfig::from_env()).build());
//! let registry = HandlerRegistry::builder()
//!     .with_handler(InvoiceProcessingHandler::new(fetcher, pipeline))
//!     .build();
//!
//! let scheduler = Arc::new(Scheduler::new(store, registry, SchedulerConfig::from_env()));
//! scheduler.recover().await?;
//!
//! let handle = JobWorker::new(scheduler.clone(), WorkerConfig::from_env()).start();
//! let id = scheduler
//!     .add_job(NewJob::new(JobType::InvoiceProcessing, json!({
//!         "invoice_id": "inv-1",
//!         "file_path": "uploads/inv-1.pdf",
//!     })))
//!     .await?;
//!
//! // Graceful shutdown
//! scheduler.shutdown();
//! handle.shutdown().await;
//! ```

pub mod backoff;
pub mod handler;
pub mod invoice_handler;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod stages;
pub mod worker;

// Re-export core types
pub use invoq_core::*;

pub use backoff::RetryPolicy;
pub use handler::{
    JobContext, JobHandler, JobResult, NoOpHandler, ProgressCallback, UnavailableHandler,
};
pub use invoice_handler::{InvoiceJobPayload, InvoiceProcessingHandler};
pub use pipeline::{
    PipelineConfig, PipelineDiagnostics, PipelineOutput, PipelineRunner, PipelineRunnerBuilder,
    StageReport, StageStatus,
};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use stages::{PdftoppmRasterizer, PdftotextReader, TesseractEngine};
pub use worker::{JobWorker, WorkerConfig, WorkerEvent, WorkerHandle};
