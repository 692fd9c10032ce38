//! Handler for `invoice-processing` jobs.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use invoq_core::{DocumentFetcher, Error, ExtractionSink, JobType};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::pipeline::PipelineRunner;

/// Payload of an `invoice-processing` job.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceJobPayload {
    pub invoice_id: String,
    /// Storage path of the uploaded document. Its extension selects the
    /// pipeline's input format.
    pub file_path: String,
}

impl InvoiceJobPayload {
    fn from_json(payload: &serde_json::Value) -> Result<Self, Error> {
        let parsed: Self = serde_json::from_value(payload.clone())
            .map_err(|e| Error::InvalidInput(format!("invoice job payload: {}", e)))?;
        if parsed.invoice_id.trim().is_empty() || parsed.file_path.trim().is_empty() {
            return Err(Error::InvalidInput(
                "invoice job payload: invoice_id and file_path must be non-empty".to_string(),
            ));
        }
        Ok(parsed)
    }
}

/// Downloads the invoice, runs the extraction pipeline, and stores the
/// record.
pub struct InvoiceProcessingHandler {
    fetcher: Arc<dyn DocumentFetcher>,
    pipeline: Arc<PipelineRunner>,
    sink: Option<Arc<dyn ExtractionSink>>,
}

impl InvoiceProcessingHandler {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, pipeline: Arc<PipelineRunner>) -> Self {
        Self {
            fetcher,
            pipeline,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ExtractionSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

fn cancelled() -> JobResult {
    JobResult::Failed("Cancelled while processing".to_string())
}

#[async_trait]
impl JobHandler for InvoiceProcessingHandler {
    fn job_type(&self) -> JobType {
        JobType::InvoiceProcessing
    }

    #[instrument(skip(self, ctx), fields(job_id = %ctx.job_id(), subsystem = "jobs", component = "invoice_processing"))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let payload = match InvoiceJobPayload::from_json(ctx.payload()) {
            Ok(p) => p,
            Err(e) => return JobResult::from_error(&e),
        };

        ctx.report_progress(10, Some("Downloading document"));
        let data = match self.fetcher.fetch(&payload.file_path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    invoice_id = %payload.invoice_id,
                    fetcher = self.fetcher.name(),
                    error = %e,
                    "Document download failed"
                );
                return JobResult::from_error(&e);
            }
        };
        debug!(invoice_id = %payload.invoice_id, bytes = data.len(), "Document downloaded");

        if ctx.is_cancelled() {
            return cancelled();
        }

        ctx.report_progress(30, Some("Extracting invoice data"));
        let output = match self.pipeline.run(&data, &payload.file_path).await {
            Ok(output) => output,
            Err(e) => {
                warn!(invoice_id = %payload.invoice_id, error = %e, "Extraction failed");
                return JobResult::from_error(&e);
            }
        };

        if ctx.is_cancelled() {
            return cancelled();
        }

        let diagnostics = match serde_json::to_value(&output.diagnostics) {
            Ok(v) => v,
            Err(e) => return JobResult::from_error(&Error::from(e)),
        };

        if let Some(sink) = &self.sink {
            ctx.report_progress(90, Some("Saving extraction"));
            if let Err(e) = sink
                .save_extraction(ctx.job_id(), &payload.invoice_id, &output.record, &diagnostics)
                .await
            {
                warn!(invoice_id = %payload.invoice_id, error = %e, "Failed to save extraction");
                return JobResult::Retry(e.to_string());
            }
        }

        ctx.report_progress(100, Some("Done"));
        info!(
            invoice_id = %payload.invoice_id,
            structured_by = output.diagnostics.structured_by.as_deref().unwrap_or_default(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Invoice processed"
        );

        JobResult::Success(Some(json!({
            "invoice_id": payload.invoice_id,
            "record": output.record,
            "diagnostics": diagnostics,
        })))
    }
}
