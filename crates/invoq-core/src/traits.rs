//! Collaborator traits.
//!
//! These traits define the narrow interfaces between the scheduler, the
//! extraction pipeline, and the outside world (durable storage, document
//! storage, OCR, generative AI). Implementations live in `invoq-db`,
//! `invoq-inference`, and `invoq-jobs`.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{Job, JobStatus, Result, StructuredInvoiceRecord};

// =============================================================================
// JOB STORE
// =============================================================================

/// Durable store for job state.
///
/// The scheduler persists every transition through this trait. Writes are
/// upserts keyed by job id; jobs are never deleted.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or update a job by id.
    async fn save(&self, job: &Job) -> Result<()>;

    /// Load a job by id.
    async fn load(&self, id: Uuid) -> Result<Option<Job>>;

    /// List jobs in any of the given statuses, oldest first.
    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;
}

// =============================================================================
// DOCUMENT STORAGE
// =============================================================================

/// Read access to stored invoice documents.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch the raw bytes stored at `path`.
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;

    /// Backend name for logs and diagnostics.
    fn name(&self) -> &str;
}

// =============================================================================
// TEXT LAYER
// =============================================================================

/// Reads the embedded text layer of a PDF.
#[async_trait]
pub trait TextLayerReader: Send + Sync {
    /// Return the text layer of `pdf`, empty for scanned documents.
    async fn read_text_layer(&self, pdf: &[u8]) -> Result<String>;

    /// Reader name for diagnostics.
    fn name(&self) -> &str;
}

// =============================================================================
// OCR
// =============================================================================

/// Optical character recognition over a single raster image.
///
/// Implementations are blocking; callers run them on the blocking pool.
pub trait OcrEngine: Send + Sync {
    /// Recognize text in an encoded image (PNG, JPEG, TIFF, BMP).
    fn recognize_text(&self, image: &[u8], language: &str) -> Result<String>;

    /// Engine name for diagnostics.
    fn name(&self) -> &str;
}

/// Renders PDF pages to raster images for OCR.
///
/// Blocking, like [`OcrEngine`].
pub trait Rasterizer: Send + Sync {
    /// Render every page of `pdf` at `dpi`, returned as PNG bytes in page order.
    fn rasterize(&self, pdf: &[u8], dpi: u32) -> Result<Vec<Vec<u8>>>;
}

// =============================================================================
// AI STRUCTURING
// =============================================================================

/// Generative-AI backend that turns invoice text into a JSON object.
#[async_trait]
pub trait StructuringBackend: Send + Sync {
    /// Ask the model to extract invoice fields from `text` following
    /// `schema_prompt`. Returns the raw model output, which may be
    /// code-fenced or otherwise wrapped.
    async fn generate_structured(&self, text: &str, schema_prompt: &str) -> Result<String>;

    /// Model identifier for diagnostics.
    fn model_name(&self) -> &str;
}

// =============================================================================
// EXTRACTION SINK
// =============================================================================

/// Persists the outcome of a successful pipeline run.
#[async_trait]
pub trait ExtractionSink: Send + Sync {
    /// Record the structured invoice extracted by `job_id` for `invoice_id`.
    async fn save_extraction(
        &self,
        job_id: Uuid,
        invoice_id: &str,
        record: &StructuredInvoiceRecord,
        diagnostics: &JsonValue,
    ) -> Result<()>;
}
