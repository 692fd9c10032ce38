//! Centralized default constants for the invoq system.
//!
//! **This module is the single source of truth** for all shared default values.
//! Config structs in the other crates read their fallbacks from here instead of
//! defining their own magic numbers.

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum retry count for failed jobs (so `JOB_MAX_RETRIES + 1` attempts).
pub const JOB_MAX_RETRIES: i32 = 3;

/// Default worker poll interval in milliseconds when the queue is empty.
pub const JOB_POLL_INTERVAL_MS: u64 = 5_000;

/// Default interval in milliseconds between store rescans for jobs admitted
/// by other processes. Zero disables rescanning.
pub const JOB_RESCAN_INTERVAL_MS: u64 = 5_000;

/// Default number of worker loops started by the worker binary.
pub const JOB_WORKERS: usize = 2;

/// Default job execution timeout in seconds (5 minutes).
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Base unit of the exponential retry backoff (`base * 2^attempts`).
pub const JOB_BACKOFF_BASE_MS: u64 = 1_000;

/// Ceiling applied to the exponential retry backoff.
pub const JOB_BACKOFF_MAX_MS: u64 = 300_000;

/// How long terminal jobs stay in the scheduler's in-memory working set.
pub const JOB_RETENTION_SECS: u64 = 3_600;

/// Broadcast channel capacity for worker events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// EXTRACTION PIPELINE
// =============================================================================

/// Trimmed text-layer length a PDF must exceed to skip OCR.
pub const NATIVE_TEXT_MIN_CHARS: usize = 50;

/// Non-whitespace characters the acquired text must exceed before structuring.
pub const MIN_MEANINGFUL_CHARS: usize = 10;

/// Rasterization resolution for OCR.
pub const OCR_DPI: u32 = 300;

/// Tesseract language hint.
pub const OCR_LANGUAGE: &str = "eng";

/// Concurrent OCR/rasterization jobs on the blocking pool.
pub const OCR_MAX_CONCURRENT: usize = 2;

/// Timeout for a single external extraction command in seconds.
pub const EXTRACTION_CMD_TIMEOUT_SECS: u64 = 60;

/// Currency assumed when the document names none.
pub const DEFAULT_CURRENCY: &str = "USD";

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Gemini API endpoint.
pub const GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default Gemini model for invoice structuring.
pub const GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Timeout for structuring requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// STORAGE
// =============================================================================

/// Default object storage bucket holding uploaded invoices.
pub const STORAGE_BUCKET: &str = "invoices";

/// Timeout for document downloads in seconds.
pub const STORAGE_TIMEOUT_SECS: u64 = 60;
