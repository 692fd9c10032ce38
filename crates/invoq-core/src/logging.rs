//! Structured logging schema and field name constants for invoq.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query every subsystem the same way.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), job completions |
//! | DEBUG | Decision points, stage outcomes, config choices |
//! | TRACE | Per-item iteration (pages, pattern matches) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "scheduler", "worker", "pipeline", "store", "inference"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "native_text", "ocr", "gemini", "pg_job_store"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "add_job", "select_next", "execute", "run"
pub const OPERATION: &str = "op";

/// Worker loop index within the process.
pub const WORKER_ID: &str = "worker_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type tag.
pub const JOB_TYPE: &str = "job_type";

/// Invoice identifier from the job payload.
pub const INVOICE_ID: &str = "invoice_id";

/// Extraction stage name.
pub const STAGE: &str = "stage";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Attempt number of the current execution.
pub const ATTEMPT: &str = "attempt";

/// Backoff delay before the next attempt, in milliseconds.
pub const BACKOFF_MS: &str = "backoff_ms";

/// Characters of text produced by a stage.
pub const CHAR_COUNT: &str = "char_count";

/// Pages rasterized or OCRed.
pub const PAGE_COUNT: &str = "page_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Model name used for inference.
pub const MODEL: &str = "model";
