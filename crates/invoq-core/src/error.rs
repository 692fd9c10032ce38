//! Error types for invoq.

use thiserror::Error;

/// Result type alias using invoq's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for invoq operations.
///
/// Variants fall into three families:
/// - scheduling errors (`JobNotFound`, `HandlerNotRegistered`,
///   `SchedulerNotRunning`, `InvalidPayload`) surface synchronously to the
///   admission caller and are never retried;
/// - permanent extraction failures (`UnsupportedFormat`, `NoExtractableText`)
///   are not worth retrying;
/// - everything else is treated as transient and retried at the job level.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unknown job id on lookup
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// No handler registered for the job type at admission time
    #[error("No handler registered for job type: {0}")]
    HandlerNotRegistered(String),

    /// Operation attempted after scheduler shutdown
    #[error("Scheduler is not running")]
    SchedulerNotRunning,

    /// Job payload rejected at admission time
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Document is neither a PDF nor a supported raster image
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Neither the text layer nor OCR produced meaningful content
    #[error("No extractable text: {0}")]
    NoExtractableText(String),

    /// OCR or rasterization failed
    #[error("OCR error: {0}")]
    Ocr(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Document storage read failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is a permanent extraction failure that no retry can fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFormat(_) | Error::NoExtractableText(_) | Error::InvalidInput(_)
        )
    }

    /// Whether this is a scheduling error reported to the admission caller.
    pub fn is_scheduling(&self) -> bool {
        matches!(
            self,
            Error::JobNotFound(_)
                | Error::HandlerNotRegistered(_)
                | Error::SchedulerNotRunning
                | Error::InvalidPayload(_)
        )
    }

    /// Whether a job that hit this error should go back through the retry
    /// state machine.
    pub fn is_retryable(&self) -> bool {
        !self.is_permanent() && !self.is_scheduling() && !matches!(self, Error::Config(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
