//! Extraction pipeline stages.
//!
//! Text acquisition and structuring are two ordered chains. Each stage reports
//! a [`StageOutcome`]; the runner in [`crate::pipeline`] decides whether to
//! stop or fall through to the next stage.

pub mod ai_structuring;
pub mod command;
pub mod native_text;
pub mod ocr;
pub mod poppler;
pub mod regex_fallback;
pub mod tesseract;

use async_trait::async_trait;

use invoq_core::{DocumentFormat, Error, StructuredInvoiceRecord};

pub use ai_structuring::{parse_structured_response, AiStructuringStage, SCHEMA_PROMPT};
pub use native_text::NativeTextStage;
pub use ocr::{OcrPool, OcrStage};
pub use poppler::{PdftoppmRasterizer, PdftotextReader};
pub use regex_fallback::RegexFallbackStage;
pub use tesseract::TesseractEngine;

/// What a single stage produced.
#[derive(Debug)]
pub enum StageOutcome<T> {
    /// The stage produced output the next step can use.
    Produced(T),
    /// The stage ran but its output is too thin to use.
    Insufficient { detail: String, chars: usize },
    /// The stage errored.
    Failed(Error),
    /// The stage does not apply to this input.
    Skipped(String),
}

/// A text acquisition stage.
#[async_trait]
pub trait TextStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn acquire(&self, data: &[u8], format: DocumentFormat) -> StageOutcome<String>;
}

/// A structuring stage.
#[async_trait]
pub trait StructuringStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn structure(&self, text: &str) -> StageOutcome<StructuredInvoiceRecord>;
}
