//! Invoice extraction pipeline.
//!
//! Two ordered fallback chains:
//!
//! 1. text acquisition: native PDF text layer, then OCR;
//! 2. structuring: generative AI, then regex patterns.
//!
//! Each chain stops at the first stage that produces usable output. Stage
//! failures are recorded in [`PipelineDiagnostics`] and absorbed; only
//! `UnsupportedFormat`, `NoExtractableText` and the error of a failed final
//! text stage escape [`PipelineRunner::run`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use invoq_core::defaults::{
    EXTRACTION_CMD_TIMEOUT_SECS, MIN_MEANINGFUL_CHARS, NATIVE_TEXT_MIN_CHARS, OCR_DPI,
    OCR_LANGUAGE, OCR_MAX_CONCURRENT,
};
use invoq_core::{
    DocumentFormat, Error, OcrEngine, Rasterizer, Result, StructuredInvoiceRecord,
    StructuringBackend, TextLayerReader,
};

use crate::stages::{
    AiStructuringStage, NativeTextStage, OcrPool, OcrStage, PdftoppmRasterizer, PdftotextReader,
    RegexFallbackStage, StageOutcome, StructuringStage, TesseractEngine, TextStage,
};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Pipeline thresholds and OCR settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Trimmed text-layer length a PDF must exceed to skip OCR.
    pub native_min_chars: usize,
    /// Non-whitespace characters required before structuring.
    pub min_meaningful_chars: usize,
    pub ocr_dpi: u32,
    pub ocr_language: String,
    pub ocr_max_concurrent: usize,
    /// Per-command timeout for poppler and tesseract.
    pub cmd_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            native_min_chars: NATIVE_TEXT_MIN_CHARS,
            min_meaningful_chars: MIN_MEANINGFUL_CHARS,
            ocr_dpi: OCR_DPI,
            ocr_language: OCR_LANGUAGE.to_string(),
            ocr_max_concurrent: OCR_MAX_CONCURRENT,
            cmd_timeout: Duration::from_secs(EXTRACTION_CMD_TIMEOUT_SECS),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `PIPELINE_NATIVE_MIN_CHARS` | `50` |
    /// | `PIPELINE_MIN_TEXT_CHARS` | `10` |
    /// | `OCR_DPI` | `300` |
    /// | `OCR_LANGUAGE` | `eng` |
    /// | `OCR_MAX_CONCURRENT` | `2` |
    /// | `EXTRACTION_CMD_TIMEOUT_SECS` | `60` |
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        Self {
            native_min_chars: parsed("PIPELINE_NATIVE_MIN_CHARS", NATIVE_TEXT_MIN_CHARS),
            min_meaningful_chars: parsed("PIPELINE_MIN_TEXT_CHARS", MIN_MEANINGFUL_CHARS),
            ocr_dpi: parsed("OCR_DPI", OCR_DPI),
            ocr_language: std::env::var("OCR_LANGUAGE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| OCR_LANGUAGE.to_string()),
            ocr_max_concurrent: parsed("OCR_MAX_CONCURRENT", OCR_MAX_CONCURRENT).max(1),
            cmd_timeout: Duration::from_secs(parsed(
                "EXTRACTION_CMD_TIMEOUT_SECS",
                EXTRACTION_CMD_TIMEOUT_SECS,
            )),
        }
    }
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Succeeded,
    Insufficient,
    Failed,
    Skipped,
}

/// What one stage did during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub chars: usize,
    pub duration_ms: u64,
}

/// Record of every stage that ran, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    pub format: DocumentFormat,
    pub stages: Vec<StageReport>,
    /// Stage that supplied the text.
    pub text_source: Option<String>,
    /// Stage that produced the record.
    pub structured_by: Option<String>,
    pub text_length: usize,
}

impl PipelineDiagnostics {
    fn new(format: DocumentFormat) -> Self {
        Self {
            format,
            stages: Vec::new(),
            text_source: None,
            structured_by: None,
            text_length: 0,
        }
    }

    /// Report for `stage`, if it ran.
    pub fn stage(&self, stage: &str) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Whether `stage` was invoked (anything but `skipped`).
    pub fn ran(&self, stage: &str) -> bool {
        self.stage(stage)
            .is_some_and(|r| r.status != StageStatus::Skipped)
    }

    fn push(&mut self, stage: &str, status: StageStatus, detail: Option<String>, chars: usize, started: Instant) {
        self.stages.push(StageReport {
            stage: stage.to_string(),
            status,
            detail,
            chars,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub record: StructuredInvoiceRecord,
    pub diagnostics: PipelineDiagnostics,
}

// =============================================================================
// RUNNER
// =============================================================================

fn meaningful_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Runs documents through the text and structuring chains.
///
/// Holds only configuration and shared collaborators; safe to share across
/// workers behind an `Arc`.
pub struct PipelineRunner {
    text_stages: Vec<Box<dyn TextStage>>,
    structuring_stages: Vec<Box<dyn StructuringStage>>,
    min_meaningful_chars: usize,
}

impl PipelineRunner {
    pub fn builder(config: PipelineConfig) -> PipelineRunnerBuilder {
        PipelineRunnerBuilder::new(config)
    }

    /// Extract a structured record from `data`.
    ///
    /// `extension` may be a bare extension or a file name.
    pub async fn run(&self, data: &[u8], extension: &str) -> Result<PipelineOutput> {
        let format = DocumentFormat::from_extension(extension)?;
        let mut diagnostics = PipelineDiagnostics::new(format);

        let text = self.acquire_text(data, format, &mut diagnostics).await?;
        diagnostics.text_length = text.len();

        let record = self.structure(&text, &mut diagnostics).await?;

        info!(
            stage = diagnostics.structured_by.as_deref().unwrap_or_default(),
            text_source = diagnostics.text_source.as_deref().unwrap_or_default(),
            text_length = diagnostics.text_length,
            fields = record.populated_fields(),
            "Invoice extracted"
        );
        Ok(PipelineOutput {
            record,
            diagnostics,
        })
    }

    async fn acquire_text(
        &self,
        data: &[u8],
        format: DocumentFormat,
        diagnostics: &mut PipelineDiagnostics,
    ) -> Result<String> {
        let mut last_detail = String::from("no text stage applies");
        // Error of the last stage that ran, if that stage failed outright.
        let mut last_failure: Option<Error> = None;

        for stage in &self.text_stages {
            let started = Instant::now();
            let outcome = stage.acquire(data, format).await;
            match outcome {
                StageOutcome::Produced(text) => {
                    let chars = meaningful_chars(&text);
                    if chars > self.min_meaningful_chars {
                        debug!(stage = stage.name(), chars, "Text acquired");
                        diagnostics.push(stage.name(), StageStatus::Succeeded, None, chars, started);
                        diagnostics.text_source = Some(stage.name().to_string());
                        return Ok(text);
                    }
                    last_detail = format!(
                        "{} produced {} non-whitespace chars, need more than {}",
                        stage.name(),
                        chars,
                        self.min_meaningful_chars
                    );
                    debug!(stage = stage.name(), chars, "Text too short, falling through");
                    last_failure = None;
                    diagnostics.push(
                        stage.name(),
                        StageStatus::Insufficient,
                        Some(last_detail.clone()),
                        chars,
                        started,
                    );
                }
                StageOutcome::Insufficient { detail, chars } => {
                    debug!(stage = stage.name(), chars, %detail, "Text insufficient, falling through");
                    last_detail = detail.clone();
                    last_failure = None;
                    diagnostics.push(stage.name(), StageStatus::Insufficient, Some(detail), chars, started);
                }
                StageOutcome::Failed(e) => {
                    warn!(stage = stage.name(), error = %e, "Text stage failed, falling through");
                    last_detail = format!("{} failed: {}", stage.name(), e);
                    diagnostics.push(stage.name(), StageStatus::Failed, Some(e.to_string()), 0, started);
                    last_failure = Some(e);
                }
                StageOutcome::Skipped(reason) => {
                    debug!(stage = stage.name(), %reason, "Text stage skipped");
                    diagnostics.push(stage.name(), StageStatus::Skipped, Some(reason), 0, started);
                }
            }
        }

        // Final stage failed: its own error decides retryability.
        match last_failure {
            Some(e) => Err(e),
            None => Err(Error::NoExtractableText(last_detail)),
        }
    }

    async fn structure(
        &self,
        text: &str,
        diagnostics: &mut PipelineDiagnostics,
    ) -> Result<StructuredInvoiceRecord> {
        for stage in &self.structuring_stages {
            let started = Instant::now();
            match stage.structure(text).await {
                StageOutcome::Produced(record) => {
                    let fields = record.populated_fields();
                    diagnostics.push(stage.name(), StageStatus::Succeeded, None, fields, started);
                    diagnostics.structured_by = Some(stage.name().to_string());
                    return Ok(record);
                }
                StageOutcome::Insufficient { detail, chars } => {
                    diagnostics.push(stage.name(), StageStatus::Insufficient, Some(detail), chars, started);
                }
                StageOutcome::Failed(e) => {
                    warn!(stage = stage.name(), error = %e, "Structuring stage failed, falling back");
                    diagnostics.push(stage.name(), StageStatus::Failed, Some(e.to_string()), 0, started);
                }
                StageOutcome::Skipped(reason) => {
                    debug!(stage = stage.name(), %reason, "Structuring stage skipped");
                    diagnostics.push(stage.name(), StageStatus::Skipped, Some(reason), 0, started);
                }
            }
        }

        // The chain ends with the regex stage, which always produces.
        Err(Error::Internal("no structuring stage produced a record".to_string()))
    }
}

/// Builder for [`PipelineRunner`]. Collaborators not supplied default to the
/// poppler and tesseract command-line tools; structuring defaults to regex
/// only.
pub struct PipelineRunnerBuilder {
    config: PipelineConfig,
    text_layer: Option<Arc<dyn TextLayerReader>>,
    ocr_engine: Option<Arc<dyn OcrEngine>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    structuring: Option<Arc<dyn StructuringBackend>>,
}

impl PipelineRunnerBuilder {
    fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            text_layer: None,
            ocr_engine: None,
            rasterizer: None,
            structuring: None,
        }
    }

    pub fn text_layer(mut self, reader: Arc<dyn TextLayerReader>) -> Self {
        self.text_layer = Some(reader);
        self
    }

    pub fn ocr(mut self, engine: Arc<dyn OcrEngine>, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.ocr_engine = Some(engine);
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn structuring(mut self, backend: Option<Arc<dyn StructuringBackend>>) -> Self {
        self.structuring = backend;
        self
    }

    pub fn build(self) -> PipelineRunner {
        let config = self.config;
        let cmd_timeout = config.cmd_timeout;

        let text_layer = self
            .text_layer
            .unwrap_or_else(|| Arc::new(PdftotextReader::new(cmd_timeout.as_secs())));
        let ocr_engine = self
            .ocr_engine
            .unwrap_or_else(|| Arc::new(TesseractEngine::new(cmd_timeout)));
        let rasterizer = self
            .rasterizer
            .unwrap_or_else(|| Arc::new(PdftoppmRasterizer::new(cmd_timeout * 3)));
        let pool = OcrPool::new(config.ocr_max_concurrent, cmd_timeout * 5);

        if let Some(backend) = &self.structuring {
            info!(model = backend.model_name(), "AI structuring enabled");
        } else {
            info!("AI structuring disabled, using pattern extraction only");
        }

        PipelineRunner {
            text_stages: vec![
                Box::new(NativeTextStage::new(text_layer).with_min_chars(config.native_min_chars)),
                Box::new(
                    OcrStage::new(ocr_engine, rasterizer, pool)
                        .with_dpi(config.ocr_dpi)
                        .with_language(config.ocr_language),
                ),
            ],
            structuring_stages: vec![
                Box::new(AiStructuringStage::new(self.structuring)),
                Box::new(RegexFallbackStage),
            ],
            min_meaningful_chars: config.min_meaningful_chars,
        }
    }
}
