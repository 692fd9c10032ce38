//! Native PDF text layer stage.

use std::sync::Arc;

use async_trait::async_trait;

use invoq_core::defaults::NATIVE_TEXT_MIN_CHARS;
use invoq_core::{DocumentFormat, TextLayerReader};

use super::{StageOutcome, TextStage};

/// Uses the PDF's own text layer when it has enough content. Scanned PDFs
/// come back nearly empty and fall through to OCR.
pub struct NativeTextStage {
    reader: Arc<dyn TextLayerReader>,
    min_chars: usize,
}

impl NativeTextStage {
    pub fn new(reader: Arc<dyn TextLayerReader>) -> Self {
        Self {
            reader,
            min_chars: NATIVE_TEXT_MIN_CHARS,
        }
    }

    /// Trimmed length the text layer must exceed.
    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }
}

#[async_trait]
impl TextStage for NativeTextStage {
    fn name(&self) -> &'static str {
        "native_text"
    }

    async fn acquire(&self, data: &[u8], format: DocumentFormat) -> StageOutcome<String> {
        if !format.is_pdf() {
            return StageOutcome::Skipped("images have no text layer".to_string());
        }

        match self.reader.read_text_layer(data).await {
            Ok(text) => {
                let chars = text.trim().chars().count();
                if chars > self.min_chars {
                    StageOutcome::Produced(text)
                } else {
                    StageOutcome::Insufficient {
                        detail: format!(
                            "{} text layer has {} chars, need more than {}",
                            self.reader.name(),
                            chars,
                            self.min_chars
                        ),
                        chars,
                    }
                }
            }
            Err(e) => StageOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoq_core::{Error, ImageKind, Result};

    struct FixedReader(&'static str);

    #[async_trait]
    impl TextLayerReader for FixedReader {
        async fn read_text_layer(&self, _pdf: &[u8]) -> Result<String> {
            if self.0 == "!" {
                return Err(Error::Internal("pdftotext missing".into()));
            }
            Ok(self.0.to_string())
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn stage(text: &'static str) -> NativeTextStage {
        NativeTextStage::new(Arc::new(FixedReader(text)))
    }

    #[tokio::test]
    async fn test_long_text_layer_is_used() {
        let text = "Invoice #1001 from Acme Corporation, 42 Long Street. Total: $250.00";
        let outcome = stage(text).acquire(b"%PDF", DocumentFormat::Pdf).await;
        assert!(matches!(outcome, StageOutcome::Produced(t) if t == text));
    }

    #[tokio::test]
    async fn test_short_text_layer_is_insufficient() {
        let outcome = stage("   Page 1   ").acquire(b"%PDF", DocumentFormat::Pdf).await;
        assert!(matches!(outcome, StageOutcome::Insufficient { chars: 6, .. }));
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        let exactly_fifty = "x".repeat(50);
        let leaked: &'static str = Box::leak(exactly_fifty.into_boxed_str());
        let outcome = stage(leaked).acquire(b"%PDF", DocumentFormat::Pdf).await;
        assert!(matches!(outcome, StageOutcome::Insufficient { chars: 50, .. }));
    }

    #[tokio::test]
    async fn test_images_are_skipped() {
        let outcome = stage("ignored")
            .acquire(b"..", DocumentFormat::Image(ImageKind::Jpeg))
            .await;
        assert!(matches!(outcome, StageOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_reader_error_fails_stage() {
        let outcome = stage("!").acquire(b"%PDF", DocumentFormat::Pdf).await;
        assert!(matches!(outcome, StageOutcome::Failed(_)));
    }
}
