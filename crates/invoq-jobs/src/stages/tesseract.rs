//! Tesseract OCR engine.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::debug;

use invoq_core::defaults::EXTRACTION_CMD_TIMEOUT_SECS;
use invoq_core::{Error, OcrEngine, Result};

use super::command::run_blocking_with_timeout;

/// Runs the `tesseract` CLI on one image at a time.
pub struct TesseractEngine {
    timeout: Duration,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(EXTRACTION_CMD_TIMEOUT_SECS))
    }
}

impl TesseractEngine {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize_text(&self, image: &[u8], language: &str) -> Result<String> {
        if image.is_empty() {
            return Err(Error::InvalidInput("Cannot OCR empty image".to_string()));
        }

        let mut tmpfile = NamedTempFile::new()
            .map_err(|e| Error::Internal(format!("Failed to create temp file: {}", e)))?;
        tmpfile
            .write_all(image)
            .map_err(|e| Error::Internal(format!("Failed to write temp file: {}", e)))?;

        // tesseract INPUT stdout -l LANG
        let stdout = run_blocking_with_timeout(
            std::process::Command::new("tesseract")
                .arg(tmpfile.path())
                .arg("stdout")
                .arg("-l")
                .arg(language),
            self.timeout,
        )
        .map_err(|e| Error::Ocr(format!("tesseract: {}", e)))?;

        let text = String::from_utf8_lossy(&stdout).into_owned();
        debug!(language, chars = text.len(), "OCR page recognized");
        Ok(text)
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}
