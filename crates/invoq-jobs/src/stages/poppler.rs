//! Poppler-utils adapters: `pdftotext` for the text layer, `pdftoppm` for
//! page rendering.

use std::fs;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::{NamedTempFile, TempDir};
use tokio::process::Command;
use tracing::debug;

use invoq_core::defaults::EXTRACTION_CMD_TIMEOUT_SECS;
use invoq_core::{Error, Rasterizer, Result, TextLayerReader};

use super::command::{run_blocking_with_timeout, run_cmd_with_timeout};

fn check_pdf_header(data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(Error::InvalidInput("Cannot read empty PDF data".to_string()));
    }
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidInput(
            "Document is not a valid PDF (missing %PDF header)".to_string(),
        ));
    }
    Ok(())
}

fn write_temp_pdf(data: &[u8]) -> Result<NamedTempFile> {
    let mut tmpfile = NamedTempFile::new()
        .map_err(|e| Error::Internal(format!("Failed to create temp file: {}", e)))?;
    tmpfile
        .write_all(data)
        .map_err(|e| Error::Internal(format!("Failed to write temp file: {}", e)))?;
    Ok(tmpfile)
}

/// Reads the embedded text layer with `pdftotext -layout`.
pub struct PdftotextReader {
    timeout_secs: u64,
}

impl Default for PdftotextReader {
    fn default() -> Self {
        Self::new(EXTRACTION_CMD_TIMEOUT_SECS)
    }
}

impl PdftotextReader {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

#[async_trait]
impl TextLayerReader for PdftotextReader {
    async fn read_text_layer(&self, pdf: &[u8]) -> Result<String> {
        check_pdf_header(pdf)?;
        let tmpfile = write_temp_pdf(pdf)?;
        let pdf_path = tmpfile.path().to_string_lossy().to_string();

        // "-" writes to stdout
        let text = run_cmd_with_timeout(
            Command::new("pdftotext")
                .arg("-layout")
                .arg("-enc")
                .arg("UTF-8")
                .arg(&pdf_path)
                .arg("-"),
            self.timeout_secs,
        )
        .await?;

        debug!(chars = text.len(), "Read PDF text layer");
        Ok(text)
    }

    fn name(&self) -> &str {
        "pdftotext"
    }
}

/// Renders PDF pages to PNG with `pdftoppm`.
pub struct PdftoppmRasterizer {
    timeout: Duration,
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        // Rendering a long document takes a while
        Self::new(Duration::from_secs(EXTRACTION_CMD_TIMEOUT_SECS * 3))
    }
}

impl PdftoppmRasterizer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Rasterizer for PdftoppmRasterizer {
    fn rasterize(&self, pdf: &[u8], dpi: u32) -> Result<Vec<Vec<u8>>> {
        check_pdf_header(pdf)?;
        let tmpfile = write_temp_pdf(pdf)?;

        let img_dir = TempDir::new()
            .map_err(|e| Error::Internal(format!("Failed to create temp dir: {}", e)))?;
        let img_prefix = img_dir.path().join("page");

        run_blocking_with_timeout(
            std::process::Command::new("pdftoppm")
                .arg("-png")
                .arg("-r")
                .arg(dpi.to_string())
                .arg(tmpfile.path())
                .arg(&img_prefix),
            self.timeout,
        )
        .map_err(|e| Error::Ocr(format!("pdftoppm: {}", e)))?;

        // pdftoppm zero-pads page numbers, so name order is page order
        let mut pages = Vec::new();
        for entry in fs::read_dir(img_dir.path())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("png") {
                pages.push(path);
            }
        }
        pages.sort();

        debug!(dpi, pages = pages.len(), "Rendered PDF pages");
        pages
            .iter()
            .map(|p| fs::read(p).map_err(Error::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_layer_rejects_non_pdf() {
        let reader = PdftotextReader::default();
        let err = reader.read_text_layer(b"PK\x03\x04").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.to_string().contains("%PDF"));
    }

    #[tokio::test]
    async fn test_text_layer_rejects_empty() {
        let reader = PdftotextReader::default();
        assert!(reader.read_text_layer(b"").await.is_err());
    }

    #[test]
    fn test_rasterize_rejects_non_pdf() {
        let rasterizer = PdftoppmRasterizer::default();
        let err = rasterizer.rasterize(b"\x89PNG", 300).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_reader_name() {
        assert_eq!(PdftotextReader::default().name(), "pdftotext");
    }
}
