//! OCR text acquisition.
//!
//! Rasterization and recognition are blocking and CPU heavy. They run on the
//! blocking pool behind a semaphore so a burst of scanned invoices cannot
//! starve the runtime or oversubscribe the machine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use invoq_core::defaults::{EXTRACTION_CMD_TIMEOUT_SECS, OCR_DPI, OCR_LANGUAGE, OCR_MAX_CONCURRENT};
use invoq_core::{DocumentFormat, Error, OcrEngine, Rasterizer, Result};

use super::{StageOutcome, TextStage};

/// Bounded executor for blocking OCR work.
#[derive(Clone)]
pub struct OcrPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl Default for OcrPool {
    fn default() -> Self {
        Self::new(
            OCR_MAX_CONCURRENT,
            Duration::from_secs(EXTRACTION_CMD_TIMEOUT_SECS * 5),
        )
    }
}

impl OcrPool {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Run `work` on the blocking pool once a permit is free.
    ///
    /// The permit is released when the work returns, even if the caller
    /// already gave up on the timeout.
    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("OCR pool closed".to_string()))?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::Ocr(format!("OCR task panicked: {}", e))),
            Err(_) => Err(Error::Ocr(format!(
                "OCR timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// OCR stage: images are recognized directly, PDFs are rendered first.
pub struct OcrStage {
    engine: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn Rasterizer>,
    pool: OcrPool,
    dpi: u32,
    language: String,
}

impl OcrStage {
    pub fn new(engine: Arc<dyn OcrEngine>, rasterizer: Arc<dyn Rasterizer>, pool: OcrPool) -> Self {
        Self {
            engine,
            rasterizer,
            pool,
            dpi: OCR_DPI,
            language: OCR_LANGUAGE.to_string(),
        }
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    async fn recognize_image(&self, data: Vec<u8>) -> Result<String> {
        let engine = self.engine.clone();
        let language = self.language.clone();
        self.pool
            .run(move || engine.recognize_text(&data, &language))
            .await
    }

    async fn recognize_pdf(&self, data: Vec<u8>) -> Result<String> {
        let engine = self.engine.clone();
        let rasterizer = self.rasterizer.clone();
        let language = self.language.clone();
        let dpi = self.dpi;

        self.pool
            .run(move || {
                let pages = rasterizer.rasterize(&data, dpi)?;
                let mut texts = Vec::with_capacity(pages.len());
                let mut last_error = None;
                for (i, page) in pages.iter().enumerate() {
                    match engine.recognize_text(page, &language) {
                        Ok(text) => texts.push(text),
                        Err(e) => {
                            warn!(page = i + 1, error = %e, "OCR failed for page, skipping");
                            last_error = Some(e);
                        }
                    }
                }
                match last_error {
                    Some(e) if texts.is_empty() => Err(e),
                    _ => Ok(texts.join("\n\n")),
                }
            })
            .await
    }
}

#[async_trait]
impl TextStage for OcrStage {
    fn name(&self) -> &'static str {
        "ocr"
    }

    async fn acquire(&self, data: &[u8], format: DocumentFormat) -> StageOutcome<String> {
        debug!(
            engine = self.engine.name(),
            dpi = self.dpi,
            language = %self.language,
            pdf = format.is_pdf(),
            "Running OCR"
        );
        let result = match format {
            DocumentFormat::Pdf => self.recognize_pdf(data.to_vec()).await,
            DocumentFormat::Image(_) => self.recognize_image(data.to_vec()).await,
        };
        match result {
            Ok(text) => StageOutcome::Produced(text),
            Err(e) => StageOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoq_core::ImageKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoEngine;

    impl OcrEngine for EchoEngine {
        fn recognize_text(&self, image: &[u8], _language: &str) -> Result<String> {
            if image == b"bad" {
                return Err(Error::Ocr("unreadable".into()));
            }
            Ok(String::from_utf8_lossy(image).into_owned())
        }
        fn name(&self) -> &str {
            "echo"
        }
    }

    /// Splits the "PDF" on '|' into pages.
    struct SplitRasterizer {
        calls: AtomicUsize,
    }

    impl Rasterizer for SplitRasterizer {
        fn rasterize(&self, pdf: &[u8], dpi: u32) -> Result<Vec<Vec<u8>>> {
            assert_eq!(dpi, 300);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(pdf.split(|b| *b == b'|').map(<[u8]>::to_vec).collect())
        }
    }

    fn stage() -> (OcrStage, Arc<SplitRasterizer>) {
        let rasterizer = Arc::new(SplitRasterizer {
            calls: AtomicUsize::new(0),
        });
        let stage = OcrStage::new(Arc::new(EchoEngine), rasterizer.clone(), OcrPool::default());
        (stage, rasterizer)
    }

    #[tokio::test]
    async fn test_image_skips_rasterizer() {
        let (stage, rasterizer) = stage();
        let outcome = stage
            .acquire(b"Invoice 7", DocumentFormat::Image(ImageKind::Png))
            .await;
        assert!(matches!(outcome, StageOutcome::Produced(t) if t == "Invoice 7"));
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pdf_pages_joined_in_order() {
        let (stage, rasterizer) = stage();
        let outcome = stage.acquire(b"one|two|three", DocumentFormat::Pdf).await;
        assert!(matches!(outcome, StageOutcome::Produced(t) if t == "one\n\ntwo\n\nthree"));
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_page_is_skipped() {
        let (stage, _) = stage();
        let outcome = stage.acquire(b"one|bad|three", DocumentFormat::Pdf).await;
        assert!(matches!(outcome, StageOutcome::Produced(t) if t == "one\n\nthree"));
    }

    #[tokio::test]
    async fn test_all_pages_failing_fails_stage() {
        let (stage, _) = stage();
        let outcome = stage.acquire(b"bad", DocumentFormat::Pdf).await;
        assert!(matches!(outcome, StageOutcome::Failed(Error::Ocr(_))));
    }

    #[tokio::test]
    async fn test_pool_times_out() {
        let pool = OcrPool::new(1, Duration::from_millis(20));
        let result = pool
            .run(|| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_pool_permit_released() {
        let pool = OcrPool::new(2, Duration::from_secs(5));
        let value = pool.run(|| Ok(42)).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available_permits(), 2);
    }
}
