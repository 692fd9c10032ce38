//! Extraction pipeline behaviour with deterministic collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use invoq_inference::mock::MockStructuringBackend;
use invoq_jobs::stages::SCHEMA_PROMPT;
use invoq_jobs::{
    Error, OcrEngine, PipelineConfig, PipelineRunner, Rasterizer, Result, StageStatus,
    StructuringBackend, TextLayerReader,
};

// =============================================================================
// FAKES
// =============================================================================

#[derive(Default)]
struct FakeTextLayer {
    text: String,
    calls: AtomicUsize,
}

#[async_trait]
impl TextLayerReader for FakeTextLayer {
    async fn read_text_layer(&self, _pdf: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }

    fn name(&self) -> &str {
        "fake-text-layer"
    }
}

struct FailingTextLayer;

#[async_trait]
impl TextLayerReader for FailingTextLayer {
    async fn read_text_layer(&self, _pdf: &[u8]) -> Result<String> {
        Err(Error::Internal("pdftotext exited with 1".to_string()))
    }

    fn name(&self) -> &str {
        "failing-text-layer"
    }
}

/// Returns `text` for every image, or fails when `text` is `None`.
struct FakeOcr {
    text: Option<String>,
    calls: AtomicUsize,
}

impl OcrEngine for FakeOcr {
    fn recognize_text(&self, _image: &[u8], _language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.text
            .clone()
            .ok_or_else(|| Error::Ocr("engine crashed".to_string()))
    }

    fn name(&self) -> &str {
        "fake-ocr"
    }
}

struct OnePage;

impl Rasterizer for OnePage {
    fn rasterize(&self, _pdf: &[u8], _dpi: u32) -> Result<Vec<Vec<u8>>> {
        Ok(vec![b"page-1".to_vec()])
    }
}

struct Fixture {
    text_layer: Arc<FakeTextLayer>,
    ocr: Arc<FakeOcr>,
    runner: PipelineRunner,
}

fn fixture(
    text_layer: &str,
    ocr: Option<&str>,
    ai: Option<Arc<dyn StructuringBackend>>,
) -> Fixture {
    let text_layer = Arc::new(FakeTextLayer {
        text: text_layer.to_string(),
        ..Default::default()
    });
    let ocr = Arc::new(FakeOcr {
        text: ocr.map(String::from),
        calls: AtomicUsize::new(0),
    });
    let runner = PipelineRunner::builder(PipelineConfig::default())
        .text_layer(text_layer.clone())
        .ocr(ocr.clone(), Arc::new(OnePage))
        .structuring(ai)
        .build();
    Fixture {
        text_layer,
        ocr,
        runner,
    }
}

const NATIVE_TEXT: &str = "ACME Supplies Ltd\nInvoice Number: INV-2024-0042\nInvoice Date: 15/03/2024\nDue Date: 14/04/2024\nSubtotal: 1,000.00\nVAT: 50.00\nGrand Total: €1,050.00";

fn statuses(output: &invoq_jobs::PipelineOutput) -> Vec<(String, StageStatus)> {
    output
        .diagnostics
        .stages
        .iter()
        .map(|r| (r.stage.clone(), r.status))
        .collect()
}

// =============================================================================
// TEXT ACQUISITION
// =============================================================================

#[tokio::test]
async fn test_native_text_pdf_never_invokes_ocr() {
    let f = fixture(NATIVE_TEXT, Some("should not be used"), None);
    let output = f.runner.run(b"%PDF-1.7", "invoice.pdf").await.unwrap();

    assert_eq!(f.ocr.calls.load(Ordering::SeqCst), 0);
    assert!(!output.diagnostics.ran("ocr"));
    assert_eq!(output.diagnostics.text_source.as_deref(), Some("native_text"));

    let record = output.record;
    assert_eq!(record.invoice_number.as_deref(), Some("INV-2024-0042"));
    assert_eq!(record.invoice_date.as_deref(), Some("15/03/2024"));
    assert_eq!(record.due_date.as_deref(), Some("14/04/2024"));
    assert_eq!(record.total_amount, Some(1050.0));
    assert_eq!(record.subtotal, Some(1000.0));
    assert_eq!(record.tax_amount, Some(50.0));
    assert_eq!(record.currency.as_deref(), Some("EUR"));
}

#[tokio::test]
async fn test_scanned_pdf_falls_back_to_ocr_then_regex() {
    let f = fixture("", Some("Invoice #1001 Total: $250.00"), None);
    let output = f.runner.run(b"%PDF-1.4", "pdf").await.unwrap();

    assert_eq!(output.record.invoice_number.as_deref(), Some("1001"));
    assert_eq!(output.record.total_amount, Some(250.0));
    assert_eq!(output.record.currency.as_deref(), Some("USD"));

    assert_eq!(
        statuses(&output),
        vec![
            ("native_text".to_string(), StageStatus::Insufficient),
            ("ocr".to_string(), StageStatus::Succeeded),
            ("ai_structuring".to_string(), StageStatus::Skipped),
            ("regex_fallback".to_string(), StageStatus::Succeeded),
        ]
    );
    assert_eq!(output.diagnostics.text_source.as_deref(), Some("ocr"));
    assert_eq!(
        output.diagnostics.structured_by.as_deref(),
        Some("regex_fallback")
    );
    assert_eq!(f.ocr.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_images_go_straight_to_ocr() {
    let f = fixture(NATIVE_TEXT, Some("Invoice #77 Amount Due: £12.50"), None);
    let output = f.runner.run(b"\x89PNG", "scan.PNG").await.unwrap();

    assert_eq!(f.text_layer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        output.diagnostics.stage("native_text").map(|r| r.status),
        Some(StageStatus::Skipped)
    );
    assert_eq!(output.record.invoice_number.as_deref(), Some("77"));
    assert_eq!(output.record.total_amount, Some(12.5));
    assert_eq!(output.record.currency.as_deref(), Some("GBP"));
}

#[tokio::test]
async fn test_unsupported_format() {
    let f = fixture(NATIVE_TEXT, Some("text"), None);
    let err = f.runner.run(b"PK\x03\x04", "invoice.docx").await.unwrap_err();

    assert!(matches!(err, Error::UnsupportedFormat(ref ext) if ext == ".docx"));
    assert!(err.is_permanent());
    assert_eq!(f.text_layer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.ocr.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_too_little_text_fails_without_structuring() {
    let ai = MockStructuringBackend::new();
    let f = fixture("", Some("  a b  c \n"), Some(Arc::new(ai.clone())));
    let err = f.runner.run(b"%PDF", "x.pdf").await.unwrap_err();

    assert!(matches!(err, Error::NoExtractableText(_)));
    assert!(err.is_permanent());
    assert_eq!(ai.call_count(), 0);
}

#[tokio::test]
async fn test_ocr_crash_after_empty_text_layer_is_retryable() {
    let f = fixture("", None, None);
    let err = f.runner.run(b"%PDF", "x.pdf").await.unwrap_err();

    assert!(matches!(err, Error::Ocr(ref msg) if msg.contains("engine crashed")), "{err}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_ocr_crash_on_image_is_retryable() {
    let f = fixture("", None, None);
    let err = f.runner.run(b"\x89PNG", "scan.png").await.unwrap_err();

    assert!(matches!(err, Error::Ocr(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_short_ocr_after_failed_text_layer_is_permanent() {
    let text_layer = Arc::new(FailingTextLayer);
    let runner = PipelineRunner::builder(PipelineConfig::default())
        .text_layer(text_layer)
        .ocr(
            Arc::new(FakeOcr {
                text: Some("x y".to_string()),
                calls: AtomicUsize::new(0),
            }),
            Arc::new(OnePage),
        )
        .build();
    let err = runner.run(b"%PDF", "x.pdf").await.unwrap_err();

    assert!(matches!(err, Error::NoExtractableText(_)));
    assert!(err.is_permanent());
}

// =============================================================================
// STRUCTURING
// =============================================================================

#[tokio::test]
async fn test_ai_record_is_used_when_valid() {
    let ai = MockStructuringBackend::new().with_fixed_response(
        "```json\n{\"vendor_name\": \"ACME Supplies Ltd\", \"invoice_number\": \"INV-2024-0042\", \"total_amount\": \"1,050.00\", \"currency\": \"EUR\", \"line_items\": [{\"description\": \"Paper\", \"quantity\": 10, \"unit_price\": 100, \"amount\": 1000}]}\n```",
    );
    let f = fixture(NATIVE_TEXT, None, Some(Arc::new(ai.clone())));
    let output = f.runner.run(b"%PDF", "a.pdf").await.unwrap();

    assert_eq!(
        output.diagnostics.structured_by.as_deref(),
        Some("ai_structuring")
    );
    assert!(!output.diagnostics.ran("regex_fallback"));
    assert_eq!(output.record.vendor_name.as_deref(), Some("ACME Supplies Ltd"));
    assert_eq!(output.record.total_amount, Some(1050.0));
    assert_eq!(output.record.line_items.len(), 1);
    assert_eq!(output.record.line_items[0].quantity, Some(10.0));

    let calls = ai.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].text, NATIVE_TEXT);
    assert_eq!(calls[0].schema_prompt, SCHEMA_PROMPT);
}

#[tokio::test]
async fn test_malformed_ai_output_falls_back_to_regex() {
    let ai = MockStructuringBackend::new().with_fixed_response("Sorry, I can't help with that.");
    let f = fixture("", Some("Invoice #1001 Total: $250.00"), Some(Arc::new(ai.clone())));
    let output = f.runner.run(b"%PDF", "a.pdf").await.unwrap();

    assert_eq!(ai.call_count(), 1);
    assert_eq!(
        output.diagnostics.stage("ai_structuring").map(|r| r.status),
        Some(StageStatus::Failed)
    );
    assert_eq!(
        output.diagnostics.structured_by.as_deref(),
        Some("regex_fallback")
    );
    assert_eq!(output.record.invoice_number.as_deref(), Some("1001"));
}

#[tokio::test]
async fn test_empty_ai_object_falls_back_to_regex() {
    let ai = MockStructuringBackend::new();
    let f = fixture("", Some("Invoice #1001 Total: $250.00"), Some(Arc::new(ai)));
    let output = f.runner.run(b"%PDF", "a.pdf").await.unwrap();
    assert_eq!(
        output.diagnostics.structured_by.as_deref(),
        Some("regex_fallback")
    );
}

#[tokio::test]
async fn test_provider_error_falls_back_to_regex() {
    let ai = MockStructuringBackend::new().with_failure("503 Service Unavailable");
    let f = fixture("", Some("Invoice #1001 Total: $250.00"), Some(Arc::new(ai)));
    let output = f.runner.run(b"%PDF", "a.pdf").await.unwrap();

    let report = output.diagnostics.stage("ai_structuring").unwrap();
    assert_eq!(report.status, StageStatus::Failed);
    assert!(report.detail.as_deref().unwrap().contains("503"));
    assert_eq!(output.record.total_amount, Some(250.0));
}

// =============================================================================
// DETERMINISM
// =============================================================================

#[tokio::test]
async fn test_run_is_idempotent() {
    let f = fixture("", Some("Invoice #1001 Total: $250.00"), None);
    let first = f.runner.run(b"%PDF", "a.pdf").await.unwrap();
    let second = f.runner.run(b"%PDF", "a.pdf").await.unwrap();

    assert_eq!(first.record, second.record);
    assert_eq!(statuses(&first), statuses(&second));
    assert_eq!(first.diagnostics.text_length, second.diagnostics.text_length);
}

#[tokio::test]
async fn test_diagnostics_serialize() {
    let f = fixture("", Some("Invoice #1001 Total: $250.00"), None);
    let output = f.runner.run(b"%PDF", "a.pdf").await.unwrap();
    let json = serde_json::to_value(&output.diagnostics).unwrap();

    assert_eq!(json["format"]["kind"], "pdf");
    assert_eq!(json["stages"][0]["stage"], "native_text");
    assert_eq!(json["stages"][0]["status"], "insufficient");
    assert_eq!(json["structured_by"], "regex_fallback");
}
