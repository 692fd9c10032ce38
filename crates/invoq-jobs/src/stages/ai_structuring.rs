//! Generative-AI structuring stage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use invoq_core::{Error, Result, StructuredInvoiceRecord, StructuringBackend};

use super::{StageOutcome, StructuringStage};

/// Instructions sent with every structuring request. The invoice text is
/// appended by the backend.
pub const SCHEMA_PROMPT: &str = r#"You are an expert invoice data extraction assistant. Extract the following information from the invoice text.
Return your response as a valid JSON object with these exact fields (use null for missing values):

{
  "vendor_name": "Company or person issuing the invoice",
  "invoice_number": "Invoice number or ID",
  "invoice_date": "Invoice date in YYYY-MM-DD format",
  "due_date": "Payment due date in YYYY-MM-DD format",
  "total_amount": "Total amount as a number (no currency symbols)",
  "subtotal": "Subtotal before tax as a number",
  "tax_amount": "Tax/VAT amount as a number",
  "vat_amount": "VAT amount as a number (same as tax_amount if VAT is mentioned)",
  "currency": "Currency code (USD, EUR, GBP, AED, SAR, etc.)",
  "customer_name": "Customer/buyer name",
  "customer_address": "Customer address",
  "vendor_address": "Vendor/seller address",
  "payment_terms": "Payment terms (e.g., 'Net 30', 'Due on receipt')",
  "payment_method": "Payment method if mentioned",
  "po_number": "Purchase order number if present",
  "vat_number": "VAT registration number",
  "trn": "Tax Registration Number (TRN) for UAE invoices",
  "notes": "Any notes or special instructions",
  "line_items": [
    {
      "description": "Item description",
      "quantity": "Quantity as number",
      "unit_price": "Unit price as number",
      "amount": "Line total as number"
    }
  ]
}

Return ONLY the JSON object, no other text."#;

/// Parse a model response into a record.
///
/// Models wrap JSON in code fences or chatter around it, so the outermost
/// `{ ... }` span is taken. A response that parses but carries no fields at
/// all is rejected.
pub fn parse_structured_response(raw: &str) -> Result<StructuredInvoiceRecord> {
    let body = strip_code_fence(raw.trim());
    let start = body.find('{');
    let end = body.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &body[s..=e],
        _ => {
            return Err(Error::Serialization(
                "model response contains no JSON object".to_string(),
            ))
        }
    };

    let record: StructuredInvoiceRecord = serde_json::from_str(json)?;
    if record.is_empty() {
        return Err(Error::Serialization(
            "model response has no invoice fields".to_string(),
        ));
    }
    Ok(record)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.rsplit_once("```").map_or(rest, |(inner, _)| inner).trim()
}

/// Structures text with a [`StructuringBackend`]. Without a backend the stage
/// reports `skipped` and the chain moves on.
pub struct AiStructuringStage {
    backend: Option<Arc<dyn StructuringBackend>>,
}

impl AiStructuringStage {
    pub fn new(backend: Option<Arc<dyn StructuringBackend>>) -> Self {
        Self { backend }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }
}

#[async_trait]
impl StructuringStage for AiStructuringStage {
    fn name(&self) -> &'static str {
        "ai_structuring"
    }

    async fn structure(&self, text: &str) -> StageOutcome<StructuredInvoiceRecord> {
        let Some(backend) = &self.backend else {
            return StageOutcome::Skipped("no structuring backend configured".to_string());
        };

        let raw = match backend.generate_structured(text, SCHEMA_PROMPT).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(model = backend.model_name(), error = %e, "Structuring request failed");
                return StageOutcome::Failed(e);
            }
        };

        match parse_structured_response(&raw) {
            Ok(record) => {
                debug!(
                    model = backend.model_name(),
                    fields = record.populated_fields(),
                    line_items = record.line_items.len(),
                    "Structured invoice with model"
                );
                StageOutcome::Produced(record)
            }
            Err(e) => {
                warn!(
                    model = backend.model_name(),
                    error = %e,
                    response_len = raw.len(),
                    "Unparseable structuring response"
                );
                StageOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let record =
            parse_structured_response(r#"{"invoice_number": "A-17", "total_amount": 99.5}"#)
                .unwrap();
        assert_eq!(record.invoice_number.as_deref(), Some("A-17"));
        assert_eq!(record.total_amount, Some(99.5));
    }

    #[test]
    fn test_fenced_json() {
        let raw = "```json\n{\"vendor_name\": \"Acme\", \"currency\": \"EUR\"}\n```";
        let record = parse_structured_response(raw).unwrap();
        assert_eq!(record.vendor_name.as_deref(), Some("Acme"));
        assert_eq!(record.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_chatter_around_json() {
        let raw = "Sure! Here is the data:\n{\"invoice_number\": 1001}\nLet me know.";
        let record = parse_structured_response(raw).unwrap();
        assert_eq!(record.invoice_number.as_deref(), Some("1001"));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(parse_structured_response("{\"invoice_number\": ").is_err());
        assert!(parse_structured_response("I could not read this invoice.").is_err());
    }

    #[test]
    fn test_all_null_record_rejected() {
        let err = parse_structured_response(r#"{"vendor_name": null, "line_items": []}"#)
            .unwrap_err();
        assert!(err.to_string().contains("no invoice fields"));
    }

    #[test]
    fn test_prompt_demands_json_only() {
        assert!(SCHEMA_PROMPT.ends_with("Return ONLY the JSON object, no other text."));
        assert!(SCHEMA_PROMPT.contains("\"line_items\""));
    }

    #[tokio::test]
    async fn test_stage_skipped_without_backend() {
        let stage = AiStructuringStage::new(None);
        assert!(!stage.is_enabled());
        assert!(matches!(
            stage.structure("Invoice #1").await,
            StageOutcome::Skipped(_)
        ));
    }
}
