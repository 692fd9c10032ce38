//! Pattern-based structuring. The last stage in the chain; always produces a
//! record, possibly with most fields empty.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use invoq_core::defaults::DEFAULT_CURRENCY;
use invoq_core::StructuredInvoiceRecord;

use super::{StageOutcome, StructuringStage};

fn compile<S: AsRef<str>>(patterns: &[S]) -> Vec<Regex> {
    patterns.iter().map(|p| compile_one(p.as_ref())).collect()
}

fn compile_one(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {pattern}: {e}"))
}

// Captures must contain a digit so "Invoice Date" never yields "Date".
static INVOICE_NUMBER: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\bInvoice\s*(?:Number|No\.?)\s*:?\s*#?\s*([A-Z0-9-]*\d[A-Z0-9-]*)",
        r"(?i)\bInvoice\s*#?\s*:?\s*([A-Z0-9-]*\d[A-Z0-9-]*)",
        r"(?i)\bINV[-\s]*([A-Z0-9-]*\d[A-Z0-9-]*)",
    ])
});

const DATE: &str = r"(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})";

static INVOICE_DATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        format!(r"(?i)\bInvoice\s*Date\s*:?\s*{DATE}"),
        format!(r"(?i)\b(Due\s*)?Date\s*:?\s*{DATE}"),
        DATE.to_string(),
    ])
});

static DUE_DATE: Lazy<Regex> =
    Lazy::new(|| compile_one(&format!(r"(?i)\bDue\s*Date\s*:?\s*{DATE}")));

const AMOUNT: &str = r"\s*:?\s*[$€£]?\s*([\d,]+\.?\d*)";

static TOTAL_AMOUNT: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        format!(r"(?i)\bGrand\s*Total{AMOUNT}"),
        format!(r"(?i)\bTotal\s*Due{AMOUNT}"),
        format!(r"(?i)\bAmount\s*Due{AMOUNT}"),
        format!(r"(?i)\bTotal{AMOUNT}"),
    ])
});

static SUBTOTAL: Lazy<Regex> =
    Lazy::new(|| compile_one(&format!(r"(?i)\bSub\s*-?\s*total{AMOUNT}")));

static TAX_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    compile_one(&format!(
        r"(?i)\b(?:Tax|VAT)(?:\s*\(\s*[\d.]+\s*%\s*\))?{AMOUNT}"
    ))
});

static CURRENCY_CODE: Lazy<Regex> =
    Lazy::new(|| compile_one(r"\b(USD|EUR|GBP|AED|SAR|INR|CAD|AUD|JPY|CHF)\b"));

const CURRENCY_SYMBOLS: &[(char, &str)] = &[
    ('$', "USD"),
    ('€', "EUR"),
    ('£', "GBP"),
    ('¥', "JPY"),
    ('₹', "INR"),
];

/// First pattern that matches wins. An unparseable amount stops the search.
fn first_amount(patterns: &[Regex], text: &str) -> Option<f64> {
    patterns
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| parse_amount(&caps[1]))
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

fn invoice_number(text: &str) -> Option<String> {
    INVOICE_NUMBER
        .iter()
        .find_map(|re| re.captures(text))
        .map(|caps| caps[1].to_string())
}

fn invoice_date(text: &str) -> Option<String> {
    let [labelled, dated, bare] = INVOICE_DATE.as_slice() else {
        return None;
    };
    if let Some(caps) = labelled.captures(text) {
        return Some(caps[1].to_string());
    }
    // "Date:" but not "Due Date:"
    if let Some(caps) = dated
        .captures_iter(text)
        .find(|caps| caps.get(1).is_none())
    {
        return Some(caps[2].to_string());
    }
    bare.captures(text).map(|caps| caps[1].to_string())
}

fn currency(text: &str) -> String {
    if let Some(caps) = CURRENCY_CODE.captures(text) {
        return caps[1].to_string();
    }
    text.chars()
        .find_map(|c| {
            CURRENCY_SYMBOLS
                .iter()
                .find(|(symbol, _)| *symbol == c)
                .map(|(_, code)| (*code).to_string())
        })
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
}

/// Extract what the patterns can find.
pub fn extract_with_patterns(text: &str) -> StructuredInvoiceRecord {
    StructuredInvoiceRecord {
        invoice_number: invoice_number(text),
        invoice_date: invoice_date(text),
        due_date: DUE_DATE.captures(text).map(|caps| caps[1].to_string()),
        subtotal: SUBTOTAL.captures(text).and_then(|caps| parse_amount(&caps[1])),
        tax_amount: TAX_AMOUNT.captures(text).and_then(|caps| parse_amount(&caps[1])),
        total_amount: first_amount(&TOTAL_AMOUNT, text),
        currency: Some(currency(text)),
        ..Default::default()
    }
}

/// Regex structuring stage.
#[derive(Default)]
pub struct RegexFallbackStage;

#[async_trait]
impl StructuringStage for RegexFallbackStage {
    fn name(&self) -> &'static str {
        "regex_fallback"
    }

    async fn structure(&self, text: &str) -> StageOutcome<StructuredInvoiceRecord> {
        let record = extract_with_patterns(text);
        debug!(fields = record.populated_fields(), "Extracted invoice fields with patterns");
        StageOutcome::Produced(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_invoice() {
        let record = extract_with_patterns("Invoice #1001 Total: $250.00");
        assert_eq!(record.invoice_number.as_deref(), Some("1001"));
        assert_eq!(record.total_amount, Some(250.0));
        assert_eq!(record.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_invoice_number_variants() {
        assert_eq!(invoice_number("Invoice Number: AB-2024-17").as_deref(), Some("AB-2024-17"));
        assert_eq!(invoice_number("invoice no. 5531").as_deref(), Some("5531"));
        assert_eq!(invoice_number("Ref INV-0042 attached").as_deref(), Some("0042"));
        assert_eq!(invoice_number("Invoice Date: 01/02/2024 INV 77").as_deref(), Some("77"));
        assert_eq!(invoice_number("Thanks for your business"), None);
    }

    #[test]
    fn test_invoice_date_prefers_label() {
        let text = "Due Date: 31/01/2024\nDate: 01/01/2024\nInvoice Date: 02/01/2024";
        assert_eq!(invoice_date(text).as_deref(), Some("02/01/2024"));
    }

    #[test]
    fn test_invoice_date_ignores_due_date() {
        let text = "Due Date: 31/01/2024\nDate: 01/01/2024";
        assert_eq!(invoice_date(text).as_deref(), Some("01/01/2024"));
        assert_eq!(
            DUE_DATE.captures(text).map(|c| c[1].to_string()).as_deref(),
            Some("31/01/2024")
        );
    }

    #[test]
    fn test_invoice_date_bare() {
        assert_eq!(invoice_date("Issued 5-6-24 by Acme").as_deref(), Some("5-6-24"));
        assert_eq!(invoice_date("no dates here"), None);
    }

    #[test]
    fn test_total_prefers_grand_total() {
        let text = "Subtotal: 1,000.00\nTax (5%): 50.00\nGrand Total: 1,050.00";
        let record = extract_with_patterns(text);
        assert_eq!(record.total_amount, Some(1050.0));
        assert_eq!(record.subtotal, Some(1000.0));
        assert_eq!(record.tax_amount, Some(50.0));
    }

    #[test]
    fn test_subtotal_does_not_count_as_total() {
        let record = extract_with_patterns("Subtotal: 80.00\nAmount Due: 96.00");
        assert_eq!(record.total_amount, Some(96.0));
    }

    #[test]
    fn test_currency_detection() {
        assert_eq!(currency("Total: 100 EUR"), "EUR");
        assert_eq!(currency("Total: £100"), "GBP");
        assert_eq!(currency("Amount ₹ 5,000"), "INR");
        assert_eq!(currency("AED 1,200 incl. VAT, approx $326"), "AED");
        assert_eq!(currency("Total: 100"), "USD");
    }

    #[test]
    fn test_unparseable_amount_yields_none() {
        let record = extract_with_patterns("Total: ,,,");
        assert_eq!(record.total_amount, None);
    }

    #[tokio::test]
    async fn test_stage_never_fails() {
        let outcome = RegexFallbackStage.structure("").await;
        match outcome {
            StageOutcome::Produced(record) => {
                assert_eq!(record.currency.as_deref(), Some("USD"));
                assert_eq!(record.populated_fields(), 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
