//! Structured invoice record and document format detection.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// One row of an invoice's line item table. Every column is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItem {
    #[serde(deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub unit_price: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub amount: Option<f64>,
}

/// Fields extracted from an invoice.
///
/// Every field is independently nullable; an absent field is an expected
/// outcome (the regex fallback fills only a handful of them).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredInvoiceRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub vendor_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub vendor_address: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub customer_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub customer_address: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub invoice_number: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub invoice_date: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub due_date: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub subtotal: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub tax_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub vat_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub total_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    pub currency: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub payment_terms: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub payment_method: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub po_number: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub vat_number: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub trn: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub notes: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub line_items: Vec<LineItem>,
}

impl StructuredInvoiceRecord {
    /// Number of populated scalar fields (line items excluded).
    pub fn populated_fields(&self) -> usize {
        let strings = [
            &self.vendor_name,
            &self.vendor_address,
            &self.customer_name,
            &self.customer_address,
            &self.invoice_number,
            &self.invoice_date,
            &self.due_date,
            &self.currency,
            &self.payment_terms,
            &self.payment_method,
            &self.po_number,
            &self.vat_number,
            &self.trn,
            &self.notes,
        ];
        let numbers = [
            &self.subtotal,
            &self.tax_amount,
            &self.vat_amount,
            &self.total_amount,
        ];
        strings.iter().filter(|s| s.is_some()).count()
            + numbers.iter().filter(|n| n.is_some()).count()
    }

    /// True when nothing at all was extracted.
    pub fn is_empty(&self) -> bool {
        self.populated_fields() == 0 && self.line_items.is_empty()
    }
}

/// Accept strings, numbers (stringified), and treat blank strings as absent.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string, found {}",
            json_kind(&other)
        ))),
    }
}

/// Accept numbers and numeric strings such as `"$1,250.00"`.
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => Ok(n.as_f64()),
        Some(serde_json::Value::String(s)) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            if cleaned.is_empty() {
                return Ok(None);
            }
            cleaned
                .parse::<f64>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("expected number, found \"{}\"", s)))
        }
        Some(other) => Err(D::Error::custom(format!(
            "expected number, found {}",
            json_kind(&other)
        ))),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<LineItem>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<LineItem>>::deserialize(deserializer)?.unwrap_or_default())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Raster image kinds the OCR stage accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
    Tiff,
    Bmp,
}

/// Input document format, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "image")]
pub enum DocumentFormat {
    Pdf,
    Image(ImageKind),
}

impl DocumentFormat {
    /// Resolve a format from an extension (`"pdf"`, `".PNG"`) or a file path.
    pub fn from_extension(extension: &str) -> Result<Self> {
        let ext = extension
            .rsplit(['.', '/'])
            .next()
            .unwrap_or(extension)
            .trim()
            .to_lowercase();
        match ext.as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "png" => Ok(DocumentFormat::Image(ImageKind::Png)),
            "jpg" | "jpeg" => Ok(DocumentFormat::Image(ImageKind::Jpeg)),
            "tif" | "tiff" => Ok(DocumentFormat::Image(ImageKind::Tiff)),
            "bmp" => Ok(DocumentFormat::Image(ImageKind::Bmp)),
            _ => Err(Error::UnsupportedFormat(if ext.is_empty() {
                "missing file extension".to_string()
            } else {
                format!(".{}", ext)
            })),
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, DocumentFormat::Pdf)
    }
}
