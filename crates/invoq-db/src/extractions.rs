//! Extraction record sink.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use invoq_core::{Error, ExtractionSink, Result, StructuredInvoiceRecord};

/// Stores the latest structured extraction per invoice in
/// `invoice_extractions`. Re-running a job for the same invoice overwrites
/// the previous row, so retries never duplicate records.
#[derive(Clone)]
pub struct PgExtractionSink {
    pool: Pool<Postgres>,
}

impl PgExtractionSink {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExtractionSink for PgExtractionSink {
    async fn save_extraction(
        &self,
        job_id: Uuid,
        invoice_id: &str,
        record: &StructuredInvoiceRecord,
        diagnostics: &JsonValue,
    ) -> Result<()> {
        let record_json = serde_json::to_value(record)?;

        sqlx::query(
            "INSERT INTO invoice_extractions
                 (invoice_id, job_id, record, invoice_number, total_amount, currency, diagnostics, extracted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now())
             ON CONFLICT (invoice_id) DO UPDATE SET
                 job_id = EXCLUDED.job_id,
                 record = EXCLUDED.record,
                 invoice_number = EXCLUDED.invoice_number,
                 total_amount = EXCLUDED.total_amount,
                 currency = EXCLUDED.currency,
                 diagnostics = EXCLUDED.diagnostics,
                 extracted_at = now()",
        )
        .bind(invoice_id)
        .bind(job_id)
        .bind(&record_json)
        .bind(&record.invoice_number)
        .bind(record.total_amount)
        .bind(&record.currency)
        .bind(diagnostics)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "store",
            component = "pg_extraction_sink",
            job_id = %job_id,
            invoice_id = %invoice_id,
            "Extraction persisted"
        );
        Ok(())
    }
}
