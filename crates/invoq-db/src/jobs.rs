//! PostgreSQL job store.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use invoq_core::{Error, Job, JobPriority, JobStatus, JobStore, JobType, Result};

const JOB_COLUMNS: &str = "id, job_type, status, priority, payload, attempts, max_retries, \
     error_message, result, created_at, started_at, completed_at";

/// PostgreSQL implementation of [`JobStore`].
///
/// Every save is a single upsert keyed by job id, so a transition is durable
/// as soon as `save` returns.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let job_type: String = row.get("job_type");
        let status: String = row.get("status");
        let priority: String = row.get("priority");

        Ok(Job {
            id: row.get("id"),
            job_type: JobType::from_str(&job_type).map_err(Error::Internal)?,
            status: JobStatus::from_str(&status).map_err(Error::Internal)?,
            priority: JobPriority::from_str(&priority).map_err(Error::Internal)?,
            payload: row.get("payload"),
            attempts: row.get("attempts"),
            max_retries: row.get("max_retries"),
            error_message: row.get("error_message"),
            result: row.get("result"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_queue (id, job_type, status, priority, payload, attempts, max_retries,
                                    error_message, result, created_at, started_at, completed_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
             ON CONFLICT (id) DO UPDATE SET
                 status = EXCLUDED.status,
                 priority = EXCLUDED.priority,
                 attempts = EXCLUDED.attempts,
                 max_retries = EXCLUDED.max_retries,
                 error_message = EXCLUDED.error_message,
                 result = EXCLUDED.result,
                 started_at = EXCLUDED.started_at,
                 completed_at = EXCLUDED.completed_at,
                 updated_at = now()",
        )
        .bind(job.id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.priority.as_str())
        .bind(&job.payload)
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(&job.error_message)
        .bind(&job.result)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "store",
            component = "pg_job_store",
            op = "save",
            job_id = %job.id,
            status = %job.status,
            attempts = job.attempts,
            "Job persisted"
        );
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {} FROM job_queue WHERE id = $1", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let status_strings: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        let rows = sqlx::query(&format!(
            "SELECT {} FROM job_queue WHERE status = ANY($1) ORDER BY created_at ASC, id ASC",
            JOB_COLUMNS
        ))
        .bind(&status_strings)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }
}
