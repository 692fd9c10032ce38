//! In-memory job store.
//!
//! Used when no `DATABASE_URL` is configured and throughout the test suites.
//! Jobs survive only as long as the process, so crash recovery is a no-op.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use invoq_core::{Job, JobStatus, JobStore, Result};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    /// Status of every save, in order, per job.
    history: HashMap<Uuid, Vec<JobStatus>>,
}

/// [`JobStore`] backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status this job was saved with, oldest first.
    pub async fn history(&self, id: Uuid) -> Vec<JobStatus> {
        self.inner
            .read()
            .await
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.write().await;
        let history = inner.history.entry(job.id).or_default();
        // Identical consecutive saves are one transition.
        if history.last() != Some(&job.status) {
            history.push(job.status);
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoq_core::{JobPriority, JobType};
    use serde_json::json;

    fn job() -> Job {
        Job::new(
            JobType::InvoiceProcessing,
            json!({"invoice_id": "inv-1"}),
            JobPriority::High,
            3,
        )
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let store = MemoryJobStore::new();
        let mut job = job();
        store.save(&job).await.unwrap();

        job.status = JobStatus::Processing;
        job.attempts = 1;
        store.save(&job).await.unwrap();

        assert_eq!(store.len().await, 1);
        let loaded = store.load(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.attempts, 1);
        assert_eq!(
            store.history(job.id).await,
            vec![JobStatus::Pending, JobStatus::Processing]
        );
    }

    #[tokio::test]
    async fn test_load_unknown_is_none() {
        let store = MemoryJobStore::new();
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_by_status_filters_and_orders() {
        let store = MemoryJobStore::new();
        let first = job();
        let mut second = job();
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        second.status = JobStatus::Retrying;
        let mut done = job();
        done.status = JobStatus::Completed;

        store.save(&second).await.unwrap();
        store.save(&done).await.unwrap();
        store.save(&first).await.unwrap();

        let live = store
            .list_by_status(&[JobStatus::Pending, JobStatus::Retrying])
            .await
            .unwrap();
        let ids: Vec<Uuid> = live.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);

        assert!(store.list_by_status(&[]).await.unwrap().is_empty());
    }
}
