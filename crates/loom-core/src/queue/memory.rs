//! In-memory job store implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{JobStatus, NewSyncJob, SyncJob};
use crate::domain::{AccountId, Decision, JobId};
use crate::error::StoreError;
use crate::observability::QueueCounts;
use crate::ports::JobStore;

/// In-process store with the same transition rules as the durable one.
///
/// Design:
/// - All records live in one map behind a single async mutex, so every
///   operation is atomic with respect to the others.
/// - Nothing survives the process; use it for tests and demos.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobId, SyncJob>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every job, in dispatch order. Test helper.
    #[cfg(test)]
    pub async fn snapshot(&self) -> Vec<SyncJob> {
        let jobs = self.jobs.lock().await;
        let mut all: Vec<SyncJob> = jobs.values().cloned().collect();
        all.sort_by(dispatch_order);
        all
    }
}

fn dispatch_order(a: &SyncJob, b: &SyncJob) -> std::cmp::Ordering {
    a.run_after
        .cmp(&b.run_after)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewSyncJob) -> Result<SyncJob, StoreError> {
        let job = job.into_pending();
        let mut jobs = self.jobs.lock().await;
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        per_account_cap: Option<usize>,
    ) -> Result<Vec<SyncJob>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut due: Vec<&SyncJob> = jobs.values().filter(|job| job.is_due(now)).collect();
        due.sort_by(|a, b| dispatch_order(a, b));

        let mut per_account: HashMap<AccountId, usize> = HashMap::new();
        let mut selected = Vec::new();
        for job in due {
            if selected.len() >= limit {
                break;
            }
            let taken = per_account.entry(job.account_id).or_insert(0);
            if per_account_cap.is_some_and(|cap| *taken >= cap) {
                continue;
            }
            *taken += 1;
            selected.push(job.clone());
        }
        Ok(selected)
    }

    async fn claim(&self, id: JobId, now: DateTime<Utc>) -> Result<Option<SyncJob>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.is_due(now) => {
                job.mark_running(now);
                Ok(Some(job.clone()))
            }
            _ => {
                debug!(job_id = %id, "claim lost");
                Ok(None)
            }
        }
    }

    async fn complete(
        &self,
        claimed: &SyncJob,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<SyncJob, StoreError> {
        let id = claimed.id;
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if job.status != JobStatus::Running {
            return Err(StoreError::InvalidTransition {
                id,
                expected: JobStatus::Running,
                actual: job.status,
            });
        }
        if job.attempt_count != claimed.attempt_count {
            return Err(StoreError::StaleClaim {
                id,
                claimed: claimed.attempt_count,
                actual: job.attempt_count,
            });
        }
        job.apply(decision, now);
        Ok(job.clone())
    }

    async fn get(&self, id: JobId) -> Result<Option<SyncJob>, StoreError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut counts = QueueCounts::default();
        for job in jobs.values() {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<SyncJob>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut dead: Vec<SyncJob> = jobs
            .values()
            .filter(|job| job.status == JobStatus::DeadLetter)
            .cloned()
            .collect();
        dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        dead.truncate(limit);
        Ok(dead)
    }

    async fn recover_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncJob>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let mut recovered = Vec::new();
        for job in jobs.values_mut() {
            if job.status == JobStatus::Running && job.updated_at <= stale_before {
                job.recover_interrupted(now);
                recovered.push(job.clone());
            }
        }
        recovered.sort_by(dispatch_order);
        Ok(recovered)
    }

    async fn purge_succeeded(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status == JobStatus::Succeeded && job.updated_at < older_than));
        Ok((before - jobs.len()) as u64)
    }
}
