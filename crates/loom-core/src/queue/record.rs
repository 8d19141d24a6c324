//! Job record: the persisted shape of a sync job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobStatus;
use crate::domain::{AccountId, Decision, JobId, SyncDomain};

/// One unit of scheduled work for one account and domain.
///
/// Design:
/// - The store row is the single source of truth; this is a snapshot of it.
/// - Transitions go through the store (`claim`, `complete`, `recover_stale`),
///   never through ad hoc field writes elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: JobId,
    pub account_id: AccountId,
    pub domain: SyncDomain,
    pub status: JobStatus,

    /// Opaque to the scheduler.
    pub payload: serde_json::Value,

    /// Attempts made so far, including failed and interrupted ones.
    pub attempt_count: u32,
    pub max_attempts: u32,

    /// Earliest time the job may be claimed.
    pub run_after: DateTime<Utc>,

    /// Message of the most recent failed attempt.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncJob {
    /// Eligible for dispatch iff pending and due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.run_after <= now
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }

    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.updated_at = now;
    }

    /// Apply a decision to a running job. The caller has checked the status.
    pub(crate) fn apply(&mut self, decision: &Decision, now: DateTime<Utc>) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.status = decision.next_status();
        match decision {
            Decision::Succeed { .. } => self.last_error = None,
            Decision::Retry { run_after, error } => {
                self.run_after = *run_after;
                self.last_error = Some(error.clone());
            }
            Decision::DeadLetter { error } => self.last_error = Some(error.clone()),
        }
        self.updated_at = now;
    }

    /// A running job whose dispatcher went away counts as an attempt.
    pub(crate) fn recover_interrupted(&mut self, now: DateTime<Utc>) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.status = if self.attempt_count >= self.max_attempts {
            JobStatus::DeadLetter
        } else {
            self.run_after = now;
            JobStatus::Pending
        };
        self.last_error = Some(INTERRUPTED_ERROR.to_string());
        self.updated_at = now;
    }
}

pub(crate) const INTERRUPTED_ERROR: &str = "attempt interrupted before completion";

/// Insert form of a job. The store fills in status and counters.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncJob {
    pub id: JobId,
    pub account_id: AccountId,
    pub domain: SyncDomain,
    pub payload: serde_json::Value,
    pub max_attempts: u32,
    pub run_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewSyncJob {
    pub fn into_pending(self) -> SyncJob {
        SyncJob {
            id: self.id,
            account_id: self.account_id,
            domain: self.domain,
            status: JobStatus::Pending,
            payload: self.payload,
            attempt_count: 0,
            max_attempts: self.max_attempts,
            run_after: self.run_after,
            last_error: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}
