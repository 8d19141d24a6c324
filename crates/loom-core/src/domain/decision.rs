//! Decision model: what happens to a job after an attempt.
//!
//! The Decider is a pure function of (job, outcome, now). It never touches
//! storage; the store persists the returned Decision with a guarded update.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::ExecutionOutcome;
use crate::queue::{JitterSource, JobStatus, RetryPolicy, SyncJob};

/// The per-attempt transition to persist. Every variant counts one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// running -> succeeded, `last_error` cleared.
    Succeed { items_synced: usize },

    /// running -> pending with a later `run_after`.
    Retry {
        run_after: DateTime<Utc>,
        error: String,
    },

    /// running -> dead_letter (terminal).
    DeadLetter { error: String },
}

impl Decision {
    pub fn next_status(&self) -> JobStatus {
        match self {
            Decision::Succeed { .. } => JobStatus::Succeeded,
            Decision::Retry { .. } => JobStatus::Pending,
            Decision::DeadLetter { .. } => JobStatus::DeadLetter,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Decision::Succeed { .. } => None,
            Decision::Retry { error, .. } | Decision::DeadLetter { error } => Some(error),
        }
    }

    pub fn run_after(&self) -> Option<DateTime<Utc>> {
        match self {
            Decision::Retry { run_after, .. } => Some(*run_after),
            _ => None,
        }
    }
}

/// Decides the next transition from the job as claimed and the attempt outcome.
pub trait Decider: Send + Sync {
    fn decide(&self, job: &SyncJob, outcome: &ExecutionOutcome, now: DateTime<Utc>) -> Decision;
}

/// Attempt-ceiling retry with capped exponential backoff:
/// - success -> Succeed
/// - permanent -> DeadLetter regardless of remaining attempts
/// - transient with `attempt_count + 1 < max_attempts` -> Retry after backoff
/// - transient otherwise -> DeadLetter
#[derive(Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
    jitter: Arc<dyn JitterSource>,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy, jitter: Arc<dyn JitterSource>) -> Self {
        Self {
            retry_policy,
            jitter,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl std::fmt::Debug for DefaultDecider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultDecider")
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, job: &SyncJob, outcome: &ExecutionOutcome, now: DateTime<Utc>) -> Decision {
        let attempts_after = job.attempt_count.saturating_add(1);
        match outcome {
            ExecutionOutcome::Success { items_synced } => Decision::Succeed {
                items_synced: *items_synced,
            },
            ExecutionOutcome::Permanent { error } => Decision::DeadLetter {
                error: error.clone(),
            },
            ExecutionOutcome::Transient { error } if attempts_after >= job.max_attempts => {
                Decision::DeadLetter {
                    error: format!(
                        "{error} (gave up after {attempts_after}/{} attempts)",
                        job.max_attempts
                    ),
                }
            }
            ExecutionOutcome::Transient { error } => {
                let delay = self
                    .retry_policy
                    .next_delay(attempts_after, self.jitter.as_ref());
                Decision::Retry {
                    run_after: add_delay(now, delay),
                    error: error.clone(),
                }
            }
        }
    }
}

pub(crate) fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn sub_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
