use thiserror::Error;

use crate::domain::{AccountId, JobId, SyncError};
use crate::queue::JobStatus;

/// Queue integrity and persistence failures.
///
/// A lost claim is not an error (`Ok(None)`); these never touch a job's
/// attempt counter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt row for job {id}: {reason}")]
    Data { id: String, reason: String },

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {id} is {actual}, expected {expected}")]
    InvalidTransition {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// The job was recovered and claimed again after this attempt started.
    #[error("job {id} was reclaimed: attempt_count is {actual}, this claim saw {claimed}")]
    StaleClaim { id: JobId, claimed: u32, actual: u32 },
}

impl StoreError {
    pub(crate) fn data(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Data {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced to callers of the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("account {0} does not exist")]
    InvalidAccount(AccountId),

    #[error("invalid job request: {0}")]
    InvalidRequest(String),

    #[error("account lookup failed: {0}")]
    AccountLookup(#[source] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
