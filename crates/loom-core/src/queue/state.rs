//! Job state machine for the queue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Job status as persisted in the `status` column.
///
/// State transitions:
/// - Pending -> Running -> Succeeded
/// - Pending -> Running -> Pending (transient failure, rescheduled with backoff)
/// - Pending -> Running -> DeadLetter (permanent failure or attempts exhausted)
///
/// There is no Pending -> DeadLetter edge: every job is attempted at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `run_after`.
    Pending,

    /// Claimed by exactly one dispatcher.
    Running,

    /// Completed; kept as archive until purged.
    Succeeded,

    /// Terminal failure. Never retried automatically.
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::DeadLetter => "dead_letter",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::DeadLetter)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Pending)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::DeadLetter)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "dead_letter" => Ok(JobStatus::DeadLetter),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
