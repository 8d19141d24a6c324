//! Outcome model: the classified result of one execution attempt.
//!
//! This module does not assume storage or scheduling. It only defines the
//! shape of what the executor reports back to the dispatcher.

use serde::{Deserialize, Serialize};

use super::errors::{ErrorKind, SyncError};

/// Coarse result a collaborator returns on success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub items_synced: usize,
}

impl SyncReport {
    pub fn new(items_synced: usize) -> Self {
        Self { items_synced }
    }
}

/// Serialized as SUCCESS / TRANSIENT / PERMANENT in logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Transient,
    Permanent,
}

/// Result of one attempt, as classified by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success { items_synced: usize },
    Transient { error: String },
    Permanent { error: String },
}

impl ExecutionOutcome {
    pub fn success(items_synced: usize) -> Self {
        Self::Success { items_synced }
    }

    pub fn transient(error: impl Into<String>) -> Self {
        Self::Transient {
            error: error.into(),
        }
    }

    pub fn permanent(error: impl Into<String>) -> Self {
        Self::Permanent {
            error: error.into(),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success { .. } => OutcomeKind::Success,
            Self::Transient { .. } => OutcomeKind::Transient,
            Self::Permanent { .. } => OutcomeKind::Permanent,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Transient { error } | Self::Permanent { error } => Some(error),
        }
    }
}

impl From<Result<SyncReport, SyncError>> for ExecutionOutcome {
    fn from(result: Result<SyncReport, SyncError>) -> Self {
        match result {
            Ok(report) => Self::success(report.items_synced),
            Err(err) => match err.kind() {
                ErrorKind::Transient => Self::transient(err.message()),
                ErrorKind::Permanent => Self::permanent(err.message()),
            },
        }
    }
}
