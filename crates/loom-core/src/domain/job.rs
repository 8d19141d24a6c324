//! Sync domains and enqueue requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ids::AccountId;

/// The category of data a job synchronizes.
///
/// Closed set: each variant maps to exactly one registered collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDomain {
    Email,
    Calendar,
    Tasks,
}

impl SyncDomain {
    pub const ALL: [SyncDomain; 3] = [SyncDomain::Email, SyncDomain::Calendar, SyncDomain::Tasks];

    pub fn as_str(self) -> &'static str {
        match self {
            SyncDomain::Email => "email",
            SyncDomain::Calendar => "calendar",
            SyncDomain::Tasks => "tasks",
        }
    }
}

impl fmt::Display for SyncDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sync domain '{0}'")]
pub struct UnknownDomain(pub String);

impl FromStr for SyncDomain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(SyncDomain::Email),
            "calendar" => Ok(SyncDomain::Calendar),
            "tasks" => Ok(SyncDomain::Tasks),
            other => Err(UnknownDomain(other.to_string())),
        }
    }
}

/// What a caller asks to enqueue.
///
/// `payload` is opaque to the scheduler and forwarded to the collaborator as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub account_id: AccountId,
    pub domain: SyncDomain,
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Seconds from now before the job becomes eligible. Negative values clamp to 0.
    #[serde(default)]
    pub run_after_offset_secs: i64,

    /// Overrides the configured default ceiling when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl JobRequest {
    pub fn new(account_id: AccountId, domain: SyncDomain) -> Self {
        Self {
            account_id,
            domain,
            payload: serde_json::json!({}),
            run_after_offset_secs: 0,
            max_attempts: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn run_after_secs(mut self, secs: i64) -> Self {
        self.run_after_offset_secs = secs;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}
