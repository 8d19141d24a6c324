//! Domain model (IDs, jobs, outcomes, decisions, summaries).

pub mod account;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod summary;

pub use account::Account;
pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{ErrorKind, SyncError};
pub use ids::{AccountId, JobId, ParseIdError};
pub use job::{JobRequest, SyncDomain, UnknownDomain};
pub use outcome::{ExecutionOutcome, OutcomeKind, SyncReport};
pub use summary::SyncRunSummary;
