//! Queue module: job state, retry logic, slot governance, and in-memory store.

mod governor;
mod memory;
mod record;
mod retry;
mod state;

pub use governor::{
    interleave_by_account, ConcurrencyLimits, FairnessPolicy, Governor, InFlightSnapshot,
    SlotPermit,
};
pub use memory::InMemoryJobStore;
pub use record::{NewSyncJob, SyncJob};
pub(crate) use record::INTERRUPTED_ERROR;
pub use retry::{JitterSource, NoJitter, RetryPolicy, SeededJitter, ThreadRngJitter};
pub use state::{JobStatus, UnknownStatus};
