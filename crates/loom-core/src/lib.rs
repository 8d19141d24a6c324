//! loom-core
//!
//! Durable sync-job scheduler: jobs for (account, domain) pairs are queued,
//! dispatched under concurrency limits, retried with backoff, and
//! dead-lettered when they cannot succeed.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, outcome, decision, summary, errors）
//! - **queue**: ジョブの状態機械、リトライ、同時実行の Governor、インメモリ Store
//! - **ports**: 抽象化レイヤー（JobStore, SyncCollaborator, AccountResolver, Clock, IdGenerator）
//! - **impls**: 実装（SqliteJobStore, InMemoryAccountDirectory）
//! - **runtime**: Collaborator の登録と 1 試行の実行
//! - **app**: Scheduler と Builder

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{BuildError, Scheduler, SchedulerBuilder};
pub use config::{BackoffConfig, ConfigError, SchedulerConfig};
pub use domain::{
    Account, AccountId, ErrorKind, JobId, JobRequest, SyncDomain, SyncError, SyncReport,
    SyncRunSummary,
};
pub use error::{SchedulerError, StoreError};
pub use observability::QueueCounts;
pub use queue::{ConcurrencyLimits, FairnessPolicy, JobStatus, SyncJob};
