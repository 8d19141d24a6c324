//! Scheduler - 呼び出し側の入口
//!
//! enqueue（queue_job / queue）、実行（run_queue / run_queue_for）、
//! 運用操作（recover / counts / dead letters / purge）を提供します。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::app::dispatcher::Dispatcher;
use crate::app::SchedulerBuilder;
use crate::config::SchedulerConfig;
use crate::domain::decision::{add_delay, sub_delay};
use crate::domain::{AccountId, JobId, JobRequest, SyncDomain, SyncRunSummary};
use crate::error::SchedulerError;
use crate::observability::QueueCounts;
use crate::ports::{AccountResolver, Clock, IdGenerator, JobStore};
use crate::queue::{Governor, NewSyncJob, SyncJob};

/// Scheduler はジョブキューの所有者
///
/// Store・Clock・Governor はすべて Builder から明示的に渡される。
/// `run_queue` は有限（呼び出し側がトリガーする）。
pub struct Scheduler {
    pub(super) store: Arc<dyn JobStore>,
    pub(super) accounts: Arc<dyn AccountResolver>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) ids: Arc<dyn IdGenerator>,
    pub(super) config: SchedulerConfig,
    pub(super) dispatcher: Dispatcher,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn governor(&self) -> &Governor {
        &self.dispatcher.governor
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// ジョブを登録し、ID を返す
    ///
    /// 負の `run_after_offset_secs` は 0 として扱う。
    pub async fn queue_job(
        &self,
        account_id: AccountId,
        domain: SyncDomain,
        payload: serde_json::Value,
        run_after_offset_secs: i64,
    ) -> Result<JobId, SchedulerError> {
        let request = JobRequest::new(account_id, domain)
            .with_payload(payload)
            .run_after_secs(run_after_offset_secs);
        Ok(self.queue(request).await?.id)
    }

    /// ジョブ単位の max_attempts を指定できる版
    #[instrument(skip(self, request), fields(account_id = %request.account_id, domain = %request.domain))]
    pub async fn queue(&self, request: JobRequest) -> Result<SyncJob, SchedulerError> {
        let max_attempts = request
            .max_attempts
            .unwrap_or(self.config.default_max_attempts);
        if max_attempts < 1 {
            return Err(SchedulerError::InvalidRequest(
                "max_attempts must be >= 1".to_string(),
            ));
        }

        match self.accounts.resolve(request.account_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(SchedulerError::InvalidAccount(request.account_id)),
            Err(e) => return Err(SchedulerError::AccountLookup(e)),
        }

        let now = self.clock.now();
        let offset = Duration::from_secs(request.run_after_offset_secs.max(0).unsigned_abs());
        let job = self
            .store
            .enqueue(NewSyncJob {
                id: self.ids.generate_job_id(),
                account_id: request.account_id,
                domain: request.domain,
                payload: request.payload,
                max_attempts,
                run_after: add_delay(now, offset),
                created_at: now,
            })
            .await?;

        info!(
            job_id = %job.id,
            run_after = %job.run_after,
            max_attempts = job.max_attempts,
            "sync job queued"
        );
        Ok(job)
    }

    /// claim できるジョブがなくなるまで実行し、集計を返す
    pub async fn run_queue(&self) -> Result<SyncRunSummary, SchedulerError> {
        Ok(self.dispatcher.run(None).await?)
    }

    /// 全体の期限付き実行
    ///
    /// 期限後は新しい claim をしない。実行中の試行は待ってから部分集計を返す。
    pub async fn run_queue_for(&self, budget: Duration) -> Result<SyncRunSummary, SchedulerError> {
        let deadline = Instant::now() + budget;
        Ok(self.dispatcher.run(Some(deadline)).await?)
    }

    /// クラッシュで running のまま残ったジョブを回収
    ///
    /// `updated_at` が `stale_after` より古い running が対象。
    #[instrument(skip(self))]
    pub async fn recover_stale_jobs(&self) -> Result<Vec<SyncJob>, SchedulerError> {
        let now = self.clock.now();
        let stale_before = sub_delay(now, self.config.stale_after());

        let recovered = self.store.recover_stale(stale_before, now).await?;
        for job in &recovered {
            warn!(
                job_id = %job.id,
                account_id = %job.account_id,
                domain = %job.domain,
                status = %job.status,
                attempt = job.attempt_count,
                "recovered interrupted sync job"
            );
        }
        Ok(recovered)
    }

    pub async fn queue_counts(&self) -> Result<QueueCounts, SchedulerError> {
        Ok(self.store.counts_by_status().await?)
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<SyncJob>, SchedulerError> {
        Ok(self.store.dead_letters(limit).await?)
    }

    /// `retention` より前に終わった succeeded を削除
    #[instrument(skip(self))]
    pub async fn purge_succeeded(&self, retention: Duration) -> Result<u64, SchedulerError> {
        let now = self.clock.now();
        let older_than = sub_delay(now, retention);

        let purged = self.store.purge_succeeded(older_than).await?;
        info!(purged, "purged archived sync jobs");
        Ok(purged)
    }
}
