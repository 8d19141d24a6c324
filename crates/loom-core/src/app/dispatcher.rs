//! Dispatcher - 1 回の実行ループ
//!
//! # 流れ（1 パス）
//! 1. due なジョブを候補として読む（アカウントごとに上限付き）
//! 2. Governor がスロットを公平に割り当てる
//! 3. 割り当てられた候補を 1 件ずつアトミックに claim（負けたらスロット返却）
//! 4. JoinSet で並行実行 → decide → complete → スロット返却
//! 5. バッチ全体を待ってから次のパスへ
//!
//! claim できるものがなくなるか、スロットが尽きたら終了。

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Decider, Decision, SyncRunSummary};
use crate::error::StoreError;
use crate::ports::{Clock, JobStore};
use crate::queue::{Governor, SlotPermit, SyncJob};
use crate::runtime::JobExecutor;

/// 1 件の試行結果（join 後に集計する）
struct Attempt {
    job: SyncJob,
    decision: Decision,
    persisted: Result<SyncJob, StoreError>,
}

#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) governor: Governor,
    pub(crate) executor: Arc<JobExecutor>,
    pub(crate) decider: Arc<dyn Decider>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) candidate_window: usize,
}

impl Dispatcher {
    /// 実行ループ本体
    ///
    /// # エラー
    /// - 最初の候補読み取りの失敗はそのまま返す
    /// - 2 パス目以降の読み取り失敗は警告して、そこまでの集計を返す
    /// - complete の失敗は集計しない（ジョブは running のまま残り、recover で回収）
    /// - 回収後に再 claim されたジョブへの遅れた結果は捨てる（StaleClaim）
    #[instrument(skip_all, name = "run_queue")]
    pub(crate) async fn run(&self, deadline: Option<Instant>) -> Result<SyncRunSummary, StoreError> {
        let mut summary = SyncRunSummary::default();
        let mut passes = 0usize;

        loop {
            if past(deadline) {
                info!(passes, "run deadline reached, no new claims");
                break;
            }
            if self.governor.available() == 0 {
                debug!("no free slots");
                break;
            }

            let now = self.clock.now();
            let per_account = self.governor.limits().max_per_account;
            let candidates = match self
                .store
                .due_jobs(now, self.candidate_window, Some(per_account))
                .await
            {
                Ok(candidates) => candidates,
                Err(e) if passes == 0 => return Err(e),
                Err(e) => {
                    warn!(error = %e, passes, "due job lookup failed, ending run early");
                    break;
                }
            };
            if candidates.is_empty() {
                break;
            }

            let mut batch = JoinSet::new();
            for (job, permit) in self.governor.allocate(candidates) {
                if past(deadline) {
                    break;
                }
                let Some(claimed) = self.claim(&job, now).await else {
                    continue;
                };
                batch.spawn(self.clone().attempt(claimed, permit));
            }
            if batch.is_empty() {
                break;
            }

            passes += 1;
            debug!(pass = passes, jobs = batch.len(), "batch started");
            while let Some(joined) = batch.join_next().await {
                match joined {
                    Ok(attempt) => fold(&mut summary, attempt),
                    Err(e) => error!(error = %e, "dispatch task failed"),
                }
            }
        }

        info!(
            passes,
            completed = summary.completed_jobs,
            retried = summary.retried_jobs,
            failed = summary.failed_jobs,
            "sync run finished"
        );
        Ok(summary)
    }

    /// 負けた claim や claim の失敗は `None`（呼び出し側でスロットが返る）
    async fn claim(&self, job: &SyncJob, now: chrono::DateTime<chrono::Utc>) -> Option<SyncJob> {
        match self.store.claim(job.id, now).await {
            Ok(Some(claimed)) => {
                debug!(job_id = %claimed.id, account_id = %claimed.account_id, domain = %claimed.domain, attempt = claimed.attempt_count + 1, "claimed");
                Some(claimed)
            }
            Ok(None) => {
                debug!(job_id = %job.id, "lost claim race");
                None
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "claim failed");
                None
            }
        }
    }

    /// 実行 → 判定 → 永続化。スロットは永続化の後に返す。
    async fn attempt(self, job: SyncJob, permit: SlotPermit) -> Attempt {
        let outcome = self.executor.execute(&job).await;
        let finished = self.clock.now();
        let decision = self.decider.decide(&job, &outcome, finished);
        let persisted = self.store.complete(&job, &decision, finished).await;
        drop(permit);
        Attempt {
            job,
            decision,
            persisted,
        }
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn fold(summary: &mut SyncRunSummary, attempt: Attempt) {
    let Attempt {
        job,
        decision,
        persisted,
    } = attempt;

    let updated = match persisted {
        Ok(updated) => updated,
        Err(e @ StoreError::StaleClaim { .. }) => {
            warn!(job_id = %job.id, error = %e, "attempt was recovered while running, result dropped");
            return;
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "failed to persist attempt result, job left running");
            return;
        }
    };

    match &decision {
        Decision::Succeed { items_synced } => info!(
            job_id = %updated.id,
            account_id = %updated.account_id,
            domain = %updated.domain,
            attempt = updated.attempt_count,
            items_synced,
            "sync job succeeded"
        ),
        Decision::Retry { run_after, error } => warn!(
            job_id = %updated.id,
            account_id = %updated.account_id,
            domain = %updated.domain,
            attempt = updated.attempt_count,
            max_attempts = updated.max_attempts,
            %run_after,
            %error,
            "sync job failed, retry scheduled"
        ),
        Decision::DeadLetter { error } => warn!(
            job_id = %updated.id,
            account_id = %updated.account_id,
            domain = %updated.domain,
            attempt = updated.attempt_count,
            %error,
            "sync job dead-lettered"
        ),
    }
    summary.record(updated.domain, &decision);
}
