//! JobStore port - ジョブの正本（source of truth）
//!
//! JobStore は以下を管理します：
//! - 状態（pending / running / succeeded / dead_letter）
//! - 試行回数と次回実行時刻（run_after）
//! - 最後のエラー
//!
//! # 実装
//! - **SqliteJobStore**: 永続化（本番用）
//! - **InMemoryJobStore**: プロセス内（テスト・デモ用）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Decision, JobId};
use crate::error::StoreError;
use crate::observability::QueueCounts;
use crate::queue::{NewSyncJob, SyncJob};

/// JobStore は状態の正本
///
/// # 設計原則
/// - 状態遷移はすべて条件付き更新（compare-and-set）
/// - claim の権威はここにある（同じジョブを二重に渡さない）
/// - claim に負けた場合はエラーではなく `None`
#[async_trait]
pub trait JobStore: Send + Sync {
    /// pending / attempt_count=0 で挿入（重複排除なし）
    async fn enqueue(&self, job: NewSyncJob) -> Result<SyncJob, StoreError>;

    /// 実行可能なジョブの読み取り（状態は変えない）
    ///
    /// 順序: run_after, created_at, id の昇順。
    /// `per_account_cap` が指定されていれば、アカウントごとの件数を制限する。
    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        per_account_cap: Option<usize>,
    ) -> Result<Vec<SyncJob>, StoreError>;

    /// 単一ジョブの pending -> running（アトミック）
    ///
    /// 既に他者が claim した、または期限前の場合は `Ok(None)`。
    async fn claim(&self, id: JobId, now: DateTime<Utc>) -> Result<Option<SyncJob>, StoreError>;

    /// 実行可能なジョブを最大 `limit` 件 claim する
    ///
    /// 競合で取れなかったジョブは黙って省かれる。
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<SyncJob>, StoreError> {
        let mut claimed = Vec::new();
        for candidate in self.due_jobs(now, limit, None).await? {
            if let Some(job) = self.claim(candidate.id, now).await? {
                claimed.push(job);
            }
        }
        Ok(claimed)
    }

    /// 1 回の試行結果を適用
    ///
    /// `claimed` は claim が返したスナップショット。行が running で、かつ
    /// attempt_count が claim 時と同じときだけ適用する（楽観ロック）。
    /// 回収後に再 claim されたジョブへの遅れた complete は `StaleClaim`。
    async fn complete(
        &self,
        claimed: &SyncJob,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<SyncJob, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<SyncJob>, StoreError>;

    async fn counts_by_status(&self) -> Result<QueueCounts, StoreError>;

    /// dead_letter を新しい順に返す（参照のみ）
    async fn dead_letters(&self, limit: usize) -> Result<Vec<SyncJob>, StoreError>;

    /// クラッシュで running のまま残ったジョブの回収
    ///
    /// `updated_at <= stale_before` の running を 1 試行として数え、
    /// pending（run_after = now）か、上限到達なら dead_letter に戻す。
    async fn recover_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncJob>, StoreError>;

    /// 保持期間切れの succeeded を削除し、件数を返す
    async fn purge_succeeded(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}
