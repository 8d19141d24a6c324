//! SqliteJobStore - SQLite による永続的な正本
//!
//! # 設計
//! - WAL モード + busy_timeout（複数接続からの書き込みを直列化）
//! - 状態遷移は 1 文の条件付き UPDATE ... RETURNING（アトミック）
//! - 時刻は Unix epoch ミリ秒の INTEGER（そのままソート可能）
//! - スキーマは埋め込みマイグレーション（`migrations/`）

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{debug, instrument};

use crate::domain::{AccountId, Decision, JobId, SyncDomain};
use crate::error::StoreError;
use crate::observability::QueueCounts;
use crate::ports::JobStore;
use crate::queue::{JobStatus, NewSyncJob, SyncJob, INTERRUPTED_ERROR};

macro_rules! job_columns {
    () => {
        "id, account_id, domain, status, payload, attempt_count, max_attempts, \
         run_after, last_error, created_at, updated_at"
    };
}

/// 接続プールの設定
#[derive(Debug, Clone)]
pub struct SqliteStoreOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite 実装の JobStore
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// ファイルを開く（なければ作成）し、マイグレーションを適用
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::connect_with(path, SqliteStoreOptions::default()).await
    }

    pub async fn connect_with(
        path: impl AsRef<Path>,
        options: SqliteStoreOptions,
    ) -> Result<Self, StoreError> {
        debug!(path = %path.as_ref().display(), "opening sqlite job store");
        let connect_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect_options)
            .await?;

        Self::from_pool(pool).await
    }

    /// テスト用のインメモリ DB
    ///
    /// 接続が切れると DB が消えるため、接続は 1 本に固定して保持し続ける。
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let connect_options = "sqlite::memory:".parse::<SqliteConnectOptions>()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(connect_options)
            .await?;

        Self::from_pool(pool).await
    }

    /// 既存のプールを使い、マイグレーションを適用
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn row_to_job(row: &SqliteRow) -> Result<SyncJob, StoreError> {
    let raw_id: String = row.try_get("id")?;
    let corrupt = |reason: &dyn std::fmt::Display| StoreError::data(&raw_id, reason);

    let id = raw_id.parse::<JobId>().map_err(|e| corrupt(&e))?;
    let account_id = row
        .try_get::<String, _>("account_id")?
        .parse::<AccountId>()
        .map_err(|e| corrupt(&e))?;
    let domain = row
        .try_get::<String, _>("domain")?
        .parse::<SyncDomain>()
        .map_err(|e| corrupt(&e))?;
    let status = row
        .try_get::<String, _>("status")?
        .parse::<JobStatus>()
        .map_err(|e| corrupt(&e))?;
    let payload = serde_json::from_str(&row.try_get::<String, _>("payload")?)?;

    let count = |column: &str| -> Result<u32, StoreError> {
        let value: i64 = row.try_get(column)?;
        u32::try_from(value).map_err(|e| corrupt(&format_args!("{column}={value}: {e}")))
    };
    let timestamp = |column: &str| -> Result<DateTime<Utc>, StoreError> {
        let value: i64 = row.try_get(column)?;
        DateTime::from_timestamp_millis(value)
            .ok_or_else(|| corrupt(&format_args!("{column}={value} is out of range")))
    };

    Ok(SyncJob {
        id,
        account_id,
        domain,
        status,
        payload,
        attempt_count: count("attempt_count")?,
        max_attempts: count("max_attempts")?,
        run_after: timestamp("run_after")?,
        last_error: row.try_get("last_error")?,
        created_at: timestamp("created_at")?,
        updated_at: timestamp("updated_at")?,
    })
}

fn rows_to_jobs(rows: &[SqliteRow]) -> Result<Vec<SyncJob>, StoreError> {
    rows.iter().map(row_to_job).collect()
}

#[async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, account_id = %job.account_id, domain = %job.domain), err)]
    async fn enqueue(&self, job: NewSyncJob) -> Result<SyncJob, StoreError> {
        let job = job.into_pending();
        sqlx::query(
            "INSERT INTO sync_jobs (id, account_id, domain, status, payload, attempt_count, \
             max_attempts, run_after, last_error, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, NULL, ?8, ?8)",
        )
        .bind(job.id.to_storage())
        .bind(job.account_id.to_storage())
        .bind(job.domain.as_str())
        .bind(job.status.as_str())
        .bind(serde_json::to_string(&job.payload)?)
        .bind(i64::from(job.max_attempts))
        .bind(millis(job.run_after))
        .bind(millis(job.created_at))
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    #[instrument(skip(self), level = "debug", err)]
    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        per_account_cap: Option<usize>,
    ) -> Result<Vec<SyncJob>, StoreError> {
        let cap = per_account_cap.map_or(i64::MAX, |cap| i64::try_from(cap).unwrap_or(i64::MAX));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(concat!(
            "SELECT ",
            job_columns!(),
            " FROM (SELECT *, ROW_NUMBER() OVER (\
                 PARTITION BY account_id ORDER BY run_after, created_at, id) AS account_rank \
               FROM sync_jobs WHERE status = 'pending' AND run_after <= ?1) \
             WHERE account_rank <= ?2 \
             ORDER BY run_after, created_at, id \
             LIMIT ?3"
        ))
        .bind(millis(now))
        .bind(cap)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows_to_jobs(&rows)
    }

    #[instrument(skip(self), level = "debug", fields(job_id = %id), err)]
    async fn claim(&self, id: JobId, now: DateTime<Utc>) -> Result<Option<SyncJob>, StoreError> {
        let row = sqlx::query(concat!(
            "UPDATE sync_jobs SET status = 'running', updated_at = ?1 \
             WHERE id = ?2 AND status = 'pending' AND run_after <= ?1 \
             RETURNING ",
            job_columns!()
        ))
        .bind(millis(now))
        .bind(id.to_storage())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => {
                debug!("claim lost");
                Ok(None)
            }
        }
    }

    #[instrument(
        skip(self, claimed, decision),
        fields(job_id = %claimed.id, attempt = claimed.attempt_count + 1, next = %decision.next_status()),
        err
    )]
    async fn complete(
        &self,
        claimed: &SyncJob,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<SyncJob, StoreError> {
        let id = claimed.id;
        let row = sqlx::query(concat!(
            "UPDATE sync_jobs SET status = ?1, attempt_count = attempt_count + 1, \
             run_after = COALESCE(?2, run_after), last_error = ?3, updated_at = ?4 \
             WHERE id = ?5 AND status = 'running' AND attempt_count = ?6 \
             RETURNING ",
            job_columns!()
        ))
        .bind(decision.next_status().as_str())
        .bind(decision.run_after().map(millis))
        .bind(decision.error())
        .bind(millis(now))
        .bind(id.to_storage())
        .bind(i64::from(claimed.attempt_count))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return row_to_job(&row);
        }
        match self.get(id).await? {
            None => Err(StoreError::NotFound(id)),
            Some(job) if job.status != JobStatus::Running => Err(StoreError::InvalidTransition {
                id,
                expected: JobStatus::Running,
                actual: job.status,
            }),
            Some(job) => Err(StoreError::StaleClaim {
                id,
                claimed: claimed.attempt_count,
                actual: job.attempt_count,
            }),
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<SyncJob>, StoreError> {
        let row = sqlx::query(concat!("SELECT ", job_columns!(), " FROM sync_jobs WHERE id = ?1"))
            .bind(id.to_storage())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM sync_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let raw: String = row.try_get("status")?;
            let status = raw
                .parse::<JobStatus>()
                .map_err(|e| StoreError::data("<aggregate>", e))?;
            let n: i64 = row.try_get("n")?;
            counts.add(status, usize::try_from(n).unwrap_or(0));
        }
        Ok(counts)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<SyncJob>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            job_columns!(),
            " FROM sync_jobs WHERE status = 'dead_letter' \
             ORDER BY updated_at DESC, id DESC LIMIT ?1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows_to_jobs(&rows)
    }

    #[instrument(skip(self), err)]
    async fn recover_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncJob>, StoreError> {
        // Right-hand sides see the row as it was before the update.
        let rows = sqlx::query(concat!(
            "UPDATE sync_jobs SET \
               attempt_count = attempt_count + 1, \
               status = CASE WHEN attempt_count + 1 >= max_attempts \
                        THEN 'dead_letter' ELSE 'pending' END, \
               run_after = CASE WHEN attempt_count + 1 >= max_attempts \
                           THEN run_after ELSE ?1 END, \
               last_error = ?2, \
               updated_at = ?1 \
             WHERE status = 'running' AND updated_at <= ?3 \
             RETURNING ",
            job_columns!()
        ))
        .bind(millis(now))
        .bind(INTERRUPTED_ERROR)
        .bind(millis(stale_before))
        .fetch_all(&self.pool)
        .await?;

        let mut recovered = rows_to_jobs(&rows)?;
        recovered.sort_by(|a, b| a.run_after.cmp(&b.run_after).then(a.id.cmp(&b.id)));
        Ok(recovered)
    }

    #[instrument(skip(self), err)]
    async fn purge_succeeded(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sync_jobs WHERE status = 'succeeded' AND updated_at < ?1")
            .bind(millis(older_than))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_job, t0};
    use chrono::Duration as ChronoDuration;
    use std::collections::HashSet;

    #[tokio::test]
    async fn round_trips_every_column() {
        let store = SqliteJobStore::connect_in_memory().await.unwrap();
        let mut new = new_job(AccountId::generate(), SyncDomain::Calendar, t0());
        new.payload = serde_json::json!({"folder": "INBOX", "full": true});
        new.max_attempts = 7;

        let enqueued = store.enqueue(new).await.unwrap();
        let loaded = store.get(enqueued.id).await.unwrap().unwrap();

        assert_eq!(loaded, enqueued);
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.attempt_count, 0);
        assert!(store.get(JobId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn due_jobs_respects_order_and_account_cap() {
        let store = SqliteJobStore::connect_in_memory().await.unwrap();
        let busy = AccountId::generate();
        let quiet = AccountId::generate();
        let mut busy_ids = Vec::new();
        for i in 0..4 {
            let job = store
                .enqueue(new_job(busy, SyncDomain::Email, t0() + ChronoDuration::seconds(i)))
                .await
                .unwrap();
            busy_ids.push(job.id);
        }
        let quiet_job = store
            .enqueue(new_job(quiet, SyncDomain::Tasks, t0() + ChronoDuration::seconds(10)))
            .await
            .unwrap();

        let now = t0() + ChronoDuration::seconds(10);
        let uncapped: Vec<_> = store.due_jobs(now, 3, None).await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(uncapped, busy_ids[..3].to_vec());

        let capped: Vec<_> = store.due_jobs(now, 3, Some(2)).await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(capped, vec![busy_ids[0], busy_ids[1], quiet_job.id]);
    }

    #[tokio::test]
    async fn claim_then_complete_retry() {
        let store = SqliteJobStore::connect_in_memory().await.unwrap();
        let job = store
            .enqueue(new_job(AccountId::generate(), SyncDomain::Email, t0()))
            .await
            .unwrap();

        let claimed = store.claim(job.id, t0()).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(store.claim(job.id, t0()).await.unwrap().is_none());

        let retry_at = t0() + ChronoDuration::seconds(60);
        let done = store
            .complete(
                &claimed,
                &Decision::Retry {
                    run_after: retry_at,
                    error: "503".into(),
                },
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Pending);
        assert_eq!(done.attempt_count, 1);
        assert_eq!(done.run_after, retry_at);
        assert_eq!(done.last_error.as_deref(), Some("503"));

        // Not due again until run_after.
        assert!(store.claim(job.id, t0()).await.unwrap().is_none());
        assert!(store.claim(job.id, retry_at).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn complete_guards_on_running() {
        let store = SqliteJobStore::connect_in_memory().await.unwrap();
        let job = store
            .enqueue(new_job(AccountId::generate(), SyncDomain::Email, t0()))
            .await
            .unwrap();

        let err = store
            .complete(&job, &Decision::Succeed { items_synced: 1 }, t0())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition { actual: JobStatus::Pending, .. }
        ));
        let never_stored = new_job(AccountId::generate(), SyncDomain::Email, t0()).into_pending();
        let err = store
            .complete(&never_stored, &Decision::Succeed { items_synced: 1 }, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        // The failed write did not count an attempt.
        assert_eq!(store.get(job.id).await.unwrap().unwrap().attempt_count, 0);
    }

    #[tokio::test]
    async fn success_clears_error_and_counts() {
        let store = SqliteJobStore::connect_in_memory().await.unwrap();
        let account = AccountId::generate();
        let ok = store.enqueue(new_job(account, SyncDomain::Email, t0())).await.unwrap();
        let bad = store.enqueue(new_job(account, SyncDomain::Tasks, t0())).await.unwrap();
        store.enqueue(new_job(account, SyncDomain::Calendar, t0())).await.unwrap();

        store.claim(ok.id, t0()).await.unwrap();
        let ok = store
            .complete(&ok, &Decision::Succeed { items_synced: 5 }, t0())
            .await
            .unwrap();
        assert_eq!(ok.last_error, None);

        store.claim(bad.id, t0()).await.unwrap();
        store
            .complete(&bad, &Decision::DeadLetter { error: "401".into() }, t0())
            .await
            .unwrap();

        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(
            counts,
            QueueCounts {
                pending: 1,
                running: 0,
                succeeded: 1,
                dead_letter: 1,
            }
        );
        let dead = store.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, bad.id);
        assert_eq!(dead[0].last_error.as_deref(), Some("401"));
    }

    #[tokio::test]
    async fn recover_stale_counts_the_interrupted_attempt() {
        let store = SqliteJobStore::connect_in_memory().await.unwrap();
        let account = AccountId::generate();
        let mut last_chance = new_job(account, SyncDomain::Email, t0());
        last_chance.max_attempts = 1;
        let last_chance = store.enqueue(last_chance).await.unwrap();
        let retryable = store.enqueue(new_job(account, SyncDomain::Tasks, t0())).await.unwrap();
        store.claim(last_chance.id, t0()).await.unwrap();
        store.claim(retryable.id, t0()).await.unwrap();

        let now = t0() + ChronoDuration::minutes(30);
        let recovered = store.recover_stale(t0(), now).await.unwrap();
        assert_eq!(recovered.len(), 2);

        let dead = store.get(last_chance.id).await.unwrap().unwrap();
        assert_eq!(dead.status, JobStatus::DeadLetter);
        assert_eq!(dead.attempt_count, 1);

        let requeued = store.get(retryable.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(requeued.attempt_count, 1);
        assert_eq!(requeued.run_after, now);
        assert_eq!(requeued.last_error.as_deref(), Some(INTERRUPTED_ERROR));

        assert!(store.recover_stale(now, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn late_completion_cannot_land_on_a_new_claim() {
        let store = SqliteJobStore::connect_in_memory().await.unwrap();
        let mut new = new_job(AccountId::generate(), SyncDomain::Calendar, t0());
        new.max_attempts = 2;
        let job = store.enqueue(new).await.unwrap();

        let first = store.claim(job.id, t0()).await.unwrap().unwrap();
        let later = t0() + ChronoDuration::minutes(20);
        store.recover_stale(t0(), later).await.unwrap();
        let second = store.claim(job.id, later).await.unwrap().unwrap();

        let retry = Decision::Retry {
            run_after: later + ChronoDuration::seconds(30),
            error: "503".into(),
        };
        let err = store.complete(&first, &retry, later).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleClaim { claimed: 0, actual: 1, .. }));
        assert_eq!(store.get(job.id).await.unwrap().unwrap().attempt_count, 1);

        // The live attempt still completes, within the ceiling.
        let dead = store
            .complete(&second, &Decision::DeadLetter { error: "503 again".into() }, later)
            .await
            .unwrap();
        assert_eq!(dead.status, JobStatus::DeadLetter);
        assert_eq!(dead.attempt_count, 2);

        // Recovery keeps working for other rows.
        assert!(store.recover_stale(later, later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_removes_only_old_succeeded_rows() {
        let store = SqliteJobStore::connect_in_memory().await.unwrap();
        let job = store
            .enqueue(new_job(AccountId::generate(), SyncDomain::Email, t0()))
            .await
            .unwrap();
        store.claim(job.id, t0()).await.unwrap();
        store
            .complete(&job, &Decision::Succeed { items_synced: 0 }, t0())
            .await
            .unwrap();

        assert_eq!(store.purge_succeeded(t0()).await.unwrap(), 0);
        assert_eq!(store.purge_succeeded(t0() + ChronoDuration::days(1)).await.unwrap(), 1);
        assert_eq!(store.counts_by_status().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loom.db");

        let id = {
            let store = SqliteJobStore::connect(&path).await.unwrap();
            let job = store
                .enqueue(new_job(AccountId::generate(), SyncDomain::Calendar, t0()))
                .await
                .unwrap();
            store.close().await;
            job.id
        };

        let reopened = SqliteJobStore::connect(&path).await.unwrap();
        let job = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claimers_never_share_a_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");

        let seed = SqliteJobStore::connect(&path).await.unwrap();
        for i in 0..40 {
            seed.enqueue(new_job(AccountId::generate(), SyncDomain::Email, t0() + ChronoDuration::milliseconds(i)))
                .await
                .unwrap();
        }

        // Two handles on the same file stand in for two processes.
        let other = SqliteJobStore::connect(&path).await.unwrap();
        let now = t0() + ChronoDuration::seconds(1);
        let mut handles = Vec::new();
        for i in 0..6 {
            let store = if i % 2 == 0 { seed.clone() } else { other.clone() };
            handles.push(tokio::spawn(async move { store.claim_due(now, 40).await.unwrap() }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for job in handle.await.unwrap() {
                assert_eq!(job.status, JobStatus::Running);
                assert!(seen.insert(job.id), "job {} claimed twice", job.id);
            }
        }
        assert_eq!(seen.len(), 40);
        assert_eq!(seed.counts_by_status().await.unwrap().running, 40);
    }
}
