//! Shared fixtures for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{Account, AccountId, JobId, SyncDomain, SyncError, SyncReport};
use crate::ports::SyncCollaborator;
use crate::queue::{JobStatus, NewSyncJob, SyncJob};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub(crate) fn account() -> Account {
    let id = AccountId::generate();
    Account::new(id, "imap", format!("Account {id}"), "owner@example.com")
}

pub(crate) fn new_job(account_id: AccountId, domain: SyncDomain, run_after: DateTime<Utc>) -> NewSyncJob {
    NewSyncJob {
        id: JobId::generate(),
        account_id,
        domain,
        payload: serde_json::json!({}),
        max_attempts: 5,
        run_after,
        created_at: run_after,
    }
}

/// Pending job, due a minute before `t0()`.
pub(crate) fn pending_job(max_attempts: u32) -> SyncJob {
    let mut job = new_job(
        AccountId::generate(),
        SyncDomain::Email,
        t0() - chrono::Duration::minutes(1),
    );
    job.max_attempts = max_attempts;
    job.into_pending()
}

/// Pending job due at `t0()`.
pub(crate) fn job_for(account_id: AccountId, domain: SyncDomain) -> SyncJob {
    new_job(account_id, domain, t0()).into_pending()
}

/// Checks the invariants every stored job must satisfy.
pub(crate) fn assert_job_invariants(job: &SyncJob) {
    assert!(job.max_attempts >= 1, "{}: max_attempts must be >= 1", job.id);
    assert!(
        job.attempt_count <= job.max_attempts,
        "{}: attempt_count {} > max_attempts {}",
        job.id,
        job.attempt_count,
        job.max_attempts
    );
    if job.status == JobStatus::Succeeded {
        assert!(job.last_error.is_none(), "{}: succeeded with last_error", job.id);
    }
}

/// Records how many collaborator calls overlap, per key.
#[derive(Debug, Default)]
pub(crate) struct ConcurrencyTracker {
    state: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    global: usize,
    peak_global: usize,
    by_domain: HashMap<SyncDomain, usize>,
    peak_per_domain: usize,
    by_account: HashMap<AccountId, usize>,
    peak_per_account: usize,
    by_pair: HashMap<(AccountId, SyncDomain), usize>,
    peak_per_pair: usize,
}

impl ConcurrencyTracker {
    fn enter(self: &Arc<Self>, account: AccountId, domain: SyncDomain) -> TrackerGuard {
        let mut s = self.state.lock().unwrap();
        s.global += 1;
        s.peak_global = s.peak_global.max(s.global);

        let d = s.by_domain.entry(domain).or_insert(0);
        *d += 1;
        let d = *d;
        s.peak_per_domain = s.peak_per_domain.max(d);

        let a = s.by_account.entry(account).or_insert(0);
        *a += 1;
        let a = *a;
        s.peak_per_account = s.peak_per_account.max(a);

        let p = s.by_pair.entry((account, domain)).or_insert(0);
        *p += 1;
        let p = *p;
        s.peak_per_pair = s.peak_per_pair.max(p);

        TrackerGuard {
            tracker: Arc::clone(self),
            account,
            domain,
        }
    }

    fn exit(&self, account: AccountId, domain: SyncDomain) {
        let mut s = self.state.lock().unwrap();
        s.global -= 1;
        *s.by_domain.get_mut(&domain).unwrap() -= 1;
        *s.by_account.get_mut(&account).unwrap() -= 1;
        *s.by_pair.get_mut(&(account, domain)).unwrap() -= 1;
    }

    pub(crate) fn peak_global(&self) -> usize {
        self.state.lock().unwrap().peak_global
    }

    pub(crate) fn peak_per_domain(&self) -> usize {
        self.state.lock().unwrap().peak_per_domain
    }

    pub(crate) fn peak_per_account(&self) -> usize {
        self.state.lock().unwrap().peak_per_account
    }

    pub(crate) fn peak_per_pair(&self) -> usize {
        self.state.lock().unwrap().peak_per_pair
    }
}

struct TrackerGuard {
    tracker: Arc<ConcurrencyTracker>,
    account: AccountId,
    domain: SyncDomain,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.tracker.exit(self.account, self.domain);
    }
}

/// One scripted collaborator response.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Ok(usize),
    Transient(&'static str),
    Permanent(&'static str),
    Panic,
    Hang,
}

/// Collaborator that replays a script, then repeats a fallback step.
pub(crate) struct ScriptedCollaborator {
    domain: SyncDomain,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Duration,
    calls: AtomicUsize,
    seen: Mutex<Vec<AccountId>>,
    tracker: Option<Arc<ConcurrencyTracker>>,
}

impl ScriptedCollaborator {
    pub(crate) fn scripted(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            domain: SyncDomain::Email,
            script: Mutex::new(steps.into_iter().collect()),
            fallback: Step::Ok(1),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            tracker: None,
        }
    }

    pub(crate) fn always(step: Step) -> Self {
        let mut collaborator = Self::scripted([]);
        collaborator.fallback = step;
        collaborator
    }

    pub(crate) fn succeeding(items: usize) -> Self {
        Self::always(Step::Ok(items))
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The tracker needs the domain to key its counters.
    pub(crate) fn with_tracker(mut self, domain: SyncDomain, tracker: Arc<ConcurrencyTracker>) -> Self {
        self.domain = domain;
        self.tracker = Some(tracker);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Accounts in call order.
    pub(crate) fn seen(&self) -> Vec<AccountId> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncCollaborator for ScriptedCollaborator {
    async fn sync(
        &self,
        account: &Account,
        _payload: &serde_json::Value,
    ) -> Result<SyncReport, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(account.id);
        let _guard = self.tracker.as_ref().map(|p| p.enter(account.id, self.domain));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Ok(items) => Ok(SyncReport::new(items)),
            Step::Transient(message) => Err(SyncError::transient(message)),
            Step::Permanent(message) => Err(SyncError::permanent(message)),
            Step::Panic => panic!("scripted collaborator panic"),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(SyncReport::default())
            }
        }
    }
}
