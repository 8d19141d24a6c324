//! Concurrency governor: bounded in-flight slots.
//!
//! Four budgets are checked together for every slot:
//! global, per domain, per account, and per (account, domain).
//! A slot is held by a [`SlotPermit`] and returned when the permit drops.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::SyncJob;
use crate::domain::{AccountId, SyncDomain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyLimits {
    pub max_global: usize,
    pub max_per_domain: usize,
    pub max_per_account: usize,
    pub max_per_account_domain: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            max_global: 4,
            max_per_domain: 4,
            max_per_account: 2,
            max_per_account_domain: 1,
        }
    }
}

/// How due candidates are ordered before slots are handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessPolicy {
    /// One job per account per cycle before any account gets a second.
    #[default]
    RoundRobinByAccount,

    /// Store order (oldest due first).
    OldestFirst,
}

#[derive(Debug, Default)]
struct InFlight {
    global: usize,
    by_domain: HashMap<SyncDomain, usize>,
    by_account: HashMap<AccountId, usize>,
    by_account_domain: HashMap<(AccountId, SyncDomain), usize>,
}

impl InFlight {
    fn admits(&self, limits: &ConcurrencyLimits, account: AccountId, domain: SyncDomain) -> bool {
        let count = |n: Option<&usize>| n.copied().unwrap_or(0);
        self.global < limits.max_global
            && count(self.by_domain.get(&domain)) < limits.max_per_domain
            && count(self.by_account.get(&account)) < limits.max_per_account
            && count(self.by_account_domain.get(&(account, domain))) < limits.max_per_account_domain
    }

    fn acquire(&mut self, account: AccountId, domain: SyncDomain) {
        self.global += 1;
        *self.by_domain.entry(domain).or_insert(0) += 1;
        *self.by_account.entry(account).or_insert(0) += 1;
        *self.by_account_domain.entry((account, domain)).or_insert(0) += 1;
    }

    fn release(&mut self, account: AccountId, domain: SyncDomain) {
        self.global = self.global.saturating_sub(1);
        decrement(&mut self.by_domain, domain);
        decrement(&mut self.by_account, account);
        decrement(&mut self.by_account_domain, (account, domain));
    }
}

fn decrement<K: std::hash::Hash + Eq>(counts: &mut HashMap<K, usize>, key: K) {
    if let Some(active) = counts.get_mut(&key) {
        *active = active.saturating_sub(1);
        if *active == 0 {
            counts.remove(&key);
        }
    }
}

/// Shared slot accounting. Clones share the same counters, so limits hold
/// across overlapping runs on one process.
#[derive(Debug, Clone)]
pub struct Governor {
    limits: ConcurrencyLimits,
    fairness: FairnessPolicy,
    state: Arc<Mutex<InFlight>>,
}

impl Governor {
    pub fn new(limits: ConcurrencyLimits, fairness: FairnessPolicy) -> Self {
        Self {
            limits,
            fairness,
            state: Arc::new(Mutex::new(InFlight::default())),
        }
    }

    pub fn limits(&self) -> ConcurrencyLimits {
        self.limits
    }

    pub fn fairness(&self) -> FairnessPolicy {
        self.fairness
    }

    fn lock(&self) -> MutexGuard<'_, InFlight> {
        lock_in_flight(&self.state)
    }

    /// Global headroom right now.
    pub fn available(&self) -> usize {
        self.limits.max_global.saturating_sub(self.lock().global)
    }

    pub fn try_acquire(&self, account: AccountId, domain: SyncDomain) -> Option<SlotPermit> {
        let mut state = self.lock();
        if !state.admits(&self.limits, account, domain) {
            return None;
        }
        state.acquire(account, domain);
        Some(self.permit(account, domain))
    }

    /// Hands out as many slots as the budgets allow, in fairness order.
    ///
    /// Candidates that do not fit are dropped from this pass; they stay
    /// pending in the store.
    pub fn allocate(&self, candidates: Vec<SyncJob>) -> Vec<(SyncJob, SlotPermit)> {
        let ordered = match self.fairness {
            FairnessPolicy::RoundRobinByAccount => interleave_by_account(candidates),
            FairnessPolicy::OldestFirst => candidates,
        };

        let mut state = self.lock();
        let mut granted = Vec::new();
        for job in ordered {
            if state.global >= self.limits.max_global {
                break;
            }
            if !state.admits(&self.limits, job.account_id, job.domain) {
                debug!(job_id = %job.id, account_id = %job.account_id, domain = %job.domain, "no slot this pass");
                continue;
            }
            state.acquire(job.account_id, job.domain);
            let permit = self.permit(job.account_id, job.domain);
            granted.push((job, permit));
        }
        granted
    }

    pub fn snapshot(&self) -> InFlightSnapshot {
        let state = self.lock();
        InFlightSnapshot {
            global: state.global,
            by_domain: state.by_domain.clone(),
            by_account: state.by_account.clone(),
            by_account_domain: state.by_account_domain.clone(),
        }
    }

    fn permit(&self, account: AccountId, domain: SyncDomain) -> SlotPermit {
        SlotPermit {
            state: Arc::clone(&self.state),
            account,
            domain,
        }
    }
}

fn lock_in_flight(state: &Mutex<InFlight>) -> MutexGuard<'_, InFlight> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One granted execution slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct SlotPermit {
    state: Arc<Mutex<InFlight>>,
    account: AccountId,
    domain: SyncDomain,
}

impl SlotPermit {
    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn domain(&self) -> SyncDomain {
        self.domain
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        lock_in_flight(&self.state).release(self.account, self.domain);
    }
}

/// Point-in-time copy of the in-flight counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InFlightSnapshot {
    pub global: usize,
    pub by_domain: HashMap<SyncDomain, usize>,
    pub by_account: HashMap<AccountId, usize>,
    pub by_account_domain: HashMap<(AccountId, SyncDomain), usize>,
}

/// Cycles through accounts in first-seen order, one job per account per cycle.
/// Order within an account is preserved.
pub fn interleave_by_account(candidates: Vec<SyncJob>) -> Vec<SyncJob> {
    let total = candidates.len();
    let mut accounts: Vec<AccountId> = Vec::new();
    let mut queues: HashMap<AccountId, VecDeque<SyncJob>> = HashMap::new();
    for job in candidates {
        let queue = queues.entry(job.account_id).or_insert_with(|| {
            accounts.push(job.account_id);
            VecDeque::new()
        });
        queue.push_back(job);
    }

    let mut ordered = Vec::with_capacity(total);
    while ordered.len() < total {
        for account in &accounts {
            if let Some(job) = queues.get_mut(account).and_then(VecDeque::pop_front) {
                ordered.push(job);
            }
        }
    }
    ordered
}
