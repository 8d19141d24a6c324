//! Per-run aggregate of attempt results.

use serde::{Deserialize, Serialize};

use super::decision::Decision;
use super::job::SyncDomain;

/// Counters folded from every decision persisted during one run.
///
/// Addition is commutative, so completion order does not matter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunSummary {
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub retried_jobs: usize,
    pub email_messages_synced: usize,
    pub calendar_events_synced: usize,
    pub tasks_synced: usize,
}

impl SyncRunSummary {
    pub fn record(&mut self, domain: SyncDomain, decision: &Decision) {
        match decision {
            Decision::Succeed { items_synced } => {
                self.completed_jobs += 1;
                match domain {
                    SyncDomain::Email => self.email_messages_synced += items_synced,
                    SyncDomain::Calendar => self.calendar_events_synced += items_synced,
                    SyncDomain::Tasks => self.tasks_synced += items_synced,
                }
            }
            Decision::Retry { .. } => self.retried_jobs += 1,
            Decision::DeadLetter { .. } => self.failed_jobs += 1,
        }
    }

    pub fn merge(&mut self, other: &SyncRunSummary) {
        self.completed_jobs += other.completed_jobs;
        self.failed_jobs += other.failed_jobs;
        self.retried_jobs += other.retried_jobs;
        self.email_messages_synced += other.email_messages_synced;
        self.calendar_events_synced += other.calendar_events_synced;
        self.tasks_synced += other.tasks_synced;
    }

    /// Attempts folded into this summary.
    pub fn attempts(&self) -> usize {
        self.completed_jobs + self.failed_jobs + self.retried_jobs
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn items_go_to_their_domain_counter() {
        let mut summary = SyncRunSummary::default();
        summary.record(SyncDomain::Email, &Decision::Succeed { items_synced: 10 });
        summary.record(SyncDomain::Calendar, &Decision::Succeed { items_synced: 3 });
        summary.record(SyncDomain::Tasks, &Decision::Succeed { items_synced: 0 });

        assert_eq!(summary.completed_jobs, 3);
        assert_eq!(summary.email_messages_synced, 10);
        assert_eq!(summary.calendar_events_synced, 3);
        assert_eq!(summary.tasks_synced, 0);
    }

    #[test]
    fn failures_count_but_add_no_items() {
        let mut summary = SyncRunSummary::default();
        summary.record(
            SyncDomain::Email,
            &Decision::Retry {
                run_after: Utc::now(),
                error: "503".into(),
            },
        );
        summary.record(SyncDomain::Email, &Decision::DeadLetter { error: "401".into() });

        assert_eq!(summary.retried_jobs, 1);
        assert_eq!(summary.failed_jobs, 1);
        assert_eq!(summary.email_messages_synced, 0);
        assert_eq!(summary.attempts(), 2);
    }

    #[test]
    fn merge_is_order_independent() {
        let mut a = SyncRunSummary::default();
        a.record(SyncDomain::Email, &Decision::Succeed { items_synced: 4 });
        let mut b = SyncRunSummary::default();
        b.record(SyncDomain::Tasks, &Decision::DeadLetter { error: "x".into() });

        let mut ab = a;
        ab.merge(&b);
        let mut ba = b;
        ba.merge(&a);

        assert_eq!(ab, ba);
        assert!(!ab.is_empty());
        assert!(SyncRunSummary::default().is_empty());
    }
}
