use serde::{Deserialize, Serialize};

use crate::queue::JobStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub dead_letter: usize,
}

impl QueueCounts {
    pub fn add(&mut self, status: JobStatus, n: usize) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Running => self.running += n,
            JobStatus::Succeeded => self.succeeded += n,
            JobStatus::DeadLetter => self.dead_letter += n,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.dead_letter
    }

    /// Nothing pending or running.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}
