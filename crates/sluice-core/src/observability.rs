use serde::{Deserialize, Serialize};

use crate::domain::WorkingState;

/// Number of tasks per working state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub committed: usize,
}

impl TaskCounts {
    pub fn record(&mut self, state: WorkingState) {
        match state {
            WorkingState::Pending => self.pending += 1,
            WorkingState::Running => self.running += 1,
            WorkingState::Successful => self.successful += 1,
            WorkingState::Failed => self.failed += 1,
            WorkingState::Cancelled => self.cancelled += 1,
            WorkingState::Committed => self.committed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.successful + self.failed + self.cancelled + self.committed
    }
}
