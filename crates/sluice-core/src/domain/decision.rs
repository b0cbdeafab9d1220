//! Decision model: what happens to a task after an attempt completes.
//!
//! The `Decider` trait looks at the finished attempt and returns either a
//! retry (with backoff) or a finalization. Applying the decision is the
//! tracker's job.

use std::time::Duration;

use super::retry::RetryPolicy;
use super::state::WorkingState;
use super::task_state::TaskState;

/// The next action to take for a task whose attempt just completed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Reset to Pending and resubmit after `delay`.
    Retry { delay: Duration, reason: String },

    /// Merge the task state into the job state as-is.
    Finalize { reason: String },
}

/// Decides retry vs finalize. Implementations must not mutate anything.
pub trait Decider: Send + Sync {
    /// * `task_state` - the state of the attempt that just finished
    /// * `job_cancelled` - whether the owning job has been cancelled
    fn decide(&self, task_state: &TaskState, job_cancelled: bool) -> Decision;
}

/// Retry failed tasks while `retry_count < max_task_retries`.
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    max_task_retries: u32,
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(max_task_retries: u32, retry_policy: RetryPolicy) -> Self {
        Self {
            max_task_retries,
            retry_policy,
        }
    }

    pub fn max_task_retries(&self) -> u32 {
        self.max_task_retries
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task_state: &TaskState, job_cancelled: bool) -> Decision {
        let state = task_state.working_state();
        if state != WorkingState::Failed {
            return Decision::Finalize {
                reason: format!("attempt finished with state {state}"),
            };
        }
        if job_cancelled {
            return Decision::Finalize {
                reason: "job is cancelled".to_string(),
            };
        }

        let retries = task_state.retry_count();
        if retries >= self.max_task_retries {
            return Decision::Finalize {
                reason: format!(
                    "max retries reached: {}/{}",
                    retries, self.max_task_retries
                ),
            };
        }

        let delay = self.retry_policy.next_delay(retries + 1);
        Decision::Retry {
            delay,
            reason: format!(
                "retry {}/{} after {:?}",
                retries + 1,
                self.max_task_retries,
                delay
            ),
        }
    }
}
