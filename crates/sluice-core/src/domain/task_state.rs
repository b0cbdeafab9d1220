//! Task state record: one per task, outlives the task itself.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId};
use super::state::WorkingState;
use crate::error::StateError;

/// Lifecycle and attributes of a single task.
///
/// Design:
/// - This is the record that ends up in `JobState` and in state stores.
/// - State transitions happen through methods, never by field access.
/// - `properties` holds configuration copied from the work unit plus derived
///   metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    job_id: JobId,
    task_id: TaskId,
    task_type: String,
    working_state: WorkingState,

    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    duration_ms: Option<u64>,

    /// Number of retries issued so far.
    #[serde(default)]
    retry_count: u32,

    #[serde(default)]
    records_written: u64,
    #[serde(default)]
    bytes_written: u64,

    /// Last failure message (if any).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

impl TaskState {
    pub fn new(job_id: JobId, task_id: TaskId, task_type: impl Into<String>) -> Self {
        Self {
            job_id,
            task_id,
            task_type: task_type.into(),
            working_state: WorkingState::Pending,
            start_time: None,
            end_time: None,
            duration_ms: None,
            retry_count: 0,
            records_written: 0,
            bytes_written: 0,
            failure: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn working_state(&self) -> WorkingState {
        self.working_state
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Move to `next`, rejecting anything the state machine does not allow.
    pub fn transition(&mut self, next: WorkingState) -> Result<(), StateError> {
        if !self.working_state.can_transition_to(next) {
            return Err(StateError::IllegalTransition {
                from: self.working_state,
                to: next,
            });
        }
        self.working_state = next;
        Ok(())
    }

    /// Mark as running (a new attempt starts now).
    pub fn mark_running(&mut self) -> Result<(), StateError> {
        self.transition(WorkingState::Running)?;
        self.start_time = Some(Utc::now());
        self.end_time = None;
        self.duration_ms = None;
        Ok(())
    }

    /// Mark the current attempt as finished with `state`.
    pub fn mark_finished(
        &mut self,
        state: WorkingState,
        failure: Option<String>,
    ) -> Result<(), StateError> {
        self.transition(state)?;
        let now = Utc::now();
        self.end_time = Some(now);
        self.duration_ms = self
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0) as u64);
        if failure.is_some() {
            self.failure = failure;
        }
        Ok(())
    }

    /// Failed -> Pending, counting one more retry.
    pub fn reset_for_retry(&mut self) -> Result<(), StateError> {
        self.transition(WorkingState::Pending)?;
        self.retry_count += 1;
        Ok(())
    }

    /// Undo `reset_for_retry` when the retry could not be submitted.
    pub fn abandon_retry(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        self.transition(WorkingState::Failed)?;
        self.retry_count = self.retry_count.saturating_sub(1);
        self.failure = Some(reason.into());
        Ok(())
    }

    /// Successful -> Committed.
    pub fn commit(&mut self) -> Result<(), StateError> {
        self.transition(WorkingState::Committed)
    }

    pub fn set_throughput(&mut self, records_written: u64, bytes_written: u64) {
        self.records_written = records_written;
        self.bytes_written = bytes_written;
    }
}
