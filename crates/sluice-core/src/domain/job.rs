//! Job state aggregate.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::ids::{JobId, TaskId};
use super::state::WorkingState;
use super::task_state::TaskState;
use crate::error::StateError;
use crate::observability::TaskCounts;

/// How the final job state is derived once every task is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobCommitPolicy {
    /// Commit only if every task succeeded.
    #[default]
    Full,

    /// Commit successful tasks even if some failed.
    Partial,
}

/// State of one job run, aggregated from its tasks.
///
/// Design:
/// - Task states are kept in insertion order and indexed by task id.
/// - `add_task_state` is idempotent by id: inserting an id twice overwrites
///   the earlier record in place and the collection does not grow.
#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    job_id: JobId,
    job_name: String,
    state: WorkingState,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,

    /// Number of tasks the job was expected to run.
    task_count: usize,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,

    task_states: Vec<TaskState>,

    #[serde(skip)]
    index: HashMap<TaskId, usize>,
}

/// `JobState` shared between the launcher, the tracker and the collector.
pub type SharedJobState = Arc<RwLock<JobState>>;

impl JobState {
    pub fn new(job_id: JobId, job_name: impl Into<String>) -> Self {
        Self {
            job_id,
            job_name: job_name.into(),
            state: WorkingState::Pending,
            start_time: None,
            end_time: None,
            task_count: 0,
            properties: BTreeMap::new(),
            task_states: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn into_shared(self) -> SharedJobState {
        Arc::new(RwLock::new(self))
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn state(&self) -> WorkingState {
        self.state
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn transition(&mut self, next: WorkingState) -> Result<(), StateError> {
        if !self.state.can_transition_to(next) {
            return Err(StateError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_finished() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    /// Pending -> Running, remembering how many tasks will be launched.
    pub fn mark_started(&mut self, task_count: usize) -> Result<(), StateError> {
        self.transition(WorkingState::Running)?;
        self.task_count = task_count;
        self.start_time = Some(Utc::now());
        Ok(())
    }

    /// Move to `Cancelled`. Already cancelled is a no-op.
    pub fn mark_cancelled(&mut self) -> Result<(), StateError> {
        if self.state == WorkingState::Cancelled {
            return Ok(());
        }
        self.transition(WorkingState::Cancelled)
    }

    /// Insert or overwrite the record for `task_state.task_id()`.
    ///
    /// Returns `true` if the id was not present before.
    pub fn add_task_state(&mut self, task_state: TaskState) -> bool {
        match self.index.get(task_state.task_id()) {
            Some(&pos) => {
                self.task_states[pos] = task_state;
                false
            }
            None => {
                self.index
                    .insert(task_state.task_id().clone(), self.task_states.len());
                self.task_states.push(task_state);
                true
            }
        }
    }

    /// Insert only if the id is not known yet. Returns `true` if inserted.
    pub fn add_task_state_if_absent(&mut self, task_state: TaskState) -> bool {
        if self.index.contains_key(task_state.task_id()) {
            return false;
        }
        self.add_task_state(task_state)
    }

    pub fn contains_task(&self, task_id: &TaskId) -> bool {
        self.index.contains_key(task_id)
    }

    pub fn task_state(&self, task_id: &TaskId) -> Option<&TaskState> {
        self.index.get(task_id).map(|&pos| &self.task_states[pos])
    }

    /// Task states in the order they were first merged.
    pub fn task_states(&self) -> &[TaskState] {
        &self.task_states
    }

    pub fn completed_tasks(&self) -> usize {
        self.task_states
            .iter()
            .filter(|ts| ts.working_state().is_finished())
            .count()
    }

    pub fn task_counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for ts in &self.task_states {
            counts.record(ts.working_state());
        }
        counts
    }

    /// Every expected task is present and succeeded (or was committed).
    pub fn is_all_successful(&self) -> bool {
        self.task_states.len() == self.task_count
            && self.task_states.iter().all(|ts| {
                matches!(
                    ts.working_state(),
                    WorkingState::Successful | WorkingState::Committed
                )
            })
    }

    /// Apply the commit step and settle the job-level state.
    ///
    /// The job ends `Committed` when every task succeeded, `Failed` otherwise.
    /// Under `Partial`, successful tasks are committed even if the job fails.
    pub fn resolve_final_state(
        &mut self,
        policy: JobCommitPolicy,
    ) -> Result<WorkingState, StateError> {
        let all_successful = self.is_all_successful();

        if all_successful || policy == JobCommitPolicy::Partial {
            for ts in self
                .task_states
                .iter_mut()
                .filter(|ts| ts.working_state() == WorkingState::Successful)
            {
                ts.commit()?;
            }
        }

        if all_successful {
            self.transition(WorkingState::Successful)?;
            self.transition(WorkingState::Committed)?;
        } else {
            self.transition(WorkingState::Failed)?;
        }
        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn job() -> JobState {
        JobState::new(JobId::new("job_test_1"), "test")
    }

    fn finished(job: &JobState, seq: usize, state: WorkingState) -> TaskState {
        let mut ts = TaskState::new(job.job_id().clone(), job.job_id().task_id(seq), "copy");
        ts.mark_running().unwrap();
        ts.mark_finished(state, None).unwrap();
        ts
    }

    #[test]
    fn add_task_state_is_idempotent_by_id() {
        let mut job = job();
        let first = finished(&job, 0, WorkingState::Failed);
        let second = finished(&job, 0, WorkingState::Successful);

        assert!(job.add_task_state(first));
        assert!(!job.add_task_state(second));

        assert_eq!(job.task_states().len(), 1);
        assert_eq!(
            job.task_state(&job.job_id().task_id(0)).map(|ts| ts.working_state()),
            Some(WorkingState::Successful)
        );
    }

    #[test]
    fn add_if_absent_keeps_existing_record() {
        let mut job = job();
        assert!(job.add_task_state_if_absent(finished(&job, 0, WorkingState::Successful)));
        assert!(!job.add_task_state_if_absent(finished(&job, 0, WorkingState::Failed)));

        assert_eq!(job.task_states()[0].working_state(), WorkingState::Successful);
    }

    #[test]
    fn task_states_keep_insertion_order() {
        let mut job = job();
        for seq in [2, 0, 1] {
            job.add_task_state(finished(&job, seq, WorkingState::Successful));
        }
        let ids: Vec<_> = job
            .task_states()
            .iter()
            .map(|ts| ts.task_id().as_str().to_string())
            .collect();
        assert_eq!(ids, ["task_test_1_2", "task_test_1_0", "task_test_1_1"]);
    }

    #[test]
    fn counts_by_working_state() {
        let mut job = job();
        job.add_task_state(finished(&job, 0, WorkingState::Successful));
        job.add_task_state(finished(&job, 1, WorkingState::Failed));
        job.add_task_state(finished(&job, 2, WorkingState::Failed));

        let counts = job.task_counts();
        assert_eq!(counts.successful, 1);
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.total(), 3);
        assert_eq!(job.completed_tasks(), 3);
    }

    #[rstest]
    #[case::full(JobCommitPolicy::Full)]
    #[case::partial(JobCommitPolicy::Partial)]
    fn all_successful_job_is_committed(#[case] policy: JobCommitPolicy) {
        let mut job = job();
        job.mark_started(2).unwrap();
        job.add_task_state(finished(&job, 0, WorkingState::Successful));
        job.add_task_state(finished(&job, 1, WorkingState::Successful));

        assert_eq!(job.resolve_final_state(policy).unwrap(), WorkingState::Committed);
        assert!(
            job.task_states()
                .iter()
                .all(|ts| ts.working_state() == WorkingState::Committed)
        );
        assert!(job.duration_ms().is_some());
    }

    #[rstest]
    #[case::full(JobCommitPolicy::Full, WorkingState::Successful)]
    #[case::partial(JobCommitPolicy::Partial, WorkingState::Committed)]
    fn failed_task_fails_the_job(
        #[case] policy: JobCommitPolicy,
        #[case] expected_first: WorkingState,
    ) {
        let mut job = job();
        job.mark_started(2).unwrap();
        job.add_task_state(finished(&job, 0, WorkingState::Successful));
        job.add_task_state(finished(&job, 1, WorkingState::Failed));

        assert_eq!(job.resolve_final_state(policy).unwrap(), WorkingState::Failed);
        assert_eq!(job.task_states()[0].working_state(), expected_first);
        assert_eq!(job.task_states()[1].working_state(), WorkingState::Failed);
    }

    #[test]
    fn missing_task_states_are_not_all_successful() {
        let mut job = job();
        job.mark_started(2).unwrap();
        job.add_task_state(finished(&job, 0, WorkingState::Successful));
        assert!(!job.is_all_successful());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut job = job();
        job.mark_started(1).unwrap();
        job.mark_cancelled().unwrap();
        job.mark_cancelled().unwrap();
        assert_eq!(job.state(), WorkingState::Cancelled);
    }

    #[test]
    fn serializes_task_states_without_index() {
        let mut job = job();
        job.add_task_state(finished(&job, 0, WorkingState::Successful));

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["job_id"], "job_test_1");
        assert_eq!(value["task_states"][0]["working_state"], "SUCCESSFUL");
        assert!(value.get("index").is_none());
    }
}
