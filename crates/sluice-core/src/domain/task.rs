//! Task: the runtime object a worker executes.
//!
//! A `Task` owns its `TaskState` and is moved by value: launcher -> executor
//! queue -> worker -> tracker (-> executor again on retry).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ids::{JobId, TaskId};
use super::state::WorkingState;
use super::task_state::TaskState;
use crate::app::latch::CountDownLatch;
use crate::error::StateError;
use crate::metrics::MetricContext;
use crate::runtime::{TaskContext, TaskHandler};

/// Throughput counters of one task.
///
/// Shared between the running handler (through `TaskContext`) and the
/// periodic monitor, hence atomics.
#[derive(Debug, Default)]
pub struct TaskMetrics {
    records: AtomicU64,
    bytes: AtomicU64,
    samples: AtomicU64,
    sampled_records: AtomicU64,
    sampled_bytes: AtomicU64,
}

/// Point-in-time view of `TaskMetrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThroughputSnapshot {
    pub records: u64,
    pub bytes: u64,
}

impl TaskMetrics {
    pub fn add(&self, records: u64, bytes: u64) {
        self.records.fetch_add(records, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn current(&self) -> ThroughputSnapshot {
        ThroughputSnapshot {
            records: self.records.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    /// Take a sample of the current counters. Called by the task monitor.
    pub fn sample(&self) -> ThroughputSnapshot {
        let snapshot = self.current();
        self.sampled_records.store(snapshot.records, Ordering::Relaxed);
        self.sampled_bytes.store(snapshot.bytes, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
        snapshot
    }

    /// Most recent monitor sample.
    pub fn last_sample(&self) -> ThroughputSnapshot {
        ThroughputSnapshot {
            records: self.sampled_records.load(Ordering::Relaxed),
            bytes: self.sampled_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.records.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }
}

pub struct Task {
    state: TaskState,
    handler: Arc<dyn TaskHandler>,
    metrics: Arc<TaskMetrics>,
    metric_context: Option<Arc<MetricContext>>,
    cancellation: CancellationToken,
    completion: Option<Arc<CountDownLatch>>,

    /// Retry backoff: the worker does not start the attempt before this.
    not_before: Option<Instant>,
}

impl Task {
    pub fn new(
        state: TaskState,
        handler: Arc<dyn TaskHandler>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            state,
            handler,
            metrics: Arc::new(TaskMetrics::default()),
            metric_context: None,
            cancellation,
            completion: None,
            not_before: None,
        }
    }

    /// Latch counted down once when the task is finalized.
    pub fn with_completion_latch(mut self, latch: Arc<CountDownLatch>) -> Self {
        self.completion = Some(latch);
        self
    }

    /// Enable metrics for this task. `None` leaves them disabled.
    pub fn with_metric_context(mut self, context: Option<Arc<MetricContext>>) -> Self {
        self.metric_context = context;
        self
    }

    pub fn task_id(&self) -> &TaskId {
        self.state.task_id()
    }

    pub fn job_id(&self) -> &JobId {
        self.state.job_id()
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn working_state(&self) -> WorkingState {
        self.state.working_state()
    }

    pub fn handler(&self) -> Arc<dyn TaskHandler> {
        Arc::clone(&self.handler)
    }

    pub fn metrics(&self) -> &Arc<TaskMetrics> {
        &self.metrics
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metric_context.is_some()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn take_not_before(&mut self) -> Option<Instant> {
        self.not_before.take()
    }

    /// Everything the handler may see for this attempt.
    pub fn context(&self) -> TaskContext {
        TaskContext::new(
            self.state.job_id().clone(),
            self.state.task_id().clone(),
            self.state.retry_count(),
            self.state.properties().clone(),
            self.cancellation.clone(),
            Arc::clone(&self.metrics),
            self.metric_context.clone(),
        )
    }

    pub fn begin_attempt(&mut self) -> Result<(), StateError> {
        self.state.mark_running()
    }

    pub fn finish_attempt(
        &mut self,
        state: WorkingState,
        failure: Option<String>,
    ) -> Result<(), StateError> {
        self.state.mark_finished(state, failure)
    }

    /// Copy the final throughput counters into the task state.
    pub fn flush_metrics(&mut self) {
        if !self.metrics_enabled() {
            return;
        }
        let current = self.metrics.current();
        self.state.set_throughput(current.records, current.bytes);
        self.state
            .set_property("metrics.samples", self.metrics.sample_count().to_string());
    }

    /// Failed -> Pending for another attempt after `delay`.
    pub fn prepare_retry(&mut self, delay: Duration) -> Result<(), StateError> {
        self.state.reset_for_retry()?;
        self.metrics.reset();
        self.not_before = (!delay.is_zero()).then(|| Instant::now() + delay);
        Ok(())
    }

    /// The retry could not be submitted: back to Failed.
    pub fn abandon_retry(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        self.not_before = None;
        self.state.abandon_retry(reason)
    }

    /// Count down the completion latch. Only the first call has an effect.
    pub fn mark_completion(&mut self) {
        if let Some(latch) = self.completion.take() {
            latch.count_down();
        }
    }

    pub fn into_state(self) -> TaskState {
        self.state
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("task_id", self.task_id())
            .field("working_state", &self.working_state())
            .field("retry_count", &self.state.retry_count())
            .field("metrics_enabled", &self.metrics_enabled())
            .field("not_before", &self.not_before)
            .finish_non_exhaustive()
    }
}
