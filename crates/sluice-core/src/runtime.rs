use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{JobId, TaskId, TaskMetrics};
use crate::error::{RegistryError, TaskFailure};
use crate::metrics::{BYTES, MetricContext, RECORDS, RECORDS_RATE};

/// A handler for a specific task type.
///
/// The handler gets a `TaskContext` with the work unit's properties and the
/// job's cancellation token. Long-running handlers should call
/// `TaskContext::checkpoint` between units of work.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &TaskContext) -> Result<(), TaskFailure>;
}

/// Registry of handlers (task_type -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, behind `Arc`).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a task type. Duplicates are rejected.
    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        let task_type = task_type.into();
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// What a handler sees of the task it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    job_id: JobId,
    task_id: TaskId,
    attempt: u32,
    properties: BTreeMap<String, String>,
    cancellation: CancellationToken,
    metrics: Arc<TaskMetrics>,
    metric_context: Option<Arc<MetricContext>>,
}

impl TaskContext {
    pub(crate) fn new(
        job_id: JobId,
        task_id: TaskId,
        attempt: u32,
        properties: BTreeMap<String, String>,
        cancellation: CancellationToken,
        metrics: Arc<TaskMetrics>,
        metric_context: Option<Arc<MetricContext>>,
    ) -> Self {
        Self {
            job_id,
            task_id,
            attempt,
            properties,
            cancellation,
            metrics,
            metric_context,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// 0 for the first attempt, n for the n-th retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cooperative cancellation point.
    pub fn checkpoint(&self) -> Result<(), TaskFailure> {
        if self.cancellation.is_cancelled() {
            return Err(TaskFailure::Cancelled);
        }
        Ok(())
    }

    /// Account for output written by this attempt.
    pub fn record_written(&self, records: u64, bytes: u64) {
        self.metrics.add(records, bytes);
        if let Some(context) = &self.metric_context {
            context.counter(RECORDS).inc(records);
            context.counter(BYTES).inc(bytes);
            context.meter(RECORDS_RATE).mark(records);
        }
    }
}
