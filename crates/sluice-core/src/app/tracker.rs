//! TaskStateTracker - タスク状態の追跡
//!
//! 実行中はモニタで進捗を採取し、試行が終わったらリトライか確定かを決める。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::monitor::{MonitorHandle, MonitorScheduler};
use crate::domain::{CompletionEvent, Decider, Decision, SharedJobState, Task, TaskId};
use crate::impls::EventBus;
use crate::metrics::JobMetrics;
use crate::worker::TaskExecutor;

/// launcher（登録）と worker（試行完了）からタスクを受け取る
#[async_trait]
pub trait TaskStateTracker: Send + Sync {
    /// 投入直前のタスクのモニタを始める
    fn register_new_task(&self, task: &Task);

    /// 試行ごとに worker から 1 回だけ呼ばれる
    async fn on_task_completion(&self, task: Task);
}

/// このプロセス内で動くタスク用の tracker
///
/// 1 job につき 1 インスタンス。
pub struct LocalTaskStateTracker {
    job_state: SharedJobState,
    executor: Arc<TaskExecutor>,
    event_bus: Arc<EventBus>,
    decider: Arc<dyn Decider>,
    monitors: MonitorScheduler,
    report_interval: Duration,
    handles: DashMap<TaskId, MonitorHandle>,
    job_cancellation: CancellationToken,
    job_metrics: Option<Arc<JobMetrics>>,
}

impl LocalTaskStateTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_state: SharedJobState,
        executor: Arc<TaskExecutor>,
        event_bus: Arc<EventBus>,
        decider: Arc<dyn Decider>,
        max_concurrent_monitors: usize,
        report_interval: Duration,
        job_cancellation: CancellationToken,
        job_metrics: Option<Arc<JobMetrics>>,
    ) -> Self {
        Self {
            job_state,
            executor,
            event_bus,
            decider,
            monitors: MonitorScheduler::new(max_concurrent_monitors),
            report_interval,
            handles: DashMap::new(),
            job_cancellation,
            job_metrics,
        }
    }

    /// `task_id` のモニタを止める。未登録なら何もしない。
    pub fn unregister_task(&self, task_id: &TaskId) {
        if let Some((_, handle)) = self.handles.remove(task_id) {
            handle.cancel();
        }
    }

    pub fn monitored_tasks(&self) -> usize {
        self.handles.len()
    }

    /// 全モニタを止め、以後の登録を拒否する
    pub fn shutdown(&self) {
        self.monitors.shutdown();
        self.handles.clear();
    }

    /// 判定までの前処理。decider が panic すればここも panic する。
    fn prepare(&self, task: &mut Task) -> Decision {
        task.flush_metrics();
        self.unregister_task(task.task_id());
        self.decider
            .decide(task.state(), self.job_cancellation.is_cancelled())
    }

    async fn retry(&self, mut task: Task, delay: Duration, reason: String) {
        if let Err(e) = task.prepare_retry(delay) {
            error!(task_id = %task.task_id(), error = %e, "could not reset task for retry");
            self.finalize(task).await;
            return;
        }

        info!(
            task_id = %task.task_id(),
            retry_count = task.state().retry_count(),
            %reason,
            "Retrying task"
        );
        self.register_new_task(&task);
        let task_id = task.task_id().clone();

        match self.executor.retry(task) {
            Ok(()) => {
                if let Some(metrics) = &self.job_metrics {
                    metrics.record_retry();
                }
            }
            Err(rejected) => {
                let error = rejected.error();
                let mut task = rejected.into_inner();
                self.unregister_task(&task_id);
                error!(task_id = %task_id, error = %error, "retry submission rejected");
                if let Err(e) = task.abandon_retry(format!("retry submission rejected: {error}")) {
                    warn!(task_id = %task_id, error = %e, "could not restore failed state");
                }
                self.finalize(task).await;
            }
        }
    }

    /// JobState にマージし、latch を進めてイベントを発行する
    async fn finalize(&self, mut task: Task) {
        let task_state = task.state().clone();
        let inserted = self
            .job_state
            .write()
            .await
            .add_task_state(task_state.clone());

        task.mark_completion();

        if !inserted {
            warn!(task_id = %task.task_id(), "task state was already merged, not publishing again");
            return;
        }

        if let Some(metrics) = &self.job_metrics {
            metrics.record_task_outcome(task_state.working_state());
        }

        info!(
            "Task {} completed in {}ms with state {}",
            task_state.task_id(),
            task_state.duration_ms().unwrap_or(0),
            task_state.working_state()
        );
        self.event_bus
            .publish(CompletionEvent::single(task_state))
            .await;
    }
}

#[async_trait]
impl TaskStateTracker for LocalTaskStateTracker {
    fn register_new_task(&self, task: &Task) {
        let task_id = task.task_id().clone();
        let metrics = Arc::clone(task.metrics());
        let sampled_id = task_id.clone();

        let scheduled = self
            .monitors
            .schedule_at_fixed_rate(self.report_interval, move || {
                let sample = metrics.sample();
                debug!(
                    task_id = %sampled_id,
                    records = sample.records,
                    bytes = sample.bytes,
                    "task progress"
                );
            });

        match scheduled {
            Ok(handle) => {
                self.handles.insert(task_id, handle);
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "task monitor not scheduled");
            }
        }
    }

    async fn on_task_completion(&self, mut task: Task) {
        let prepared = catch_unwind(AssertUnwindSafe(|| self.prepare(&mut task)));
        let decision = match prepared {
            Ok(decision) => decision,
            Err(_) => {
                error!(task_id = %task.task_id(), "task completion handling panicked, finalizing");
                Decision::Finalize {
                    reason: "completion handling panicked".to_string(),
                }
            }
        };

        match decision {
            Decision::Retry { delay, reason } => self.retry(task, delay, reason).await,
            Decision::Finalize { reason } => {
                debug!(task_id = %task.task_id(), %reason, "finalizing task");
                self.finalize(task).await;
            }
        }
    }
}
