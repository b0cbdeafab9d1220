//! JobLauncher - ジョブの起動とキャンセル
//!
//! work unit からタスクを作って投入し、全タスクの確定を待ってコミットし、
//! listener に通知する。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::latch::CountDownLatch;
use super::tracker::{LocalTaskStateTracker, TaskStateTracker};
use crate::config::RuntimeConfig;
use crate::domain::{
    Decider, DefaultDecider, JobId, JobSpec, JobState, SharedJobState, Task, TaskState,
    WorkUnit, WorkingState,
};
use crate::error::JobError;
use crate::impls::{EventBus, FsStateStore};
use crate::metrics::{JobMetrics, MetricsRegistry, ReporterRegistry};
use crate::ports::{JobListener, StateStore, task_state_key};
use crate::runtime::{HandlerRegistry, TaskHandler};
use crate::worker::TaskExecutor;

/// 1 回分のジョブ実行の起動 / キャンセル
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// ジョブを最後まで実行し、最終 JobState を返す。
    ///
    /// 1 回限り。2 回目は `JobError::AlreadyLaunched`。
    async fn launch_job(
        &self,
        listener: Option<Arc<dyn JobListener>>,
    ) -> Result<JobState, JobError>;

    /// ジョブをキャンセルする。効果があるのは最初の呼び出しだけ。
    async fn cancel_job(&self, listener: Option<Arc<dyn JobListener>>) -> Result<(), JobError>;
}

#[derive(Debug, Clone, Copy)]
enum JobEvent {
    Completion,
    Cancellation,
}

/// 全タスクをこのプロセス内で実行する launcher
pub struct LocalJobLauncher {
    job_id: JobId,
    spec: JobSpec,
    handlers: Arc<HandlerRegistry>,
    config: RuntimeConfig,
    job_state: SharedJobState,
    event_bus: Arc<EventBus>,
    state_store: Option<Arc<dyn StateStore>>,
    job_metrics: Arc<JobMetrics>,
    decider: Arc<dyn Decider>,
    latch: Arc<CountDownLatch>,
    launched: AtomicBool,
    cancellation_requested: AtomicBool,
    cancellation: CancellationToken,
}

/// `LocalJobLauncher` の組み立て。`build` で設定を検証する。
pub struct LocalJobLauncherBuilder {
    spec: JobSpec,
    handlers: Arc<HandlerRegistry>,
    config: RuntimeConfig,
    state_store: Option<Arc<dyn StateStore>>,
    metrics_registry: Option<Arc<MetricsRegistry>>,
    reporter_registry: Option<Arc<ReporterRegistry>>,
    event_bus: Option<Arc<EventBus>>,
    decider: Option<Arc<dyn Decider>>,
}

impl LocalJobLauncherBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// 確定したタスク状態の保存先。`state.store.dir` より優先。
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn metrics_registry(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.metrics_registry = Some(registry);
        self
    }

    pub fn reporter_registry(mut self, registry: Arc<ReporterRegistry>) -> Self {
        self.reporter_registry = Some(registry);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// 既定の Decider を差し替える
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn build(self) -> Result<LocalJobLauncher, JobError> {
        let reporters = self
            .reporter_registry
            .unwrap_or_else(|| Arc::new(ReporterRegistry::default()));
        self.config.validate(&reporters)?;

        let job_id = JobId::generate(&self.spec.job_name);
        let mut job_state = JobState::new(job_id.clone(), &self.spec.job_name);
        for (key, value) in &self.spec.properties {
            job_state.set_property(key, value);
        }

        let state_store = self.state_store.or_else(|| {
            self.config
                .state_store_dir
                .as_ref()
                .map(|dir| Arc::new(FsStateStore::new(dir)) as Arc<dyn StateStore>)
        });

        let job_metrics = JobMetrics::new(
            job_id.clone(),
            self.config.metrics.clone(),
            self.metrics_registry
                .unwrap_or_else(|| Arc::new(MetricsRegistry::new())),
            reporters,
        )?;

        let decider = self.decider.unwrap_or_else(|| {
            Arc::new(DefaultDecider::new(
                self.config.max_task_retries,
                self.config.retry_policy(),
            ))
        });

        Ok(LocalJobLauncher {
            latch: Arc::new(CountDownLatch::new(self.spec.work_units.len())),
            job_id,
            spec: self.spec,
            handlers: self.handlers,
            config: self.config,
            job_state: job_state.into_shared(),
            event_bus: self.event_bus.unwrap_or_default(),
            state_store,
            job_metrics: Arc::new(job_metrics),
            decider,
            launched: AtomicBool::new(false),
            cancellation_requested: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
        })
    }
}

impl LocalJobLauncher {
    pub fn builder(spec: JobSpec, handlers: Arc<HandlerRegistry>) -> LocalJobLauncherBuilder {
        LocalJobLauncherBuilder {
            spec,
            handlers,
            config: RuntimeConfig::default(),
            state_store: None,
            metrics_registry: None,
            reporter_registry: None,
            event_bus: None,
            decider: None,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_state(&self) -> SharedJobState {
        Arc::clone(&self.job_state)
    }

    /// 全イベントを受けるには launch 前に subscribe する
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn job_metrics(&self) -> &Arc<JobMetrics> {
        &self.job_metrics
    }

    fn build_task(&self, seq: usize, work_unit: &WorkUnit, handler: Arc<dyn TaskHandler>) -> Task {
        let task_id = self.job_id.task_id(seq);
        let mut state = TaskState::new(self.job_id.clone(), task_id.clone(), &work_unit.task_type);
        for (key, value) in &work_unit.properties {
            state.set_property(key, value);
        }

        let metric_context = self
            .config
            .metrics
            .is_enabled_for(&work_unit.properties)
            .then(|| self.job_metrics.task_context(&task_id));

        Task::new(state, handler, self.cancellation.clone())
            .with_completion_latch(Arc::clone(&self.latch))
            .with_metric_context(metric_context)
    }

    async fn fail_job(&self, reason: &str) -> JobState {
        let mut job = self.job_state.write().await;
        if let Err(e) = job.transition(WorkingState::Failed) {
            warn!(job_id = %self.job_id, error = %e, "could not mark job failed");
        }
        job.set_property("job.failure", reason);
        job.clone()
    }

    /// listener を別タスクで呼ぶ。エラーも panic もログのみ。
    async fn notify(&self, listener: Arc<dyn JobListener>, job_state: JobState, event: JobEvent) {
        let called = tokio::spawn(async move {
            match event {
                JobEvent::Completion => listener.on_job_completion(&job_state).await,
                JobEvent::Cancellation => listener.on_job_cancellation(&job_state).await,
            }
        })
        .await;
        match called {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(job_id = %self.job_id, ?event, error = %e, "job listener failed"),
            Err(e) => error!(job_id = %self.job_id, ?event, error = %e, "job listener panicked"),
        }
    }

    async fn finish_metrics(&self) {
        self.job_metrics.stop_reporting().await;
        self.job_metrics.close();
    }

    async fn persist(&self, job: &JobState) -> Result<(), JobError> {
        let Some(store) = &self.state_store else {
            return Ok(());
        };
        for task_state in job.task_states() {
            store
                .put(
                    self.job_id.as_str(),
                    &task_state_key(task_state.task_id()),
                    task_state,
                )
                .await?;
        }
        Ok(())
    }

    async fn run_tasks(&self, handlers: Vec<Arc<dyn TaskHandler>>) -> Result<(), JobError> {
        let total = handlers.len();
        let executor = Arc::new(TaskExecutor::new(
            self.config.executor_pool_size,
            self.config.executor_queue_capacity,
        ));
        let tracker = Arc::new(LocalTaskStateTracker::new(
            Arc::clone(&self.job_state),
            Arc::clone(&executor),
            Arc::clone(&self.event_bus),
            Arc::clone(&self.decider),
            self.config.max_concurrent_monitors,
            self.config.task_status_report_interval(),
            self.cancellation.clone(),
            Some(Arc::clone(&self.job_metrics)),
        ));
        executor.start(tracker.clone());

        let mut outcome = Ok(());
        for (seq, (work_unit, handler)) in self.spec.work_units.iter().zip(handlers).enumerate() {
            if self.cancellation.is_cancelled() {
                // 未投入分は latch だけ進める
                self.latch.count_down_by(total - seq);
                break;
            }

            let task = self.build_task(seq, work_unit, handler);
            tracker.register_new_task(&task);
            // 空きが出るまで待つ
            if let Err(rejected) = executor.submit(task).await {
                let error = rejected.error();
                let task = rejected.into_inner();
                tracker.unregister_task(task.task_id());
                error!(
                    job_id = %self.job_id,
                    task_id = %task.task_id(),
                    error = %error,
                    "task submission rejected, cancelling job"
                );
                self.cancellation.cancel();
                self.latch.count_down_by(total - seq);
                outcome = Err(JobError::SubmissionRejected {
                    task_id: task.task_id().clone(),
                    source: error,
                });
                break;
            }
        }

        self.latch.wait().await;
        executor.shutdown().await;
        tracker.shutdown();
        outcome
    }
}

#[async_trait]
impl JobLauncher for LocalJobLauncher {
    async fn launch_job(
        &self,
        listener: Option<Arc<dyn JobListener>>,
    ) -> Result<JobState, JobError> {
        if self.launched.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyLaunched(self.job_id.clone()));
        }

        let total = self.spec.work_units.len();
        if self.cancellation_requested.load(Ordering::SeqCst) {
            self.latch.count_down_by(total);
            let mut job = self.job_state.write().await;
            job.mark_cancelled()?;
            info!(job_id = %self.job_id, "job cancelled before launch");
            return Ok(job.clone());
        }

        self.job_state.write().await.mark_started(total)?;
        info!(job_id = %self.job_id, tasks = total, "Launching job");

        let mut handlers = Vec::with_capacity(total);
        for work_unit in &self.spec.work_units {
            match self.handlers.get(&work_unit.task_type) {
                Some(handler) => handlers.push(Arc::clone(handler)),
                None => {
                    self.latch.count_down_by(total);
                    let reason = format!("handler not found for task_type={}", work_unit.task_type);
                    self.fail_job(&reason).await;
                    return Err(JobError::UnknownTaskType(work_unit.task_type.clone()));
                }
            }
        }

        if self.config.metrics.is_enabled() {
            self.job_metrics.start_reporting();
        }

        if let Err(e) = self.run_tasks(handlers).await {
            self.fail_job(&e.to_string()).await;
            self.finish_metrics().await;
            return Err(e);
        }

        let cancelled = self.cancellation_requested.load(Ordering::SeqCst);
        let snapshot = {
            // 保存に成功するまで共有の JobState には反映しない
            let mut job = self.job_state.write().await;
            let mut resolved = job.clone();
            if cancelled {
                resolved.mark_cancelled()?;
            } else {
                match resolved.resolve_final_state(self.config.commit_policy) {
                    Ok(state) => info!(job_id = %self.job_id, state = %state, "job finished"),
                    Err(e) => warn!(job_id = %self.job_id, error = %e, "job state not resolved"),
                }
            }

            if let Err(e) = self.persist(&resolved).await {
                error!(job_id = %self.job_id, error = %e, "failed to persist task states");
                if let Err(e) = job.transition(WorkingState::Failed) {
                    warn!(job_id = %self.job_id, error = %e, "could not mark job failed");
                }
                job.set_property("job.failure", e.to_string());
                drop(job);
                self.finish_metrics().await;
                return Err(e);
            }
            *job = resolved;
            job.clone()
        };
        self.finish_metrics().await;

        if !cancelled {
            if let Some(listener) = listener {
                self.notify(listener, snapshot.clone(), JobEvent::Completion).await;
            }
        }

        Ok(snapshot)
    }

    async fn cancel_job(&self, listener: Option<Arc<dyn JobListener>>) -> Result<(), JobError> {
        if self.cancellation_requested.swap(true, Ordering::SeqCst) {
            info!(job_id = %self.job_id, "job cancellation already requested");
            return Ok(());
        }

        info!(job_id = %self.job_id, "Cancelling job");
        self.cancellation.cancel();

        if self.launched.load(Ordering::SeqCst) {
            let timeout = self.config.job_cancel_timeout();
            if !self.latch.wait_timeout(timeout).await {
                return Err(JobError::Cancellation {
                    job_id: self.job_id.clone(),
                    timeout,
                });
            }
        }

        let snapshot = {
            let mut job = self.job_state.write().await;
            if let Err(e) = job.mark_cancelled() {
                warn!(job_id = %self.job_id, error = %e, "job finished before it could be cancelled");
            }
            job.clone()
        };

        if let Some(listener) = listener {
            self.notify(listener, snapshot, JobEvent::Cancellation).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CompletionEvent;
    use crate::error::{ListenerError, StoreError, TaskFailure};
    use crate::impls::{ChannelSubscriber, InMemoryStateStore};
    use crate::ports::CompletionSubscriber;
    use crate::runtime::TaskContext;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::time::Duration;

    /// 各タスクの最初の `failures` 回を失敗させる
    struct Flaky {
        failures: u32,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn handle(&self, ctx: &TaskContext) -> Result<(), TaskFailure> {
            if ctx.attempt() < self.failures {
                return Err(TaskFailure::failed(format!("attempt {} failed", ctx.attempt())));
            }
            ctx.record_written(10, 1024);
            Ok(())
        }
    }

    /// キャンセルされるまで動き続ける
    struct UntilCancelled {
        started: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for UntilCancelled {
        async fn handle(&self, ctx: &TaskContext) -> Result<(), TaskFailure> {
            self.started.fetch_add(1, Ordering::SeqCst);
            loop {
                ctx.checkpoint()?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        completions: AtomicUsize,
        cancellations: AtomicUsize,
    }

    #[async_trait]
    impl JobListener for RecordingListener {
        async fn on_job_completion(&self, _job_state: &JobState) -> Result<(), ListenerError> {
            self.completions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_job_cancellation(&self, _job_state: &JobState) -> Result<(), ListenerError> {
            self.cancellations.fetch_add(1, Ordering::SeqCst);
            Err("listener sink unavailable".into())
        }
    }

    fn registry(task_type: &str, handler: Arc<dyn TaskHandler>) -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry.register(task_type, handler).unwrap();
        Arc::new(registry)
    }

    fn spec(tasks: usize) -> JobSpec {
        (0..tasks).fold(JobSpec::new("test"), |spec, i| {
            spec.with_work_unit(WorkUnit::new("flaky").with_property("split", i.to_string()))
        })
    }

    fn config(max_retries: u32) -> RuntimeConfig {
        RuntimeConfig {
            max_task_retries: max_retries,
            ..RuntimeConfig::default()
        }
    }

    fn launcher(tasks: usize, failures: u32, max_retries: u32) -> LocalJobLauncher {
        LocalJobLauncher::builder(spec(tasks), registry("flaky", Arc::new(Flaky { failures })))
            .config(config(max_retries))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn successful_tasks_commit_the_job() {
        let launcher = launcher(2, 0, 4);
        let listener = Arc::new(RecordingListener::default());

        let job = launcher.launch_job(Some(listener.clone())).await.unwrap();

        assert_eq!(job.state(), WorkingState::Committed);
        assert_eq!(job.task_states().len(), 2);
        for ts in job.task_states() {
            assert_eq!(ts.working_state(), WorkingState::Committed);
            assert_eq!(ts.retry_count(), 0);
            assert_eq!(ts.records_written(), 10);
        }
        assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn task_succeeds_within_retry_budget() {
        let launcher = launcher(1, 2, 2);
        let job = launcher.launch_job(None).await.unwrap();

        let ts = &job.task_states()[0];
        assert_eq!(ts.retry_count(), 2);
        assert_eq!(ts.working_state(), WorkingState::Committed);
        assert_eq!(job.state(), WorkingState::Committed);
    }

    #[tokio::test]
    async fn task_fails_after_retry_budget() {
        let launcher = launcher(1, 2, 1);
        let job = launcher.launch_job(None).await.unwrap();

        let ts = &job.task_states()[0];
        assert_eq!(ts.working_state(), WorkingState::Failed);
        assert_eq!(ts.retry_count(), 1);
        assert_eq!(job.state(), WorkingState::Failed);
    }

    #[tokio::test]
    async fn one_event_per_task() {
        let launcher = launcher(3, 1, 4);
        let (subscriber, mut events) = ChannelSubscriber::channel();
        launcher.event_bus().subscribe(subscriber).await;

        launcher.launch_job(None).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.len(), 1);
            seen.push(event.task_states()[0].task_id().clone());
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn launch_is_single_use() {
        let launcher = launcher(1, 0, 0);
        launcher.launch_job(None).await.unwrap();

        let err = launcher.launch_job(None).await.unwrap_err();
        assert!(matches!(err, JobError::AlreadyLaunched(_)));
    }

    #[tokio::test]
    async fn unknown_task_type_fails_before_running() {
        let spec = JobSpec::new("test").with_work_unit(WorkUnit::new("missing"));
        let launcher = LocalJobLauncher::builder(spec, registry("flaky", Arc::new(Flaky { failures: 0 })))
            .build()
            .unwrap();

        let err = launcher.launch_job(None).await.unwrap_err();
        assert!(matches!(err, JobError::UnknownTaskType(t) if t == "missing"));
        assert_eq!(launcher.job_state().read().await.state(), WorkingState::Failed);
    }

    #[tokio::test]
    async fn more_tasks_than_the_queue_holds_all_run() {
        let config = RuntimeConfig {
            executor_pool_size: 2,
            executor_queue_capacity: 4,
            ..RuntimeConfig::default()
        };
        let launcher = LocalJobLauncher::builder(spec(50), registry("flaky", Arc::new(Flaky { failures: 1 })))
            .config(config)
            .build()
            .unwrap();

        let job = launcher.launch_job(None).await.unwrap();

        assert_eq!(job.state(), WorkingState::Committed);
        assert_eq!(job.task_states().len(), 50);
        assert!(job.task_states().iter().all(|ts| ts.retry_count() == 1));
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_stall_the_job() {
        struct Boom;

        impl CompletionSubscriber for Boom {
            fn on_completion(&self, _event: &CompletionEvent) {
                panic!("subscriber bug");
            }
        }

        let config = RuntimeConfig {
            executor_pool_size: 1,
            ..RuntimeConfig::default()
        };
        let launcher = LocalJobLauncher::builder(spec(3), registry("flaky", Arc::new(Flaky { failures: 0 })))
            .config(config)
            .build()
            .unwrap();
        launcher.event_bus().subscribe(Arc::new(Boom)).await;

        let job = tokio::time::timeout(Duration::from_secs(5), launcher.launch_job(None))
            .await
            .expect("job finished")
            .unwrap();
        assert_eq!(job.state(), WorkingState::Committed);
        assert_eq!(job.task_states().len(), 3);
    }

    #[tokio::test]
    async fn panicking_listener_is_contained() {
        struct Explodes;

        #[async_trait]
        impl JobListener for Explodes {
            async fn on_job_completion(&self, _job_state: &JobState) -> Result<(), ListenerError> {
                panic!("listener bug");
            }

            async fn on_job_cancellation(&self, _job_state: &JobState) -> Result<(), ListenerError> {
                panic!("listener bug");
            }
        }

        let completed = launcher(1, 0, 0);
        let job = completed.launch_job(Some(Arc::new(Explodes))).await.unwrap();
        assert_eq!(job.state(), WorkingState::Committed);

        let cancelled = launcher(1, 0, 0);
        cancelled.cancel_job(Some(Arc::new(Explodes))).await.unwrap();
        assert_eq!(cancelled.job_state().read().await.state(), WorkingState::Cancelled);
    }

    #[tokio::test]
    async fn failed_persist_leaves_the_job_failed() {
        struct BrokenStore;

        #[async_trait]
        impl StateStore for BrokenStore {
            async fn put(&self, _store: &str, _key: &str, _state: &TaskState) -> Result<(), StoreError> {
                Err(StoreError::Io(std::io::Error::other("disk full")))
            }

            async fn get(&self, _store: &str, _key: &str) -> Result<Option<TaskState>, StoreError> {
                Ok(None)
            }

            async fn list(&self, _store: &str) -> Result<Vec<(String, TaskState)>, StoreError> {
                Ok(Vec::new())
            }
        }

        let launcher = LocalJobLauncher::builder(spec(2), registry("flaky", Arc::new(Flaky { failures: 0 })))
            .state_store(Arc::new(BrokenStore))
            .build()
            .unwrap();

        let err = launcher.launch_job(None).await.unwrap_err();
        assert!(matches!(err, JobError::StateMerge(_)));

        let job = launcher.job_state();
        let job = job.read().await;
        assert_eq!(job.state(), WorkingState::Failed);
        assert!(
            job.task_states()
                .iter()
                .all(|ts| ts.working_state() == WorkingState::Successful)
        );
    }

    #[tokio::test]
    async fn concurrent_cancel_notifies_listener_once() {
        let handler = Arc::new(UntilCancelled {
            started: AtomicU32::new(0),
        });
        let launcher = LocalJobLauncher::builder(spec(2), registry("flaky", handler.clone()))
            .build()
            .unwrap();
        let listener = Arc::new(RecordingListener::default());

        let cancel = async {
            while handler.started.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let first = launcher.cancel_job(Some(listener.clone()));
            let second = launcher.cancel_job(Some(listener.clone()));
            let (first, second) = tokio::join!(first, second);
            first.unwrap();
            second.unwrap();
        };
        let (job, ()) = tokio::join!(launcher.launch_job(Some(listener.clone())), cancel);
        let job = job.unwrap();

        assert_eq!(job.state(), WorkingState::Cancelled);
        assert!(
            job.task_states()
                .iter()
                .all(|ts| ts.working_state() == WorkingState::Cancelled)
        );
        assert_eq!(listener.cancellations.load(Ordering::SeqCst), 1);
        assert_eq!(listener.completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_before_launch_skips_tasks() {
        let launcher = launcher(2, 0, 0);
        launcher.cancel_job(None).await.unwrap();

        let job = launcher.launch_job(None).await.unwrap();
        assert_eq!(job.state(), WorkingState::Cancelled);
        assert!(job.task_states().is_empty());
    }

    #[tokio::test]
    async fn cancel_times_out_when_tasks_ignore_it() {
        struct Stubborn;

        #[async_trait]
        impl TaskHandler for Stubborn {
            async fn handle(&self, _ctx: &TaskContext) -> Result<(), TaskFailure> {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            }
        }

        let config = RuntimeConfig {
            job_cancel_timeout_ms: 20,
            ..RuntimeConfig::default()
        };
        let launcher = LocalJobLauncher::builder(spec(1), registry("flaky", Arc::new(Stubborn)))
            .config(config)
            .build()
            .unwrap();

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            launcher.cancel_job(None).await
        };
        let (job, cancelled) = tokio::join!(launcher.launch_job(None), cancel);

        assert!(matches!(cancelled, Err(JobError::Cancellation { .. })));
        assert_eq!(job.unwrap().state(), WorkingState::Cancelled);
    }

    #[tokio::test]
    async fn finalized_states_are_persisted() {
        let store = Arc::new(InMemoryStateStore::new());
        let launcher = LocalJobLauncher::builder(spec(2), registry("flaky", Arc::new(Flaky { failures: 0 })))
            .state_store(store.clone())
            .build()
            .unwrap();

        launcher.launch_job(None).await.unwrap();

        let records = store.list(launcher.job_id().as_str()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|(key, _)| key.ends_with(".tst")));
    }

    #[test]
    fn unknown_reporter_fails_the_build() {
        let mut config = RuntimeConfig::default();
        config.metrics.reporters = vec!["jmx".into()];

        let result = LocalJobLauncher::builder(spec(1), registry("flaky", Arc::new(Flaky { failures: 0 })))
            .config(config)
            .build();
        assert!(matches!(result, Err(JobError::Config(_))));
    }
}
