//! 外部プロセスのタスク状態の取り込み
//!
//! StateStore に書かれたタスク状態を定期的に読み、未取得のものを JobState に
//! マージしてイベントを発行する。

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::latch::CountDownLatch;
use crate::domain::{CompletionEvent, JobState, SharedJobState};
use crate::error::JobError;
use crate::impls::{CountingSubscriber, EventBus};
use crate::ports::{StateStore, TASK_STATE_SUFFIX};

/// StateStore をポーリングするサービス。ストア名は job id。
pub struct TaskStateCollectorService {
    job_state: SharedJobState,
    store: Arc<dyn StateStore>,
    event_bus: Arc<EventBus>,
    interval: Duration,
    shutdown: CancellationToken,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl TaskStateCollectorService {
    pub fn new(
        job_state: SharedJobState,
        store: Arc<dyn StateStore>,
        event_bus: Arc<EventBus>,
        interval: Duration,
    ) -> Self {
        Self {
            job_state,
            store,
            event_bus,
            interval,
            shutdown: CancellationToken::new(),
            join: Mutex::new(None),
        }
    }

    /// 1 回分のポーリング。未取得のタスク状態をまとめて 1 イベントで発行する。
    ///
    /// マージした件数を返す。
    pub async fn run_one_iteration(&self) -> Result<usize, JobError> {
        let store_name = self.job_state.read().await.job_id().to_string();
        let records = self.store.list(&store_name).await?;

        let merged: Vec<_> = {
            let mut job = self.job_state.write().await;
            records
                .into_iter()
                .filter(|(key, _)| key.ends_with(TASK_STATE_SUFFIX))
                .filter_map(|(_, task_state)| {
                    job.add_task_state_if_absent(task_state.clone())
                        .then_some(task_state)
                })
                .collect()
        };

        if merged.is_empty() {
            debug!(job_id = %store_name, "no new task states");
            return Ok(0);
        }

        let count = merged.len();
        info!(job_id = %store_name, count, "collected task states");
        self.event_bus.publish(CompletionEvent::new(merged)).await;
        Ok(count)
    }

    /// 設定間隔でポーリングを始める。2 回目以降は何もしない。
    pub fn start(self: &Arc<Self>) {
        let mut join = self.join.lock().unwrap_or_else(PoisonError::into_inner);
        if join.is_some() {
            return;
        }

        let service = Arc::clone(self);
        *join = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = service.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = service.run_one_iteration().await {
                            warn!(error = %e, "task state collection failed");
                        }
                    }
                }
            }
        }));
    }

    /// ポーリングを止め、停止直前に書かれた分を最後にもう 1 回取り込む。
    pub async fn stop(&self) -> Result<usize, JobError> {
        self.shutdown.cancel();
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            if let Err(e) = join.await {
                warn!(error = %e, "collector loop exited abnormally");
            }
        }
        self.run_one_iteration().await
    }

    /// `expected` 件のタスク状態が揃うまでポーリングし、揃った JobState を返す。
    pub async fn collect_all(self: &Arc<Self>, expected: usize) -> Result<JobState, JobError> {
        let already = self.job_state.read().await.task_states().len();
        let latch = Arc::new(CountDownLatch::new(expected.saturating_sub(already)));
        self.event_bus
            .subscribe(Arc::new(CountingSubscriber::new(Arc::clone(&latch))))
            .await;

        // 初回は interval を待たずに取り込む
        self.run_one_iteration().await?;
        self.start();
        latch.wait().await;
        self.stop().await?;

        Ok(self.job_state.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, JobState, TaskState, WorkingState};
    use crate::impls::{ChannelSubscriber, InMemoryStateStore};
    use crate::ports::task_state_key;

    const JOB: &str = "job_test_1";

    fn finished(seq: usize) -> TaskState {
        let job_id = JobId::new(JOB);
        let mut ts = TaskState::new(job_id.clone(), job_id.task_id(seq), "copy");
        ts.mark_running().unwrap();
        ts.mark_finished(WorkingState::Successful, None).unwrap();
        ts
    }

    async fn put(store: &InMemoryStateStore, ts: &TaskState) {
        store
            .put(JOB, &task_state_key(ts.task_id()), ts)
            .await
            .unwrap();
    }

    fn service(store: Arc<InMemoryStateStore>, bus: Arc<EventBus>) -> TaskStateCollectorService {
        let job_state = JobState::new(JobId::new(JOB), "test").into_shared();
        TaskStateCollectorService::new(job_state, store, bus, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn new_records_are_merged_and_published_once() {
        let store = Arc::new(InMemoryStateStore::new());
        let bus = Arc::new(EventBus::new());
        let (subscriber, mut events) = ChannelSubscriber::channel();
        bus.subscribe(subscriber).await;
        put(&store, &finished(0)).await;
        put(&store, &finished(1)).await;

        let collector = service(Arc::clone(&store), Arc::clone(&bus));
        assert_eq!(collector.run_one_iteration().await.unwrap(), 2);

        let event = events.recv().await.unwrap();
        assert_eq!(event.len(), 2);
        assert_eq!(collector.job_state.read().await.task_states().len(), 2);

        assert_eq!(collector.run_one_iteration().await.unwrap(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_task_state_keys_are_ignored() {
        let store = Arc::new(InMemoryStateStore::new());
        store.put(JOB, "job.summary", &finished(0)).await.unwrap();

        let collector = service(store, Arc::new(EventBus::new()));
        assert_eq!(collector.run_one_iteration().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_all_waits_for_late_records() {
        let store = Arc::new(InMemoryStateStore::new());
        put(&store, &finished(0)).await;
        let collector = Arc::new(service(Arc::clone(&store), Arc::new(EventBus::new())));

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(90)).await;
                put(&store, &finished(1)).await;
            })
        };

        let job = collector.collect_all(2).await.unwrap();
        writer.await.unwrap();

        assert_eq!(job.task_states().len(), 2);
    }

    #[tokio::test]
    async fn collect_all_returns_at_once_when_everything_is_stored() {
        let store = Arc::new(InMemoryStateStore::new());
        put(&store, &finished(0)).await;
        put(&store, &finished(1)).await;

        let collector = Arc::new(service(store, Arc::new(EventBus::new())));
        let job = collector.collect_all(2).await.unwrap();
        assert_eq!(job.task_states().len(), 2);
    }

    #[tokio::test]
    async fn stop_drains_records_written_before_shutdown() {
        let store = Arc::new(InMemoryStateStore::new());
        let collector = Arc::new(service(Arc::clone(&store), Arc::new(EventBus::new())));
        collector.start();

        put(&store, &finished(0)).await;
        assert_eq!(collector.stop().await.unwrap(), 1);
        assert!(
            collector
                .job_state
                .read()
                .await
                .contains_task(&JobId::new(JOB).task_id(0))
        );
    }
}
