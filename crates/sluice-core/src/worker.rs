//! タスク実行プール
//!
//! 新規タスクは容量付きキュー、リトライは無制限キューに入る。
//! worker はリトライを優先して取り出す。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::app::tracker::TaskStateTracker;
use crate::domain::{Task, WorkingState};
use crate::error::{Rejected, SubmitError, TaskFailure};

/// worker が共有する受信側
struct Queues {
    retries: mpsc::UnboundedReceiver<Task>,
    tasks: mpsc::Receiver<Task>,
}

/// 容量付きの worker プール
///
/// - `execute` は待たない（満杯なら `Saturated`）。`submit` は空きを待つ。
/// - `retry` は別キューに入るので満杯にならない。
/// - 受け付けたタスクは試行ごとに 1 回だけ tracker に報告される。
/// - `shutdown` でキューを閉じ、残りを捌いてから worker が終了する。
pub struct TaskExecutor {
    pool_size: usize,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    retry_sender: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    queues: Arc<tokio::sync::Mutex<Queues>>,
    started: AtomicBool,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskExecutor {
    pub fn new(pool_size: usize, queue_capacity: usize) -> Self {
        let (sender, tasks) = mpsc::channel(queue_capacity.max(1));
        let (retry_sender, retries) = mpsc::unbounded_channel();
        Self {
            pool_size: pool_size.max(1),
            sender: Mutex::new(Some(sender)),
            retry_sender: Mutex::new(Some(retry_sender)),
            queues: Arc::new(tokio::sync::Mutex::new(Queues { retries, tasks })),
            started: AtomicBool::new(false),
            joins: Mutex::new(Vec::new()),
        }
    }

    /// worker を起動する。2 回目以降は何もしない。
    pub fn start(&self, tracker: Arc<dyn TaskStateTracker>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut joins = self.joins.lock().unwrap_or_else(PoisonError::into_inner);
        for worker_id in 0..self.pool_size {
            let queues = Arc::clone(&self.queues);
            let tracker = Arc::clone(&tracker);
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, queues, tracker).await;
            }));
        }
        debug!(pool_size = self.pool_size, "task executor started");
    }

    fn sender(&self) -> Option<mpsc::Sender<Task>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 新規タスクを投入する。キューが満杯なら `Saturated`。
    pub fn execute(&self, task: Task) -> Result<(), Rejected<Task>> {
        let Some(sender) = self.sender() else {
            return Err(Rejected::new(SubmitError::ShutDown, task));
        };
        sender.try_send(task).map_err(|e| match e {
            TrySendError::Full(task) => Rejected::new(SubmitError::Saturated, task),
            TrySendError::Closed(task) => Rejected::new(SubmitError::ShutDown, task),
        })
    }

    /// 新規タスクを投入する。キューに空きが出るまで待つ。
    pub async fn submit(&self, task: Task) -> Result<(), Rejected<Task>> {
        let Some(sender) = self.sender() else {
            return Err(Rejected::new(SubmitError::ShutDown, task));
        };
        sender
            .send(task)
            .await
            .map_err(|e| Rejected::new(SubmitError::ShutDown, e.0))
    }

    /// tracker がリトライ用にリセットしたタスクを再投入する。待たない。
    pub fn retry(&self, task: Task) -> Result<(), Rejected<Task>> {
        let sender = self
            .retry_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            return Err(Rejected::new(SubmitError::ShutDown, task));
        };
        sender
            .send(task)
            .map_err(|e| Rejected::new(SubmitError::ShutDown, e.0))
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// キューを閉じ、全 worker の終了を待つ。
    pub async fn shutdown(&self) {
        // sender を drop すると recv が None を返す
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        drop(
            self.retry_sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let joins = std::mem::take(&mut *self.joins.lock().unwrap_or_else(PoisonError::into_inner));
        for join in joins {
            if let Err(e) = join.await {
                warn!(error = %e, "worker exited abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queues: Arc<tokio::sync::Mutex<Queues>>,
    tracker: Arc<dyn TaskStateTracker>,
) {
    loop {
        // recv 中だけロックを持つ（handler 実行中は他の worker が取れる）
        let next = {
            let mut queues = queues.lock().await;
            let Queues { retries, tasks } = &mut *queues;
            tokio::select! {
                biased;
                Some(task) = retries.recv() => Some(task),
                Some(task) = tasks.recv() => Some(task),
                else => None,
            }
        };
        let Some(task) = next else {
            break;
        };
        run_task(worker_id, task, tracker.as_ref()).await;
    }
    debug!(worker_id, "worker stopped");
}

async fn run_task(worker_id: usize, mut task: Task, tracker: &dyn TaskStateTracker) {
    let cancellation = task.cancellation().clone();

    if let Some(not_before) = task.take_not_before() {
        tokio::select! {
            _ = tokio::time::sleep_until(not_before) => {}
            _ = cancellation.cancelled() => {}
        }
    }

    if cancellation.is_cancelled() {
        debug!(worker_id, task_id = %task.task_id(), "task cancelled before it started");
        if let Err(e) = task.finish_attempt(WorkingState::Cancelled, None) {
            warn!(task_id = %task.task_id(), error = %e, "could not mark task cancelled");
        }
        tracker.on_task_completion(task).await;
        return;
    }

    if let Err(e) = task.begin_attempt() {
        warn!(task_id = %task.task_id(), error = %e, "task not runnable");
        tracker.on_task_completion(task).await;
        return;
    }

    let handler = task.handler();
    let ctx = task.context();
    // panic も失敗として扱うため別タスクで実行する
    let result = tokio::spawn(async move { handler.handle(&ctx).await }).await;

    let (state, failure) = match result {
        Ok(Ok(())) => (WorkingState::Successful, None),
        Ok(Err(TaskFailure::Cancelled)) => (WorkingState::Cancelled, None),
        Ok(Err(TaskFailure::Failed(message))) => (WorkingState::Failed, Some(message)),
        Err(e) => (WorkingState::Failed, Some(format!("task handler panicked: {e}"))),
    };
    debug!(worker_id, task_id = %task.task_id(), state = %state, "attempt finished");

    if let Err(e) = task.finish_attempt(state, failure) {
        warn!(task_id = %task.task_id(), error = %e, "could not record attempt result");
    }
    tracker.on_task_completion(task).await;
}
