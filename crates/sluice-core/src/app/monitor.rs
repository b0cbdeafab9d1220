//! タスクの定期モニタ

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::MonitorError;

/// クロージャを固定間隔で実行する。同時実行数に上限あり。
#[derive(Debug)]
pub struct MonitorScheduler {
    max_concurrent: usize,
    active: Arc<AtomicUsize>,
    closed: AtomicBool,
}

/// モニタ 1 つ分のハンドル。drop すると止まる。
#[derive(Debug)]
pub struct MonitorHandle {
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// モニタの future が drop されたら枠を 1 つ返す
struct ActiveSlot(Arc<AtomicUsize>);

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl MonitorScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            active: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    /// `period` ごとに `tick` を実行する。初回は 1 period 後。
    pub fn schedule_at_fixed_rate<F>(
        &self,
        period: Duration,
        mut tick: F,
    ) -> Result<MonitorHandle, MonitorError>
    where
        F: FnMut() + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(MonitorError::ShutDown);
        }
        let max = self.max_concurrent;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|_| MonitorError::Saturated)?;

        let slot = ActiveSlot(Arc::clone(&self.active));
        // interval は 0 を受け付けない
        let period = period.max(Duration::from_millis(1));
        let join = tokio::spawn(async move {
            let _slot = slot;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                tick();
            }
        });

        Ok(MonitorHandle { join })
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// 新規モニタを拒否する。実行中のものはハンドルの drop で止まる。
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn monitor_ticks_at_fixed_rate() {
        let scheduler = MonitorScheduler::new(4);
        let ticks = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&ticks);
        let handle = scheduler
            .schedule_at_fixed_rate(Duration::from_millis(100), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn saturated_scheduler_rejects() {
        let scheduler = MonitorScheduler::new(1);
        let _first = scheduler
            .schedule_at_fixed_rate(Duration::from_secs(60), || {})
            .unwrap();

        let err = scheduler
            .schedule_at_fixed_rate(Duration::from_secs(60), || {})
            .unwrap_err();
        assert_eq!(err, MonitorError::Saturated);
    }

    #[tokio::test]
    async fn cancelled_monitor_frees_its_slot() {
        let scheduler = MonitorScheduler::new(1);
        let handle = scheduler
            .schedule_at_fixed_rate(Duration::from_secs(60), || {})
            .unwrap();
        assert_eq!(scheduler.active_count(), 1);

        handle.cancel();
        for _ in 0..10 {
            if scheduler.active_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn shut_down_scheduler_rejects() {
        let scheduler = MonitorScheduler::new(4);
        scheduler.shutdown();

        let err = scheduler
            .schedule_at_fixed_rate(Duration::from_secs(60), || {})
            .unwrap_err();
        assert_eq!(err, MonitorError::ShutDown);
    }
}
