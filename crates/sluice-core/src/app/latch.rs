use std::time::Duration;

use tokio::sync::watch;

/// 一度きりのカウントダウン。0 になると `wait` が返る。
///
/// launcher がジョブごとにタスク数で作り、各タスクは確定時に 1 つ進める。
#[derive(Debug)]
pub struct CountDownLatch {
    count: watch::Sender<usize>,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        let (count, _) = watch::channel(count);
        Self { count }
    }

    pub fn count_down(&self) {
        self.count_down_by(1);
    }

    /// 0 より下には行かない
    pub fn count_down_by(&self, n: usize) {
        self.count.send_modify(|count| *count = count.saturating_sub(n));
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // sender は self が持っているので Err にはならない
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// `timeout` 内に 0 になれば `true`
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_returns_after_last_count_down() {
        let latch = Arc::new(CountDownLatch::new(2));

        let waiter = {
            let latch = Arc::clone(&latch);
            tokio::spawn(async move { latch.wait().await })
        };

        latch.count_down();
        assert!(!waiter.is_finished());
        latch.count_down();

        waiter.await.unwrap();
        assert_eq!(latch.count(), 0);
    }

    #[tokio::test]
    async fn zero_latch_is_already_open() {
        let latch = CountDownLatch::new(0);
        assert!(latch.wait_timeout(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn wait_timeout_expires_when_not_counted_down() {
        let latch = CountDownLatch::new(1);
        assert!(!latch.wait_timeout(Duration::from_millis(20)).await);
    }

    #[test]
    fn count_down_saturates() {
        let latch = CountDownLatch::new(1);
        latch.count_down_by(5);
        latch.count_down();
        assert_eq!(latch.count(), 0);
    }
}
