use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::error;

use crate::app::latch::CountDownLatch;
use crate::domain::CompletionEvent;
use crate::ports::CompletionSubscriber;

/// ジョブ単位の完了イベント配信
///
/// publish 時点で登録済みの subscriber に 1 回ずつ届ける。
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn CompletionSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn CompletionSubscriber>) {
        self.subscribers.write().await.push(subscriber);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn publish(&self, event: CompletionEvent) {
        // ロックを持ったまま subscriber を呼ばない
        let subscribers = self.subscribers.read().await.clone();
        for subscriber in subscribers {
            // subscriber の panic で worker を落とさない
            if catch_unwind(AssertUnwindSafe(|| subscriber.on_completion(&event))).is_err() {
                error!(tasks = event.len(), "completion subscriber panicked");
            }
        }
    }
}

/// イベントを unbounded channel に流す
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<CompletionEvent>,
}

impl ChannelSubscriber {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<CompletionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl CompletionSubscriber for ChannelSubscriber {
    fn on_completion(&self, event: &CompletionEvent) {
        // receiver が drop 済みなら捨てる
        let _ = self.tx.send(event.clone());
    }
}

/// イベント内のタスク状態 1 件ごとに latch を 1 つ進める
pub struct CountingSubscriber {
    latch: Arc<CountDownLatch>,
}

impl CountingSubscriber {
    pub fn new(latch: Arc<CountDownLatch>) -> Self {
        Self { latch }
    }
}

impl CompletionSubscriber for CountingSubscriber {
    fn on_completion(&self, event: &CompletionEvent) {
        self.latch.count_down_by(event.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, TaskState};
    use std::time::Duration;

    fn event(seqs: &[usize]) -> CompletionEvent {
        let job_id = JobId::new("job_test_1");
        CompletionEvent::new(
            seqs.iter()
                .map(|&seq| TaskState::new(job_id.clone(), job_id.task_id(seq), "copy"))
                .collect(),
        )
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_event_once() {
        let bus = EventBus::new();
        let (first, mut first_rx) = ChannelSubscriber::channel();
        let (second, mut second_rx) = ChannelSubscriber::channel();
        bus.subscribe(first).await;
        bus.subscribe(second).await;

        bus.publish(event(&[0])).await;

        assert_eq!(first_rx.recv().await.map(|e| e.len()), Some(1));
        assert_eq!(second_rx.recv().await.map(|e| e.len()), Some(1));
        assert!(first_rx.try_recv().is_err());
    }

    struct Panicking;

    impl CompletionSubscriber for Panicking {
        fn on_completion(&self, _event: &CompletionEvent) {
            panic!("subscriber bug");
        }
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_block_the_others() {
        let bus = EventBus::new();
        let (after, mut rx) = ChannelSubscriber::channel();
        bus.subscribe(Arc::new(Panicking)).await;
        bus.subscribe(after).await;

        bus.publish(event(&[0])).await;
        bus.publish(event(&[1])).await;

        assert_eq!(rx.recv().await.map(|e| e.len()), Some(1));
        assert_eq!(rx.recv().await.map(|e| e.len()), Some(1));
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(event(&[0])).await;

        let (late, mut rx) = ChannelSubscriber::channel();
        bus.subscribe(late).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn counting_subscriber_counts_task_states() {
        let latch = Arc::new(CountDownLatch::new(3));
        let bus = EventBus::new();
        bus.subscribe(Arc::new(CountingSubscriber::new(Arc::clone(&latch))))
            .await;

        bus.publish(event(&[0, 1])).await;
        bus.publish(event(&[2])).await;

        assert!(latch.wait_timeout(Duration::from_millis(10)).await);
    }
}
