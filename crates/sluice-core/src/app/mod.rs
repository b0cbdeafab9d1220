//! App - ジョブ実行層
//!
//! ports と domain を組み合わせて、ジョブの起動から完了までを駆動します。
//!
//! # 主要コンポーネント
//! - **LocalJobLauncher**: タスクの生成・投入・完了待ち・コミット
//! - **LocalTaskStateTracker**: 試行結果の判定（リトライ or 確定）とイベント発行
//! - **TaskStateCollectorService**: 外部ワーカーが書いたタスク状態の取り込み
//! - **MonitorScheduler**: タスクごとの定期メトリクス採取
//! - **CountDownLatch**: 全タスク確定の待ち合わせ

pub mod collector;
pub mod latch;
pub mod launcher;
pub mod monitor;
pub mod tracker;

pub use self::collector::TaskStateCollectorService;
pub use self::latch::CountDownLatch;
pub use self::launcher::{JobLauncher, LocalJobLauncher, LocalJobLauncherBuilder};
pub use self::monitor::{MonitorHandle, MonitorScheduler};
pub use self::tracker::{LocalTaskStateTracker, TaskStateTracker};
