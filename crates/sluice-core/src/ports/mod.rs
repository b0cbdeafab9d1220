//! Ports - 抽象化レイヤー
//!
//! 外部とのインターフェースを trait として定義します。
//! - **StateStore**: task state の永続化（keyed put/get/list）
//! - **CompletionSubscriber**: CompletionEvent の受け取り手
//! - **JobListener**: job 完了・キャンセル時のコールバック

pub mod event_sink;
pub mod listener;
pub mod state_store;

pub use self::event_sink::CompletionSubscriber;
pub use self::listener::JobListener;
pub use self::state_store::{StateStore, TASK_STATE_SUFFIX, task_state_key};
