//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStateStore**: テスト・単一プロセス用の state store
//! - **FsStateStore**: record ごとに JSON ファイルを 1 つ書く state store
//! - **EventBus**: job ごとの CompletionSubscriber リスト

pub mod event_bus;
pub mod fs_store;
pub mod inmem_store;

pub use self::event_bus::{ChannelSubscriber, CountingSubscriber, EventBus};
pub use self::fs_store::FsStateStore;
pub use self::inmem_store::InMemoryStateStore;
