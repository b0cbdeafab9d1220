//! sluice-core
//!
//! ジョブ実行ランタイムの中核。ジョブをタスクに分けて worker プールで実行し、
//! 失敗した試行はリトライし、全タスク確定後にコミットする。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task_state, job, spec, retry, decision, events）
//! - **ports**: 抽象化レイヤー（StateStore, CompletionSubscriber, JobListener）
//! - **app**: ジョブ実行ロジック（launcher, tracker, collector, monitor, latch）
//! - **impls**: 実装（EventBus, InMemoryStateStore, FsStateStore）
//! - **metrics**: カウンタ・メータとレポーター
//! - **worker**: タスク実行プール
//! - **runtime**: TaskHandler とハンドラ登録
//! - **config**: 実行時設定
//! - **observability**: 集計ビュー
//! - **error**: エラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod metrics;
pub mod observability;
pub mod ports;
pub mod runtime;
pub mod worker;
