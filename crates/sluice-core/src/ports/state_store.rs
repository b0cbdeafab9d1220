//! StateStore port - task state の保存先
//!
//! レコードはストア名（job id）ごとにまとまり、キーで引く
//! （タスク状態は `<task_id>.tst`）。

use async_trait::async_trait;

use crate::domain::{TaskId, TaskState};
use crate::error::StoreError;

/// タスク状態レコードのキー接尾辞
pub const TASK_STATE_SUFFIX: &str = ".tst";

pub fn task_state_key(task_id: &TaskId) -> String {
    format!("{task_id}{TASK_STATE_SUFFIX}")
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `key` のレコードを挿入または置換
    async fn put(&self, store_name: &str, key: &str, state: &TaskState) -> Result<(), StoreError>;

    async fn get(&self, store_name: &str, key: &str) -> Result<Option<TaskState>, StoreError>;

    /// `store_name` の全レコード（キー順）。未知のストアは空。
    async fn list(&self, store_name: &str) -> Result<Vec<(String, TaskState)>, StoreError>;
}
