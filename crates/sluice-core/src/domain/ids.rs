//! ドメイン識別子（型付き ID）
//!
//! `Id<T>` は全 ID 型で共通の実装。`T` はゼロサイズのマーカー（PhantomData）で、
//! 文字列表現は同じまま `JobId` と `TaskId` の取り違えをコンパイル時に防ぐ。
//!
//! job id は `job_<name>_<ulid>`。task id は job id と連番から作る:
//! `task_<name>_<ulid>_<seq>`。ULID により同名ジョブの ID は作成順に並ぶ。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// ID 型ごとの表示用プレフィックスを与えるマーカートレイト
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// 既存の ID 文字列を包む（state store から読んだものなど）
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Job のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job_"
    }
}

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task_"
    }
}

/// Job の識別子（起動・キャンセル・結果の単位）
pub type JobId = Id<Job>;

/// Task の識別子（Job 内の実行単位）
pub type TaskId = Id<Task>;

impl JobId {
    /// ジョブ名から新しい job id を作る
    pub fn generate(job_name: &str) -> Self {
        Self::new(format!("{}{}_{}", Job::prefix(), job_name, Ulid::new()))
    }

    /// このジョブの `sequence` 番目のタスクの id
    pub fn task_id(&self, sequence: usize) -> TaskId {
        let body = self
            .value
            .strip_prefix(Job::prefix())
            .unwrap_or(&self.value);
        TaskId::new(format!("{}{}_{}", Task::prefix(), body, sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_carries_name_and_prefix() {
        let job = JobId::generate("ingest");
        assert!(job.as_str().starts_with("job_ingest_"));
    }

    #[test]
    fn task_id_is_derived_from_job_id() {
        let job = JobId::new("job_ingest_01HZZZ");
        assert_eq!(job.task_id(0).as_str(), "task_ingest_01HZZZ_0");
        assert_eq!(job.task_id(17).as_str(), "task_ingest_01HZZZ_17");
    }

    #[test]
    fn generated_ids_sort_by_creation_time() {
        let id1 = JobId::generate("ingest");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = JobId::generate("ingest");
        assert!(id1 < id2);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let task_id = JobId::new("job_a_1").task_id(3);
        let serialized = serde_json::to_string(&task_id).unwrap();
        assert_eq!(serialized, "\"task_a_1_3\"");

        let back: TaskId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, task_id);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<JobId>(), size_of::<String>());
        assert_eq!(size_of::<TaskId>(), size_of::<String>());
    }
}
