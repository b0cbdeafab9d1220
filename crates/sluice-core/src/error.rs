//! エラー型
//!
//! タスク単位の失敗（`TaskFailure`, `MonitorError`）は tracker で吸収する。
//! 最終 JobState が決まらなくなる失敗は `JobError` として
//! `launch_job` / `cancel_job` の呼び出し元に返す。

use std::time::Duration;

use thiserror::Error;

use crate::domain::{JobId, TaskId, WorkingState};

/// worker プールが投入を拒否した理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("worker pool is saturated")]
    Saturated,

    #[error("worker pool is shut down")]
    ShutDown,
}

/// 受け付けられなかった投入。未実行のタスクは呼び出し元に返す。
#[derive(Debug)]
pub struct Rejected<T> {
    error: SubmitError,
    item: T,
}

impl<T> Rejected<T> {
    pub fn new(error: SubmitError, item: T) -> Self {
        Self { error, item }
    }

    pub fn error(&self) -> SubmitError {
        self.error
    }

    pub fn into_inner(self) -> T {
        self.item
    }
}

/// handler が 1 試行について返す失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    #[error("{0}")]
    Failed(String),

    /// キャンセルを検知して止まった
    #[error("task observed cancellation")]
    Cancelled,
}

impl TaskFailure {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition { from: WorkingState, to: WorkingState },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid state store key '{0}'")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Reporter(#[from] ReporterError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReporterError {
    #[error("unknown metrics reporter '{0}'")]
    UnknownReporter(String),

    #[error("failed to build metrics reporter '{name}': {reason}")]
    Build { name: String, reason: String },

    #[error("metrics reporter '{name}' failed: {reason}")]
    Report { name: String, reason: String },
}

/// モニタの登録拒否。ベストエフォートなので致命的ではない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("monitor scheduler is saturated")]
    Saturated,

    #[error("monitor scheduler is shut down")]
    ShutDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(String),

    #[error("duplicate metrics reporter '{0}'")]
    DuplicateReporter(String),
}

/// `JobListener` の失敗。呼び出し側でログに出す。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("launcher for job {0} was already used")]
    AlreadyLaunched(JobId),

    #[error("handler not found for task_type={0}")]
    UnknownTaskType(String),

    #[error("task {task_id} could not be submitted: {source}")]
    SubmissionRejected {
        task_id: TaskId,
        #[source]
        source: SubmitError,
    },

    #[error("cancellation of job {job_id} was not confirmed within {timeout:?}")]
    Cancellation { job_id: JobId, timeout: Duration },

    #[error("failed to merge task states: {0}")]
    StateMerge(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Reporter(#[from] ReporterError),
}
