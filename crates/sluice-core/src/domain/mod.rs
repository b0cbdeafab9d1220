//! Domain - ドメインモデル
//!
//! - **ids**: JobId / TaskId
//! - **state**: WorkingState (task と job で共通の状態機械)
//! - **task_state** / **job**: TaskState, JobState
//! - **task**: worker が実行する Task
//! - **decision** / **retry**: retry か finalize かの判断
//! - **events**: CompletionEvent
//! - **spec**: JobSpec / WorkUnit

pub mod decision;
pub mod events;
pub mod ids;
pub mod job;
pub mod retry;
pub mod spec;
pub mod state;
pub mod task;
pub mod task_state;

pub use self::decision::{Decider, Decision, DefaultDecider};
pub use self::events::CompletionEvent;
pub use self::ids::{Id, IdMarker, JobId, TaskId};
pub use self::job::{JobCommitPolicy, JobState, SharedJobState};
pub use self::retry::RetryPolicy;
pub use self::spec::{JobSpec, WorkUnit};
pub use self::state::WorkingState;
pub use self::task::{Task, TaskMetrics, ThroughputSnapshot};
pub use self::task_state::TaskState;
