//! WorkingState - タスクとジョブで共通の状態機械

use std::fmt;

use serde::{Deserialize, Serialize};

/// タスク（またはジョブ全体）のライフサイクル
///
/// 状態遷移:
/// - Pending -> Running -> Successful -> Committed
/// - Pending -> Running -> Failed -> Pending（リトライ時のみ）
/// - Pending | Running -> Cancelled
/// - Pending -> Failed（実行前に失敗）
///
/// `Failed -> Pending` 以外は前にしか進まない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingState {
    /// 作成直後、または（再）投入待ち
    Pending,

    /// worker が実行中
    Running,

    /// エラーなく終了
    Successful,

    /// エラーで終了。リトライ上限に達したら終端。
    Failed,

    /// ジョブのキャンセルで停止
    Cancelled,

    /// 成功したタスクの出力をコミット済み
    Committed,
}

impl WorkingState {
    /// 終端状態か（これ以上遷移しない）
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkingState::Committed | WorkingState::Cancelled)
    }

    /// 現在の試行が終わったか（成否は問わない）
    pub fn is_finished(self) -> bool {
        !matches!(self, WorkingState::Pending | WorkingState::Running)
    }

    pub fn can_transition_to(self, next: WorkingState) -> bool {
        use WorkingState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Successful)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Successful, Committed)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for WorkingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkingState::Pending => "PENDING",
            WorkingState::Running => "RUNNING",
            WorkingState::Successful => "SUCCESSFUL",
            WorkingState::Failed => "FAILED",
            WorkingState::Cancelled => "CANCELLED",
            WorkingState::Committed => "COMMITTED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::WorkingState::*;
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::start(Pending, Running)]
    #[case::succeed(Running, Successful)]
    #[case::fail(Running, Failed)]
    #[case::cancel_running(Running, Cancelled)]
    #[case::cancel_pending(Pending, Cancelled)]
    #[case::commit(Successful, Committed)]
    #[case::retry(Failed, Pending)]
    fn allowed_transitions(#[case] from: WorkingState, #[case] to: WorkingState) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::backwards(Running, Pending)]
    #[case::uncommit(Committed, Successful)]
    #[case::revive_cancelled(Cancelled, Pending)]
    #[case::skip_running(Pending, Successful)]
    #[case::commit_failed(Failed, Committed)]
    fn rejected_transitions(#[case] from: WorkingState, #[case] to: WorkingState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn serializes_in_upper_case() {
        let s = serde_json::to_string(&Successful).unwrap();
        assert_eq!(s, "\"SUCCESSFUL\"");
        assert_eq!(Committed.to_string(), "COMMITTED");
    }

    #[test]
    fn terminal_and_finished() {
        assert!(Committed.is_terminal());
        assert!(!Failed.is_terminal());
        assert!(Failed.is_finished());
        assert!(!Running.is_finished());
    }
}
