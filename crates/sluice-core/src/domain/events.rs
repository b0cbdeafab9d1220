use super::task_state::TaskState;

/// 確定したばかりのタスク状態。subscriber に配信される。
///
/// 作成後は不変。tracker は確定タスクごとに 1 つ、collector は新規取り込みの
/// あったポーリングごとに 1 つ発行する。
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    task_states: Vec<TaskState>,
}

impl CompletionEvent {
    pub fn new(task_states: Vec<TaskState>) -> Self {
        Self { task_states }
    }

    pub fn single(task_state: TaskState) -> Self {
        Self::new(vec![task_state])
    }

    pub fn task_states(&self) -> &[TaskState] {
        &self.task_states
    }

    pub fn len(&self) -> usize {
        self.task_states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_states.is_empty()
    }
}
