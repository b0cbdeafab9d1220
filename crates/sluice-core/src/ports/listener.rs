use async_trait::async_trait;

use crate::domain::JobState;
use crate::error::ListenerError;

/// ジョブ単位のコールバック。エラーは launcher がログに出すだけ。
#[async_trait]
pub trait JobListener: Send + Sync {
    /// 正常終了（コミット or 失敗）
    async fn on_job_completion(&self, _job_state: &JobState) -> Result<(), ListenerError> {
        Ok(())
    }

    /// キャンセル済みで、投入済みタスクがすべて確定した
    async fn on_job_cancellation(&self, _job_state: &JobState) -> Result<(), ListenerError> {
        Ok(())
    }
}
