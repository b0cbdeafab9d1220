//! CompletionSubscriber port - 完了イベントの受け取り手

use crate::domain::CompletionEvent;

/// subscribe 中に発行された `CompletionEvent` を受け取る
///
/// 発行側（worker か collector）のタスク上で呼ばれる。重い処理は外に逃がすこと。
pub trait CompletionSubscriber: Send + Sync {
    fn on_completion(&self, event: &CompletionEvent);
}
