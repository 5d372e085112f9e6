//! 他のスレッドからセッションを操作するハンドル

use crate::debugger::Debugger;
use crate::relay::CallRelay;
use crate::Result;
use std::sync::Arc;

/// セッションへの処理を所有スレッドに中継するハンドル
///
/// 中継された処理は所有スレッドが `pump` するか、ブロッキング操作で待っている間に実行される。
#[derive(Clone)]
pub struct DebuggerHandle {
    relay: Arc<CallRelay<Debugger>>,
}

impl DebuggerHandle {
    pub(crate) fn new(relay: Arc<CallRelay<Debugger>>) -> Self {
        Self { relay }
    }

    /// 所有スレッドで `f` を実行し、その結果を返す
    ///
    /// 所有スレッドから呼ぶと [`crate::DebuggerError::CalledFromOwningThread`]、
    /// セッションが破棄されていれば [`crate::DebuggerError::RelayClosed`]。
    pub fn call<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Debugger) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.relay.call(f)
    }

    /// 所有スレッドで `f` を実行するよう積んで、すぐに戻る
    pub fn async_call<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Debugger) + Send + 'static,
    {
        self.relay.async_call(f)
    }

    pub fn is_owning_thread(&self) -> bool {
        self.relay.is_owning_thread()
    }
}

impl std::fmt::Debug for DebuggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebuggerHandle")
            .field("owner", &self.relay.owner())
            .finish()
    }
}
