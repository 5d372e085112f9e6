//! デバッガのエラー

use crate::process::ProcessId;
use kikyo_target::NativeError;
use std::fmt;
use thiserror::Error;

/// デバッガの結果型
pub type Result<T> = std::result::Result<T, DebuggerError>;

/// デバッガのエラー
#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("cannot debug because a kernel debugger is enabled")]
    KernelDebuggerEnabled,

    #[error("failed to initialize the native debugging interface: {0}")]
    InterfaceInit(#[source] NativeError),

    #[error("process is not paused")]
    NotPaused,

    #[error("process is not running")]
    NotRunning,

    #[error("cannot raise an event within a native callback")]
    InCallback,

    #[error("debuggee state already cleared")]
    DebuggeeStateAlreadyCleared,

    /// 待機中にプロセスが終了した（通常の終了経路として扱ってよい）
    #[error("process has exited")]
    ProcessExited,

    /// 評価の完了前に別の理由で停止した
    #[error("evaluation was interrupted by a pause")]
    EvalInterrupted,

    #[error("{kind} not found: {what}")]
    NotFound { kind: &'static str, what: String },

    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),

    #[error("cannot terminate the debugger while {0} process(es) are attached")]
    ProcessesAttached(usize),

    #[error("cannot relay a call from the owning thread")]
    CalledFromOwningThread,

    #[error("call relay is closed")]
    RelayClosed,

    #[error(transparent)]
    Native(#[from] NativeError),
}

impl DebuggerError {
    pub(crate) fn not_found(kind: &'static str, what: impl fmt::Display) -> Self {
        DebuggerError::NotFound {
            kind,
            what: what.to_string(),
        }
    }

    /// 「プロセスが終了した」ことを表すか
    pub fn is_process_exited(&self) -> bool {
        matches!(self, DebuggerError::ProcessExited)
    }
}
