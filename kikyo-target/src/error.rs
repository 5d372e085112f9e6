//! ネイティブデバッグインターフェースのエラー

use thiserror::Error;

/// ネイティブ操作の結果型
pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// ネイティブデバッグインターフェースが返すエラー
#[derive(Debug, Error)]
pub enum NativeError {
    /// スレッドがまだ開始していないため状態を設定できない
    ///
    /// スレッド生成直後に起こりうる既知の競合で、呼び出し側は無視してよい。
    #[error("thread {0} has not started yet")]
    ThreadNotStarted(u64),

    #[error("no such process: {0}")]
    NoSuchProcess(u32),

    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("interface is not initialized")]
    NotInitialized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OS error: {0}")]
    Os(#[from] nix::errno::Errno),

    #[error("{0}")]
    Other(String),
}

impl NativeError {
    /// 呼び出し側が黙って無視してよい既知の競合かどうか
    pub fn is_thread_not_started(&self) -> bool {
        matches!(self, NativeError::ThreadNotStarted(_))
    }
}

impl From<anyhow::Error> for NativeError {
    fn from(e: anyhow::Error) -> Self {
        NativeError::Other(e.to_string())
    }
}
