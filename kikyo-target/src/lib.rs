//! Kikyo ターゲットプロセス制御
//!
//! このクレートは、デバッグ対象プロセスを制御するネイティブ層を提供します。
//! エンジン側は [`NativeDebugInterface`] と [`NativeProcess`] の2つのトレイトだけを見ます。
//!
//! - Linux x86_64 では ptrace ベースの実装（[`PtraceInterface`]）
//! - `scripted` フィーチャーでは決定的なインメモリ実装（テスト用）

pub mod error;
pub mod kernel;
pub mod native;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod breakpoint;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod memory;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod process;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod ptrace;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod registers;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod thread;

#[cfg(feature = "scripted")]
pub mod scripted;

pub use error::{NativeError, NativeResult};
pub use native::{
    AppDomainToken, EvalRequest, EvalToken, EventSink, LaunchRequest, ModuleToken,
    NativeBreakpointToken, NativeDebugInterface, NativeEvent, NativeProcess, ProtocolVersion,
    StepKind, StepperToken, ThreadState, ThreadToken,
};

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use ptrace::{PtraceInterface, PtraceProcess};

/// プラットフォーム既定のバックエンドを作る
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub fn default_interface() -> Box<dyn NativeDebugInterface> {
    Box::new(PtraceInterface::new())
}
