//! Kikyo デバッガのコア機能
//!
//! このクレートは、ネイティブプロセスを制御するデバッガエンジンを提供します。
//! ネイティブデバッグインターフェースは1つの所有スレッドからしか使えないため、
//! セッション（[`Debugger`]）はそのスレッドが持ち、他のスレッドからの操作と
//! ネイティブコールバックはすべてスレッド間コール中継（[`CallRelay`]）を通ります。
//!
//! - プロセス制御: 実行・停止・終了の状態機械と、停止区間・デバッグ対象状態のカウンタ
//! - 追跡: モジュール・スレッド・AppDomain・ステッパー・評価
//! - ブレークポイント: ソース位置で登録し、モジュールのロードごとに束縛

pub mod appdomain;
pub mod breakpoint;
mod callback;
pub mod command;
mod control;
pub mod debugger;
pub mod error;
pub mod eval;
pub mod events;
pub mod handle;
pub mod module;
pub mod options;
pub mod parse;
pub mod process;
pub mod relay;
pub mod stepper;
pub mod thread;
pub mod tracker;

pub use appdomain::AppDomain;
pub use breakpoint::{Breakpoint, BreakpointBinding, BreakpointId, BreakpointManager};
pub use command::Command;
pub use debugger::Debugger;
pub use error::{DebuggerError, Result};
pub use eval::{EvalOutcome, Evaluation};
pub use events::{
    ExceptionInfo, ExitedEvent, MessageEvent, ModuleEvent, PausedEvent, ProcessEvents,
};
pub use handle::DebuggerHandle;
pub use module::Module;
pub use options::Options;
pub use process::{DebuggeeStateAction, Process, ProcessId};
pub use relay::CallRelay;
pub use stepper::Stepper;
pub use thread::Thread;

// 他のクレートから使用するために再エクスポート
pub use kikyo_target::{
    EvalRequest, ModuleToken, NativeBreakpointToken, ProtocolVersion, StepKind, ThreadState,
    ThreadToken,
};
