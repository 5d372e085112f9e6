//! プロセスの通知
//!
//! リスナーは所有スレッド上で同期的に呼ばれ、セッションを `&mut` で受け取ります。
//! そのためリスナーの中から continue などの操作をしてよく、
//! 停止通知はリスナーごとに「まだ停止中か」を確認してから呼ばれます。

use crate::breakpoint::BreakpointId;
use crate::debugger::Debugger;
use crate::process::ProcessId;
use kikyo_target::{ModuleToken, ThreadToken};
use std::rc::Rc;

/// 例外による停止の詳細
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub description: String,
    pub unhandled: bool,
}

/// 停止通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PausedEvent {
    pub process: ProcessId,
    /// 停止を起こしたスレッド（スレッドに依らない停止では None）
    pub thread: Option<ThreadToken>,
    pub breakpoints_hit: Vec<BreakpointId>,
    pub exception: Option<ExceptionInfo>,
    /// ブレーク要求やステップ完了など、その他の停止理由
    pub is_break: bool,
}

impl PausedEvent {
    pub fn new(process: ProcessId) -> Self {
        Self {
            process,
            thread: None,
            breakpoints_hit: Vec::new(),
            exception: None,
            is_break: false,
        }
    }
}

/// モジュールのロード・アンロード通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEvent {
    pub process: ProcessId,
    pub module: ModuleToken,
    pub name: String,
    pub order_of_loading: usize,
}

/// デバッグ対象からのログメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub process: ProcessId,
    pub level: i32,
    pub category: String,
    pub message: String,
}

/// 終了通知（デタッチでは終了コードがない）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitedEvent {
    pub process: ProcessId,
    pub exit_code: Option<i32>,
}

/// リスナー
pub type Listener<E> = Rc<dyn Fn(&mut Debugger, &E)>;

/// プロセスごとのリスナー一覧
#[derive(Default, Clone)]
pub struct ProcessEvents {
    pub(crate) module_loaded: Vec<Listener<ModuleEvent>>,
    pub(crate) module_unloaded: Vec<Listener<ModuleEvent>>,
    pub(crate) paused: Vec<Listener<PausedEvent>>,
    pub(crate) resumed: Vec<Listener<ProcessId>>,
    pub(crate) exited: Vec<Listener<ExitedEvent>>,
    pub(crate) log_message: Vec<Listener<MessageEvent>>,
}

impl ProcessEvents {
    pub fn on_module_loaded(&mut self, f: impl Fn(&mut Debugger, &ModuleEvent) + 'static) {
        self.module_loaded.push(Rc::new(f));
    }

    pub fn on_module_unloaded(&mut self, f: impl Fn(&mut Debugger, &ModuleEvent) + 'static) {
        self.module_unloaded.push(Rc::new(f));
    }

    pub fn on_paused(&mut self, f: impl Fn(&mut Debugger, &PausedEvent) + 'static) {
        self.paused.push(Rc::new(f));
    }

    pub fn on_resumed(&mut self, f: impl Fn(&mut Debugger, &ProcessId) + 'static) {
        self.resumed.push(Rc::new(f));
    }

    pub fn on_exited(&mut self, f: impl Fn(&mut Debugger, &ExitedEvent) + 'static) {
        self.exited.push(Rc::new(f));
    }

    pub fn on_log_message(&mut self, f: impl Fn(&mut Debugger, &MessageEvent) + 'static) {
        self.log_message.push(Rc::new(f));
    }
}
