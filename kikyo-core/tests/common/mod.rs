//! 統合テスト用のスクリプト化セッション

#![allow(dead_code)]

use kikyo_core::{Debugger, PausedEvent, ProcessId};
use kikyo_target::scripted::{
    ScriptedHandle, ScriptedInterface, ScriptedModule, ScriptedProgram, ScriptedSymbols,
};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// スクリプト化バックエンドのセッションを作る
pub fn session() -> (Debugger, ScriptedHandle) {
    let (backend, handle) = ScriptedInterface::new();
    (Debugger::with_backend(Box::new(backend)), handle)
}

/// main.rs の10行目と42行目を持つモジュール
pub fn app_module(name: &str, base: u64) -> ScriptedModule {
    ScriptedModule::new(name).with_symbols(
        ScriptedSymbols::new()
            .with_entry_point(base + 0x100)
            .with_line("main.rs", 10, base + 0x110)
            .with_line("main.rs", 42, base + 0x142),
    )
}

pub fn app_program() -> ScriptedProgram {
    ScriptedProgram::new().with_module(app_module("app", 0))
}

/// 登録済みのプログラムを作業ディレクトリ指定なしで起動する
pub fn start(debugger: &mut Debugger, program: &str) -> ProcessId {
    debugger
        .start(program, Path::new(""), &[], false)
        .expect("Failed to start scripted program")
}

/// 停止通知を記録する
pub fn record_pauses(debugger: &mut Debugger, id: ProcessId) -> Rc<RefCell<Vec<PausedEvent>>> {
    let pauses = Rc::new(RefCell::new(Vec::new()));
    let sink = pauses.clone();
    debugger
        .events_mut(id)
        .expect("process should exist")
        .on_paused(move |_, event| sink.borrow_mut().push(event.clone()));
    pauses
}
