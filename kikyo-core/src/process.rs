//! デバッグ対象プロセス
//!
//! 実行・停止・終了の状態機械と、プロセスに属するモジュール・スレッド・
//! AppDomain・ステッパー・評価の一覧を持ちます。
//! 状態は2つのカウンタで表します：
//!
//! - pause session: 停止するたびに新しい値になり、再開で0に戻る（0なら実行中）
//! - debuggee state: 意味のある状態変化ごとに新しい値になり、内部的な continue では変わらない

use crate::appdomain::AppDomainCollection;
use crate::eval::EvalCollection;
use crate::events::{PausedEvent, ProcessEvents};
use crate::module::ModuleCollection;
use crate::stepper::StepperCollection;
use crate::thread::ThreadCollection;
use crate::{DebuggerError, Result};
use kikyo_dwarf::SymbolReader;
use kikyo_target::{
    ModuleToken, NativeBreakpointToken, NativeEvent, NativeProcess, ThreadState,
};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

/// プロセスID（ネイティブのpid）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 再開時に debuggee state をどう扱うか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggeeStateAction {
    /// 内部的な continue。状態はそのまま
    Keep,
    /// 新しい状態に進む
    Clear,
}

/// デバッグ対象プロセス
pub struct Process {
    id: ProcessId,
    pub(crate) native: Box<dyn NativeProcess>,
    working_dir: PathBuf,

    pause_session: u64,
    next_pause_session: u64,
    debuggee_state: u64,
    next_debuggee_state: u64,

    pub(crate) modules: ModuleCollection,
    pub(crate) threads: ThreadCollection,
    pub(crate) appdomains: AppDomainCollection,
    pub(crate) steppers: StepperCollection,
    pub(crate) evals: EvalCollection,

    /// 次の停止で捨てる一時ブレークポイント
    pub(crate) temp_breakpoints: Vec<NativeBreakpointToken>,
    /// エントリポイントで止める要求が残っている
    pub(crate) break_at_entry: bool,
    pub(crate) terminate_issued: bool,
    exited: bool,
    pub(crate) exit_code: Option<i32>,
    /// 以降に生まれるスレッドのネイティブ状態
    pub(crate) new_thread_state: ThreadState,
    /// 停止中に届いたコールバック（次の continue で配送し直す）
    pub(crate) deferred: VecDeque<NativeEvent>,
    pub(crate) events: ProcessEvents,
    last_pause: Option<PausedEvent>,
}

impl Process {
    pub(crate) fn new(id: ProcessId, native: Box<dyn NativeProcess>, working_dir: PathBuf) -> Self {
        Self {
            id,
            native,
            working_dir,
            pause_session: 0,
            next_pause_session: 1,
            debuggee_state: 0,
            next_debuggee_state: 1,
            modules: ModuleCollection::new(),
            threads: ThreadCollection::new("thread"),
            appdomains: AppDomainCollection::new("appdomain"),
            steppers: StepperCollection::new("stepper"),
            evals: EvalCollection::new("evaluation"),
            temp_breakpoints: Vec::new(),
            break_at_entry: false,
            terminate_issued: false,
            exited: false,
            exit_code: None,
            new_thread_state: ThreadState::Run,
            deferred: VecDeque::new(),
            events: ProcessEvents::default(),
            last_pause: None,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// 現在の停止区間の識別子。実行中は0
    pub fn pause_session(&self) -> u64 {
        self.pause_session
    }

    /// デバッグ対象の状態の識別子。クリアされていれば0
    pub fn debuggee_state(&self) -> u64 {
        self.debuggee_state
    }

    pub fn is_running(&self) -> bool {
        self.pause_session == 0
    }

    pub fn is_paused(&self) -> bool {
        !self.is_running()
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_evaluating(&self) -> bool {
        self.evals.is_evaluating()
    }

    pub fn is_terminate_issued(&self) -> bool {
        self.terminate_issued
    }

    /// エントリポイントでの停止要求がまだ消費されていないか
    pub fn is_break_at_entry_armed(&self) -> bool {
        self.break_at_entry
    }

    pub fn modules(&self) -> &ModuleCollection {
        &self.modules
    }

    pub fn threads(&self) -> &ThreadCollection {
        &self.threads
    }

    pub fn appdomains(&self) -> &AppDomainCollection {
        &self.appdomains
    }

    pub fn steppers(&self) -> &StepperCollection {
        &self.steppers
    }

    pub fn evaluations(&self) -> &EvalCollection {
        &self.evals
    }

    pub fn temp_breakpoint_count(&self) -> usize {
        self.temp_breakpoints.len()
    }

    pub fn new_thread_state(&self) -> ThreadState {
        self.new_thread_state
    }

    /// 最後の停止通知
    pub fn last_pause(&self) -> Option<&PausedEvent> {
        self.last_pause.as_ref()
    }

    pub(crate) fn set_last_pause(&mut self, event: PausedEvent) {
        self.last_pause = Some(event);
    }

    pub(crate) fn assert_paused(&self) -> Result<()> {
        if self.is_running() {
            return Err(DebuggerError::NotPaused);
        }
        Ok(())
    }

    pub(crate) fn assert_running(&self) -> Result<()> {
        if self.is_paused() {
            return Err(DebuggerError::NotRunning);
        }
        Ok(())
    }

    /// 停止状態にする
    pub(crate) fn notify_paused(&mut self) -> Result<()> {
        self.assert_running()?;
        self.pause_session = self.next_pause_session;
        self.next_pause_session += 1;
        if self.debuggee_state == 0 {
            self.debuggee_state = self.next_debuggee_state;
            self.next_debuggee_state += 1;
        }
        Ok(())
    }

    /// 実行状態にする
    pub(crate) fn notify_resumed(&mut self, action: DebuggeeStateAction) -> Result<()> {
        self.assert_paused()?;
        if action == DebuggeeStateAction::Clear && self.debuggee_state == 0 {
            return Err(DebuggerError::DebuggeeStateAlreadyCleared);
        }
        self.pause_session = 0;
        if action == DebuggeeStateAction::Clear {
            self.debuggee_state = 0;
        }
        Ok(())
    }

    pub(crate) fn mark_exited(&mut self) -> bool {
        let first = !self.exited;
        self.exited = true;
        first
    }

    /// 進行中のステップをすべて無視対象にし、ネイティブ側でも止める
    pub(crate) fn disable_all_steppers(&mut self) {
        for thread in self.threads.values_mut() {
            thread.set_current_step(None);
        }
        for stepper in self.steppers.ignore_all() {
            if self.native.is_stepper_active(stepper) {
                if let Err(e) = self.native.deactivate_stepper(stepper) {
                    tracing::debug!("cannot deactivate stepper {}: {}", stepper, e);
                }
            }
        }
    }

    /// 一時ブレークポイントを外して捨てる
    pub(crate) fn clear_temp_breakpoints(&mut self) -> Result<()> {
        for bp in std::mem::take(&mut self.temp_breakpoints) {
            self.native.activate_breakpoint(bp, false)?;
        }
        Ok(())
    }

    /// モジュールのシンボルを必要になった時点で読み込む
    pub(crate) fn module_symbols(
        &mut self,
        module: ModuleToken,
        search_paths: &[PathBuf],
    ) -> Result<Option<&dyn SymbolReader>> {
        if !self.modules.get(module)?.symbols_loaded() {
            let reader = self.native.load_symbols(module, search_paths);
            if reader.is_none() {
                tracing::debug!("no symbols for module {} of process {}", module, self.id);
            }
            self.modules.get_mut(module)?.set_symbols(reader);
        }
        Ok(self.modules.get(module)?.symbols())
    }

    /// ソース位置をモジュール内のアドレスに解決する
    pub(crate) fn resolve_location(
        &mut self,
        module: ModuleToken,
        file: &str,
        line: u32,
        column: u32,
        search_paths: &[PathBuf],
    ) -> Result<Option<u64>> {
        Ok(self
            .module_symbols(module, search_paths)?
            .and_then(|reader| reader.resolve_location(file, line, column)))
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("pause_session", &self.pause_session)
            .field("debuggee_state", &self.debuggee_state)
            .field("exited", &self.exited)
            .field("modules", &self.modules.len())
            .field("threads", &self.threads.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kikyo_target::{
        EvalRequest, EvalToken, NativeResult, StepKind, StepperToken, ThreadToken,
    };

    /// 何もしないネイティブプロセス
    struct Inert;

    impl NativeProcess for Inert {
        fn id(&self) -> u32 {
            1
        }
        fn stop(&mut self) -> NativeResult<()> {
            Ok(())
        }
        fn resume(&mut self) -> NativeResult<()> {
            Ok(())
        }
        fn terminate(&mut self, _exit_code: i32) -> NativeResult<()> {
            Ok(())
        }
        fn detach(&mut self) -> NativeResult<()> {
            Ok(())
        }
        fn read_memory(&mut self, _address: u64, _buffer: &mut [u8]) -> NativeResult<usize> {
            Ok(0)
        }
        fn write_memory(&mut self, _address: u64, _data: &[u8]) -> NativeResult<usize> {
            Ok(0)
        }
        fn set_thread_state(&mut self, _thread: ThreadToken, _state: ThreadState) -> NativeResult<()> {
            Ok(())
        }
        fn create_breakpoint(
            &mut self,
            _module: ModuleToken,
            _address: u64,
        ) -> NativeResult<NativeBreakpointToken> {
            Ok(NativeBreakpointToken(1))
        }
        fn activate_breakpoint(
            &mut self,
            _breakpoint: NativeBreakpointToken,
            _active: bool,
        ) -> NativeResult<()> {
            Ok(())
        }
        fn create_stepper(&mut self, _thread: ThreadToken, _kind: StepKind) -> NativeResult<StepperToken> {
            Ok(StepperToken(1))
        }
        fn is_stepper_active(&self, _stepper: StepperToken) -> bool {
            false
        }
        fn deactivate_stepper(&mut self, _stepper: StepperToken) -> NativeResult<()> {
            Ok(())
        }
        fn create_eval(&mut self, _thread: ThreadToken, _request: &EvalRequest) -> NativeResult<EvalToken> {
            Ok(EvalToken(1))
        }
        fn load_symbols(
            &mut self,
            _module: ModuleToken,
            _search_paths: &[PathBuf],
        ) -> Option<Box<dyn SymbolReader>> {
            None
        }
    }

    fn process() -> Process {
        Process::new(ProcessId(1), Box::new(Inert), PathBuf::from("/"))
    }

    #[test]
    fn test_new_process_is_running() {
        let p = process();
        assert!(p.is_running());
        assert_eq!(p.pause_session(), 0);
        assert_eq!(p.debuggee_state(), 0);
        assert!(matches!(p.assert_paused(), Err(DebuggerError::NotPaused)));
    }

    #[test]
    fn test_pause_session_increases_and_resets() {
        let mut p = process();
        p.notify_paused().unwrap();
        let first = p.pause_session();
        assert!(first > 0);
        p.notify_resumed(DebuggeeStateAction::Keep).unwrap();
        assert_eq!(p.pause_session(), 0);
        p.notify_paused().unwrap();
        assert!(p.pause_session() > first);
    }

    #[test]
    fn test_debuggee_state_kept_until_cleared() {
        let mut p = process();
        p.notify_paused().unwrap();
        let state = p.debuggee_state();
        assert_ne!(state, 0);

        p.notify_resumed(DebuggeeStateAction::Keep).unwrap();
        assert_eq!(p.debuggee_state(), state);
        p.notify_paused().unwrap();
        assert_eq!(p.debuggee_state(), state);

        p.notify_resumed(DebuggeeStateAction::Clear).unwrap();
        assert_eq!(p.debuggee_state(), 0);
        p.notify_paused().unwrap();
        assert!(p.debuggee_state() > state);
    }

    #[test]
    fn test_state_violations() {
        let mut p = process();
        assert!(matches!(
            p.notify_resumed(DebuggeeStateAction::Keep),
            Err(DebuggerError::NotPaused)
        ));
        p.notify_paused().unwrap();
        assert!(matches!(p.notify_paused(), Err(DebuggerError::NotRunning)));
    }

    #[test]
    fn test_clear_twice_is_rejected() {
        let mut p = process();
        p.notify_paused().unwrap();
        p.notify_resumed(DebuggeeStateAction::Clear).unwrap();
        // 停止しても state が振られなければクリアできない状況を作る
        p.pause_session = 5;
        assert!(matches!(
            p.notify_resumed(DebuggeeStateAction::Clear),
            Err(DebuggerError::DebuggeeStateAlreadyCleared)
        ));
    }

    #[test]
    fn test_mark_exited_is_idempotent() {
        let mut p = process();
        assert!(p.mark_exited());
        assert!(!p.mark_exited());
        assert!(p.has_exited());
    }
}
