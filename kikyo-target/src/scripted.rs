//! スクリプト化されたインメモリバックエンド
//!
//! 実際のOSデバッグ機能の代わりに、あらかじめ用意した「プログラム」を
//! 決定的に実行します。エンジンのテストやドライランに使います。
//!
//! ネイティブの振る舞いは実物に合わせてあります：
//! - コールバックは1つずつ配送され、次のコールバックは `resume` まで保留される
//! - 起動時には ProcessCreated, AppDomainCreated, ThreadCreated, ModuleLoaded の順で届く
//! - `Execute` ステップは、そのアドレスに有効なブレークポイントがあるときだけ停止する

use crate::native::{
    AppDomainToken, EvalRequest, EvalToken, EventSink, LaunchRequest, ModuleToken,
    NativeBreakpointToken, NativeDebugInterface, NativeEvent, NativeProcess, ProtocolVersion,
    StepKind, StepperToken, ThreadState, ThreadToken,
};
use crate::{NativeError, NativeResult};
use kikyo_dwarf::SymbolReader;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// モジュールのシンボル（行テーブルとエントリポイントだけ）
#[derive(Debug, Clone, Default)]
pub struct ScriptedSymbols {
    pub entry_point: Option<u64>,
    /// (ファイル, 行, アドレス)
    pub lines: Vec<(String, u32, u64)>,
}

impl ScriptedSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry_point(mut self, address: u64) -> Self {
        self.entry_point = Some(address);
        self
    }

    pub fn with_line(mut self, file: &str, line: u32, address: u64) -> Self {
        self.lines.push((file.to_string(), line, address));
        self
    }
}

impl SymbolReader for ScriptedSymbols {
    fn user_entry_point(&self) -> Option<u64> {
        self.entry_point
    }

    fn resolve_location(&self, file: &str, line: u32, _column: u32) -> Option<u64> {
        self.lines
            .iter()
            .find(|(f, l, _)| f == file && *l == line)
            .map(|(_, _, addr)| *addr)
    }

    fn describe(&self, address: u64) -> Option<String> {
        self.lines
            .iter()
            .find(|(_, _, addr)| *addr == address)
            .map(|(f, l, _)| format!("{}:{}", f, l))
    }
}

/// スクリプト上のモジュール
#[derive(Debug, Clone)]
pub struct ScriptedModule {
    pub name: String,
    pub symbols: Option<ScriptedSymbols>,
}

impl ScriptedModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            symbols: None,
        }
    }

    pub fn with_symbols(mut self, symbols: ScriptedSymbols) -> Self {
        self.symbols = Some(symbols);
        self
    }
}

/// `resume` ごとに消費されるスクリプトの1ステップ
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// スレッドがアドレスを実行する。有効なブレークポイントがなければ素通り
    Execute { thread: u64, address: u64 },
    /// コールバックをそのまま配送する
    Event(NativeEvent),
    /// モジュールをロードする
    LoadModule(ScriptedModule),
    /// 新しいスレッドが生まれる
    SpawnThread(u64),
    /// プロセスが終了する
    Exit(i32),
}

/// スクリプト化されたデバッグ対象プログラム
#[derive(Debug, Clone)]
pub struct ScriptedProgram {
    pub modules: Vec<ScriptedModule>,
    pub threads: Vec<u64>,
    /// 存在するがまだ開始していないスレッド（状態設定が `ThreadNotStarted` になる）
    pub unstarted_threads: Vec<u64>,
    pub script: Vec<ScriptStep>,
    pub memory_base: u64,
    pub memory: Vec<u8>,
    pub eval_result: Vec<u8>,
}

impl Default for ScriptedProgram {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            threads: vec![1],
            unstarted_threads: Vec::new(),
            script: Vec::new(),
            memory_base: 0x1000,
            memory: Vec::new(),
            eval_result: Vec::new(),
        }
    }
}

impl ScriptedProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: ScriptedModule) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_thread(mut self, thread: u64) -> Self {
        self.threads.push(thread);
        self
    }

    pub fn with_unstarted_thread(mut self, thread: u64) -> Self {
        self.threads.push(thread);
        self.unstarted_threads.push(thread);
        self
    }

    pub fn with_memory(mut self, base: u64, bytes: &[u8]) -> Self {
        self.memory_base = base;
        self.memory = bytes.to_vec();
        self
    }

    pub fn with_eval_result(mut self, bytes: &[u8]) -> Self {
        self.eval_result = bytes.to_vec();
        self
    }

    pub fn step(mut self, step: ScriptStep) -> Self {
        self.script.push(step);
        self
    }
}

#[derive(Debug)]
struct ScriptedBreakpoint {
    address: u64,
    active: bool,
}

#[derive(Debug)]
struct ScriptedStepper {
    thread: ThreadToken,
    active: bool,
}

struct ProcessState {
    appdomain: AppDomainToken,
    queue: VecDeque<NativeEvent>,
    script: VecDeque<ScriptStep>,
    modules: HashMap<ModuleToken, ScriptedModule>,
    unstarted: Vec<ThreadToken>,
    thread_states: HashMap<ThreadToken, ThreadState>,
    breakpoints: HashMap<NativeBreakpointToken, ScriptedBreakpoint>,
    steppers: HashMap<StepperToken, ScriptedStepper>,
    memory_base: u64,
    memory: Vec<u8>,
    eval_result: Vec<u8>,
    next_token: u64,
    running: bool,
    exited: bool,
    detached: bool,
    resume_count: usize,
    stop_count: usize,
}

impl ProcessState {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn runnable(&self, thread: ThreadToken) -> bool {
        self.thread_states.get(&thread) != Some(&ThreadState::Suspend)
    }

    fn alive(&self, pid: u32) -> NativeResult<()> {
        if self.exited || self.detached {
            return Err(NativeError::NoSuchProcess(pid));
        }
        Ok(())
    }

    /// 起動時のコールバック列を作る
    fn launch(program: ScriptedProgram) -> Self {
        let mut state = Self {
            appdomain: AppDomainToken(0),
            queue: VecDeque::new(),
            script: program.script.into_iter().collect(),
            modules: HashMap::new(),
            unstarted: program.unstarted_threads.iter().map(|&t| ThreadToken(t)).collect(),
            thread_states: HashMap::new(),
            breakpoints: HashMap::new(),
            steppers: HashMap::new(),
            memory_base: program.memory_base,
            memory: program.memory,
            eval_result: program.eval_result,
            next_token: 0,
            running: false,
            exited: false,
            detached: false,
            resume_count: 0,
            stop_count: 0,
        };

        state.appdomain = AppDomainToken(state.token());
        state.queue.push_back(NativeEvent::ProcessCreated);
        state.queue.push_back(NativeEvent::AppDomainCreated {
            appdomain: state.appdomain,
            name: "DefaultDomain".to_string(),
        });
        for tid in program.threads {
            state.thread_states.insert(ThreadToken(tid), ThreadState::Run);
            state.queue.push_back(NativeEvent::ThreadCreated {
                thread: ThreadToken(tid),
            });
        }
        for module in program.modules {
            let event = state.load_module(module);
            state.queue.push_back(event);
        }
        state
    }

    fn load_module(&mut self, module: ScriptedModule) -> NativeEvent {
        let token = ModuleToken(self.token());
        let event = NativeEvent::ModuleLoaded {
            module: token,
            appdomain: self.appdomain,
            name: module.name.clone(),
            path: Some(PathBuf::from(&module.name)),
            base: 0,
        };
        self.modules.insert(token, module);
        event
    }

    /// 次に配送するコールバックを決める
    fn next_event(&mut self) -> Option<NativeEvent> {
        if let Some(event) = self.queue.pop_front() {
            return Some(event);
        }

        // 走るスレッドにステッパーがあれば先に完了させる
        let stepping = self
            .steppers
            .iter()
            .filter(|(_, s)| s.active && self.runnable(s.thread))
            .map(|(token, s)| (*token, s.thread))
            .min();
        if let Some((token, thread)) = stepping {
            if let Some(stepper) = self.steppers.get_mut(&token) {
                stepper.active = false;
            }
            return Some(NativeEvent::StepComplete {
                thread,
                stepper: token,
            });
        }

        while let Some(step) = self.script.pop_front() {
            match step {
                ScriptStep::Execute { thread, address } => {
                    let thread = ThreadToken(thread);
                    // 停止中のスレッドは何も実行しない
                    if !self.runnable(thread) {
                        continue;
                    }
                    let hit = self
                        .breakpoints
                        .iter()
                        .filter(|(_, bp)| bp.active && bp.address == address)
                        .map(|(token, _)| *token)
                        .min();
                    if let Some(breakpoint) = hit {
                        return Some(NativeEvent::BreakpointHit { thread, breakpoint });
                    }
                }
                ScriptStep::Event(event) => return Some(event),
                ScriptStep::LoadModule(module) => return Some(self.load_module(module)),
                ScriptStep::SpawnThread(tid) => {
                    let thread = ThreadToken(tid);
                    self.thread_states.insert(thread, ThreadState::Run);
                    return Some(NativeEvent::ThreadCreated { thread });
                }
                ScriptStep::Exit(exit_code) => {
                    self.exited = true;
                    self.script.clear();
                    return Some(NativeEvent::ProcessExited { exit_code });
                }
            }
        }

        None
    }
}

#[derive(Default)]
struct Shared {
    kernel_debugger: bool,
    default_runtime: String,
    runtimes: HashMap<PathBuf, String>,
    programs: HashMap<PathBuf, ScriptedProgram>,
    running: HashMap<u32, PathBuf>,
    sink: Option<EventSink>,
    protocol: Option<ProtocolVersion>,
    initialize_count: usize,
    terminate_count: usize,
    next_pid: u32,
    processes: HashMap<u32, ProcessState>,
}

impl Shared {
    fn process(&mut self, pid: u32) -> NativeResult<&mut ProcessState> {
        self.processes
            .get_mut(&pid)
            .ok_or(NativeError::NoSuchProcess(pid))
    }
}

/// ロックを外してからイベントを配送する
fn post(shared: &Mutex<Shared>, pid: u32, event: Option<NativeEvent>) {
    let Some(event) = event else {
        return;
    };
    let sink = shared.lock().sink.clone();
    match sink {
        Some(sink) => sink.post(pid, event),
        None => tracing::warn!("scripted: dropping {:?} for {}: interface not initialized", event, pid),
    }
}

/// スクリプト化バックエンドのインターフェース
pub struct ScriptedInterface {
    shared: Arc<Mutex<Shared>>,
}

/// テストからバックエンドを操作・観察するハンドル
#[derive(Clone)]
pub struct ScriptedHandle {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedInterface {
    /// インターフェースと操作用ハンドルを作る
    pub fn new() -> (Self, ScriptedHandle) {
        let shared = Arc::new(Mutex::new(Shared {
            default_runtime: "v4.0.30319".to_string(),
            next_pid: 1000,
            ..Default::default()
        }));
        (
            Self {
                shared: shared.clone(),
            },
            ScriptedHandle { shared },
        )
    }

    fn launch(&mut self, program: ScriptedProgram, pid: u32) -> Box<dyn NativeProcess> {
        let first = {
            let mut shared = self.shared.lock();
            let mut state = ProcessState::launch(program);
            let first = state.queue.pop_front();
            shared.processes.insert(pid, state);
            first
        };
        // 作成直後はコールバックで停止している
        post(&self.shared, pid, first);
        Box::new(ScriptedProcess {
            pid,
            shared: self.shared.clone(),
        })
    }
}

impl NativeDebugInterface for ScriptedInterface {
    fn kernel_debugger_enabled(&self) -> bool {
        self.shared.lock().kernel_debugger
    }

    fn runtime_version(&self, program: &Path) -> Option<String> {
        self.shared.lock().runtimes.get(program).cloned()
    }

    fn default_runtime_version(&self) -> String {
        self.shared.lock().default_runtime.clone()
    }

    fn executable_of(&self, pid: u32) -> Option<PathBuf> {
        self.shared.lock().running.get(&pid).cloned()
    }

    fn initialize(
        &mut self,
        protocol: ProtocolVersion,
        _runtime_version: &str,
        sink: EventSink,
    ) -> NativeResult<()> {
        let mut shared = self.shared.lock();
        shared.protocol = Some(protocol);
        shared.sink = Some(sink);
        shared.initialize_count += 1;
        Ok(())
    }

    fn terminate(&mut self) -> NativeResult<()> {
        let mut shared = self.shared.lock();
        if shared.sink.take().is_none() {
            return Err(NativeError::NotInitialized);
        }
        shared.protocol = None;
        shared.terminate_count += 1;
        Ok(())
    }

    fn create_process(&mut self, request: &LaunchRequest) -> NativeResult<Box<dyn NativeProcess>> {
        let (program, pid) = {
            let mut shared = self.shared.lock();
            if shared.sink.is_none() {
                return Err(NativeError::NotInitialized);
            }
            let program = shared.programs.get(&request.program).cloned().ok_or_else(|| {
                NativeError::Other(format!("no scripted program at {:?}", request.program))
            })?;
            let pid = shared.next_pid;
            shared.next_pid += 1;
            (program, pid)
        };
        Ok(self.launch(program, pid))
    }

    fn attach(&mut self, pid: u32) -> NativeResult<Box<dyn NativeProcess>> {
        let program = {
            let shared = self.shared.lock();
            if shared.sink.is_none() {
                return Err(NativeError::NotInitialized);
            }
            shared
                .running
                .get(&pid)
                .and_then(|path| shared.programs.get(path))
                .cloned()
                .ok_or(NativeError::NoSuchProcess(pid))?
        };
        Ok(self.launch(program, pid))
    }
}

/// スクリプト化されたプロセス
pub struct ScriptedProcess {
    pid: u32,
    shared: Arc<Mutex<Shared>>,
}

impl NativeProcess for ScriptedProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn stop(&mut self) -> NativeResult<()> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid)?;
        state.alive(self.pid)?;
        state.running = false;
        state.stop_count += 1;
        Ok(())
    }

    fn resume(&mut self) -> NativeResult<()> {
        let event = {
            let mut shared = self.shared.lock();
            let state = shared.process(self.pid)?;
            state.alive(self.pid)?;
            state.resume_count += 1;
            state.running = true;
            let event = state.next_event();
            if event.is_some() {
                state.running = false;
            }
            event
        };
        post(&self.shared, self.pid, event);
        Ok(())
    }

    fn terminate(&mut self, exit_code: i32) -> NativeResult<()> {
        {
            let mut shared = self.shared.lock();
            let state = shared.process(self.pid)?;
            state.alive(self.pid)?;
            state.queue.clear();
            state.script.clear();
            state.exited = true;
        }
        post(
            &self.shared,
            self.pid,
            Some(NativeEvent::ProcessExited { exit_code }),
        );
        Ok(())
    }

    fn detach(&mut self) -> NativeResult<()> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid)?;
        state.alive(self.pid)?;
        state.detached = true;
        state.queue.clear();
        for bp in state.breakpoints.values_mut() {
            bp.active = false;
        }
        Ok(())
    }

    fn read_memory(&mut self, address: u64, buffer: &mut [u8]) -> NativeResult<usize> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid)?;
        let Some(offset) = address.checked_sub(state.memory_base) else {
            return Ok(0);
        };
        let offset = offset as usize;
        if offset >= state.memory.len() {
            return Ok(0);
        }
        let n = buffer.len().min(state.memory.len() - offset);
        buffer[..n].copy_from_slice(&state.memory[offset..offset + n]);
        Ok(n)
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> NativeResult<usize> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid)?;
        let Some(offset) = address.checked_sub(state.memory_base) else {
            return Ok(0);
        };
        let offset = offset as usize;
        if offset >= state.memory.len() {
            return Ok(0);
        }
        let n = data.len().min(state.memory.len() - offset);
        state.memory[offset..offset + n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn set_thread_state(&mut self, thread: ThreadToken, thread_state: ThreadState) -> NativeResult<()> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid)?;
        if state.unstarted.contains(&thread) {
            return Err(NativeError::ThreadNotStarted(thread.0));
        }
        match state.thread_states.get_mut(&thread) {
            Some(current) => {
                *current = thread_state;
                Ok(())
            }
            None => Err(NativeError::Other(format!("unknown thread {}", thread))),
        }
    }

    fn create_breakpoint(
        &mut self,
        module: ModuleToken,
        address: u64,
    ) -> NativeResult<NativeBreakpointToken> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid)?;
        if !state.modules.contains_key(&module) {
            return Err(NativeError::Other(format!("unknown module {}", module)));
        }
        let token = NativeBreakpointToken(state.token());
        state.breakpoints.insert(
            token,
            ScriptedBreakpoint {
                address,
                active: false,
            },
        );
        Ok(token)
    }

    fn activate_breakpoint(
        &mut self,
        breakpoint: NativeBreakpointToken,
        active: bool,
    ) -> NativeResult<()> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid)?;
        let bp = state
            .breakpoints
            .get_mut(&breakpoint)
            .ok_or_else(|| NativeError::Other(format!("unknown breakpoint {}", breakpoint)))?;
        bp.active = active;
        Ok(())
    }

    fn create_stepper(&mut self, thread: ThreadToken, _kind: StepKind) -> NativeResult<StepperToken> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid)?;
        if !state.thread_states.contains_key(&thread) {
            return Err(NativeError::Other(format!("unknown thread {}", thread)));
        }
        let token = StepperToken(state.token());
        state.steppers.insert(
            token,
            ScriptedStepper {
                thread,
                active: true,
            },
        );
        Ok(token)
    }

    fn is_stepper_active(&self, stepper: StepperToken) -> bool {
        let mut shared = self.shared.lock();
        shared
            .process(self.pid)
            .ok()
            .and_then(|state| state.steppers.get(&stepper))
            .map(|s| s.active)
            .unwrap_or(false)
    }

    fn deactivate_stepper(&mut self, stepper: StepperToken) -> NativeResult<()> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid)?;
        if let Some(s) = state.steppers.get_mut(&stepper) {
            s.active = false;
        }
        Ok(())
    }

    fn create_eval(&mut self, _thread: ThreadToken, _request: &EvalRequest) -> NativeResult<EvalToken> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid)?;
        let eval = EvalToken(state.token());
        // 評価は次の resume で完了する
        let value = state.eval_result.clone();
        state
            .queue
            .push_front(NativeEvent::EvalComplete { eval, value });
        Ok(eval)
    }

    fn load_symbols(
        &mut self,
        module: ModuleToken,
        _search_paths: &[PathBuf],
    ) -> Option<Box<dyn SymbolReader>> {
        let mut shared = self.shared.lock();
        let state = shared.process(self.pid).ok()?;
        let symbols = state.modules.get(&module)?.symbols.clone()?;
        Some(Box::new(symbols))
    }
}

impl ScriptedHandle {
    /// `path` で起動できるプログラムを登録する
    pub fn add_program<P: AsRef<Path>>(&self, path: P, program: ScriptedProgram) {
        self.shared
            .lock()
            .programs
            .insert(path.as_ref().to_path_buf(), program);
    }

    /// アタッチ可能な実行中プロセスとして登録する（プログラムは `add_program` 済みのもの）
    pub fn add_running_process<P: AsRef<Path>>(&self, pid: u32, path: P) {
        self.shared
            .lock()
            .running
            .insert(pid, path.as_ref().to_path_buf());
    }

    pub fn set_runtime_version<P: AsRef<Path>>(&self, path: P, version: &str) {
        self.shared
            .lock()
            .runtimes
            .insert(path.as_ref().to_path_buf(), version.to_string());
    }

    pub fn set_kernel_debugger(&self, enabled: bool) {
        self.shared.lock().kernel_debugger = enabled;
    }

    /// 非同期コールバックとして即座に配送する
    pub fn emit(&self, pid: u32, event: NativeEvent) {
        post(&self.shared, pid, Some(event));
    }

    /// 次の `resume` で配送されるようにキューに積む
    pub fn queue_event(&self, pid: u32, event: NativeEvent) {
        if let Some(state) = self.shared.lock().processes.get_mut(&pid) {
            state.queue.push_back(event);
        }
    }

    pub fn protocol(&self) -> Option<ProtocolVersion> {
        self.shared.lock().protocol
    }

    pub fn initialize_count(&self) -> usize {
        self.shared.lock().initialize_count
    }

    pub fn terminate_count(&self) -> usize {
        self.shared.lock().terminate_count
    }

    /// 有効なネイティブブレークポイントのアドレス（昇順）
    pub fn active_breakpoints(&self, pid: u32) -> Vec<u64> {
        let shared = self.shared.lock();
        let mut addrs: Vec<u64> = shared
            .processes
            .get(&pid)
            .map(|state| {
                state
                    .breakpoints
                    .values()
                    .filter(|bp| bp.active)
                    .map(|bp| bp.address)
                    .collect()
            })
            .unwrap_or_default();
        addrs.sort_unstable();
        addrs
    }

    pub fn active_steppers(&self, pid: u32) -> usize {
        self.shared
            .lock()
            .processes
            .get(&pid)
            .map(|state| state.steppers.values().filter(|s| s.active).count())
            .unwrap_or(0)
    }

    pub fn thread_state(&self, pid: u32, thread: u64) -> Option<ThreadState> {
        self.shared
            .lock()
            .processes
            .get(&pid)
            .and_then(|state| state.thread_states.get(&ThreadToken(thread)).copied())
    }

    pub fn resume_count(&self, pid: u32) -> usize {
        self.shared
            .lock()
            .processes
            .get(&pid)
            .map(|state| state.resume_count)
            .unwrap_or(0)
    }

    pub fn stop_count(&self, pid: u32) -> usize {
        self.shared
            .lock()
            .processes
            .get(&pid)
            .map(|state| state.stop_count)
            .unwrap_or(0)
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.shared
            .lock()
            .processes
            .get(&pid)
            .map(|state| state.running && !state.exited && !state.detached)
            .unwrap_or(false)
    }

    pub fn is_detached(&self, pid: u32) -> bool {
        self.shared
            .lock()
            .processes
            .get(&pid)
            .map(|state| state.detached)
            .unwrap_or(false)
    }

    pub fn memory(&self, pid: u32) -> Vec<u8> {
        self.shared
            .lock()
            .processes
            .get(&pid)
            .map(|state| state.memory.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_sink() -> (EventSink, Arc<Mutex<Vec<(u32, NativeEvent)>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = events.clone();
            EventSink::new(move |pid, event| events.lock().push((pid, event)))
        };
        (sink, events)
    }

    fn launch(program: ScriptedProgram) -> (Box<dyn NativeProcess>, ScriptedHandle, Arc<Mutex<Vec<(u32, NativeEvent)>>>) {
        let (mut iface, handle) = ScriptedInterface::new();
        handle.add_program("/bin/app", program);
        let (sink, events) = collecting_sink();
        iface.initialize(ProtocolVersion::V4, "v4.0", sink).unwrap();
        let request = LaunchRequest {
            program: PathBuf::from("/bin/app"),
            working_dir: PathBuf::from("/"),
            args: Vec::new(),
        };
        let process = iface.create_process(&request).unwrap();
        (process, handle, events)
    }

    #[test]
    fn test_callbacks_delivered_one_per_resume() {
        let program = ScriptedProgram::new().with_module(ScriptedModule::new("app"));
        let (mut process, _handle, events) = launch(program);

        assert_eq!(events.lock().len(), 1);
        assert_eq!(events.lock()[0].1, NativeEvent::ProcessCreated);

        process.resume().unwrap();
        process.resume().unwrap();
        process.resume().unwrap();
        let kinds: Vec<_> = events.lock().iter().map(|(_, e)| std::mem::discriminant(e)).collect();
        assert_eq!(kinds.len(), 4);
        assert!(matches!(events.lock()[3].1, NativeEvent::ModuleLoaded { .. }));

        // スクリプトが尽きたら何も届かない
        process.resume().unwrap();
        assert_eq!(events.lock().len(), 4);
    }

    #[test]
    fn test_execute_only_stops_on_active_breakpoint() {
        let program = ScriptedProgram::new()
            .with_module(ScriptedModule::new("app"))
            .step(ScriptStep::Execute { thread: 1, address: 0x10 })
            .step(ScriptStep::Execute { thread: 1, address: 0x20 })
            .step(ScriptStep::Exit(3));
        let (mut process, handle, events) = launch(program);
        for _ in 0..3 {
            process.resume().unwrap();
        }
        let module = match &events.lock()[3].1 {
            NativeEvent::ModuleLoaded { module, .. } => *module,
            other => panic!("unexpected {:?}", other),
        };

        let bp = process.create_breakpoint(module, 0x20).unwrap();
        process.activate_breakpoint(bp, true).unwrap();
        assert_eq!(handle.active_breakpoints(process.id()), vec![0x20]);

        process.resume().unwrap();
        assert_eq!(
            events.lock().last().unwrap().1,
            NativeEvent::BreakpointHit {
                thread: ThreadToken(1),
                breakpoint: bp
            }
        );

        process.resume().unwrap();
        assert_eq!(
            events.lock().last().unwrap().1,
            NativeEvent::ProcessExited { exit_code: 3 }
        );
    }

    #[test]
    fn test_memory_partial_read() {
        let program = ScriptedProgram::new().with_memory(0x4000, &[1, 2, 3, 4]);
        let (mut process, _handle, _events) = launch(program);

        let mut buf = [0u8; 8];
        assert_eq!(process.read_memory(0x4002, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[3, 4]);
        assert_eq!(process.read_memory(0x9000, &mut buf).unwrap(), 0);
        assert_eq!(process.write_memory(0x4003, &[9, 9]).unwrap(), 1);
    }

    #[test]
    fn test_unstarted_thread_rejects_state() {
        let program = ScriptedProgram::new().with_unstarted_thread(2);
        let (mut process, _handle, _events) = launch(program);
        let err = process
            .set_thread_state(ThreadToken(2), ThreadState::Suspend)
            .unwrap_err();
        assert!(err.is_thread_not_started());
        assert!(process
            .set_thread_state(ThreadToken(1), ThreadState::Suspend)
            .is_ok());
    }
}
