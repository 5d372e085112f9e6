//! ptrace ベースのネイティブバックエンド
//!
//! ptrace の要求はトレーサースレッドから出す必要があるため、
//! このモジュールの操作はすべてエンジンの所有スレッドで呼ばれる前提です。
//! wait だけは監視スレッドが行い、受け取ったステータスをキューに積んで
//! [`NativeEvent::StateChanged`] で所有スレッドに知らせます。
//! 実際のコールバックへの変換は [`NativeProcess::collect_events`] で行います。
//!
//! 停止モデル：
//! - あるスレッドが停止を報告すると、残りのスレッドにも SIGSTOP を送って全停止させる
//! - コールバックは1つずつ配送し、次のものは `resume` まで保留する
//! - ブレークポイント上のスレッドは、再開時にブレークポイントを外して1命令進めてから戻す

use crate::breakpoint::SoftwareBreakpoint;
use crate::memory::{loaded_images, Memory};
use crate::registers::Registers;
use crate::thread::{process_group, Tid};
use crate::{
    kernel, process, AppDomainToken, EvalRequest, EvalToken, EventSink, LaunchRequest,
    ModuleToken, NativeBreakpointToken, NativeDebugInterface, NativeError, NativeEvent,
    NativeProcess, NativeResult, ProtocolVersion, StepKind, StepperToken, ThreadState,
    ThreadToken,
};
use kikyo_dwarf::{DwarfSymbolReader, SymbolReader};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// ネイティブプロセスには実行時環境がないので、常に新しいプロトコルを使う
const DEFAULT_RUNTIME_VERSION: &str = "v4.0";

/// 全スレッドの停止を待つ上限
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// 監視スレッドから受け取った wait ステータスのキュー
#[derive(Default)]
struct StatusQueue {
    statuses: Mutex<VecDeque<WaitStatus>>,
    ready: Condvar,
}

impl StatusQueue {
    fn push(&self, status: WaitStatus) {
        self.statuses.lock().push_back(status);
        self.ready.notify_all();
    }

    fn drain(&self) -> Vec<WaitStatus> {
        self.statuses.lock().drain(..).collect()
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<WaitStatus> {
        let mut statuses = self.statuses.lock();
        if statuses.is_empty() {
            self.ready.wait_for(&mut statuses, timeout);
        }
        statuses.pop_front()
    }
}

/// プロセスグループを wait し続ける監視スレッドを起動する
fn spawn_watcher(pid: Tid, pgid: i32, queue: Arc<StatusQueue>, sink: EventSink) -> NativeResult<()> {
    std::thread::Builder::new()
        .name(format!("kikyo-wait-{}", pid))
        .spawn(move || loop {
            match waitpid(Pid::from_raw(-pgid), Some(WaitPidFlag::__WALL)) {
                Ok(status) => {
                    queue.push(status);
                    sink.post(pid as u32, NativeEvent::StateChanged);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::debug!("wait loop for {} finished: {}", pid, e);
                    break;
                }
            }
        })?;
    Ok(())
}

/// 特定スレッドにシグナルを送る
fn tgkill(pid: Tid, tid: Tid, signal: Signal) -> NativeResult<()> {
    let ret = unsafe {
        nix::libc::syscall(
            nix::libc::SYS_tgkill,
            pid as nix::libc::c_long,
            tid as nix::libc::c_long,
            signal as nix::libc::c_long,
        )
    };
    Errno::result(ret)?;
    Ok(())
}

/// 放置するとプロセスが死ぬシグナル
fn is_fatal(signal: Signal) -> bool {
    matches!(
        signal,
        Signal::SIGSEGV | Signal::SIGBUS | Signal::SIGILL | Signal::SIGFPE | Signal::SIGABRT
    )
}

fn thread_token(tid: Tid) -> ThreadToken {
    ThreadToken(tid as u64)
}

/// ptrace バックエンドのインターフェース
#[derive(Default)]
pub struct PtraceInterface {
    sink: Option<EventSink>,
    /// トレース中のプロセスグループ（監視スレッドが wait する単位）
    traced_groups: Arc<Mutex<HashSet<i32>>>,
}

impl PtraceInterface {
    pub fn new() -> Self {
        Self::default()
    }

    fn sink(&self) -> NativeResult<EventSink> {
        self.sink.clone().ok_or(NativeError::NotInitialized)
    }
}

impl NativeDebugInterface for PtraceInterface {
    fn kernel_debugger_enabled(&self) -> bool {
        kernel::kgdb_enabled()
    }

    fn runtime_version(&self, _program: &Path) -> Option<String> {
        None
    }

    fn default_runtime_version(&self) -> String {
        DEFAULT_RUNTIME_VERSION.to_string()
    }

    fn executable_of(&self, pid: u32) -> Option<PathBuf> {
        std::fs::read_link(format!("/proc/{}/exe", pid)).ok()
    }

    fn initialize(
        &mut self,
        protocol: ProtocolVersion,
        runtime_version: &str,
        sink: EventSink,
    ) -> NativeResult<()> {
        tracing::debug!("ptrace interface {} for runtime {}", protocol, runtime_version);
        self.sink = Some(sink);
        Ok(())
    }

    fn terminate(&mut self) -> NativeResult<()> {
        self.sink.take().ok_or(NativeError::NotInitialized)?;
        Ok(())
    }

    fn create_process(&mut self, request: &LaunchRequest) -> NativeResult<Box<dyn NativeProcess>> {
        let sink = self.sink()?;
        let pid = process::spawn(request)?;
        let name = request
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| pid.to_string());
        let process = PtraceProcess::start(pid, vec![pid], name, sink, self.traced_groups.clone())?;
        Ok(Box::new(process))
    }

    fn attach(&mut self, pid: u32) -> NativeResult<Box<dyn NativeProcess>> {
        let sink = self.sink()?;
        let pid = pid as Tid;
        let pgid = process_group(pid)?;
        if self.traced_groups.lock().contains(&pgid) {
            return Err(NativeError::Other(format!(
                "process group {} is already being debugged",
                pgid
            )));
        }
        let tids = process::attach(pid)?;
        let name = self
            .executable_of(pid as u32)
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| pid.to_string());
        let process = PtraceProcess::start(pid, tids, name, sink, self.traced_groups.clone())?;
        Ok(Box::new(process))
    }
}

struct TracedBreakpoint {
    native: SoftwareBreakpoint,
    /// エンジンが有効化を要求しているか（ステップオーバー中は一時的に外れる）
    wanted: bool,
}

struct TracedStepper {
    thread: Tid,
    active: bool,
}

/// ptrace でトレース中のプロセス
pub struct PtraceProcess {
    pid: Tid,
    pgid: i32,
    memory: Memory,
    sink: EventSink,
    statuses: Arc<StatusQueue>,
    traced_groups: Arc<Mutex<HashSet<i32>>>,
    pending: VecDeque<NativeEvent>,
    /// コールバックを配送済みで `resume` を待っている
    awaiting_continue: bool,
    running: bool,
    exited: bool,
    detached: bool,
    terminate_code: Option<i32>,
    threads: BTreeMap<Tid, ThreadState>,
    /// ptrace-stop 中のスレッド
    stopped: BTreeSet<Tid>,
    /// こちらが送った SIGSTOP（報告されても握りつぶす）
    expected_stops: HashSet<Tid>,
    pending_signals: HashMap<Tid, Signal>,
    stepping_over: HashMap<Tid, NativeBreakpointToken>,
    breakpoints: HashMap<NativeBreakpointToken, TracedBreakpoint>,
    steppers: HashMap<StepperToken, TracedStepper>,
    modules: HashMap<ModuleToken, (PathBuf, u64)>,
    appdomain: AppDomainToken,
    next_token: u64,
}

impl PtraceProcess {
    /// 停止中のトレース対象から起動時のコールバック列を作って配送を始める
    fn start(
        pid: Tid,
        tids: Vec<Tid>,
        name: String,
        sink: EventSink,
        traced_groups: Arc<Mutex<HashSet<i32>>>,
    ) -> NativeResult<Self> {
        let pgid = process_group(pid)?;
        let mut process = Self {
            pid,
            pgid,
            memory: Memory::new(pid),
            sink,
            statuses: Arc::new(StatusQueue::default()),
            traced_groups,
            pending: VecDeque::new(),
            awaiting_continue: false,
            running: false,
            exited: false,
            detached: false,
            terminate_code: None,
            threads: tids.iter().map(|&t| (t, ThreadState::Run)).collect(),
            stopped: tids.iter().copied().collect(),
            expected_stops: HashSet::new(),
            pending_signals: HashMap::new(),
            stepping_over: HashMap::new(),
            breakpoints: HashMap::new(),
            steppers: HashMap::new(),
            modules: HashMap::new(),
            appdomain: AppDomainToken(0),
            next_token: 0,
        };

        process.appdomain = AppDomainToken(process.token());
        process.pending.push_back(NativeEvent::ProcessCreated);
        process.pending.push_back(NativeEvent::AppDomainCreated {
            appdomain: process.appdomain,
            name,
        });
        for tid in tids {
            process.pending.push_back(NativeEvent::ThreadCreated {
                thread: thread_token(tid),
            });
        }
        process.refresh_modules();

        process.traced_groups.lock().insert(pgid);
        spawn_watcher(pid, pgid, process.statuses.clone(), process.sink.clone())?;
        process.deliver_next();
        Ok(process)
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn check_alive(&self) -> NativeResult<()> {
        if self.exited || self.detached {
            return Err(NativeError::NoSuchProcess(self.pid as u32));
        }
        Ok(())
    }

    /// 保留中のコールバックを1つ配送する
    fn deliver_next(&mut self) -> bool {
        match self.pending.pop_front() {
            Some(event) => {
                self.awaiting_continue = true;
                self.running = false;
                self.sink.post(self.pid as u32, event);
                true
            }
            None => false,
        }
    }

    /// マッピングの差分からモジュールのロード・アンロードを報告する
    fn refresh_modules(&mut self) {
        let images = match self.memory.mappings() {
            Ok(mappings) => loaded_images(&mappings),
            Err(e) => {
                tracing::debug!("cannot read mappings of {}: {}", self.pid, e);
                return;
            }
        };

        let gone: Vec<ModuleToken> = self
            .modules
            .iter()
            .filter(|(_, (path, base))| !images.iter().any(|(p, b)| p == path && b == base))
            .map(|(token, _)| *token)
            .collect();
        for module in gone {
            self.modules.remove(&module);
            self.pending.push_back(NativeEvent::ModuleUnloaded { module });
        }

        for (path, base) in images {
            if self.modules.values().any(|(p, b)| *p == path && *b == base) {
                continue;
            }
            let module = ModuleToken(self.token());
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.modules.insert(module, (path.clone(), base));
            self.pending.push_back(NativeEvent::ModuleLoaded {
                module,
                appdomain: self.appdomain,
                name,
                path: Some(path),
                base,
            });
        }
    }

    /// 走っているスレッドに SIGSTOP を送る
    fn halt_running_threads(&mut self) {
        let running: Vec<Tid> = self
            .threads
            .keys()
            .copied()
            .filter(|t| !self.stopped.contains(t) && !self.expected_stops.contains(t))
            .collect();
        for tid in running {
            match tgkill(self.pid, tid, Signal::SIGSTOP) {
                Ok(()) => {
                    self.expected_stops.insert(tid);
                }
                Err(e) => tracing::debug!("cannot stop thread {}: {}", tid, e),
            }
        }
    }

    /// 送った SIGSTOP がすべて届くまで待つ（途中で届いた他の停止は保留する）
    fn wait_for_stops(&mut self) {
        let deadline = Instant::now() + STOP_TIMEOUT;
        while !self.expected_stops.is_empty() && !self.exited {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "threads {:?} of {} did not stop in time",
                    self.expected_stops,
                    self.pid
                );
                break;
            }
            if let Some(status) = self.statuses.pop_timeout(deadline - now) {
                self.absorb(status);
            }
        }
    }

    /// ステータスを変換して保留キューに積む
    fn absorb(&mut self, status: WaitStatus) {
        if let Some(event) = self.translate(status) {
            if matches!(event, NativeEvent::ProcessExited { .. }) {
                self.pending.clear();
            }
            self.pending.push_back(event);
        }
    }

    fn breakpoint_at(&self, address: u64) -> Option<NativeBreakpointToken> {
        self.breakpoints
            .iter()
            .filter(|(_, bp)| bp.wanted && bp.native.is_enabled() && bp.native.address() == address)
            .map(|(token, _)| *token)
            .min()
    }

    fn complete_step(&mut self, tid: Tid) -> Option<NativeEvent> {
        let (token, stepper) = self
            .steppers
            .iter_mut()
            .find(|(_, s)| s.active && s.thread == tid)?;
        stepper.active = false;
        Some(NativeEvent::StepComplete {
            thread: thread_token(tid),
            stepper: *token,
        })
    }

    /// 止まったスレッドを、プロセスが走行中ならすぐ再開する
    fn park_or_continue(&mut self, tid: Tid) {
        let runnable = self.threads.get(&tid) == Some(&ThreadState::Run);
        if self.running && !self.awaiting_continue && runnable {
            if let Err(e) = self.resume_thread(tid) {
                tracing::debug!("cannot continue thread {}: {}", tid, e);
            }
        }
    }

    fn thread_gone(&mut self, tid: Tid, code: i32) -> Option<NativeEvent> {
        self.threads.remove(&tid);
        self.stopped.remove(&tid);
        self.expected_stops.remove(&tid);
        self.pending_signals.remove(&tid);
        self.stepping_over.remove(&tid);

        if tid == self.pid {
            self.exited = true;
            self.traced_groups.lock().remove(&self.pgid);
            Some(NativeEvent::ProcessExited {
                exit_code: self.terminate_code.unwrap_or(code),
            })
        } else {
            Some(NativeEvent::ThreadExited {
                thread: thread_token(tid),
            })
        }
    }

    fn on_trap(&mut self, tid: Tid) -> Option<NativeEvent> {
        if let Some(token) = self.stepping_over.remove(&tid) {
            // ブレークポイントを踏み越えたので戻す
            if let Some(bp) = self.breakpoints.get_mut(&token) {
                if bp.wanted {
                    if let Err(e) = bp.native.enable(&self.memory) {
                        tracing::warn!("cannot re-arm breakpoint at 0x{:x}: {}", bp.native.address(), e);
                    }
                }
            }
            if let Some(event) = self.complete_step(tid) {
                return Some(event);
            }
            self.park_or_continue(tid);
            return None;
        }

        let registers = Registers::new(tid);
        if let Ok(pc) = registers.pc() {
            if let Some(token) = self.breakpoint_at(pc.wrapping_sub(1)) {
                // INT3 の直後で止まっているので巻き戻す
                if let Err(e) = registers.set_pc(pc - 1) {
                    tracing::warn!("cannot rewind thread {}: {}", tid, e);
                }
                return Some(NativeEvent::BreakpointHit {
                    thread: thread_token(tid),
                    breakpoint: token,
                });
            }
        }

        if let Some(event) = self.complete_step(tid) {
            return Some(event);
        }
        Some(NativeEvent::Break {
            thread: thread_token(tid),
        })
    }

    /// wait ステータスをコールバックに変換する
    fn translate(&mut self, status: WaitStatus) -> Option<NativeEvent> {
        match status {
            WaitStatus::Exited(tid, code) => self.thread_gone(tid.as_raw(), code),
            WaitStatus::Signaled(tid, signal, _) => {
                self.thread_gone(tid.as_raw(), 128 + signal as i32)
            }
            WaitStatus::PtraceEvent(tid, _, event)
                if event == ptrace::Event::PTRACE_EVENT_CLONE as i32 =>
            {
                let tid = tid.as_raw();
                self.stopped.insert(tid);
                let new_tid = match ptrace::getevent(Pid::from_raw(tid)) {
                    Ok(new_tid) => new_tid as Tid,
                    Err(e) => {
                        tracing::debug!("cannot read clone event of {}: {}", tid, e);
                        self.park_or_continue(tid);
                        return None;
                    }
                };
                // 新しいスレッドの初回停止が先に届いていることもある
                if !self.threads.contains_key(&new_tid) {
                    self.threads.insert(new_tid, ThreadState::Run);
                    self.expected_stops.insert(new_tid);
                }
                Some(NativeEvent::ThreadCreated {
                    thread: thread_token(new_tid),
                })
            }
            WaitStatus::Stopped(tid, Signal::SIGSTOP) => {
                let tid = tid.as_raw();
                self.stopped.insert(tid);
                if self.expected_stops.remove(&tid) {
                    self.park_or_continue(tid);
                    None
                } else if !self.threads.contains_key(&tid) {
                    self.threads.insert(tid, ThreadState::Run);
                    self.park_or_continue(tid);
                    None
                } else {
                    Some(NativeEvent::Break {
                        thread: thread_token(tid),
                    })
                }
            }
            WaitStatus::Stopped(tid, Signal::SIGTRAP) => {
                let tid = tid.as_raw();
                self.stopped.insert(tid);
                self.on_trap(tid)
            }
            WaitStatus::Stopped(tid, signal) => {
                let tid = tid.as_raw();
                self.stopped.insert(tid);
                self.pending_signals.insert(tid, signal);
                Some(NativeEvent::Exception {
                    thread: thread_token(tid),
                    description: format!("received {}", signal),
                    unhandled: is_fatal(signal),
                })
            }
            _ => None,
        }
    }

    fn resume_thread(&mut self, tid: Tid) -> NativeResult<()> {
        let signal = self.pending_signals.remove(&tid);
        let target = Pid::from_raw(tid);
        let stepping = self.steppers.values().any(|s| s.active && s.thread == tid);
        let pc = Registers::new(tid).pc()?;

        if let Some(token) = self.breakpoint_at(pc) {
            // ブレークポイント上にいるので、一時的に外して1命令進める
            if let Some(bp) = self.breakpoints.get_mut(&token) {
                bp.native.disable(&self.memory)?;
            }
            self.stepping_over.insert(tid, token);
            ptrace::step(target, signal)?;
        } else if stepping {
            ptrace::step(target, signal)?;
        } else {
            ptrace::cont(target, signal)?;
        }
        self.stopped.remove(&tid);
        Ok(())
    }
}

impl NativeProcess for PtraceProcess {
    fn id(&self) -> u32 {
        self.pid as u32
    }

    fn stop(&mut self) -> NativeResult<()> {
        self.check_alive()?;
        self.running = false;
        self.halt_running_threads();
        self.wait_for_stops();
        Ok(())
    }

    fn resume(&mut self) -> NativeResult<()> {
        self.check_alive()?;
        if self.deliver_next() {
            return Ok(());
        }
        self.awaiting_continue = false;
        self.running = true;

        let parked: Vec<Tid> = self
            .stopped
            .iter()
            .copied()
            .filter(|t| self.threads.get(t) != Some(&ThreadState::Suspend))
            .collect();
        for tid in parked {
            match self.resume_thread(tid) {
                // 停止中に死んだスレッドは後で終了が報告される
                Err(NativeError::Os(Errno::ESRCH)) => {
                    self.stopped.remove(&tid);
                }
                other => other?,
            }
        }
        Ok(())
    }

    fn terminate(&mut self, exit_code: i32) -> NativeResult<()> {
        self.check_alive()?;
        self.terminate_code = Some(exit_code);
        self.awaiting_continue = false;
        self.pending
            .retain(|e| matches!(e, NativeEvent::ProcessExited { .. }));
        match nix::sys::signal::kill(Pid::from_raw(self.pid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(e.into()),
        }
        self.deliver_next();
        Ok(())
    }

    fn detach(&mut self) -> NativeResult<()> {
        self.check_alive()?;
        self.running = false;
        self.halt_running_threads();
        self.wait_for_stops();

        for bp in self.breakpoints.values_mut() {
            if let Err(e) = bp.native.disable(&self.memory) {
                tracing::warn!("cannot remove breakpoint at 0x{:x}: {}", bp.native.address(), e);
            }
        }
        let stopped: Vec<Tid> = self.stopped.iter().copied().collect();
        for tid in stopped {
            let signal = self.pending_signals.remove(&tid);
            if let Err(e) = ptrace::detach(Pid::from_raw(tid), signal) {
                tracing::debug!("cannot detach thread {}: {}", tid, e);
            }
        }
        self.stopped.clear();
        self.pending.clear();
        self.detached = true;
        self.traced_groups.lock().remove(&self.pgid);
        Ok(())
    }

    fn read_memory(&mut self, address: u64, buffer: &mut [u8]) -> NativeResult<usize> {
        self.check_alive()?;
        self.memory.read_into(address, buffer)
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> NativeResult<usize> {
        self.check_alive()?;
        self.memory.write(address, data)
    }

    fn set_thread_state(&mut self, thread: ThreadToken, state: ThreadState) -> NativeResult<()> {
        let tid = thread.0 as Tid;
        match self.threads.get_mut(&tid) {
            Some(current) => *current = state,
            None => return Err(NativeError::Other(format!("unknown thread {}", thread))),
        }
        if state == ThreadState::Run && self.stopped.contains(&tid) {
            self.park_or_continue(tid);
        }
        Ok(())
    }

    fn create_breakpoint(
        &mut self,
        module: ModuleToken,
        address: u64,
    ) -> NativeResult<NativeBreakpointToken> {
        if !self.modules.contains_key(&module) {
            return Err(NativeError::Other(format!("unknown module {}", module)));
        }
        let token = NativeBreakpointToken(self.token());
        self.breakpoints.insert(
            token,
            TracedBreakpoint {
                native: SoftwareBreakpoint::new(address),
                wanted: false,
            },
        );
        Ok(token)
    }

    fn activate_breakpoint(
        &mut self,
        breakpoint: NativeBreakpointToken,
        active: bool,
    ) -> NativeResult<()> {
        let bp = self
            .breakpoints
            .get_mut(&breakpoint)
            .ok_or_else(|| NativeError::Other(format!("unknown breakpoint {}", breakpoint)))?;
        bp.wanted = active;
        if active {
            bp.native.enable(&self.memory)
        } else {
            bp.native.disable(&self.memory)
        }
    }

    fn create_stepper(&mut self, thread: ThreadToken, kind: StepKind) -> NativeResult<StepperToken> {
        if kind != StepKind::Instruction {
            return Err(NativeError::Unsupported("source-level stepping"));
        }
        let tid = thread.0 as Tid;
        if !self.threads.contains_key(&tid) {
            return Err(NativeError::Other(format!("unknown thread {}", thread)));
        }
        let token = StepperToken(self.token());
        self.steppers.insert(
            token,
            TracedStepper {
                thread: tid,
                active: true,
            },
        );
        Ok(token)
    }

    fn is_stepper_active(&self, stepper: StepperToken) -> bool {
        self.steppers
            .get(&stepper)
            .map(|s| s.active)
            .unwrap_or(false)
    }

    fn deactivate_stepper(&mut self, stepper: StepperToken) -> NativeResult<()> {
        if let Some(s) = self.steppers.get_mut(&stepper) {
            s.active = false;
        }
        Ok(())
    }

    fn create_eval(&mut self, _thread: ThreadToken, _request: &EvalRequest) -> NativeResult<EvalToken> {
        Err(NativeError::Unsupported("function evaluation"))
    }

    fn load_symbols(
        &mut self,
        module: ModuleToken,
        search_paths: &[PathBuf],
    ) -> Option<Box<dyn SymbolReader>> {
        let (path, base) = self.modules.get(&module)?.clone();
        let mut candidates = vec![path.clone()];
        if let Some(file_name) = path.file_name() {
            candidates.extend(search_paths.iter().map(|dir| dir.join(file_name)));
        }

        for candidate in candidates.iter().filter(|c| c.exists()) {
            match DwarfSymbolReader::load(candidate, base) {
                Ok(reader) => return Some(Box::new(reader)),
                Err(e) => tracing::debug!("no symbols in {:?}: {}", candidate, e),
            }
        }
        None
    }

    fn collect_events(&mut self) -> NativeResult<Vec<NativeEvent>> {
        if self.detached {
            return Ok(Vec::new());
        }

        let statuses = self.statuses.drain();
        if !statuses.is_empty() && !self.exited {
            self.refresh_modules();
        }
        for status in statuses {
            self.absorb(status);
        }

        // 終了は保留せずに届ける
        if matches!(self.pending.back(), Some(NativeEvent::ProcessExited { .. })) {
            let exited = self.pending.drain(..).last();
            return Ok(exited.into_iter().collect());
        }

        if !self.awaiting_continue && !self.pending.is_empty() {
            self.running = false;
            self.halt_running_threads();
            self.awaiting_continue = true;
            return Ok(self.pending.pop_front().into_iter().collect());
        }
        Ok(Vec::new())
    }
}
