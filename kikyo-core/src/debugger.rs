//! デバッガセッション
//!
//! ネイティブデバッグインターフェース、生きているプロセスの一覧、
//! グローバルなブレークポイントを持ちます。
//! セッションは作成したスレッド（所有スレッド）だけで使います。
//! 他のスレッドからは [`DebuggerHandle`] を通して処理を中継します。

use crate::breakpoint::{BreakpointBinding, BreakpointId, BreakpointManager};
use crate::events::ProcessEvents;
use crate::handle::DebuggerHandle;
use crate::options::Options;
use crate::process::{Process, ProcessId};
use crate::relay::CallRelay;
use crate::{DebuggerError, Result};
use indexmap::IndexMap;
use kikyo_target::{
    EventSink, LaunchRequest, ModuleToken, NativeDebugInterface, ProtocolVersion,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// 開いているネイティブインターフェースの情報
#[derive(Debug, Clone)]
struct OpenInterface {
    debuggee_version: String,
    protocol: ProtocolVersion,
}

/// デバッガセッション
pub struct Debugger {
    backend: Box<dyn NativeDebugInterface>,
    interface: Option<OpenInterface>,
    /// 終了したプロセスも調べられるように残しておく
    pub(crate) processes: IndexMap<ProcessId, Process>,
    /// 生きているプロセス（終了したら外れる）
    pub(crate) live: Vec<ProcessId>,
    pub(crate) breakpoints: BreakpointManager,
    pub(crate) relay: Arc<CallRelay<Debugger>>,
    /// 作成と登録の間にコールバックが割り込まないようにする
    creation_lock: Arc<Mutex<()>>,
    pub(crate) options: Options,
    /// ネイティブコールバックを処理中か
    pub(crate) in_callback: bool,
    /// コールバック中に起きたエラー。次の待機で呼び出し側に返す
    pending_error: Option<DebuggerError>,
}

impl Debugger {
    /// プラットフォーム既定のバックエンドでセッションを作る
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    pub fn new() -> Self {
        Self::with_backend(kikyo_target::default_interface())
    }

    /// バックエンドを指定してセッションを作る。呼んだスレッドが所有スレッドになる
    pub fn with_backend(backend: Box<dyn NativeDebugInterface>) -> Self {
        Self {
            backend,
            interface: None,
            processes: IndexMap::new(),
            live: Vec::new(),
            breakpoints: BreakpointManager::new(),
            relay: Arc::new(CallRelay::new()),
            creation_lock: Arc::new(Mutex::new(())),
            options: Options::default(),
            in_callback: false,
            pending_error: None,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// 他のスレッドから使うハンドル
    pub fn handle(&self) -> DebuggerHandle {
        DebuggerHandle::new(self.relay.clone())
    }

    pub fn is_interface_open(&self) -> bool {
        self.interface.is_some()
    }

    /// インターフェースを開いたときのデバッグ対象のランタイムバージョン
    pub fn debuggee_version(&self) -> Option<&str> {
        self.interface.as_ref().map(|i| i.debuggee_version.as_str())
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.interface.as_ref().map(|i| i.protocol)
    }

    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    /// 生きているプロセス
    pub fn live_processes(&self) -> &[ProcessId] {
        &self.live
    }

    /// 生きているプロセス（作成順）
    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.live.iter().filter_map(|id| self.processes.get(id))
    }

    /// 終了したものも含めてプロセスを引く
    pub fn process(&self, id: ProcessId) -> Result<&Process> {
        self.processes
            .get(&id)
            .ok_or(DebuggerError::UnknownProcess(id))
    }

    pub(crate) fn process_mut(&mut self, id: ProcessId) -> Result<&mut Process> {
        self.processes
            .get_mut(&id)
            .ok_or(DebuggerError::UnknownProcess(id))
    }

    /// プロセスの通知を購読する
    pub fn events_mut(&mut self, id: ProcessId) -> Result<&mut ProcessEvents> {
        Ok(&mut self.process_mut(id)?.events)
    }

    /// ネイティブコールバックを所有スレッドへ中継するシンク
    fn event_sink(&self) -> EventSink {
        let relay = Arc::downgrade(&self.relay);
        EventSink::new(move |pid, event| {
            let Some(relay) = relay.upgrade() else {
                return;
            };
            let id = ProcessId(pid);
            if relay
                .async_call(move |debugger: &mut Debugger| debugger.dispatch_native(id, event))
                .is_err()
            {
                tracing::debug!("dropping callback for process {}: relay closed", id);
            }
        })
    }

    /// ネイティブインターフェースを開く
    fn init_debugger(&mut self, debuggee_version: &str) -> Result<()> {
        if self.backend.kernel_debugger_enabled() {
            return Err(DebuggerError::KernelDebuggerEnabled);
        }

        let version = if debuggee_version.is_empty() {
            let assumed = self.backend.default_runtime_version();
            tracing::info!("Debuggee version: Unknown (assuming {})", assumed);
            assumed
        } else {
            tracing::info!("Debuggee version: {}", debuggee_version);
            debuggee_version.to_string()
        };

        let protocol = ProtocolVersion::for_runtime(&version);
        let sink = self.event_sink();
        self.backend
            .initialize(protocol, &version, sink)
            .map_err(DebuggerError::InterfaceInit)?;
        tracing::info!("Debugger interface {} initialized", protocol);

        self.interface = Some(OpenInterface {
            debuggee_version: version,
            protocol,
        });
        Ok(())
    }

    /// まだ開いていなければインターフェースを開く
    ///
    /// 開いた後のバージョンは固定で、違うバージョンを要求されても開き直さない。
    fn ensure_interface(&mut self, debuggee_version: &str) -> Result<()> {
        match &self.interface {
            Some(open) => {
                if !debuggee_version.is_empty()
                    && ProtocolVersion::for_runtime(debuggee_version) != open.protocol
                {
                    tracing::warn!(
                        "debuggee wants runtime {} but interface {} is already open; keeping it",
                        debuggee_version,
                        open.protocol
                    );
                }
                Ok(())
            }
            None => self.init_debugger(debuggee_version),
        }
    }

    /// ネイティブインターフェースを閉じる
    ///
    /// プロセスがアタッチされている間は呼べない。閉じた後の `start`/`attach` は
    /// 新しいインターフェースを開く。
    pub fn terminate_debugger(&mut self) -> Result<()> {
        if self.interface.is_none() {
            return Ok(());
        }
        if !self.live.is_empty() {
            return Err(DebuggerError::ProcessesAttached(self.live.len()));
        }

        self.breakpoints.notify_debugger_terminated();
        self.backend.terminate()?;
        self.interface = None;
        tracing::info!("Debugger interface terminated");
        Ok(())
    }

    fn register_process(&mut self, process: Process) -> ProcessId {
        let id = process.id();
        self.processes.insert(id, process);
        self.live.push(id);
        id
    }

    /// プログラムを起動する
    ///
    /// `working_dir` が空ならプログラムのあるディレクトリで起動する。
    /// 戻ったときプロセスは実行中で、起動時のコールバックは所有スレッドが
    /// 中継を処理したときに配送される。
    pub fn start<P: AsRef<Path>>(
        &mut self,
        program: P,
        working_dir: &Path,
        args: &[String],
        break_at_entry: bool,
    ) -> Result<ProcessId> {
        let program = program.as_ref();
        let version = self.backend.runtime_version(program).unwrap_or_default();
        self.ensure_interface(&version)?;

        let working_dir = if working_dir.as_os_str().is_empty() {
            program.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            working_dir.to_path_buf()
        };

        let lock = self.creation_lock.clone();
        let _guard = lock.lock();

        let request = LaunchRequest {
            program: program.to_path_buf(),
            working_dir: working_dir.clone(),
            args: args.to_vec(),
        };
        let native = self.backend.create_process(&request)?;
        let mut process = Process::new(ProcessId(native.id()), native, working_dir);
        process.break_at_entry = break_at_entry;
        let id = self.register_process(process);

        tracing::info!("Started process {} ({})", id, program.display());
        Ok(id)
    }

    /// 実行中のプロセスにアタッチする
    pub fn attach(&mut self, pid: u32) -> Result<ProcessId> {
        let executable = self.backend.executable_of(pid);
        let version = executable
            .as_deref()
            .and_then(|exe| self.backend.runtime_version(exe))
            .unwrap_or_default();
        self.ensure_interface(&version)?;

        let working_dir = executable
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let lock = self.creation_lock.clone();
        let _guard = lock.lock();

        let native = self.backend.attach(pid)?;
        let id = self.register_process(Process::new(ProcessId(native.id()), native, working_dir));

        tracing::info!("Attached to process {}", id);
        Ok(id)
    }

    /// 生きているすべてのプロセスからデタッチする
    pub fn detach_all(&mut self) -> Result<()> {
        for id in self.live.clone() {
            if !self.process(id)?.has_exited() {
                self.detach_process(id)?;
            }
        }
        Ok(())
    }

    /// ブレークポイントを追加し、ロード済みのすべてのモジュールに束縛する
    pub fn add_breakpoint(
        &mut self,
        file: &str,
        line: u32,
        column: u32,
        enabled: bool,
    ) -> Result<BreakpointId> {
        let id = self.breakpoints.add(file, line, column, enabled);
        tracing::info!("Breakpoint {} added at {}", id, self.breakpoints.get(id)?);

        for process in self.live.clone() {
            let modules: Vec<ModuleToken> = self.process(process)?.modules.keys().collect();
            for module in modules {
                self.bind_breakpoint(id, process, module)?;
            }
        }
        Ok(id)
    }

    /// ブレークポイントを無効にしてから削除する
    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<()> {
        self.set_breakpoint_enabled(id, false)?;
        self.breakpoints.remove(id)?;
        tracing::info!("Breakpoint {} removed", id);
        Ok(())
    }

    /// 有効・無効を切り替える。束縛先のネイティブブレークポイントも合わせて切り替える
    pub fn set_breakpoint_enabled(&mut self, id: BreakpointId, enabled: bool) -> Result<()> {
        for binding in self.breakpoints.set_enabled(id, enabled)? {
            match self.processes.get_mut(&binding.process) {
                Some(process) if !process.has_exited() => {
                    process.native.activate_breakpoint(binding.native, enabled)?;
                }
                _ => {}
            }
        }
        tracing::debug!("Breakpoint {} {}", id, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// ブレークポイントをモジュールに束縛する。位置が解決できたら `true`
    ///
    /// 同じモジュールにすでに束縛されていれば何もしない。
    pub(crate) fn bind_breakpoint(
        &mut self,
        id: BreakpointId,
        process_id: ProcessId,
        module: ModuleToken,
    ) -> Result<bool> {
        let bp = self.breakpoints.get(id)?;
        if bp
            .bindings()
            .iter()
            .any(|b| b.process == process_id && b.module == module)
        {
            return Ok(false);
        }
        let (file, line, column, enabled) =
            (bp.file().to_string(), bp.line(), bp.column(), bp.is_enabled());

        let process = self
            .processes
            .get_mut(&process_id)
            .ok_or(DebuggerError::UnknownProcess(process_id))?;
        let Some(address) = process.resolve_location(
            module,
            &file,
            line,
            column,
            &self.options.symbol_search_paths,
        )?
        else {
            return Ok(false);
        };

        let native = process.native.create_breakpoint(module, address)?;
        if enabled {
            process.native.activate_breakpoint(native, true)?;
        }
        self.breakpoints.add_binding(
            id,
            BreakpointBinding {
                process: process_id,
                module,
                native,
                address,
            },
        )?;
        tracing::debug!(
            "Breakpoint {} bound to 0x{:x} in module {} of process {}",
            id,
            address,
            module,
            process_id
        );
        Ok(true)
    }

    /// すべてのモジュールのシンボルを今の検索パスで読み直す
    ///
    /// シンボルは次に必要になったときに読まれる。新しく解決できるようになった
    /// ブレークポイントはここで束縛する。
    pub fn reload_module_symbols(&mut self) -> Result<()> {
        for process in self.processes.values_mut() {
            for module in process.modules.values_mut() {
                module.reset_symbols();
            }
        }

        let breakpoints = self.breakpoints.ids();
        for process in self.live.clone() {
            let modules: Vec<ModuleToken> = self.process(process)?.modules.keys().collect();
            for module in modules {
                for &bp in &breakpoints {
                    self.bind_breakpoint(bp, process, module)?;
                }
            }
        }
        tracing::info!("Module symbols reloaded");
        Ok(())
    }

    /// 中継された処理（コールバックを含む）をすべて実行する
    pub fn pump(&mut self) -> Result<usize> {
        let relay = self.relay.clone();
        let performed = relay.perform_all_calls(self);
        self.raise_pending_error()?;
        Ok(performed)
    }

    /// 処理が届くまで最大 `timeout` 待ってから `pump` する
    pub fn pump_timeout(&mut self, timeout: Duration) -> Result<usize> {
        self.relay.wait_for_call_timeout(timeout);
        self.pump()
    }

    /// 中継を1回分待って処理する。中継が閉じていればエラー
    pub(crate) fn pump_once(&mut self) -> Result<()> {
        if !self.relay.wait_for_call() {
            return Err(DebuggerError::RelayClosed);
        }
        self.pump()?;
        Ok(())
    }

    /// コールバック中に起きたエラーを取り出す
    pub fn take_pending_error(&mut self) -> Option<DebuggerError> {
        self.pending_error.take()
    }

    pub(crate) fn set_pending_error(&mut self, error: DebuggerError) {
        if self.pending_error.is_none() {
            self.pending_error = Some(error);
        }
    }

    pub(crate) fn raise_pending_error(&mut self) -> Result<()> {
        match self.pending_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Debugger {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            tracing::warn!("debugger dropped with {} live process(es)", self.live.len());
        }
        self.relay.close();
    }
}
