//! ネイティブコールバックの処理
//!
//! コールバックは中継を通して所有スレッドに届き、ここでプロセスに振り分けられます。
//! コールバックが届いた時点でネイティブプロセスは止まっているので、まず停止状態にしてから
//! 追跡情報を更新し、最後にそのまま continue するか停止を通知するかを決めます。

use crate::appdomain::AppDomain;
use crate::debugger::Debugger;
use crate::eval::EvalOutcome;
use crate::events::{ExceptionInfo, ExitedEvent, MessageEvent, ModuleEvent, PausedEvent};
use crate::module::Module;
use crate::process::{DebuggeeStateAction, ProcessId};
use crate::thread::Thread;
use crate::{DebuggerError, Result};
use kikyo_target::{AppDomainToken, ModuleToken, NativeEvent, ThreadState, ThreadToken};
use std::path::PathBuf;

/// コールバック処理後の振る舞い
#[derive(Debug)]
enum CallbackExit {
    /// 内部的な continue で走らせ続ける
    Continue,
    /// 停止を通知する
    Pause(PausedEvent),
    /// 通知せずに止めておく（評価の完了）
    Silent,
}

impl Debugger {
    /// 中継から呼ばれる入り口。エラーは次の待機で呼び出し側に返す
    pub(crate) fn dispatch_native(&mut self, id: ProcessId, event: NativeEvent) {
        if let Err(e) = self.handle_native(id, event) {
            tracing::error!("callback for process {} failed: {}", id, e);
            self.set_pending_error(e);
        }
    }

    fn handle_native(&mut self, id: ProcessId, event: NativeEvent) -> Result<()> {
        let Some(process) = self.processes.get_mut(&id) else {
            tracing::debug!("ignoring {:?} for unknown process {}", event, id);
            return Ok(());
        };
        if process.has_exited() {
            tracing::trace!("ignoring {:?} for exited process {}", event, id);
            return Ok(());
        }

        match event {
            NativeEvent::StateChanged => {
                for event in process.native.collect_events()? {
                    self.handle_native(id, event)?;
                }
                return Ok(());
            }
            NativeEvent::ProcessExited { exit_code } => {
                tracing::debug!("callback: process {} exited with {}", id, exit_code);
                return self.on_exited(id, Some(exit_code));
            }
            _ => {}
        }

        if process.is_paused() {
            tracing::trace!("deferring {:?} for paused process {}", event, id);
            process.deferred.push_back(event);
            return Ok(());
        }

        tracing::debug!("callback: {:?} for process {}", event, id);
        process.notify_paused()?;

        self.in_callback = true;
        let exit = self.handle_callback(id, event);
        self.in_callback = false;

        match exit? {
            CallbackExit::Continue => {
                let process = self.process_mut(id)?;
                if process.is_paused() && !process.has_exited() {
                    self.continue_inner(id, DebuggeeStateAction::Keep, None, None)?;
                }
            }
            CallbackExit::Pause(event) => {
                if self.process(id)?.is_paused() {
                    self.on_paused(id, event)?;
                }
            }
            CallbackExit::Silent => {}
        }
        Ok(())
    }

    fn handle_callback(&mut self, id: ProcessId, event: NativeEvent) -> Result<CallbackExit> {
        match event {
            NativeEvent::ProcessCreated => {
                tracing::info!("Process {} created", id);
                Ok(CallbackExit::Continue)
            }
            NativeEvent::AppDomainCreated { appdomain, name } => {
                let process = self.process_mut(id)?;
                tracing::debug!("AppDomain {} ({}) created", appdomain, name);
                process
                    .appdomains
                    .insert(appdomain, AppDomain::new(appdomain, name));
                Ok(CallbackExit::Continue)
            }
            NativeEvent::AppDomainExited { appdomain } => {
                self.process_mut(id)?.appdomains.remove(appdomain)?;
                tracing::debug!("AppDomain {} exited", appdomain);
                Ok(CallbackExit::Continue)
            }
            NativeEvent::ModuleLoaded {
                module,
                appdomain,
                name,
                path,
                base,
            } => self.on_module_loaded(id, module, appdomain, name, path, base),
            NativeEvent::ModuleUnloaded { module } => self.on_module_unloaded(id, module),
            NativeEvent::ThreadCreated { thread } => self.on_thread_created(id, thread),
            NativeEvent::ThreadExited { thread } => {
                let process = self.process_mut(id)?;
                process.steppers.remove_for_thread(thread);
                if process.threads.remove(thread).is_err() {
                    tracing::debug!("thread {} exited without being reported", thread);
                }
                Ok(CallbackExit::Continue)
            }
            NativeEvent::BreakpointHit { thread, breakpoint } => {
                let process = self.process_mut(id)?;
                process.threads.get_or_synthesize(thread);
                let temporary = process.temp_breakpoints.contains(&breakpoint);

                let mut event = PausedEvent::new(id);
                event.thread = Some(thread);
                event.is_break = temporary;
                if let Some(owner) = self.breakpoints.owner_of(id, breakpoint) {
                    if self.breakpoints.get(owner)?.is_enabled() {
                        let hits = self.breakpoints.record_hit(owner)?;
                        tracing::info!("Breakpoint {} hit (hit count {})", owner, hits);
                        event.breakpoints_hit.push(owner);
                    }
                }

                if event.breakpoints_hit.is_empty() && !temporary {
                    tracing::debug!("ignoring native breakpoint {} hit on thread {}", breakpoint, thread);
                    return Ok(CallbackExit::Continue);
                }
                Ok(CallbackExit::Pause(event))
            }
            NativeEvent::StepComplete { thread, stepper } => {
                let process = self.process_mut(id)?;
                let thread_entry = process.threads.get_or_synthesize(thread);
                if thread_entry.current_step() == Some(stepper) {
                    thread_entry.set_current_step(None);
                }
                let stepper = process.steppers.remove(stepper)?;
                if stepper.is_ignored() {
                    tracing::debug!("ignored stepper {} completed", stepper.token());
                    return Ok(CallbackExit::Continue);
                }

                let mut event = PausedEvent::new(id);
                event.thread = Some(thread);
                event.is_break = true;
                Ok(CallbackExit::Pause(event))
            }
            NativeEvent::Exception {
                thread,
                description,
                unhandled,
            } => {
                let pause_on_handled = self.options.pause_on_handled_exceptions;
                self.process_mut(id)?.threads.get_or_synthesize(thread);
                if !unhandled && !pause_on_handled {
                    tracing::info!("Handled exception on thread {}: {}", thread, description);
                    return Ok(CallbackExit::Continue);
                }

                let mut event = PausedEvent::new(id);
                event.thread = Some(thread);
                event.exception = Some(ExceptionInfo {
                    description,
                    unhandled,
                });
                Ok(CallbackExit::Pause(event))
            }
            NativeEvent::Break { thread } => {
                self.process_mut(id)?.threads.get_or_synthesize(thread);
                let mut event = PausedEvent::new(id);
                event.thread = Some(thread);
                event.is_break = true;
                Ok(CallbackExit::Pause(event))
            }
            NativeEvent::LogMessage {
                level,
                category,
                message,
            } => {
                tracing::info!(target: "kikyo::debuggee", "[{}] {}", category, message.trim_end());
                let event = MessageEvent {
                    process: id,
                    level,
                    category,
                    message,
                };
                let listeners = self.process(id)?.events.log_message.clone();
                for listener in listeners {
                    listener(self, &event);
                }
                Ok(CallbackExit::Continue)
            }
            NativeEvent::EvalComplete { eval, value } => {
                self.process_mut(id)?
                    .evals
                    .get_mut(eval)?
                    .complete(EvalOutcome::Value(value));
                Ok(CallbackExit::Silent)
            }
            NativeEvent::EvalException { eval, description } => {
                self.process_mut(id)?
                    .evals
                    .get_mut(eval)?
                    .complete(EvalOutcome::Exception(description));
                Ok(CallbackExit::Silent)
            }
            NativeEvent::StateChanged | NativeEvent::ProcessExited { .. } => {
                Ok(CallbackExit::Continue)
            }
        }
    }

    fn on_module_loaded(
        &mut self,
        id: ProcessId,
        module: ModuleToken,
        appdomain: AppDomainToken,
        name: String,
        path: Option<PathBuf>,
        base: u64,
    ) -> Result<CallbackExit> {
        let process = self
            .processes
            .get_mut(&id)
            .ok_or(DebuggerError::UnknownProcess(id))?;
        let order_of_loading = process
            .modules
            .add(module, appdomain, name.clone(), path, base)
            .order_of_loading();
        process.appdomains.get_mut(appdomain)?.invalidate_compilation();
        tracing::debug!("Module {} loaded ({}) at 0x{:x}", name, module, base);

        if process.break_at_entry {
            // シンボルがないモジュールでは要求を残し、次のモジュールで試す
            let entry = process
                .module_symbols(module, &self.options.symbol_search_paths)?
                .map(|reader| reader.user_entry_point());
            match entry {
                None => tracing::debug!("no symbols for {}; break at entry stays armed", name),
                Some(None) | Some(Some(0)) => {
                    tracing::debug!("no entry point in {}; break at entry stays armed", name)
                }
                Some(Some(address)) => {
                    let armed = process
                        .native
                        .create_breakpoint(module, address)
                        .and_then(|bp| process.native.activate_breakpoint(bp, true).map(|_| bp));
                    match armed {
                        Ok(bp) => {
                            process.temp_breakpoints.push(bp);
                            tracing::debug!("entry breakpoint armed at 0x{:x} in {}", address, name);
                        }
                        Err(e) => tracing::debug!("cannot arm entry breakpoint in {}: {}", name, e),
                    }
                    process.break_at_entry = false;
                }
            }
        }

        for bp in self.breakpoints.ids() {
            self.bind_breakpoint(bp, id, module)?;
        }

        let event = ModuleEvent {
            process: id,
            module,
            name,
            order_of_loading,
        };
        let listeners = self.process(id)?.events.module_loaded.clone();
        for listener in listeners {
            listener(self, &event);
        }
        Ok(CallbackExit::Continue)
    }

    fn on_module_unloaded(&mut self, id: ProcessId, module: ModuleToken) -> Result<CallbackExit> {
        self.breakpoints.drop_module_bindings(id, module);
        let process = self.process_mut(id)?;
        let entry: &mut Module = process.modules.get_mut(module)?;
        entry.dispose();
        let event = ModuleEvent {
            process: id,
            module,
            name: entry.name().to_string(),
            order_of_loading: entry.order_of_loading(),
        };
        tracing::debug!("Module {} unloaded", event.name);

        let listeners = process.events.module_unloaded.clone();
        for listener in listeners {
            listener(self, &event);
        }
        self.process_mut(id)?.modules.remove(module)?;
        Ok(CallbackExit::Continue)
    }

    fn on_thread_created(&mut self, id: ProcessId, thread: ThreadToken) -> Result<CallbackExit> {
        let process = self.process_mut(id)?;
        process
            .threads
            .get_or_insert_with(thread, || Thread::new(thread));
        tracing::debug!("Thread {} created", thread);

        if process.new_thread_state == ThreadState::Suspend {
            match process.native.set_thread_state(thread, ThreadState::Suspend) {
                Ok(()) => {}
                Err(e) if e.is_thread_not_started() => {
                    tracing::debug!("thread {} has not started; state left as is", thread)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(CallbackExit::Continue)
    }

    /// 停止の後始末をしてリスナーに通知する
    ///
    /// リスナーは登録順に呼ばれ、途中で再開・終了した場合は残りを呼ばない。
    pub(crate) fn on_paused(&mut self, id: ProcessId, event: PausedEvent) -> Result<()> {
        let in_callback = self.in_callback;
        let process = self.process_mut(id)?;
        process.assert_paused()?;
        process.disable_all_steppers();
        process.clear_temp_breakpoints()?;
        if in_callback {
            return Err(DebuggerError::InCallback);
        }

        tracing::info!(
            "Process {} paused (session {}, state {})",
            id,
            process.pause_session(),
            process.debuggee_state()
        );
        process.set_last_pause(event.clone());
        let session = process.pause_session();
        let listeners = process.events.paused.clone();

        for listener in listeners {
            let process = self.process(id)?;
            if process.pause_session() != session
                || process.is_terminate_issued()
                || process.has_exited()
            {
                tracing::debug!("process {} left the pause; skipping remaining paused listeners", id);
                break;
            }
            listener(self, &event);
        }
        Ok(())
    }

    /// 再開をリスナーに通知する
    pub(crate) fn on_resumed(&mut self, id: ProcessId) -> Result<()> {
        if self.in_callback {
            return Err(DebuggerError::InCallback);
        }
        let listeners = self.process(id)?.events.resumed.clone();
        for listener in listeners {
            listener(self, &id);
        }
        Ok(())
    }

    /// 終了の処理。2回目以降は何もしない
    ///
    /// 最後のプロセスが終了したら、インターフェースを閉じる処理を中継に積む。
    pub(crate) fn on_exited(&mut self, id: ProcessId, exit_code: Option<i32>) -> Result<()> {
        let process = self.process_mut(id)?;
        if !process.mark_exited() {
            return Ok(());
        }
        if exit_code.is_some() {
            process.exit_code = exit_code;
        }
        if process.is_paused() {
            process.notify_resumed(DebuggeeStateAction::Clear)?;
        }
        process.deferred.clear();
        let listeners = process.events.exited.clone();

        self.live.retain(|p| *p != id);
        self.breakpoints.drop_process_bindings(id);
        match exit_code {
            Some(code) => tracing::info!("Process {} exited with code {}", id, code),
            None => tracing::info!("Process {} is gone", id),
        }

        let event = ExitedEvent {
            process: id,
            exit_code,
        };
        for listener in listeners {
            listener(self, &event);
        }

        if self.live.is_empty() {
            self.relay.async_call(|debugger: &mut Debugger| {
                if let Err(e) = debugger.terminate_debugger() {
                    tracing::warn!("cannot terminate debugger interface: {}", e);
                }
            })?;
        }
        Ok(())
    }
}
