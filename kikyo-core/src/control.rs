//! プロセスの実行制御
//!
//! 停止・再開・終了・デタッチと、それを待つブロッキング操作です。
//! 待機はすべて「中継に処理が届くのを待つ」「届いた処理を全部実行する」の繰り返しで、
//! その間にネイティブコールバックが処理されます。

use crate::debugger::Debugger;
use crate::eval::{EvalOutcome, Evaluation};
use crate::events::PausedEvent;
use crate::process::{DebuggeeStateAction, ProcessId};
use crate::stepper::Stepper;
use crate::{DebuggerError, Result};
use kikyo_target::{EvalRequest, ModuleToken, StepKind, ThreadState, ThreadToken};
use std::time::{Duration, Instant};

/// 時間制限付きの待機は残り時間がこれを切ったら戻る
const WAIT_GUARD: Duration = Duration::from_millis(10);

impl Debugger {
    /// 実行中のプロセスを止める
    pub fn break_process(&mut self, id: ProcessId) -> Result<()> {
        let process = self.process_mut(id)?;
        process.assert_running()?;
        process.native.stop()?;
        process.notify_paused()?;
        tracing::info!("Break requested for process {}", id);
        self.on_paused(id, PausedEvent::new(id))
    }

    /// 再開して次に止まるまで待つ
    ///
    /// 待っている間にプロセスが終了した場合は [`DebuggerError::ProcessExited`]。
    pub fn continue_process(&mut self, id: ProcessId) -> Result<()> {
        self.async_continue(id)?;
        self.wait_for_pause(id)
    }

    /// 新しい状態として再開し、止まるのを待たずに戻る
    ///
    /// ユーザーが止めていないスレッドがすべて走り、新しいスレッドも走る。
    pub fn async_continue(&mut self, id: ProcessId) -> Result<()> {
        let run_set = self.process(id)?.threads.unsuspended();
        self.continue_inner(
            id,
            DebuggeeStateAction::Clear,
            Some(run_set),
            Some(ThreadState::Run),
        )
    }

    /// 再開の詳細を指定して再開する
    ///
    /// `threads_to_run` を省略すると各スレッドの状態は前回のまま。
    /// `new_thread_state` はこれ以降に生まれるスレッドに適用され、省略すると前回のまま。
    pub fn async_continue_with(
        &mut self,
        id: ProcessId,
        action: DebuggeeStateAction,
        threads_to_run: Option<&[ThreadToken]>,
        new_thread_state: Option<ThreadState>,
    ) -> Result<()> {
        self.continue_inner(id, action, threads_to_run.map(|t| t.to_vec()), new_thread_state)
    }

    pub(crate) fn continue_inner(
        &mut self,
        id: ProcessId,
        action: DebuggeeStateAction,
        threads_to_run: Option<Vec<ThreadToken>>,
        new_thread_state: Option<ThreadState>,
    ) -> Result<()> {
        // コールバックの処理中は再開できない。内部の continue は処理を抜けてから行う
        if self.in_callback {
            return Err(DebuggerError::InCallback);
        }
        let verbose = self.options.verbose;
        let relay = self.relay.clone();
        let process = self.process_mut(id)?;
        process.assert_paused()?;

        if let Some(run_set) = threads_to_run {
            let threads: Vec<ThreadToken> = process.threads.keys().collect();
            for thread in threads {
                let state = if run_set.contains(&thread) {
                    ThreadState::Run
                } else {
                    ThreadState::Suspend
                };
                match process.native.set_thread_state(thread, state) {
                    Ok(()) => {}
                    Err(e) if e.is_thread_not_started() => {
                        tracing::debug!("thread {} has not started; state left as is", thread)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        if let Some(state) = new_thread_state {
            process.new_thread_state = state;
        }

        process.notify_resumed(action)?;
        match process.deferred.pop_front() {
            // ネイティブ側はまだ止まっているので、保留していたコールバックから配送する
            Some(event) => relay.async_call(move |debugger: &mut Debugger| {
                debugger.dispatch_native(id, event)
            })?,
            None => process.native.resume()?,
        }

        if verbose {
            tracing::info!("Continue process {}", id);
        } else {
            tracing::debug!("Continue process {}", id);
        }

        if action == DebuggeeStateAction::Clear {
            self.on_resumed(id)?;
        }
        Ok(())
    }

    /// 指定位置に一時ブレークポイントを置いて再開する。置いた数を返す
    ///
    /// 位置を解決できたモジュールごとに1つ置く。一時ブレークポイントは
    /// どれが当たったかに関係なく次の停止ですべて外れる。
    pub fn run_to(&mut self, id: ProcessId, file: &str, line: u32, column: u32) -> Result<usize> {
        let process = self
            .processes
            .get_mut(&id)
            .ok_or(DebuggerError::UnknownProcess(id))?;
        let modules: Vec<ModuleToken> = process.modules.keys().collect();

        let mut armed = 0;
        for module in modules {
            let Some(address) = process.resolve_location(
                module,
                file,
                line,
                column,
                &self.options.symbol_search_paths,
            )?
            else {
                continue;
            };
            let bp = process.native.create_breakpoint(module, address)?;
            process.native.activate_breakpoint(bp, true)?;
            process.temp_breakpoints.push(bp);
            armed += 1;
        }
        tracing::debug!("run to {}:{} armed {} breakpoint(s)", file, line, armed);

        if process.is_paused() {
            self.async_continue(id)?;
        }
        Ok(armed)
    }

    /// 終了させて終了通知まで待つ
    pub fn terminate_process(&mut self, id: ProcessId) -> Result<()> {
        self.async_terminate(id)?;
        self.wait_for_exit(id)
    }

    /// 終了を要求して戻る
    pub fn async_terminate(&mut self, id: ProcessId) -> Result<()> {
        // すでに届いているコールバックを先に処理しておく
        let relay = self.relay.clone();
        relay.perform_all_calls(self);

        let process = self.process_mut(id)?;
        if process.has_exited() {
            return Ok(());
        }
        process.native.stop()?;
        process.native.terminate(0)?;
        process.terminate_issued = true;
        tracing::info!("Terminating process {}", id);
        Ok(())
    }

    /// デタッチする
    ///
    /// デタッチはこちらの都合なので、ネイティブの終了通知を待たずに終了として扱う。
    pub fn detach_process(&mut self, id: ProcessId) -> Result<()> {
        let process = self.process_mut(id)?;
        if process.has_exited() {
            return Ok(());
        }
        if process.is_running() {
            process.native.stop()?;
            process.notify_paused()?;
        }

        for binding in self.breakpoints.drop_process_bindings(id) {
            self.process_mut(id)?
                .native
                .activate_breakpoint(binding.native, false)?;
        }
        // ブレークポイントはすべて無効にする
        for breakpoint in self.breakpoints.ids() {
            self.set_breakpoint_enabled(breakpoint, false)?;
        }

        let process = self.process_mut(id)?;
        process.clear_temp_breakpoints()?;
        process.disable_all_steppers();
        process.steppers.clear();
        process.native.detach()?;
        for module in process.modules.values_mut() {
            module.dispose();
        }
        process.modules.clear();
        process.threads.clear();
        tracing::info!("Detached from process {}", id);

        self.on_exited(id, None)
    }

    /// 止まるか終了するまで待つ
    ///
    /// 終了していた場合は [`DebuggerError::ProcessExited`]。
    pub fn wait_for_pause(&mut self, id: ProcessId) -> Result<()> {
        loop {
            self.raise_pending_error()?;
            let process = self.process(id)?;
            if process.has_exited() {
                return Err(DebuggerError::ProcessExited);
            }
            if process.is_paused() {
                return Ok(());
            }
            self.pump_once()?;
        }
    }

    /// 時間制限付きの `wait_for_pause`。止まったら `true`、時間切れなら `false`
    pub fn wait_for_pause_timeout(&mut self, id: ProcessId, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.raise_pending_error()?;
            let process = self.process(id)?;
            if process.has_exited() {
                return Err(DebuggerError::ProcessExited);
            }
            if process.is_paused() {
                return Ok(true);
            }

            let left = deadline.saturating_duration_since(Instant::now());
            if left <= WAIT_GUARD {
                return Ok(false);
            }
            self.relay.wait_for_call_timeout(left);
            self.pump()?;
        }
    }

    /// 終了するまで待つ
    pub fn wait_for_exit(&mut self, id: ProcessId) -> Result<()> {
        while !self.process(id)?.has_exited() {
            self.raise_pending_error()?;
            self.pump_once()?;
        }
        Ok(())
    }

    /// メモリを読む。読めなかった分は返さない
    pub fn read_memory(&mut self, id: ProcessId, address: u64, size: usize) -> Result<Vec<u8>> {
        let process = self.process_mut(id)?;
        let mut buffer = vec![0u8; size];
        let read = process.native.read_memory(address, &mut buffer)?;
        buffer.truncate(read);
        Ok(buffer)
    }

    /// メモリに書き、書けたバイト数を返す
    pub fn write_memory(&mut self, id: ProcessId, address: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let process = self.process_mut(id)?;
        Ok(process.native.write_memory(address, data)?)
    }

    /// スレッドをステップ実行し、止まるまで待つ
    pub fn step(&mut self, id: ProcessId, thread: ThreadToken, kind: StepKind) -> Result<()> {
        let process = self.process_mut(id)?;
        process.assert_paused()?;

        let stepper = process.native.create_stepper(thread, kind)?;
        process
            .steppers
            .insert(stepper, Stepper::new(stepper, thread, kind));
        process
            .threads
            .get_or_synthesize(thread)
            .set_current_step(Some(stepper));
        tracing::debug!("Step {:?} on thread {} (stepper {})", kind, thread, stepper);

        self.continue_process(id)
    }

    /// ユーザーによるスレッドの停止。止めたスレッドは既定の continue で走らない
    pub fn set_thread_suspended(
        &mut self,
        id: ProcessId,
        thread: ThreadToken,
        suspended: bool,
    ) -> Result<()> {
        self.process_mut(id)?
            .threads
            .get_or_synthesize(thread)
            .set_suspended(suspended);
        Ok(())
    }

    /// スレッド上で関数を評価し、完了するまで待つ
    ///
    /// 評価中は評価するスレッドだけを走らせる。完了しても停止通知は出ない。
    pub fn evaluate(
        &mut self,
        id: ProcessId,
        thread: ThreadToken,
        request: &EvalRequest,
    ) -> Result<EvalOutcome> {
        let process = self.process_mut(id)?;
        process.assert_paused()?;
        let eval = process.native.create_eval(thread, request)?;
        process.evals.insert(eval, Evaluation::new(eval, thread));
        tracing::debug!("Evaluation {} started on thread {}", eval, thread);

        // 評価中に生まれたスレッドも止めておく
        self.continue_inner(
            id,
            DebuggeeStateAction::Keep,
            Some(vec![thread]),
            Some(ThreadState::Suspend),
        )?;

        loop {
            self.raise_pending_error()?;
            let process = self.process_mut(id)?;
            if process.has_exited() {
                return Err(DebuggerError::ProcessExited);
            }
            if process.is_paused() {
                let evaluation = process.evals.remove(eval)?;
                return match evaluation.outcome() {
                    Some(outcome) => Ok(outcome.clone()),
                    None => Err(DebuggerError::EvalInterrupted),
                };
            }
            self.pump_once()?;
        }
    }
}
