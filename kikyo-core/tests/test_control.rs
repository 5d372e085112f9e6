//! プロセス制御（停止・再開・ステップ・評価）の統合テスト

mod common;

use common::{app_module, app_program, record_pauses, session, start};
use kikyo_core::{
    DebuggeeStateAction, DebuggerError, EvalOutcome, EvalRequest, StepKind, ThreadState,
    ThreadToken,
};
use kikyo_target::scripted::{ScriptStep, ScriptedModule, ScriptedProgram, ScriptedSymbols};
use kikyo_target::{NativeEvent, StepperToken};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

fn brk(thread: u64) -> ScriptStep {
    ScriptStep::Event(NativeEvent::Break {
        thread: ThreadToken(thread),
    })
}

#[test]
fn test_pause_session_and_debuggee_state_counters() {
    let (mut debugger, handle) = session();
    handle.add_program(
        "app",
        app_program()
            .step(brk(1))
            .step(ScriptStep::Event(NativeEvent::LogMessage {
                level: 0,
                category: "app".to_string(),
                message: "hello\n".to_string(),
            }))
            .step(brk(1))
            .step(ScriptStep::Exit(0)),
    );

    let id = start(&mut debugger, "app");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    debugger
        .events_mut(id)
        .unwrap()
        .on_log_message(move |d, event| {
            let process = d.process(event.process).unwrap();
            sink.borrow_mut().push((
                event.message.clone(),
                process.pause_session(),
                process.debuggee_state(),
            ));
        });

    debugger.wait_for_pause(id).unwrap();
    let (first_session, first_state) = {
        let p = debugger.process(id).unwrap();
        (p.pause_session(), p.debuggee_state())
    };
    assert!(first_session > 0);
    assert_ne!(first_state, 0);

    debugger.async_continue(id).unwrap();
    let p = debugger.process(id).unwrap();
    assert_eq!(p.pause_session(), 0);
    assert_eq!(p.debuggee_state(), 0);
    assert!(p.is_running());

    debugger.wait_for_pause(id).unwrap();
    let p = debugger.process(id).unwrap();
    let (log_message, log_session, log_state) = seen.borrow()[0].clone();
    assert_eq!(log_message, "hello\n");

    // ログの内部停止で新しい状態が振られ、その後の内部 continue では変わらない
    assert!(log_session > first_session);
    assert!(log_state > first_state);
    assert!(p.pause_session() > log_session);
    assert_eq!(p.debuggee_state(), log_state);

    assert!(debugger.continue_process(id).unwrap_err().is_process_exited());
}

#[test]
fn test_break_pauses_running_process() {
    let (mut debugger, handle) = session();
    handle.add_program("app", app_program());

    let id = start(&mut debugger, "app");
    debugger.pump().unwrap();
    let pauses = record_pauses(&mut debugger, id);

    debugger.break_process(id).expect("break should succeed");
    let process = debugger.process(id).unwrap();
    assert!(process.is_paused());
    assert_eq!(handle.stop_count(id.0), 1);
    assert_eq!(pauses.borrow().len(), 1);
    assert!(!pauses.borrow()[0].is_break);
    assert_eq!(pauses.borrow()[0].thread, None);

    assert!(matches!(
        debugger.break_process(id),
        Err(DebuggerError::NotRunning)
    ));

    debugger.async_continue(id).unwrap();
    assert!(matches!(
        debugger.async_continue(id),
        Err(DebuggerError::NotPaused)
    ));
}

#[test]
fn test_wait_for_pause_on_exited_process_fails_immediately() {
    let (mut debugger, handle) = session();
    handle.add_program("app", app_program().step(ScriptStep::Exit(3)));

    let id = start(&mut debugger, "app");
    debugger.pump().unwrap();
    assert_eq!(debugger.process(id).unwrap().exit_code(), Some(3));

    assert!(matches!(
        debugger.wait_for_pause(id),
        Err(DebuggerError::ProcessExited)
    ));
    assert!(matches!(
        debugger.wait_for_pause_timeout(id, Duration::from_secs(5)),
        Err(DebuggerError::ProcessExited)
    ));
    debugger.wait_for_exit(id).unwrap();
}

#[test]
fn test_wait_for_pause_timeout_returns_without_error() {
    let (mut debugger, handle) = session();
    handle.add_program("app", app_program());

    let id = start(&mut debugger, "app");
    let paused = debugger
        .wait_for_pause_timeout(id, Duration::from_millis(50))
        .unwrap();
    assert!(!paused);
    assert!(debugger.process(id).unwrap().is_running());
    assert_eq!(debugger.process(id).unwrap().modules().len(), 1);
}

#[test]
fn test_break_at_entry_waits_for_a_module_with_symbols() {
    let (mut debugger, handle) = session();
    handle.add_program(
        "app",
        ScriptedProgram::new()
            .with_module(ScriptedModule::new("ld.so"))
            .step(ScriptStep::LoadModule(app_module("app", 0)))
            .step(ScriptStep::Execute {
                thread: 1,
                address: 0x100,
            })
            .step(ScriptStep::Exit(0)),
    );

    let id = debugger.start("app", Path::new(""), &[], true).unwrap();
    let pauses = record_pauses(&mut debugger, id);
    let armed = Rc::new(RefCell::new(Vec::new()));
    let sink = armed.clone();
    debugger
        .events_mut(id)
        .unwrap()
        .on_module_loaded(move |d, event| {
            let process = d.process(event.process).unwrap();
            sink.borrow_mut().push((
                event.name.clone(),
                process.is_running(),
                process.is_break_at_entry_armed(),
            ));
        });

    debugger.wait_for_pause(id).unwrap();

    // シンボルのないモジュールでは止まらず、要求は残る
    assert_eq!(
        armed.borrow().as_slice(),
        &[
            ("ld.so".to_string(), false, true),
            ("app".to_string(), false, false),
        ]
    );
    let pauses = pauses.borrow();
    assert_eq!(pauses.len(), 1);
    assert!(pauses[0].is_break);
    assert_eq!(pauses[0].thread, Some(ThreadToken(1)));
    // 一時ブレークポイントは停止で外れる
    assert!(handle.active_breakpoints(id.0).is_empty());
    assert_eq!(debugger.process(id).unwrap().temp_breakpoint_count(), 0);
}

#[test]
fn test_break_at_entry_without_symbols_keeps_running() {
    let (mut debugger, handle) = session();
    handle.add_program(
        "app",
        ScriptedProgram::new().with_module(ScriptedModule::new("stripped")),
    );

    let id = debugger.start("app", Path::new(""), &[], true).unwrap();
    let pauses = record_pauses(&mut debugger, id);
    debugger.pump().unwrap();

    let process = debugger.process(id).unwrap();
    assert!(process.is_running());
    assert!(process.is_break_at_entry_armed());
    assert!(pauses.borrow().is_empty());
}

#[test]
fn test_run_to_arms_every_resolving_module() {
    let (mut debugger, handle) = session();
    handle.add_program(
        "app",
        ScriptedProgram::new()
            .with_module(app_module("app", 0))
            .with_module(app_module("plugin", 0x1000))
            .with_module(ScriptedModule::new("other").with_symbols(
                ScriptedSymbols::new().with_line("other.rs", 42, 0x2000),
            ))
            .step(brk(1))
            .step(ScriptStep::Execute {
                thread: 1,
                address: 0x1142,
            })
            .step(ScriptStep::Exit(0)),
    );

    let id = start(&mut debugger, "app");
    let pauses = record_pauses(&mut debugger, id);
    debugger.wait_for_pause(id).unwrap();

    let armed = debugger.run_to(id, "main.rs", 42, 0).unwrap();
    assert_eq!(armed, 2);
    assert_eq!(handle.active_breakpoints(id.0), vec![0x142, 0x1142]);
    assert!(debugger.process(id).unwrap().is_running());

    debugger.wait_for_pause(id).unwrap();
    assert_eq!(pauses.borrow().len(), 2);
    assert!(pauses.borrow()[1].is_break);
    assert!(handle.active_breakpoints(id.0).is_empty());
    assert_eq!(debugger.process(id).unwrap().temp_breakpoint_count(), 0);
}

#[test]
fn test_breakpoint_hit_reports_breakpoint_and_counts() {
    let (mut debugger, handle) = session();
    let execute = ScriptStep::Execute {
        thread: 1,
        address: 0x110,
    };
    handle.add_program(
        "app",
        app_program()
            .step(execute.clone())
            .step(execute)
            .step(ScriptStep::Exit(0)),
    );

    let bp = debugger.add_breakpoint("main.rs", 10, 0, true).unwrap();
    let id = start(&mut debugger, "app");
    let pauses = record_pauses(&mut debugger, id);

    debugger.wait_for_pause(id).unwrap();
    debugger.continue_process(id).unwrap();

    assert_eq!(debugger.breakpoints().get(bp).unwrap().hit_count(), 2);
    let pauses = pauses.borrow();
    assert_eq!(pauses[0].breakpoints_hit, vec![bp]);
    assert!(!pauses[0].is_break);
    assert_eq!(
        debugger.process(id).unwrap().last_pause(),
        pauses.last()
    );
}

#[test]
fn test_paused_listeners_stop_after_resume() {
    let (mut debugger, handle) = session();
    handle.add_program("app", app_program().step(brk(1)).step(ScriptStep::Exit(0)));

    let id = start(&mut debugger, "app");
    let later = Rc::new(RefCell::new(0));
    let resumed = Rc::new(RefCell::new(0));
    {
        let resumed = resumed.clone();
        let later = later.clone();
        let events = debugger.events_mut(id).unwrap();
        events.on_paused(move |d, event| {
            d.async_continue(event.process).expect("listener may continue");
        });
        events.on_paused(move |_, _| *later.borrow_mut() += 1);
        events.on_resumed(move |_, _| *resumed.borrow_mut() += 1);
    }

    debugger.wait_for_exit(id).unwrap();
    assert_eq!(*later.borrow(), 0);
    assert_eq!(*resumed.borrow(), 1);
}

#[test]
fn test_continue_from_callback_listener_is_rejected() {
    let (mut debugger, handle) = session();
    handle.add_program("app", app_program());

    let id = start(&mut debugger, "app");
    let result = Rc::new(RefCell::new(None));
    let sink = result.clone();
    debugger
        .events_mut(id)
        .unwrap()
        .on_module_loaded(move |d, event| {
            *sink.borrow_mut() = d.async_continue(event.process).err();
        });
    debugger.pump().unwrap();

    assert!(matches!(
        *result.borrow(),
        Some(DebuggerError::InCallback)
    ));
}

#[test]
fn test_callbacks_while_paused_are_delivered_after_continue() {
    let (mut debugger, handle) = session();
    handle.add_program("app", app_program().step(brk(1)).step(ScriptStep::Exit(0)));

    let id = start(&mut debugger, "app");
    let pauses = record_pauses(&mut debugger, id);
    debugger.wait_for_pause(id).unwrap();

    handle.emit(
        id.0,
        NativeEvent::Exception {
            thread: ThreadToken(1),
            description: "late".to_string(),
            unhandled: true,
        },
    );
    debugger.pump().unwrap();
    assert_eq!(pauses.borrow().len(), 1);

    let resumes = handle.resume_count(id.0);
    debugger.continue_process(id).unwrap();
    // ネイティブ側は再開せずに保留分が配送される
    assert_eq!(handle.resume_count(id.0), resumes);
    let pauses = pauses.borrow();
    assert_eq!(pauses.len(), 2);
    assert_eq!(
        pauses[1].exception.as_ref().map(|e| e.description.as_str()),
        Some("late")
    );
}

#[test]
fn test_exception_policy() {
    let exception = |description: &str, unhandled| {
        ScriptStep::Event(NativeEvent::Exception {
            thread: ThreadToken(1),
            description: description.to_string(),
            unhandled,
        })
    };
    let program = app_program()
        .step(exception("handled", false))
        .step(exception("boom", true))
        .step(ScriptStep::Exit(0));

    let (mut debugger, handle) = session();
    handle.add_program("app", program.clone());
    let id = start(&mut debugger, "app");
    let pauses = record_pauses(&mut debugger, id);
    debugger.wait_for_pause(id).unwrap();
    assert_eq!(pauses.borrow().len(), 1);
    let exception_info = pauses.borrow()[0].exception.clone().unwrap();
    assert_eq!(exception_info.description, "boom");
    assert!(exception_info.unhandled);

    let (mut debugger, handle) = session();
    handle.add_program("app", program);
    debugger.options_mut().pause_on_handled_exceptions = true;
    let id = start(&mut debugger, "app");
    let pauses = record_pauses(&mut debugger, id);
    debugger.wait_for_pause(id).unwrap();
    assert_eq!(
        pauses.borrow()[0].exception.as_ref().map(|e| e.unhandled),
        Some(false)
    );
}

#[test]
fn test_step_pauses_on_completion() {
    let (mut debugger, handle) = session();
    handle.add_program("app", app_program().step(brk(1)).step(ScriptStep::Exit(0)));

    let id = start(&mut debugger, "app");
    let pauses = record_pauses(&mut debugger, id);
    debugger.wait_for_pause(id).unwrap();

    debugger.step(id, ThreadToken(1), StepKind::Over).unwrap();
    let process = debugger.process(id).unwrap();
    assert!(process.is_paused());
    assert!(process.steppers().is_empty());
    assert_eq!(
        process.threads().get(ThreadToken(1)).unwrap().current_step(),
        None
    );
    let pauses = pauses.borrow();
    assert_eq!(pauses.len(), 2);
    assert!(pauses[1].is_break);
    assert_eq!(pauses[1].thread, Some(ThreadToken(1)));
}

#[test]
fn test_pause_disarms_pending_steppers() {
    let (mut debugger, handle) = session();
    handle.add_program(
        "app",
        app_program()
            .with_thread(2)
            .step(brk(1))
            .step(brk(1))
            .step(ScriptStep::Exit(0)),
    );

    let id = start(&mut debugger, "app");
    debugger.wait_for_pause(id).unwrap();

    // 止めたスレッドのステップは完了せず、先に別の停止が来る
    debugger
        .set_thread_suspended(id, ThreadToken(2), true)
        .unwrap();
    debugger.step(id, ThreadToken(2), StepKind::Into).unwrap();
    assert_eq!(handle.thread_state(id.0, 2), Some(ThreadState::Suspend));

    let process = debugger.process(id).unwrap();
    let stepper = process.steppers().values().next().unwrap();
    assert!(stepper.is_ignored());
    assert_eq!(stepper.thread(), ThreadToken(2));
    assert_eq!(handle.active_steppers(id.0), 0);

    debugger
        .set_thread_suspended(id, ThreadToken(2), false)
        .unwrap();
    assert!(debugger.continue_process(id).unwrap_err().is_process_exited());
}

#[test]
fn test_continue_with_run_set_and_unstarted_thread() {
    let (mut debugger, handle) = session();
    handle.add_program(
        "app",
        app_program()
            .with_thread(2)
            .with_unstarted_thread(5)
            .step(brk(1)),
    );

    let id = start(&mut debugger, "app");
    // 開始前のスレッドへの状態設定の失敗は無視される
    debugger.wait_for_pause(id).unwrap();
    assert_eq!(debugger.process(id).unwrap().threads().len(), 3);

    debugger
        .async_continue_with(
            id,
            DebuggeeStateAction::Clear,
            Some(&[ThreadToken(1)]),
            Some(ThreadState::Suspend),
        )
        .unwrap();
    assert_eq!(handle.thread_state(id.0, 1), Some(ThreadState::Run));
    assert_eq!(handle.thread_state(id.0, 2), Some(ThreadState::Suspend));
    assert_eq!(
        debugger.process(id).unwrap().new_thread_state(),
        ThreadState::Suspend
    );
}

#[test]
fn test_evaluate_returns_value_without_pause_notification() {
    let (mut debugger, handle) = session();
    handle.add_program(
        "app",
        app_program()
            .with_thread(2)
            .with_eval_result(&[42, 0, 0, 0])
            .step(brk(1))
            .step(ScriptStep::Exit(0)),
    );

    let id = start(&mut debugger, "app");
    let pauses = record_pauses(&mut debugger, id);
    debugger.wait_for_pause(id).unwrap();
    let state = debugger.process(id).unwrap().debuggee_state();

    let outcome = debugger
        .evaluate(id, ThreadToken(1), &EvalRequest::default())
        .unwrap();
    assert_eq!(outcome, EvalOutcome::Value(vec![42, 0, 0, 0]));

    let process = debugger.process(id).unwrap();
    assert!(process.is_paused());
    assert!(!process.is_evaluating());
    assert!(process.evaluations().is_empty());
    assert_eq!(process.debuggee_state(), state);
    assert_eq!(pauses.borrow().len(), 1);
    // 評価中は評価するスレッドだけが走る
    assert_eq!(handle.thread_state(id.0, 2), Some(ThreadState::Suspend));
}

#[test]
fn test_callback_during_evaluation_keeps_other_threads_suspended() {
    let (mut debugger, handle) = session();
    handle.add_program(
        "app",
        app_program()
            .with_thread(2)
            .with_eval_result(&[1])
            .step(brk(1))
            .step(ScriptStep::Exit(0)),
    );

    let id = start(&mut debugger, "app");
    debugger.wait_for_pause(id).unwrap();

    // 停止中に届いたログは評価の再開時に配送される
    handle.emit(
        id.0,
        NativeEvent::LogMessage {
            level: 0,
            category: "app".to_string(),
            message: "during eval\n".to_string(),
        },
    );
    debugger.pump().unwrap();

    let outcome = debugger
        .evaluate(id, ThreadToken(1), &EvalRequest::default())
        .unwrap();
    assert_eq!(outcome, EvalOutcome::Value(vec![1]));
    assert_eq!(handle.thread_state(id.0, 1), Some(ThreadState::Run));
    assert_eq!(handle.thread_state(id.0, 2), Some(ThreadState::Suspend));
    assert_eq!(
        debugger.process(id).unwrap().new_thread_state(),
        ThreadState::Suspend
    );

    // 通常の continue で元に戻る
    debugger.async_continue(id).unwrap();
    assert_eq!(handle.thread_state(id.0, 2), Some(ThreadState::Run));
    assert_eq!(
        debugger.process(id).unwrap().new_thread_state(),
        ThreadState::Run
    );
}

#[test]
fn test_thread_created_while_suspending_new_threads_is_not_user_suspended() {
    let (mut debugger, handle) = session();
    handle.add_program(
        "app",
        app_program()
            .step(brk(1))
            .step(ScriptStep::SpawnThread(3))
            .step(brk(1))
            .step(ScriptStep::Exit(0)),
    );

    let id = start(&mut debugger, "app");
    debugger.wait_for_pause(id).unwrap();

    debugger
        .async_continue_with(
            id,
            DebuggeeStateAction::Clear,
            Some(&[ThreadToken(1)]),
            Some(ThreadState::Suspend),
        )
        .unwrap();
    debugger.wait_for_pause(id).unwrap();

    // ネイティブ側では止まっているが、ユーザーが止めたスレッドではない
    assert_eq!(handle.thread_state(id.0, 3), Some(ThreadState::Suspend));
    let thread = debugger
        .process(id)
        .unwrap()
        .threads()
        .get(ThreadToken(3))
        .unwrap();
    assert!(!thread.is_suspended());

    debugger.async_continue(id).unwrap();
    assert_eq!(handle.thread_state(id.0, 3), Some(ThreadState::Run));
}

#[test]
fn test_memory_access() {
    let (mut debugger, handle) = session();
    handle.add_program("app", app_program().with_memory(0x1000, &[1, 2, 3, 4]));

    let id = start(&mut debugger, "app");
    debugger.pump().unwrap();

    assert_eq!(debugger.read_memory(id, 0x1000, 2).unwrap(), vec![1, 2]);
    // 読めた分だけ返す
    assert_eq!(debugger.read_memory(id, 0x1002, 8).unwrap(), vec![3, 4]);
    assert!(debugger.read_memory(id, 0x9000, 4).unwrap().is_empty());

    assert_eq!(debugger.write_memory(id, 0x1003, &[9, 9]).unwrap(), 1);
    assert_eq!(debugger.write_memory(id, 0x1000, &[]).unwrap(), 0);
    assert_eq!(handle.memory(id.0), vec![1, 2, 3, 9]);
}

#[test]
fn test_callback_errors_surface_on_next_wait() {
    let (mut debugger, handle) = session();
    handle.add_program("app", app_program());

    let id = start(&mut debugger, "app");
    debugger.pump().unwrap();

    handle.emit(
        id.0,
        NativeEvent::StepComplete {
            thread: ThreadToken(1),
            stepper: StepperToken(77),
        },
    );
    let err = debugger.pump().unwrap_err();
    assert_eq!(err.to_string(), "stepper not found: 77");
    assert!(debugger.take_pending_error().is_none());
}
