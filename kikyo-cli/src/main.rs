//! Kikyo CLI - コマンドラインインターフェース
//!
//! ネイティブプロセスデバッガ kikyo のREPLインターフェース

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use kikyo_core::parse::Location;
use kikyo_core::{Command, Debugger, DebuggerError, PausedEvent, ProcessId, StepKind};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// 起動直後の停止を待つ時間
const STARTUP_WAIT: Duration = Duration::from_secs(5);

/// プロンプトを出す前にコールバックを待つ時間
const PROMPT_PUMP: Duration = Duration::from_millis(50);

/// Kikyo - Native Process Debugger
#[derive(Parser)]
#[command(name = "kikyo")]
#[command(version = "0.1.0")]
#[command(about = "Debugger for native processes", long_about = None)]
struct Cli {
    /// Log every continue and callback
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Additional directory to search for symbol files (repeatable)
    #[arg(long = "symbols", value_name = "DIR", global = true)]
    symbols: Vec<PathBuf>,

    /// Also pause on exceptions the debuggee handles itself
    #[arg(long, global = true)]
    pause_on_handled: bool,

    #[command(subcommand)]
    command: DebugCommand,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Launch and debug an executable
    Run {
        /// Path to the executable binary
        binary: PathBuf,

        /// Working directory (defaults to the directory of the binary)
        #[arg(long, value_name = "DIR")]
        cwd: Option<PathBuf>,

        /// Stop at the user entry point of the first module with symbols
        #[arg(long)]
        break_at_entry: bool,

        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Attach to an existing process
    Attach {
        /// Process ID to attach to
        #[arg(short, long)]
        pid: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    println!("Kikyo - Native Process Debugger");
    println!("Version 0.1.0");
    println!();

    let mut debugger = Debugger::new();
    let options = debugger.options_mut();
    options.verbose = cli.verbose;
    options.pause_on_handled_exceptions = cli.pause_on_handled;
    options.symbol_search_paths = cli.symbols;

    let id = launch(&mut debugger, cli.command)?;
    install_listeners(&mut debugger, id)?;
    run_repl(&mut debugger, id)?;

    Ok(())
}

/// `RUST_LOG` が無ければ kikyo のログだけを出す
fn init_tracing(verbose: bool) {
    let default = if verbose { "kikyo=debug" } else { "kikyo=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// プロセスを起動またはアタッチする
fn launch(debugger: &mut Debugger, command: DebugCommand) -> Result<ProcessId> {
    match command {
        DebugCommand::Run {
            binary,
            cwd,
            break_at_entry,
            args,
        } => {
            println!("Launching: {}", binary.display());
            let cwd = cwd.unwrap_or_default();
            let id = debugger.start(&binary, &cwd, &args, break_at_entry)?;
            println!(
                "Process {} started in {}",
                id,
                debugger.process(id)?.working_dir().display()
            );

            if break_at_entry {
                if debugger.wait_for_pause_timeout(id, STARTUP_WAIT)? {
                    println!("Stopped at entry point");
                } else {
                    println!("Entry point not reached yet; use 'pause' to stop the process");
                }
            } else {
                debugger.pump_timeout(PROMPT_PUMP)?;
            }
            Ok(id)
        }
        DebugCommand::Attach { pid } => {
            println!("Attaching to process: {}", pid);
            let id = debugger.attach(pid)?;
            debugger.pump_timeout(PROMPT_PUMP)?;
            println!("Attached to process {}", id);
            Ok(id)
        }
    }
}

/// 停止と終了をREPLに表示する
fn install_listeners(debugger: &mut Debugger, id: ProcessId) -> Result<()> {
    let events = debugger.events_mut(id)?;
    events.on_paused(|debugger, event| print_pause(debugger, event));
    events.on_exited(|_, event| match event.exit_code {
        Some(code) => println!("Process {} exited with code {}", event.process, code),
        None => println!("Process {} detached", event.process),
    });
    events.on_module_loaded(|_, event| {
        tracing::debug!("module {} loaded (#{})", event.name, event.order_of_loading)
    });
    events.on_log_message(|_, event| print!("[{}] {}", event.category, event.message));
    Ok(())
}

fn print_pause(debugger: &Debugger, event: &PausedEvent) {
    println!();
    if !event.breakpoints_hit.is_empty() {
        for id in &event.breakpoints_hit {
            match debugger.breakpoints().get(*id) {
                Ok(bp) => println!("Breakpoint {} hit at {} (hits: {})", id, bp, bp.hit_count()),
                Err(_) => println!("Breakpoint {} hit", id),
            }
        }
    } else if let Some(exception) = &event.exception {
        let kind = if exception.unhandled {
            "Unhandled exception"
        } else {
            "Exception"
        };
        println!("{}: {}", kind, exception.description);
    } else if event.is_break {
        println!("Break");
    } else {
        println!("Process paused");
    }
    if let Some(thread) = event.thread {
        println!("  on thread {}", thread);
    }
}

/// REPLループを実行する
fn run_repl(debugger: &mut Debugger, id: ProcessId) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        // 入力を待つ間に届いたコールバックを処理する
        if let Err(e) = debugger.pump_timeout(PROMPT_PUMP) {
            eprintln!("Error: {}", e);
        }

        let readline = rl.readline("(kikyo) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match handle_command(debugger, id, line) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    shutdown(debugger, id)
}

/// 終了時にまだ生きていれば終了させる
fn shutdown(debugger: &mut Debugger, id: ProcessId) -> Result<()> {
    if debugger.process(id)?.has_exited() {
        return Ok(());
    }
    match debugger.terminate_process(id) {
        Ok(()) => Ok(()),
        Err(e) if e.is_process_exited() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// コマンドを処理する。REPLを抜けるなら `false`
fn handle_command(debugger: &mut Debugger, id: ProcessId, line: &str) -> Result<bool> {
    let Some(command) = Command::parse(line)? else {
        println!("Unknown command: {}", line);
        println!("Type 'help' for available commands.");
        return Ok(true);
    };

    match command {
        Command::Help => print_help(),
        Command::Quit => {
            println!("Goodbye!");
            return Ok(false);
        }
        Command::Break(loc) => handle_break(debugger, &loc)?,
        Command::Delete(bp) => {
            debugger.remove_breakpoint(bp)?;
            println!("Breakpoint {} deleted", bp);
        }
        Command::Enable(bp) => {
            debugger.set_breakpoint_enabled(bp, true)?;
            println!("Breakpoint {} enabled", bp);
        }
        Command::Disable(bp) => {
            debugger.set_breakpoint_enabled(bp, false)?;
            println!("Breakpoint {} disabled", bp);
        }
        Command::Continue => {
            println!("Continuing execution...");
            report_wait(debugger.continue_process(id))?;
        }
        Command::Pause => debugger.break_process(id)?,
        Command::Step(kind) => handle_step(debugger, id, kind)?,
        Command::RunTo(loc) => {
            let armed = debugger.run_to(id, &loc.file, loc.line, loc.column)?;
            if armed == 0 {
                bail!("cannot resolve {}:{} in any loaded module", loc.file, loc.line);
            }
            report_wait(debugger.wait_for_pause(id))?;
        }
        Command::Threads => print_threads(debugger, id)?,
        Command::Modules => print_modules(debugger, id)?,
        Command::Breakpoints => print_breakpoints(debugger),
        Command::Examine { address, len } => {
            let bytes = debugger.read_memory(id, address, len)?;
            print_memory(address, &bytes);
        }
        Command::Detach => {
            debugger.detach_process(id)?;
            return Ok(false);
        }
        Command::Kill => {
            report_wait(debugger.terminate_process(id))?;
            return Ok(false);
        }
    }

    Ok(true)
}

/// 待機の結果を表示する。終了はエラー扱いしない
fn report_wait(result: kikyo_core::Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(DebuggerError::ProcessExited) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Breakコマンドを処理する
fn handle_break(debugger: &mut Debugger, loc: &Location) -> Result<()> {
    let bp = debugger.add_breakpoint(&loc.file, loc.line, loc.column, true)?;
    let bound = debugger.breakpoints().get(bp)?.bindings().len();
    if bound == 0 {
        println!("Breakpoint {} set at {} (pending)", bp, loc);
    } else {
        println!("Breakpoint {} set at {} ({} location(s))", bp, loc, bound);
    }
    Ok(())
}

/// 最後に止まったスレッドをステップ実行する
fn handle_step(debugger: &mut Debugger, id: ProcessId, kind: StepKind) -> Result<()> {
    let Some(thread) = debugger.process(id)?.last_pause().and_then(|p| p.thread) else {
        bail!("no current thread to step");
    };
    report_wait(debugger.step(id, thread, kind))
}

fn print_threads(debugger: &Debugger, id: ProcessId) -> Result<()> {
    let process = debugger.process(id)?;
    let current = process.last_pause().and_then(|p| p.thread);
    println!("Threads ({}):", process.threads().len());
    for thread in process.threads().values() {
        let marker = if Some(thread.token()) == current { "*" } else { " " };
        let state = if thread.is_suspended() { " (suspended)" } else { "" };
        println!("  {} {}{}", marker, thread.token(), state);
    }
    Ok(())
}

fn print_modules(debugger: &Debugger, id: ProcessId) -> Result<()> {
    let process = debugger.process(id)?;
    println!("Modules ({}):", process.modules().len());
    for module in process.modules().values() {
        let symbols = if !module.symbols_loaded() {
            "not loaded"
        } else if module.has_symbols() {
            "symbols"
        } else {
            "no symbols"
        };
        println!(
            "  {}. {} @ 0x{:x} [{}]",
            module.order_of_loading(),
            module.path().unwrap_or(Path::new(module.name())).display(),
            module.base(),
            symbols
        );
    }
    Ok(())
}

fn print_breakpoints(debugger: &Debugger) {
    if debugger.breakpoints().is_empty() {
        println!("No breakpoints");
        return;
    }
    for bp in debugger.breakpoints().iter() {
        let state = if bp.is_enabled() { "enabled" } else { "disabled" };
        println!(
            "  {}. {} [{}] hits: {}, locations: {}",
            bp.id(),
            bp,
            state,
            bp.hit_count(),
            bp.bindings().len()
        );
        for binding in bp.bindings() {
            println!("       process {} @ 0x{:x}", binding.process, binding.address);
        }
    }
}

/// 16バイトずつ16進で表示する
fn print_memory(address: u64, bytes: &[u8]) {
    if bytes.is_empty() {
        println!("Cannot read memory at 0x{:x}", address);
        return;
    }
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("0x{:016x}: {}", address + (i * 16) as u64, hex.join(" "));
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help              - Show this help message");
    println!("  quit/exit/q       - Exit the debugger (the process is terminated)");
    println!();
    println!("Execution:");
    println!("  continue (c)      - Continue execution");
    println!("  pause             - Stop the running process");
    println!("  step [in|over|out|insn] - Step the current thread");
    println!("  next (n)          - Step over");
    println!("  finish (f)        - Step out");
    println!("  runto <file:line> - Run to a source location");
    println!("  detach            - Detach and leave the process running");
    println!("  kill              - Terminate the process");
    println!();
    println!("Breakpoints:");
    println!("  break <file:line[:col]> - Set breakpoint at a source location");
    println!("  delete/enable/disable <id>");
    println!("  bps               - List breakpoints");
    println!();
    println!("Inspection:");
    println!("  threads           - List threads");
    println!("  modules           - List loaded modules");
    println!("  x <addr> [len]    - Examine memory");
    println!();
    println!("Examples:");
    println!("  break main.rs:10");
    println!("  runto src/lib.rs:42");
    println!("  x 0x7ffc0000 32");
}
