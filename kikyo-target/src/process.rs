//! プロセスの起動とアタッチ

use crate::thread::{task_ids, Tid};
use crate::{LaunchRequest, NativeError, NativeResult};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::ffi::CString;
use std::path::Path;

fn to_cstring(s: &str) -> NativeResult<CString> {
    CString::new(s).map_err(|e| NativeError::Other(format!("invalid string {:?}: {}", s, e)))
}

fn path_cstring(path: &Path) -> NativeResult<CString> {
    let s = path
        .to_str()
        .ok_or_else(|| NativeError::Other(format!("invalid path {:?}", path)))?;
    to_cstring(s)
}

/// トレース対象に共通で設定するオプション
fn trace_options() -> ptrace::Options {
    ptrace::Options::PTRACE_O_TRACECLONE | ptrace::Options::PTRACE_O_EXITKILL
}

/// 実行可能ファイルを起動してトレース下に置く
///
/// 新しいプロセスをforkし、自分のプロセスグループを作らせて PTRACE_TRACEME を設定し、
/// 作業ディレクトリを移してから execve します。
/// execve 直後の SIGTRAP で停止した状態で pid を返します。
pub fn spawn(request: &LaunchRequest) -> NativeResult<i32> {
    use nix::unistd::{chdir, execve, fork, setpgid, ForkResult};

    let program = path_cstring(&request.program)?;
    let working_dir = path_cstring(&request.working_dir)?;

    let mut argv = vec![program.clone()];
    for arg in &request.args {
        argv.push(to_cstring(arg)?);
    }

    // 環境変数は親プロセスから継承
    let env: Vec<CString> = std::env::vars()
        .map(|(key, val)| to_cstring(&format!("{}={}", key, val)))
        .collect::<NativeResult<Vec<_>>>()?;

    match unsafe { fork()? } {
        ForkResult::Parent { child } => {
            let _ = setpgid(child, child);
            match waitpid(child, None)? {
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                    ptrace::setoptions(child, trace_options())?;
                    tracing::debug!("spawned {:?} as {}", request.program, child);
                    Ok(child.as_raw())
                }
                WaitStatus::Exited(_, code) => Err(NativeError::Other(format!(
                    "{:?} exited with {} before it could be traced",
                    request.program, code
                ))),
                status => Err(NativeError::Other(format!(
                    "unexpected wait status after execve: {:?}",
                    status
                ))),
            }
        }
        ForkResult::Child => {
            // 子プロセス: ここで失敗したら親には終了コードで伝わる
            let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
            if chdir(working_dir.as_c_str()).is_ok() && ptrace::traceme().is_ok() {
                let _ = execve(&program, &argv, &env);
            }
            unsafe { nix::libc::_exit(127) }
        }
    }
}

/// 実行中のプロセスの全スレッドにアタッチする
///
/// 各スレッドがアタッチ時の SIGSTOP で停止するまで待ち、アタッチしたスレッドを返します。
pub fn attach(pid: i32) -> NativeResult<Vec<Tid>> {
    let mut attached = Vec::new();
    for tid in task_ids(pid)? {
        let target = Pid::from_raw(tid);
        if let Err(e) = ptrace::attach(target) {
            // 列挙後に終了したスレッドは無視する
            if tid == pid {
                return Err(e.into());
            }
            tracing::debug!("skipping thread {}: {}", tid, e);
            continue;
        }
        let stopped = loop {
            match waitpid(target, Some(WaitPidFlag::__WALL))? {
                WaitStatus::Stopped(_, _) => break true,
                WaitStatus::Exited(..) | WaitStatus::Signaled(..) => break false,
                _ => continue,
            }
        };
        if !stopped {
            continue;
        }
        ptrace::setoptions(target, trace_options())?;
        attached.push(tid);
    }
    tracing::debug!("attached to {} ({} threads)", pid, attached.len());
    Ok(attached)
}
