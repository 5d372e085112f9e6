//! スレッド管理機能

use crate::NativeResult;
use std::fs;

/// Linux のスレッドID
pub type Tid = i32;

/// プロセスに属するスレッドを `/proc/pid/task` から列挙する（昇順）
pub fn task_ids(pid: i32) -> NativeResult<Vec<Tid>> {
    let mut tids = Vec::new();
    for entry in fs::read_dir(format!("/proc/{}/task", pid))? {
        let entry = entry?;
        if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            tids.push(tid);
        }
    }
    tids.sort_unstable();
    Ok(tids)
}

/// プロセスグループIDを取得する
pub fn process_group(pid: i32) -> NativeResult<i32> {
    let pgid = nix::unistd::getpgid(Some(nix::unistd::Pid::from_raw(pid)))?;
    Ok(pgid.as_raw())
}
