//! レジスタアクセス機能

use crate::NativeResult;
use nix::unistd::Pid;

/// スレッド単位のレジスタアクセス
pub struct Registers {
    tid: Pid,
}

impl Registers {
    pub fn new(tid: i32) -> Self {
        Self {
            tid: Pid::from_raw(tid),
        }
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn pc(&self) -> NativeResult<u64> {
        let regs = nix::sys::ptrace::getregs(self.tid)?;
        Ok(regs.rip)
    }

    /// プログラムカウンタ（RIP）を設定する
    pub fn set_pc(&self, pc: u64) -> NativeResult<()> {
        let mut regs = nix::sys::ptrace::getregs(self.tid)?;
        regs.rip = pc;
        nix::sys::ptrace::setregs(self.tid, regs)?;
        Ok(())
    }
}
