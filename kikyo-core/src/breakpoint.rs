//! ブレークポイント管理
//!
//! ユーザーのブレークポイントはソース位置（ファイル・行・列）で表し、
//! モジュールがロードされるたびにネイティブブレークポイントへ解決されます。
//! 1つのブレークポイントは複数のプロセス・モジュールに束縛されえます。

use crate::process::ProcessId;
use crate::{DebuggerError, Result};
use indexmap::IndexMap;
use kikyo_target::{ModuleToken, NativeBreakpointToken};
use std::fmt;

/// ブレークポイントID
pub type BreakpointId = usize;

/// ネイティブブレークポイントへの束縛
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointBinding {
    pub process: ProcessId,
    pub module: ModuleToken,
    pub native: NativeBreakpointToken,
    pub address: u64,
}

/// ソース位置のブレークポイント
#[derive(Debug, Clone)]
pub struct Breakpoint {
    id: BreakpointId,
    file: String,
    line: u32,
    column: u32,
    enabled: bool,
    hit_count: usize,
    bindings: Vec<BreakpointBinding>,
}

impl Breakpoint {
    pub fn id(&self) -> BreakpointId {
        self.id
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// 0 は列指定なし
    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn hit_count(&self) -> usize {
        self.hit_count
    }

    pub fn bindings(&self) -> &[BreakpointBinding] {
        &self.bindings
    }

    /// ネイティブブレークポイントがこのブレークポイントのものか
    pub fn is_owner_of(&self, process: ProcessId, native: NativeBreakpointToken) -> bool {
        self.bindings
            .iter()
            .any(|b| b.process == process && b.native == native)
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)?;
        if self.column != 0 {
            write!(f, ":{}", self.column)?;
        }
        Ok(())
    }
}

/// ブレークポイントマネージャ
///
/// 論理的なブレークポイントと、その束縛先のネイティブブレークポイントを管理します。
/// ネイティブ側の有効化・無効化はプロセスを持つセッションが行います。
pub struct BreakpointManager {
    breakpoints: IndexMap<BreakpointId, Breakpoint>,
    next_id: BreakpointId,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self {
            breakpoints: IndexMap::new(),
            next_id: 1,
        }
    }

    /// ブレークポイントを登録する（束縛はまだない）
    pub fn add(&mut self, file: &str, line: u32, column: u32, enabled: bool) -> BreakpointId {
        let id = self.next_id;
        self.next_id += 1;
        self.breakpoints.insert(
            id,
            Breakpoint {
                id,
                file: file.to_string(),
                line,
                column,
                enabled,
                hit_count: 0,
                bindings: Vec::new(),
            },
        );
        id
    }

    pub fn remove(&mut self, id: BreakpointId) -> Result<Breakpoint> {
        self.breakpoints
            .shift_remove(&id)
            .ok_or_else(|| DebuggerError::not_found("breakpoint", id))
    }

    pub fn get(&self, id: BreakpointId) -> Result<&Breakpoint> {
        self.breakpoints
            .get(&id)
            .ok_or_else(|| DebuggerError::not_found("breakpoint", id))
    }

    fn get_mut(&mut self, id: BreakpointId) -> Result<&mut Breakpoint> {
        self.breakpoints
            .get_mut(&id)
            .ok_or_else(|| DebuggerError::not_found("breakpoint", id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn ids(&self) -> Vec<BreakpointId> {
        self.breakpoints.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// 有効・無効を切り替え、ネイティブ側で切り替えるべき束縛を返す
    pub(crate) fn set_enabled(
        &mut self,
        id: BreakpointId,
        enabled: bool,
    ) -> Result<Vec<BreakpointBinding>> {
        let bp = self.get_mut(id)?;
        bp.enabled = enabled;
        Ok(bp.bindings.clone())
    }

    pub(crate) fn add_binding(&mut self, id: BreakpointId, binding: BreakpointBinding) -> Result<()> {
        self.get_mut(id)?.bindings.push(binding);
        Ok(())
    }

    /// ネイティブブレークポイントの持ち主
    pub fn owner_of(&self, process: ProcessId, native: NativeBreakpointToken) -> Option<BreakpointId> {
        self.breakpoints
            .values()
            .find(|bp| bp.is_owner_of(process, native))
            .map(|bp| bp.id)
    }

    pub(crate) fn record_hit(&mut self, id: BreakpointId) -> Result<usize> {
        let bp = self.get_mut(id)?;
        bp.hit_count += 1;
        Ok(bp.hit_count)
    }

    /// アンロードされたモジュールへの束縛を捨てる
    pub(crate) fn drop_module_bindings(&mut self, process: ProcessId, module: ModuleToken) {
        for bp in self.breakpoints.values_mut() {
            bp.bindings
                .retain(|b| !(b.process == process && b.module == module));
        }
    }

    /// プロセスへの束縛を捨て、捨てたものを返す
    pub(crate) fn drop_process_bindings(&mut self, process: ProcessId) -> Vec<BreakpointBinding> {
        let mut dropped = Vec::new();
        for bp in self.breakpoints.values_mut() {
            bp.bindings.retain(|b| {
                if b.process == process {
                    dropped.push(*b);
                    false
                } else {
                    true
                }
            });
        }
        dropped
    }

    /// ネイティブインターフェースが閉じられたのですべての束縛を捨てる
    pub(crate) fn notify_debugger_terminated(&mut self) {
        for bp in self.breakpoints.values_mut() {
            bp.bindings.clear();
        }
    }
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(process: u32, module: u64, native: u64) -> BreakpointBinding {
        BreakpointBinding {
            process: ProcessId(process),
            module: ModuleToken(module),
            native: NativeBreakpointToken(native),
            address: 0x1000 + native,
        }
    }

    #[test]
    fn test_add_and_remove() {
        let mut manager = BreakpointManager::new();
        let a = manager.add("main.rs", 10, 0, true);
        let b = manager.add("lib.rs", 3, 5, false);
        assert_ne!(a, b);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(b).unwrap().to_string(), "lib.rs:3:5");
        assert_eq!(manager.get(a).unwrap().to_string(), "main.rs:10");

        manager.remove(a).unwrap();
        assert!(manager.get(a).is_err());
        assert!(manager.remove(a).is_err());
    }

    #[test]
    fn test_owner_lookup_is_per_process() {
        let mut manager = BreakpointManager::new();
        let id = manager.add("main.rs", 10, 0, true);
        manager.add_binding(id, binding(1, 1, 7)).unwrap();

        assert_eq!(manager.owner_of(ProcessId(1), NativeBreakpointToken(7)), Some(id));
        assert_eq!(manager.owner_of(ProcessId(2), NativeBreakpointToken(7)), None);
    }

    #[test]
    fn test_binding_cleanup() {
        let mut manager = BreakpointManager::new();
        let id = manager.add("main.rs", 10, 0, true);
        manager.add_binding(id, binding(1, 1, 1)).unwrap();
        manager.add_binding(id, binding(1, 2, 2)).unwrap();
        manager.add_binding(id, binding(2, 1, 3)).unwrap();

        manager.drop_module_bindings(ProcessId(1), ModuleToken(2));
        assert_eq!(manager.get(id).unwrap().bindings().len(), 2);

        let dropped = manager.drop_process_bindings(ProcessId(1));
        assert_eq!(dropped, vec![binding(1, 1, 1)]);

        manager.notify_debugger_terminated();
        assert!(manager.get(id).unwrap().bindings().is_empty());
    }

    #[test]
    fn test_hit_count() {
        let mut manager = BreakpointManager::new();
        let id = manager.add("main.rs", 10, 0, true);
        assert_eq!(manager.record_hit(id).unwrap(), 1);
        assert_eq!(manager.record_hit(id).unwrap(), 2);
        assert_eq!(manager.get(id).unwrap().hit_count(), 2);
    }
}
