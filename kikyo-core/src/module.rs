//! モジュール管理

use crate::tracker::Tracker;
use kikyo_dwarf::SymbolReader;
use kikyo_target::{AppDomainToken, ModuleToken};
use std::fmt;
use std::path::{Path, PathBuf};

/// シンボルの読み込み状態
enum Symbols {
    NotLoaded,
    Missing,
    Loaded(Box<dyn SymbolReader>),
}

/// デバッグ対象にロードされたモジュール
pub struct Module {
    token: ModuleToken,
    appdomain: AppDomainToken,
    name: String,
    path: Option<PathBuf>,
    base: u64,
    order_of_loading: usize,
    symbols: Symbols,
    disposed: bool,
}

impl Module {
    pub(crate) fn new(
        token: ModuleToken,
        appdomain: AppDomainToken,
        name: String,
        path: Option<PathBuf>,
        base: u64,
        order_of_loading: usize,
    ) -> Self {
        Self {
            token,
            appdomain,
            name,
            path,
            base,
            order_of_loading,
            symbols: Symbols::NotLoaded,
            disposed: false,
        }
    }

    pub fn token(&self) -> ModuleToken {
        self.token
    }

    pub fn appdomain(&self) -> AppDomainToken {
        self.appdomain
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// ロード順の連番（プロセスごとに0から）
    pub fn order_of_loading(&self) -> usize {
        self.order_of_loading
    }

    pub fn has_symbols(&self) -> bool {
        matches!(self.symbols, Symbols::Loaded(_))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn symbols_loaded(&self) -> bool {
        !matches!(self.symbols, Symbols::NotLoaded)
    }

    pub(crate) fn set_symbols(&mut self, reader: Option<Box<dyn SymbolReader>>) {
        self.symbols = match reader {
            Some(reader) => Symbols::Loaded(reader),
            None => Symbols::Missing,
        };
    }

    pub(crate) fn symbols(&self) -> Option<&dyn SymbolReader> {
        match &self.symbols {
            Symbols::Loaded(reader) => Some(reader.as_ref()),
            _ => None,
        }
    }

    /// 次に参照されたときに読み直す
    pub(crate) fn reset_symbols(&mut self) {
        self.symbols = Symbols::NotLoaded;
    }

    pub(crate) fn dispose(&mut self) {
        self.symbols = Symbols::Missing;
        self.disposed = true;
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("base", &format_args!("0x{:x}", self.base))
            .field("order_of_loading", &self.order_of_loading)
            .field("has_symbols", &self.has_symbols())
            .finish()
    }
}

/// プロセスのモジュール一覧
pub struct ModuleCollection {
    modules: Tracker<ModuleToken, Module>,
    last_order_of_loading: usize,
}

impl ModuleCollection {
    pub fn new() -> Self {
        Self {
            modules: Tracker::new("module"),
            last_order_of_loading: 0,
        }
    }

    /// ロード順を振ってモジュールを登録する
    pub(crate) fn add(
        &mut self,
        token: ModuleToken,
        appdomain: AppDomainToken,
        name: String,
        path: Option<PathBuf>,
        base: u64,
    ) -> &mut Module {
        let order = self.last_order_of_loading;
        self.last_order_of_loading += 1;
        self.modules
            .insert(token, Module::new(token, appdomain, name, path, base, order))
    }
}

impl Default for ModuleCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for ModuleCollection {
    type Target = Tracker<ModuleToken, Module>;

    fn deref(&self) -> &Self::Target {
        &self.modules
    }
}

impl std::ops::DerefMut for ModuleCollection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_of_loading_is_monotonic() {
        let mut modules = ModuleCollection::new();
        modules.add(ModuleToken(10), AppDomainToken(1), "a".into(), None, 0);
        modules.add(ModuleToken(11), AppDomainToken(1), "b".into(), None, 0);
        modules.remove(ModuleToken(10)).unwrap();
        let c = modules.add(ModuleToken(12), AppDomainToken(1), "c".into(), None, 0);
        // 番号は再利用しない
        assert_eq!(c.order_of_loading(), 2);
        assert_eq!(modules.get(ModuleToken(11)).unwrap().order_of_loading(), 1);
    }

    #[test]
    fn test_dispose_drops_symbols() {
        let mut modules = ModuleCollection::new();
        let module = modules.add(ModuleToken(1), AppDomainToken(1), "a".into(), None, 0);
        assert!(!module.symbols_loaded());
        module.set_symbols(None);
        assert!(module.symbols_loaded());
        assert!(!module.has_symbols());
        module.dispose();
        assert!(module.is_disposed());
    }
}
