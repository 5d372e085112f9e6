//! シンボル解決機能

use crate::{DwarfLoader, Result};
use object::{Object, ObjectSymbol, SymbolKind};
use std::collections::HashMap;

/// 関数シンボル
#[derive(Debug, Clone)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名
    pub demangled_name: String,
    /// ファイル内アドレス
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    pub fn new(name: String, address: u64, size: u64) -> Self {
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            address,
            size,
        }
    }

    /// アドレスがこのシンボルの範囲内にあるか
    pub fn contains(&self, addr: u64) -> bool {
        if self.size == 0 {
            return addr == self.address;
        }
        addr >= self.address && addr < self.address + self.size
    }
}

fn demangle_symbol(name: &str) -> String {
    match rustc_demangle::try_demangle(name) {
        Ok(demangled) => format!("{:#}", demangled),
        // Rust以外のシンボルはそのまま
        Err(_) => name.to_string(),
    }
}

/// 関数シンボルの索引
pub struct SymbolResolver {
    /// マングル名とデマングル名の両方 -> symbols_by_address のインデックス
    by_name: HashMap<String, usize>,
    /// アドレス順にソート済み
    symbols_by_address: Vec<Symbol>,
}

impl SymbolResolver {
    /// ELFのシンボルテーブルから関数シンボルを集める
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let object_file = loader.object_file()?;

        let mut symbols_by_address: Vec<Symbol> = object_file
            .symbols()
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.address() != 0)
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                (!name.is_empty()).then(|| Symbol::new(name.to_string(), symbol.address(), symbol.size()))
            })
            .collect();
        symbols_by_address.sort_by_key(|s| s.address);

        let mut by_name = HashMap::new();
        for (idx, sym) in symbols_by_address.iter().enumerate() {
            by_name.entry(sym.name.clone()).or_insert(idx);
            by_name.entry(sym.demangled_name.clone()).or_insert(idx);
        }

        Ok(Self {
            by_name,
            symbols_by_address,
        })
    }

    /// シンボル名（マングル名またはデマングル名）からアドレスを解決する
    pub fn resolve(&self, name: &str) -> Option<u64> {
        self.by_name
            .get(name)
            .map(|&idx| self.symbols_by_address[idx].address)
    }

    /// アドレスを含むシンボルを探す
    pub fn reverse_resolve(&self, addr: u64) -> Option<&Symbol> {
        let idx = match self
            .symbols_by_address
            .binary_search_by_key(&addr, |s| s.address)
        {
            Ok(idx) => return self.symbols_by_address.get(idx),
            Err(0) => return None,
            Err(idx) => idx - 1,
        };
        let sym = &self.symbols_by_address[idx];
        // サイズ情報がない場合は最も近い手前のシンボルを返す
        (sym.size == 0 || sym.contains(addr)).then_some(sym)
    }

    pub fn len(&self) -> usize {
        self.symbols_by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols_by_address.is_empty()
    }
}
