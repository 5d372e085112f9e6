//! モジュール単位のシンボルリーダー

use crate::{DwarfLoader, LineTable, Result, SymbolResolver};
use std::path::Path;

/// デバッガエンジンがモジュールのシンボルに求める操作
///
/// 返すアドレスはすべて実行時アドレスです。
pub trait SymbolReader {
    /// ユーザーコードのエントリポイント
    fn user_entry_point(&self) -> Option<u64>;

    /// ソース位置を実行時アドレスに変換する
    fn resolve_location(&self, file: &str, line: u32, column: u32) -> Option<u64>;

    /// アドレスを人が読める形にする（関数名とソース位置）
    fn describe(&self, _address: u64) -> Option<String> {
        None
    }
}

/// ELF/DWARF から作るシンボルリーダー
pub struct DwarfSymbolReader {
    symbols: SymbolResolver,
    lines: LineTable,
    /// ファイル内アドレスに加算するロードバイアス（非PIEでは0）
    bias: u64,
}

impl DwarfSymbolReader {
    /// ファイルを読み込み、`base` にロードされたものとしてリーダーを作る
    pub fn load<P: AsRef<Path>>(path: P, base: u64) -> Result<Self> {
        let loader = DwarfLoader::load(path)?;
        let symbols = SymbolResolver::new(&loader)?;
        let lines = LineTable::new(&loader)?;

        if lines.is_empty() {
            anyhow::bail!("No line information in {:?}", loader.path());
        }

        let bias = if loader.is_pie()? { base } else { 0 };
        tracing::debug!(
            "loaded symbols for {:?}: {} functions, {} line rows, bias=0x{:x}",
            loader.path(),
            symbols.len(),
            lines.len(),
            bias
        );

        Ok(Self {
            symbols,
            lines,
            bias,
        })
    }

    pub fn bias(&self) -> u64 {
        self.bias
    }
}

impl SymbolReader for DwarfSymbolReader {
    fn user_entry_point(&self) -> Option<u64> {
        self.symbols
            .resolve("main")
            .map(|addr| addr.wrapping_add(self.bias))
    }

    fn resolve_location(&self, file: &str, line: u32, column: u32) -> Option<u64> {
        self.lines
            .resolve(file, line, column)
            .map(|addr| addr.wrapping_add(self.bias))
    }

    fn describe(&self, address: u64) -> Option<String> {
        let file_addr = address.wrapping_sub(self.bias);
        let symbol = self.symbols.reverse_resolve(file_addr)?;
        let location = self
            .lines
            .lookup(file_addr)
            .map(|row| format!(" at {}:{}", row.file.display(), row.line))
            .unwrap_or_default();
        Some(format!("{}{}", symbol.demangled_name, location))
    }
}
