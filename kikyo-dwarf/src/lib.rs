//! Kikyo DWARF デバッグ情報解析
//!
//! このクレートは、ELFファイルとDWARFデバッグ情報からブレークポイント解決に
//! 必要な最小限の情報を取り出します。
//! シンボル名の解決、ソース行からアドレスへの変換、エントリポイントの特定を行います。

pub mod loader;
pub mod symbols;
pub mod lines;
pub mod reader;

pub use loader::DwarfLoader;
pub use symbols::{Symbol, SymbolResolver};
pub use lines::{LineInfo, LineTable};
pub use reader::{DwarfSymbolReader, SymbolReader};

/// DWARF解析の結果型
pub type Result<T> = anyhow::Result<T>;
