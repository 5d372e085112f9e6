//! ソース行情報

use crate::{DwarfLoader, Result};
use std::path::{Path, PathBuf};

/// 行テーブルの1行
#[derive(Debug, Clone)]
pub struct LineInfo {
    pub file: PathBuf,
    pub line: u32,
    /// 0 は行頭（列情報なし）
    pub column: u32,
    /// ファイル内アドレス
    pub address: u64,
    pub is_stmt: bool,
}

/// `.debug_line` から作った行テーブル
pub struct LineTable {
    rows: Vec<LineInfo>,
}

impl LineTable {
    /// 全コンパイル単位の行プログラムを展開する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let dwarf = loader.dwarf()?;
        let mut rows = Vec::new();

        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;
            let program = match unit.line_program.clone() {
                Some(program) => program,
                None => continue,
            };

            let mut line_rows = program.rows();
            while let Some((header, row)) = line_rows.next_row()? {
                if row.end_sequence() {
                    continue;
                }
                let Some(file) = row.file(header) else {
                    continue;
                };

                let mut path = PathBuf::new();
                if let Some(dir) = file.directory(header) {
                    path.push(dwarf.attr_string(&unit, dir)?.to_string_lossy().as_ref());
                }
                path.push(
                    dwarf
                        .attr_string(&unit, file.path_name())?
                        .to_string_lossy()
                        .as_ref(),
                );

                let column = match row.column() {
                    gimli::ColumnType::LeftEdge => 0,
                    gimli::ColumnType::Column(c) => c.get() as u32,
                };

                rows.push(LineInfo {
                    file: path,
                    line: row.line().map(|l| l.get() as u32).unwrap_or(0),
                    column,
                    address: row.address(),
                    is_stmt: row.is_stmt(),
                });
            }
        }

        tracing::debug!("line table for {:?}: {} rows", loader.path(), rows.len());
        Ok(Self::from_rows(rows))
    }

    /// 行の一覧から直接作る
    pub fn from_rows(rows: Vec<LineInfo>) -> Self {
        Self { rows }
    }

    /// ソース位置をアドレスに変換する
    ///
    /// 指定行に命令がなければ、同じファイル内でそれより後ろの最も近い行を使います。
    /// `column` が 0 でなく一致する列があれば、その列を優先します。
    pub fn resolve(&self, file: &str, line: u32, column: u32) -> Option<u64> {
        let requested = Path::new(file);
        let in_file: Vec<&LineInfo> = self
            .rows
            .iter()
            .filter(|row| row.is_stmt && path_matches(&row.file, requested))
            .collect();

        let target_line = in_file
            .iter()
            .map(|row| row.line)
            .filter(|&l| l >= line)
            .min()?;

        let candidates: Vec<&&LineInfo> = in_file.iter().filter(|row| row.line == target_line).collect();
        let exact_column = candidates
            .iter()
            .filter(|row| column != 0 && row.column == column)
            .map(|row| row.address)
            .min();

        exact_column.or_else(|| candidates.iter().map(|row| row.address).min())
    }

    /// アドレスに対応する行を探す
    pub fn lookup(&self, address: u64) -> Option<&LineInfo> {
        self.rows
            .iter()
            .filter(|row| row.address <= address)
            .max_by_key(|row| row.address)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// コンポーネント単位の後方一致でファイルパスを比較する
fn path_matches(candidate: &Path, requested: &Path) -> bool {
    if candidate == requested || candidate.ends_with(requested) {
        return true;
    }
    candidate.is_relative() && !candidate.as_os_str().is_empty() && requested.ends_with(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(file: &str, line: u32, column: u32, address: u64) -> LineInfo {
        LineInfo {
            file: PathBuf::from(file),
            line,
            column,
            address,
            is_stmt: true,
        }
    }

    fn table() -> LineTable {
        LineTable::from_rows(vec![
            row("/work/app/src/main.rs", 10, 5, 0x1010),
            row("/work/app/src/main.rs", 10, 1, 0x1000),
            row("/work/app/src/main.rs", 12, 0, 0x1020),
            row("/work/app/src/lib.rs", 10, 0, 0x2000),
        ])
    }

    #[test]
    fn test_resolve_exact_line() {
        let table = table();
        assert_eq!(table.resolve("src/main.rs", 10, 0), Some(0x1000));
        assert_eq!(table.resolve("lib.rs", 10, 0), Some(0x2000));
    }

    #[test]
    fn test_resolve_prefers_column() {
        let table = table();
        assert_eq!(table.resolve("main.rs", 10, 5), Some(0x1010));
        // 一致する列がなければ行の先頭
        assert_eq!(table.resolve("main.rs", 10, 9), Some(0x1000));
    }

    #[test]
    fn test_resolve_next_line() {
        let table = table();
        assert_eq!(table.resolve("main.rs", 11, 0), Some(0x1020));
        assert_eq!(table.resolve("main.rs", 13, 0), None);
        assert_eq!(table.resolve("other.rs", 10, 0), None);
    }

    #[test]
    fn test_path_component_match() {
        // "ain.rs" は "main.rs" の部分文字列だがコンポーネントとしては一致しない
        assert!(table().resolve("ain.rs", 10, 0).is_none());
    }

    #[test]
    fn test_lookup() {
        let table = table();
        assert_eq!(table.lookup(0x1015).map(|r| r.line), Some(10));
        assert_eq!(table.lookup(0x2004).map(|r| r.address), Some(0x2000));
        assert!(table.lookup(0x10).is_none());
    }
}
