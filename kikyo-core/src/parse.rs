//! パース関連のユーティリティ関数

use std::fmt;
use thiserror::Error;

/// コマンド引数のパースエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid address '{0}'")]
    Address(String),

    #[error("invalid number '{0}'")]
    Number(String),

    #[error("invalid location '{0}' (expected file:line[:column])")]
    Location(String),
}

/// ソース位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
    /// 0 は列指定なし
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)?;
        if self.column != 0 {
            write!(f, ":{}", self.column)?;
        }
        Ok(())
    }
}

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート
///
/// # Examples
/// ```
/// use kikyo_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64, ParseError> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|_| ParseError::Address(s.to_string()))
    } else {
        // 10進数でもダメなら16進数として解釈を試みる
        s.parse::<u64>()
            .or_else(|_| u64::from_str_radix(s, 16))
            .map_err(|_| ParseError::Address(s.to_string()))
    }
}

/// 10進数をパース
pub fn parse_number<T: std::str::FromStr>(s: &str) -> Result<T, ParseError> {
    s.trim()
        .parse()
        .map_err(|_| ParseError::Number(s.trim().to_string()))
}

/// `file:line[:column]` をパース
///
/// ファイル名に `:` が含まれてもよいように、末尾から数字を取り出す。
pub fn parse_location(s: &str) -> Result<Location, ParseError> {
    let s = s.trim();
    let invalid = || ParseError::Location(s.to_string());

    let (head, last) = s.rsplit_once(':').ok_or_else(invalid)?;
    let last: u32 = last.parse().map_err(|_| invalid())?;

    let (file, line, column) = match head.rsplit_once(':') {
        Some((file, line)) if !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit()) => {
            (file, line.parse().map_err(|_| invalid())?, last)
        }
        _ => (head, last, 0),
    };
    if file.is_empty() || line == 0 {
        return Err(invalid());
    }

    Ok(Location {
        file: file.to_string(),
        line,
        column,
    })
}
