//! デバッガの設定

use std::path::PathBuf;

/// セッションごとの設定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// 内部的な continue も含めて詳しくログを出す
    pub verbose: bool,
    /// 処理済みの例外でも停止する
    pub pause_on_handled_exceptions: bool,
    /// シンボルファイルを探すディレクトリ
    pub symbol_search_paths: Vec<PathBuf>,
}
