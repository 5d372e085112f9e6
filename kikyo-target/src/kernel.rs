//! カーネルデバッガの検出
//!
//! カーネルデバッガ（kgdb）が有効な状態でユーザー空間デバッガを動かすと、
//! ブレークポイント例外がカーネル側に奪われてシステムが固まることがあります。
//! 起動オプションを見て事前に検出します。

use std::fs;

/// 起動オプションの取得元
const CMDLINE_PATH: &str = "/proc/cmdline";

/// カーネルデバッガを有効にする起動オプション
const KGDB_OPTIONS: &[&str] = &["kgdbwait", "kgdboc=", "kgdbcon", "kgdbdbgp="];

/// 起動オプション文字列からカーネルデバッガが有効か判定する
///
/// `nokgdb` があれば他の指定より優先して無効とみなす。
pub fn kgdb_enabled_in(cmdline: &str) -> bool {
    let options: Vec<&str> = cmdline.split_whitespace().collect();
    if options.iter().any(|opt| *opt == "nokgdb") {
        return false;
    }
    options.iter().any(|opt| {
        KGDB_OPTIONS.iter().any(|kgdb| {
            if kgdb.ends_with('=') {
                opt.starts_with(kgdb)
            } else {
                opt == kgdb
            }
        })
    })
}

/// 実行中のカーネルでカーネルデバッガが有効か
///
/// 起動オプションが読めない環境では無効とみなす。
pub fn kgdb_enabled() -> bool {
    match fs::read_to_string(CMDLINE_PATH) {
        Ok(cmdline) => kgdb_enabled_in(&cmdline),
        Err(e) => {
            tracing::debug!("cannot read {}: {}", CMDLINE_PATH, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_cmdline() {
        assert!(!kgdb_enabled_in("BOOT_IMAGE=/vmlinuz root=/dev/sda1 ro quiet"));
        assert!(!kgdb_enabled_in(""));
    }

    #[test]
    fn test_kgdb_options() {
        assert!(kgdb_enabled_in("root=/dev/sda1 kgdboc=ttyS0,115200"));
        assert!(kgdb_enabled_in("kgdbwait quiet"));
        assert!(kgdb_enabled_in("kgdbdbgp=0"));
        // 似た名前は一致しない
        assert!(!kgdb_enabled_in("kgdbwaitx kgdboc"));
    }

    #[test]
    fn test_nokgdb_wins() {
        assert!(!kgdb_enabled_in("kgdboc=ttyS0 nokgdb"));
    }
}
