//! テスト実行ファイル自身を使ったシンボルリーダーのテスト

#![cfg(target_os = "linux")]

use kikyo_dwarf::{DwarfLoader, DwarfSymbolReader, SymbolReader, SymbolResolver};

#[inline(never)]
fn marker() -> u32 {
    line!()
}

#[test]
fn test_load_current_exe() {
    let exe = std::env::current_exe().expect("current_exe");
    let loader = DwarfLoader::load(&exe).expect("Failed to load test executable");

    let resolver = SymbolResolver::new(&loader).expect("Failed to create symbol resolver");
    assert!(!resolver.is_empty(), "Should find function symbols");

    let main = resolver.resolve("main").expect("test harness has a main symbol");
    let sym = resolver.reverse_resolve(main).expect("reverse resolve main");
    assert_eq!(sym.address, main);
}

#[test]
fn test_resolve_own_source_line() {
    let exe = std::env::current_exe().expect("current_exe");
    let reader = DwarfSymbolReader::load(&exe, 0).expect("Failed to load symbols");

    let line = marker();
    let addr = reader.resolve_location(file!(), line, 0);
    assert!(addr.is_some(), "line {} of {} should have code", line, file!());

    let entry = reader.user_entry_point().expect("entry point");
    assert!(reader.describe(entry).is_some());
}

#[test]
fn test_missing_file_is_error() {
    assert!(DwarfLoader::load("/nonexistent/kikyo/binary").is_err());
}
