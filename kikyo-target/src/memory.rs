//! メモリアクセス機能

use crate::{NativeError, NativeResult};
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read as _, Seek, SeekFrom, Write as _};
use std::path::PathBuf;

/// メモリマッピング情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub executable: bool,
    pub offset: u64,
    pub path: Option<PathBuf>,
}

/// `/proc/pid/maps` の1行を解析する
///
/// フォーマット: "address perms offset dev inode pathname"
fn parse_mapping(line: &str) -> Option<MemoryMapping> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return None;
    }
    let (start, end) = parts[0].split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let offset = u64::from_str_radix(parts[2], 16).ok()?;
    // [heap] や [vdso] は実行イメージではない
    let path = parts
        .get(5)
        .filter(|p| p.starts_with('/'))
        .map(PathBuf::from);

    Some(MemoryMapping {
        start,
        end,
        executable: parts[1].chars().nth(2) == Some('x'),
        offset,
        path,
    })
}

/// ロードされたイメージ（パスとロードベース）を列挙する
///
/// オフセット0でマップされたファイルの先頭マッピングをロードベースとみなす。
pub fn loaded_images(mappings: &[MemoryMapping]) -> Vec<(PathBuf, u64)> {
    let mut images: Vec<(PathBuf, u64)> = Vec::new();
    for mapping in mappings {
        let Some(path) = &mapping.path else { continue };
        if mapping.offset != 0 || images.iter().any(|(p, _)| p == path) {
            continue;
        }
        images.push((path.clone(), mapping.start));
    }
    images
}

/// デバッグ対象のメモリアクセス
pub struct Memory {
    pid: Pid,
}

impl Memory {
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// バッファに読めるだけ読む
    ///
    /// 未マップ領域に到達したところで打ち切り、読めたバイト数を返す。
    pub fn read_into(&self, addr: u64, buffer: &mut [u8]) -> NativeResult<usize> {
        let mut file = File::open(self.mem_path())?;
        file.seek(SeekFrom::Start(addr))?;

        let mut total = 0;
        while total < buffer.len() {
            match file.read(&mut buffer[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // EIO: 未マップ領域
                Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    /// 書けるだけ書き、書けたバイト数を返す
    pub fn write(&self, addr: u64, data: &[u8]) -> NativeResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut file = OpenOptions::new().write(true).open(self.mem_path())?;
        file.seek(SeekFrom::Start(addr))?;

        let mut total = 0;
        while total < data.len() {
            match file.write(&data[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    pub fn read_u8(&self, addr: u64) -> NativeResult<u8> {
        let mut byte = [0u8; 1];
        match self.read_into(addr, &mut byte)? {
            1 => Ok(byte[0]),
            _ => Err(NativeError::Other(format!("address 0x{:x} is not mapped", addr))),
        }
    }

    pub fn write_u8(&self, addr: u64, value: u8) -> NativeResult<()> {
        match self.write(addr, &[value])? {
            1 => Ok(()),
            _ => Err(NativeError::Other(format!("address 0x{:x} is not writable", addr))),
        }
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn mappings(&self) -> NativeResult<Vec<MemoryMapping>> {
        let file = File::open(format!("/proc/{}/maps", self.pid))?;
        let mut mappings = Vec::new();
        for line in BufReader::new(file).lines() {
            if let Some(mapping) = parse_mapping(&line?) {
                mappings.push(mapping);
            }
        }
        Ok(mappings)
    }
}
