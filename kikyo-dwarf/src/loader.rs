//! ELFとDWARFの読み込み機能

use crate::Result;
use object::{Object, ObjectSection};
use std::fs;
use std::path::{Path, PathBuf};

/// DWARFセクションの読み取り型
pub type DwarfReader<'a> = gimli::EndianSlice<'a, gimli::RunTimeEndian>;

/// DWARFローダー
///
/// ファイルの内容を所有し、オブジェクトファイルとDWARFコンテキストは
/// 必要になった時点で借用としてパースします。
pub struct DwarfLoader {
    /// 読み込んだファイルのパス
    path: PathBuf,
    /// ファイルの内容
    data: Vec<u8>,
}

impl DwarfLoader {
    /// ELFファイルを読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        // 先にパースできることだけ確認しておく
        object::File::parse(data.as_slice())
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    /// 読み込んだファイルのパスを取得する
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// オブジェクトファイルをパースする
    pub fn object_file(&self) -> Result<object::File<'_>> {
        object::File::parse(self.data.as_slice())
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", self.path, e))
    }

    /// DWARFコンテキストを構築する
    pub fn dwarf(&self) -> Result<gimli::Dwarf<DwarfReader<'_>>> {
        let object_file = self.object_file()?;

        let endian = if object_file.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        // 存在しないセクションは空として扱う
        let load_section = |id: gimli::SectionId| {
            let data = object_file
                .section_by_name(id.name())
                .and_then(|section| section.data().ok())
                .unwrap_or(&[]);
            Ok::<_, anyhow::Error>(gimli::EndianSlice::new(data, endian))
        };

        gimli::Dwarf::load(load_section)
            .map_err(|e| anyhow::anyhow!("Failed to load DWARF sections: {}", e))
    }

    /// PIE（Position Independent Executable）かどうかを判定する
    ///
    /// PIE実行ファイルの場合、シンボルアドレスはオフセットであり、
    /// 実行時ベースアドレスを加算する必要があります。
    /// 非PIE実行ファイルの場合、シンボルアドレスは絶対アドレスです。
    pub fn is_pie(&self) -> Result<bool> {
        use object::ObjectKind;

        // ET_DYN (Dynamic/Shared Object) = PIE実行ファイルまたは共有ライブラリ
        // ET_EXEC (Executable) = 非PIE実行ファイル
        Ok(matches!(self.object_file()?.kind(), ObjectKind::Dynamic))
    }

    /// ELFヘッダのエントリポイント（ファイル内アドレス）を取得する
    pub fn entry(&self) -> Result<u64> {
        Ok(self.object_file()?.entry())
    }
}
