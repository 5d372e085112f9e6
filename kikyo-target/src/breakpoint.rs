//! ソフトウェアブレークポイント

use crate::memory::Memory;
use crate::NativeResult;

/// INT3命令のオペコード
pub const INT3_OPCODE: u8 = 0xCC;

/// ソフトウェアブレークポイント（INT3命令）
///
/// 作成直後は無効。有効化で元のバイトを退避して INT3 を書き込む。
#[derive(Debug)]
pub struct SoftwareBreakpoint {
    address: u64,
    original_byte: u8,
    enabled: bool,
}

impl SoftwareBreakpoint {
    pub fn new(address: u64) -> Self {
        Self {
            address,
            original_byte: 0,
            enabled: false,
        }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self, memory: &Memory) -> NativeResult<()> {
        if self.enabled {
            return Ok(());
        }
        self.original_byte = memory.read_u8(self.address)?;
        memory.write_u8(self.address, INT3_OPCODE)?;
        self.enabled = true;
        Ok(())
    }

    pub fn disable(&mut self, memory: &Memory) -> NativeResult<()> {
        if !self.enabled {
            return Ok(());
        }
        memory.write_u8(self.address, self.original_byte)?;
        self.enabled = false;
        Ok(())
    }
}
