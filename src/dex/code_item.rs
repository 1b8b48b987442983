//! `code_item` serialization for lowered methods.

use crate::dex::debug_encode::DebugInfoItem;
use crate::dex::error::DexError;
use crate::dex::{read_u2, read_u4, write_u2, write_u4};

/// A method's code item. Lowered methods carry no try blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeItem
{
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    /// Offset of the debug block; patched by the file writer once it is placed.
    pub debug_info_off: u32,
    pub insns: Vec<u16>,
}

impl CodeItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<CodeItem, DexError>
    {
        let registers_size = read_u2(bytes, ix)?;
        let ins_size = read_u2(bytes, ix)?;
        let outs_size = read_u2(bytes, ix)?;
        let tries_size = read_u2(bytes, ix)?;
        if tries_size != 0 {
            return Err(DexError::malformed(&format!("code item with {} try blocks", tries_size)));
        }
        let debug_info_off = read_u4(bytes, ix)?;
        let insns_size = read_u4(bytes, ix)?;
        let mut insns = Vec::with_capacity(insns_size as usize);
        for _ in 0..insns_size {
            insns.push(read_u2(bytes, ix)?);
        }
        Ok(CodeItem { registers_size, ins_size, outs_size, debug_info_off, insns })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u2(bytes, self.registers_size);
        c += write_u2(bytes, self.ins_size);
        c += write_u2(bytes, self.outs_size);
        c += write_u2(bytes, 0); // tries_size
        c += write_u4(bytes, self.debug_info_off);
        c += write_u4(bytes, self.insns.len() as u32);
        for i in &self.insns {
            c += write_u2(bytes, *i);
        }
        c
    }

    /// Writes the code item followed by its debug block, pointing `debug_info_off` at
    /// the block's position relative to `base`.
    pub fn write_with_debug(&self, debug: Option<&DebugInfoItem>, base: u32, bytes: &mut Vec<u8>) -> usize
    {
        let start = bytes.len();
        let mut c = self.write(bytes);
        if let Some(di) = debug {
            let debug_info_off = base + bytes.len() as u32;
            bytes[start + 8..start + 12].copy_from_slice(&debug_info_off.to_le_bytes());
            c += di.write(bytes);
        }
        c
    }
}
