//! Dalvik instruction formats.
//!
//! Each format knows its size in code units, whether an instruction's operands fit it,
//! and how to write and read the packed encoding. Format names follow the dex
//! convention: size in units, register count, then operand kind.

use crate::dex::error::{DexError, OverflowLimit};
use crate::dex::insn::{Instruction, RegOperand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Format10t,
    Format10x,
    Format11n,
    Format11x,
    Format12x,
    Format20t,
    Format21c,
    Format21ih,
    Format21lh,
    Format21s,
    Format21t,
    Format22b,
    Format22c,
    Format22s,
    Format22t,
    Format22x,
    Format23x,
    /// Experimental closure invoke: `B|C|op G|F|E|D`, C the closure, B the argument count.
    Format25x,
    Format30t,
    Format31c,
    Format31i,
    Format31t,
    Format32x,
    Format35c,
    Format3rc,
    Format45cc,
    Format4rcc,
    Format51l,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegShape {
    /// Exact register count, each limited to the given bit width.
    Fixed(&'static [u32]),
    /// `B|A` pair; also accepts `A, A, B` for two-address arithmetic.
    TwoAddr,
    /// Up to five nibble words.
    List,
    /// Contiguous run starting at a 16-bit register.
    Range,
    /// Closure register plus up to four argument words, all nibbles.
    Closure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LitShape {
    Signed(u32),
    /// Only the top 16 bits of a 32-bit value.
    HighInt16,
    /// Only the top 16 bits of a 64-bit value.
    HighLong16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    regs: RegShape,
    literal: Option<LitShape>,
    /// Offset width in bits, and whether a zero offset is encodable.
    offset: Option<(u32, bool)>,
    indices: usize,
    index_bits: u32,
}

const NO_REGS: RegShape = RegShape::Fixed(&[]);

const fn layout(regs: RegShape) -> Layout {
    Layout { regs, literal: None, offset: None, indices: 0, index_bits: 0 }
}

const fn with_lit(regs: RegShape, lit: LitShape) -> Layout {
    Layout { regs, literal: Some(lit), offset: None, indices: 0, index_bits: 0 }
}

const fn with_offset(regs: RegShape, bits: u32, allow_zero: bool) -> Layout {
    Layout { regs, literal: None, offset: Some((bits, allow_zero)), indices: 0, index_bits: 0 }
}

const fn with_index(regs: RegShape, indices: usize, index_bits: u32) -> Layout {
    Layout { regs, literal: None, offset: None, indices, index_bits }
}

fn fits_signed(value: i64, bits: u32) -> bool {
    if bits >= 64 {
        return true;
    }
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    value >= min && value <= max
}

fn fits_unsigned(value: u32, bits: u32) -> bool {
    bits >= 32 || value < (1u32 << bits)
}

/// Two registers for a `B|A` slot, collapsing the two-address form.
fn two_addr(regs: &[RegOperand]) -> Option<(RegOperand, RegOperand)> {
    match regs {
        [a, b] => Some((*a, *b)),
        [a, a2, b] if a.reg == a2.reg => Some((*a, *b)),
        _ => None,
    }
}

fn lit_fits(shape: LitShape, value: i64) -> bool {
    match shape {
        LitShape::Signed(bits) => fits_signed(value, bits),
        LitShape::HighInt16 => fits_signed(value, 32) && value & 0xffff == 0,
        LitShape::HighLong16 => value & 0xffff_ffff_ffff == 0,
    }
}

#[inline]
fn unit(op: u8, high: u8) -> u16 {
    ((high as u16) << 8) | op as u16
}

#[inline]
fn nibbles(low: u32, high: u32) -> u8 {
    (((high & 0xf) << 4) | (low & 0xf)) as u8
}

// Helpers for pulling fields out of the first code unit
#[inline]
fn a8(inst: u16) -> u16 {
    inst >> 8
}
#[inline]
fn a4(inst: u16) -> u16 {
    (inst >> 8) & 0x0f
}
#[inline]
fn b4(inst: u16) -> u16 {
    (inst >> 12) & 0x0f
}
#[inline]
fn s4(x: u16) -> i64 {
    (((x as u8) << 4) as i8 >> 4) as i64
}

fn u32_at(units: &[u16], ix: usize) -> u32 {
    units[ix] as u32 | (units[ix + 1] as u32) << 16
}

/// Operands read back from encoded code units.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decoded {
    pub registers: Vec<u16>,
    pub indices: Vec<u32>,
    pub literal: Option<i64>,
    pub offset: Option<i32>,
}

impl Format {
    /// Size in 16-bit code units.
    pub const fn code_size(&self) -> u32 {
        match self {
            Format::Format10t | Format::Format10x | Format::Format11n | Format::Format11x | Format::Format12x => 1,

            Format::Format20t
            | Format::Format21c
            | Format::Format21ih
            | Format::Format21lh
            | Format::Format21s
            | Format::Format21t
            | Format::Format22b
            | Format::Format22c
            | Format::Format22s
            | Format::Format22t
            | Format::Format22x
            | Format::Format23x
            | Format::Format25x => 2,

            Format::Format30t
            | Format::Format31c
            | Format::Format31i
            | Format::Format31t
            | Format::Format32x
            | Format::Format35c
            | Format::Format3rc => 3,

            Format::Format45cc | Format::Format4rcc => 4,

            Format::Format51l => 5,
        }
    }

    const fn layout(&self) -> Layout {
        match self {
            Format::Format10x => layout(NO_REGS),
            Format::Format10t => with_offset(NO_REGS, 8, false),
            Format::Format20t => with_offset(NO_REGS, 16, false),
            Format::Format30t => with_offset(NO_REGS, 32, true),
            Format::Format11n => with_lit(RegShape::Fixed(&[4]), LitShape::Signed(4)),
            Format::Format11x => layout(RegShape::Fixed(&[8])),
            Format::Format12x => layout(RegShape::TwoAddr),
            Format::Format21c => with_index(RegShape::Fixed(&[8]), 1, 16),
            Format::Format21ih => with_lit(RegShape::Fixed(&[8]), LitShape::HighInt16),
            Format::Format21lh => with_lit(RegShape::Fixed(&[8]), LitShape::HighLong16),
            Format::Format21s => with_lit(RegShape::Fixed(&[8]), LitShape::Signed(16)),
            Format::Format21t => with_offset(RegShape::Fixed(&[8]), 16, false),
            Format::Format22b => with_lit(RegShape::Fixed(&[8, 8]), LitShape::Signed(8)),
            Format::Format22c => with_index(RegShape::Fixed(&[4, 4]), 1, 16),
            Format::Format22s => with_lit(RegShape::Fixed(&[4, 4]), LitShape::Signed(16)),
            Format::Format22t => with_offset(RegShape::Fixed(&[4, 4]), 16, false),
            Format::Format22x => layout(RegShape::Fixed(&[8, 16])),
            Format::Format23x => layout(RegShape::Fixed(&[8, 8, 8])),
            Format::Format25x => layout(RegShape::Closure),
            Format::Format31c => with_index(RegShape::Fixed(&[8]), 1, 32),
            Format::Format31i => with_lit(RegShape::Fixed(&[8]), LitShape::Signed(32)),
            Format::Format31t => with_offset(RegShape::Fixed(&[8]), 32, false),
            Format::Format32x => layout(RegShape::Fixed(&[16, 16])),
            Format::Format35c => with_index(RegShape::List, 1, 16),
            Format::Format3rc => with_index(RegShape::Range, 1, 16),
            Format::Format45cc => with_index(RegShape::List, 2, 16),
            Format::Format4rcc => with_index(RegShape::Range, 2, 16),
            Format::Format51l => with_lit(RegShape::Fixed(&[8]), LitShape::Signed(64)),
        }
    }

    /// Whether the instruction's operands fit this format exactly.
    ///
    /// Unassigned pool indices never fit; selection checks for them first.
    pub fn is_compatible(&self, insn: &Instruction) -> bool {
        let layout = self.layout();
        self.regs_fit(layout.regs, &insn.registers)
            && Self::literal_fits(layout.literal, insn.literal)
            && Self::offset_fits(layout.offset, insn.branch_offset)
            && insn.constants.len() == layout.indices
            && insn
                .constants
                .iter()
                .all(|c| c.resolved().is_some_and(|i| fits_unsigned(i, layout.index_bits)))
    }

    fn regs_fit(&self, shape: RegShape, regs: &[RegOperand]) -> bool {
        match shape {
            RegShape::Fixed(widths) => {
                regs.len() == widths.len()
                    && regs.iter().zip(widths).all(|(r, bits)| fits_unsigned(r.reg as u32, *bits))
            }
            RegShape::TwoAddr => {
                two_addr(regs).is_some_and(|(a, b)| fits_unsigned(a.reg as u32, 4) && fits_unsigned(b.reg as u32, 4))
            }
            RegShape::List => {
                let words: usize = regs.iter().map(|r| r.category.max(1) as usize).sum();
                words <= 5 && regs.iter().all(|r| r.last_word() <= 0xf)
            }
            RegShape::Range => {
                let words: usize = regs.iter().map(|r| r.category.max(1) as usize).sum();
                let sequential =
                    regs.windows(2).all(|w| w[1].reg as u32 == w[0].reg as u32 + w[0].category.max(1) as u32);
                words <= 0xff && sequential && regs.last().map_or(true, |r| r.last_word() <= 0xffff)
            }
            RegShape::Closure => match regs.split_first() {
                Some((closure, args)) => {
                    let words: usize = args.iter().map(|r| r.category.max(1) as usize).sum();
                    closure.category == 1
                        && closure.reg <= 0xf
                        && words <= 4
                        && args.iter().all(|r| r.last_word() <= 0xf)
                }
                None => false,
            },
        }
    }

    fn literal_fits(shape: Option<LitShape>, literal: Option<i64>) -> bool {
        match (shape, literal) {
            (Some(shape), Some(value)) => lit_fits(shape, value),
            (None, None) => true,
            _ => false,
        }
    }

    fn offset_fits(shape: Option<(u32, bool)>, offset: Option<i64>) -> bool {
        match (shape, offset) {
            (Some((bits, allow_zero)), Some(off)) => fits_signed(off, bits) && (allow_zero || off != 0),
            (None, None) => true,
            _ => false,
        }
    }

    /// The capacity limit the instruction exceeds in this format, if the mismatch is one.
    ///
    /// Shape mismatches (wrong operand count, a non-contiguous range) are not capacity
    /// problems and give `None`.
    pub fn diagnose(&self, insn: &Instruction) -> Option<OverflowLimit> {
        let layout = self.layout();
        let regs = &insn.registers;
        match layout.regs {
            RegShape::Fixed(widths) if regs.len() == widths.len() => {
                if let Some((r, _)) = regs.iter().zip(widths).find(|(r, bits)| !fits_unsigned(r.reg as u32, **bits)) {
                    return Some(OverflowLimit::Register { register: r.reg as u32 });
                }
            }
            RegShape::TwoAddr => {
                if let Some((a, b)) = two_addr(regs) {
                    if let Some(r) = [a, b].into_iter().find(|r| r.reg > 0xf) {
                        return Some(OverflowLimit::Register { register: r.reg as u32 });
                    }
                }
            }
            RegShape::List | RegShape::Closure => {
                let words = insn.register_words();
                if words > 5 {
                    let first = regs.first().map_or(0, |r| r.reg);
                    return Some(OverflowLimit::RegisterRange { first, words });
                }
                if let Some(r) = regs.iter().find(|r| r.last_word() > 0xf) {
                    return Some(OverflowLimit::Register { register: r.last_word() });
                }
            }
            RegShape::Range => {
                let words = insn.register_words();
                let first = regs.first().map_or(0, |r| r.reg);
                if insn.is_sequential() && (words > 0xff || regs.last().is_some_and(|r| r.last_word() > 0xffff)) {
                    return Some(OverflowLimit::RegisterRange { first, words });
                }
            }
            RegShape::Fixed(_) => {}
        }
        if let Some(i) =
            insn.constants.iter().filter_map(|c| c.resolved()).find(|i| !fits_unsigned(*i, layout.index_bits))
        {
            if insn.constants.len() == layout.indices {
                return Some(OverflowLimit::PoolIndex { index: i });
            }
        }
        if let (Some(shape), Some(value)) = (layout.literal, insn.literal) {
            if !lit_fits(shape, value) {
                return Some(OverflowLimit::Literal { value });
            }
        }
        if let (Some(_), Some(off)) = (layout.offset, insn.branch_offset) {
            if !Self::offset_fits(layout.offset, Some(off)) {
                return Some(OverflowLimit::BranchOffset { offset: off });
            }
        }
        None
    }

    /// Appends the encoded instruction. The instruction must be compatible.
    pub fn write_to(&self, opcode: u8, insn: &Instruction, out: &mut Vec<u16>) -> Result<(), DexError> {
        if !self.is_compatible(insn) {
            fail!("{:?} cannot encode {}", self, insn.family);
        }
        let regs = &insn.registers;
        let reg = |i: usize| regs[i].reg;
        let lit = insn.literal.unwrap_or(0);
        let off = insn.branch_offset.unwrap_or(0);
        let idx = |i: usize| insn.constants[i].index();

        match self {
            Format::Format10x => out.push(unit(opcode, 0)),
            Format::Format10t => out.push(unit(opcode, off as i8 as u8)),
            Format::Format20t => out.extend([unit(opcode, 0), off as i16 as u16]),
            Format::Format30t => {
                let v = off as i32 as u32;
                out.extend([unit(opcode, 0), v as u16, (v >> 16) as u16]);
            }
            Format::Format11n => out.push(unit(opcode, nibbles(reg(0) as u32, lit as u32))),
            Format::Format11x => out.push(unit(opcode, reg(0) as u8)),
            Format::Format12x => {
                let (a, b) = two_addr(regs).ok_or_else(|| DexError::new("bad 12x operands"))?;
                out.push(unit(opcode, nibbles(a.reg as u32, b.reg as u32)));
            }
            Format::Format21c => out.extend([unit(opcode, reg(0) as u8), idx(0)? as u16]),
            Format::Format21ih => out.extend([unit(opcode, reg(0) as u8), (lit >> 16) as u16]),
            Format::Format21lh => out.extend([unit(opcode, reg(0) as u8), (lit >> 48) as u16]),
            Format::Format21s => out.extend([unit(opcode, reg(0) as u8), lit as u16]),
            Format::Format21t => out.extend([unit(opcode, reg(0) as u8), off as u16]),
            Format::Format22b => out.extend([unit(opcode, reg(0) as u8), unit(reg(1) as u8, lit as u8)]),
            Format::Format22c => {
                out.extend([unit(opcode, nibbles(reg(0) as u32, reg(1) as u32)), idx(0)? as u16]);
            }
            Format::Format22s => out.extend([unit(opcode, nibbles(reg(0) as u32, reg(1) as u32)), lit as u16]),
            Format::Format22t => out.extend([unit(opcode, nibbles(reg(0) as u32, reg(1) as u32)), off as u16]),
            Format::Format22x => out.extend([unit(opcode, reg(0) as u8), reg(1)]),
            Format::Format23x => out.extend([unit(opcode, reg(0) as u8), unit(reg(1) as u8, reg(2) as u8)]),
            Format::Format25x => {
                let args: Vec<u32> = regs[1..]
                    .iter()
                    .flat_map(|r| (0..r.category.max(1) as u32).map(move |i| r.reg as u32 + i))
                    .collect();
                let mut packed = 0u16;
                for (i, r) in args.iter().enumerate() {
                    packed |= ((*r & 0xf) as u16) << (4 * i);
                }
                out.extend([unit(opcode, nibbles(reg(0) as u32, args.len() as u32)), packed]);
            }
            Format::Format31c => {
                let v = idx(0)?;
                out.extend([unit(opcode, reg(0) as u8), v as u16, (v >> 16) as u16]);
            }
            Format::Format31i | Format::Format31t => {
                let v = if *self == Format::Format31i { lit as i32 as u32 } else { off as i32 as u32 };
                out.extend([unit(opcode, reg(0) as u8), v as u16, (v >> 16) as u16]);
            }
            Format::Format32x => out.extend([unit(opcode, 0), reg(0), reg(1)]),
            Format::Format35c | Format::Format45cc => {
                let words = insn.word_registers();
                let word = |i: usize| words.get(i).copied().unwrap_or(0);
                out.push(unit(opcode, nibbles(word(4), words.len() as u32)));
                out.push(idx(0)? as u16);
                out.push(unit(nibbles(word(0), word(1)), nibbles(word(2), word(3))));
                if *self == Format::Format45cc {
                    out.push(idx(1)? as u16);
                }
            }
            Format::Format3rc | Format::Format4rcc => {
                let first = regs.first().map_or(0, |r| r.reg);
                out.extend([unit(opcode, insn.register_words() as u8), idx(0)? as u16, first]);
                if *self == Format::Format4rcc {
                    out.push(idx(1)? as u16);
                }
            }
            Format::Format51l => {
                out.push(unit(opcode, reg(0) as u8));
                for i in 0..4 {
                    out.push((lit >> (16 * i)) as u16);
                }
            }
        }
        Ok(())
    }

    /// Reads the operands of one instruction starting at `units[0]`.
    pub fn decode(&self, units: &[u16]) -> Result<Decoded, DexError> {
        let size = self.code_size() as usize;
        if units.len() < size {
            return Err(DexError::malformed(&format!(
                "{:?} needs {} code units, {} left",
                self,
                size,
                units.len()
            )));
        }
        let inst = units[0];
        let mut d = Decoded::default();
        match self {
            Format::Format10x => {}
            Format::Format10t => d.offset = Some(a8(inst) as u8 as i8 as i32),
            Format::Format20t => d.offset = Some(units[1] as i16 as i32),
            Format::Format30t => d.offset = Some(u32_at(units, 1) as i32),
            Format::Format11n => {
                d.registers.push(a4(inst));
                d.literal = Some(s4(b4(inst)));
            }
            Format::Format11x => d.registers.push(a8(inst)),
            Format::Format12x => d.registers.extend([a4(inst), b4(inst)]),
            Format::Format21c => {
                d.registers.push(a8(inst));
                d.indices.push(units[1] as u32);
            }
            Format::Format21ih => {
                d.registers.push(a8(inst));
                d.literal = Some(((units[1] as i16 as i32) << 16) as i64);
            }
            Format::Format21lh => {
                d.registers.push(a8(inst));
                d.literal = Some((units[1] as i16 as i64) << 48);
            }
            Format::Format21s => {
                d.registers.push(a8(inst));
                d.literal = Some(units[1] as i16 as i64);
            }
            Format::Format21t => {
                d.registers.push(a8(inst));
                d.offset = Some(units[1] as i16 as i32);
            }
            Format::Format22b => {
                d.registers.extend([a8(inst), units[1] & 0xff]);
                d.literal = Some((units[1] >> 8) as u8 as i8 as i64);
            }
            Format::Format22c => {
                d.registers.extend([a4(inst), b4(inst)]);
                d.indices.push(units[1] as u32);
            }
            Format::Format22s => {
                d.registers.extend([a4(inst), b4(inst)]);
                d.literal = Some(units[1] as i16 as i64);
            }
            Format::Format22t => {
                d.registers.extend([a4(inst), b4(inst)]);
                d.offset = Some(units[1] as i16 as i32);
            }
            Format::Format22x => d.registers.extend([a8(inst), units[1]]),
            Format::Format23x => d.registers.extend([a8(inst), units[1] & 0xff, units[1] >> 8]),
            Format::Format25x => {
                d.registers.push(a4(inst));
                let count = b4(inst);
                if count > 4 {
                    return Err(DexError::malformed(&format!("25x argument count {} exceeds 4", count)));
                }
                d.registers.extend((0..count).map(|i| (units[1] >> (4 * i)) & 0xf));
            }
            Format::Format31c => {
                d.registers.push(a8(inst));
                d.indices.push(u32_at(units, 1));
            }
            Format::Format31i => {
                d.registers.push(a8(inst));
                d.literal = Some(u32_at(units, 1) as i32 as i64);
            }
            Format::Format31t => {
                d.registers.push(a8(inst));
                d.offset = Some(u32_at(units, 1) as i32);
            }
            Format::Format32x => d.registers.extend([units[1], units[2]]),
            Format::Format35c | Format::Format45cc => {
                let count = b4(inst);
                if count > 5 {
                    return Err(DexError::malformed(&format!("{:?} register count {} exceeds 5", self, count)));
                }
                let all = [units[2] & 0xf, (units[2] >> 4) & 0xf, (units[2] >> 8) & 0xf, units[2] >> 12, a4(inst)];
                d.registers.extend(&all[..count as usize]);
                d.indices.push(units[1] as u32);
                if *self == Format::Format45cc {
                    d.indices.push(units[3] as u32);
                }
            }
            Format::Format3rc | Format::Format4rcc => {
                let count = a8(inst);
                let first = units[2];
                if first as u32 + count as u32 > 0x10000 {
                    return Err(DexError::malformed(&format!("register range v{} + {} overflows", first, count)));
                }
                d.registers.extend((0..count).map(|i| first + i));
                d.indices.push(units[1] as u32);
                if *self == Format::Format4rcc {
                    d.indices.push(units[3] as u32);
                }
            }
            Format::Format51l => {
                d.registers.push(a8(inst));
                let v = (0..4).fold(0u64, |acc, i| acc | (units[1 + i] as u64) << (16 * i));
                d.literal = Some(v as i64);
            }
        }
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::families::{BinaryOperation, InvokeKind, OpFamily, RegCategory, TestType};
    use crate::dex::insn::Constant;

    fn method() -> Constant {
        Constant::Method { class: "Lfoo;".into(), name: "bar".into(), proto: "()V".into() }
    }

    fn resolved(mut insn: Instruction, indices: &[u32]) -> Instruction {
        for (c, i) in insn.constants.iter_mut().zip(indices) {
            c.set_index(*i).expect("index");
        }
        insn
    }

    #[test]
    fn move_widths() {
        let small = Instruction::new(OpFamily::Move(RegCategory::Single))
            .with_regs([RegOperand::single(1), RegOperand::single(15)]);
        let from16 = Instruction::new(OpFamily::Move(RegCategory::Single))
            .with_regs([RegOperand::single(200), RegOperand::single(300)]);
        let big = Instruction::new(OpFamily::Move(RegCategory::Single))
            .with_regs([RegOperand::single(300), RegOperand::single(2)]);
        assert!(Format::Format12x.is_compatible(&small));
        assert!(!Format::Format12x.is_compatible(&from16));
        assert!(Format::Format22x.is_compatible(&from16));
        assert!(!Format::Format22x.is_compatible(&big));
        assert!(Format::Format32x.is_compatible(&big));
    }

    #[test]
    fn two_address_form() {
        let add = Instruction::new(OpFamily::Binary(BinaryOperation::AddInt))
            .with_regs([RegOperand::single(3), RegOperand::single(3), RegOperand::single(4)]);
        let mut out = vec![];
        Format::Format12x.write_to(0xb0, &add, &mut out).expect("write");
        assert_eq!(out, vec![0x43b0]);

        let three = Instruction::new(OpFamily::Binary(BinaryOperation::AddInt))
            .with_regs([RegOperand::single(3), RegOperand::single(2), RegOperand::single(4)]);
        assert!(!Format::Format12x.is_compatible(&three));
        assert!(Format::Format23x.is_compatible(&three));
    }

    #[test]
    fn wide_operand_needs_nibble_headroom() {
        let at14 = resolved(
            Instruction::new(OpFamily::Invoke(InvokeKind::Static)).with_reg(RegOperand::wide(14)).with_constant(method()),
            &[1],
        );
        let at15 = resolved(
            Instruction::new(OpFamily::Invoke(InvokeKind::Static)).with_reg(RegOperand::wide(15)).with_constant(method()),
            &[1],
        );
        assert!(Format::Format35c.is_compatible(&at14));
        assert!(!Format::Format35c.is_compatible(&at15));
        assert!(Format::Format3rc.is_compatible(&at15));
    }

    #[test]
    fn list_encoding_layout() {
        let insn = resolved(
            Instruction::new(OpFamily::Invoke(InvokeKind::Virtual))
                .with_regs([1, 2, 3, 4, 5].map(RegOperand::single))
                .with_constant(method()),
            &[0x1234],
        );
        let mut out = vec![];
        Format::Format35c.write_to(0x6e, &insn, &mut out).expect("write");
        assert_eq!(out, vec![0x556e, 0x1234, 0x4321]);
        let d = Format::Format35c.decode(&out).expect("decode");
        assert_eq!(d.registers, vec![1, 2, 3, 4, 5]);
        assert_eq!(d.indices, vec![0x1234]);
    }

    #[test]
    fn polymorphic_index_overflow_is_diagnosed() {
        let insn = resolved(
            Instruction::new(OpFamily::InvokePolymorphic)
                .with_regs([RegOperand::single(0), RegOperand::single(1)])
                .with_constant(method())
                .with_constant(Constant::Proto("(I)V".into())),
            &[0x1234, 0x10000],
        );
        assert!(!Format::Format45cc.is_compatible(&insn));
        assert!(!Format::Format4rcc.is_compatible(&insn));
        assert_eq!(Format::Format4rcc.diagnose(&insn), Some(OverflowLimit::PoolIndex { index: 0x10000 }));
    }

    #[test]
    fn constant_shapes() {
        let c = |v: i64| Instruction::new(OpFamily::Const).with_reg(RegOperand::single(0)).with_literal(v);
        assert!(Format::Format11n.is_compatible(&c(-8)));
        assert!(!Format::Format11n.is_compatible(&c(8)));
        assert!(Format::Format21ih.is_compatible(&c(0x7fff_0000)));
        assert!(!Format::Format21ih.is_compatible(&c(0x7fff_0001)));
        assert!(Format::Format31i.is_compatible(&c(i32::MIN as i64)));

        let w = |v: i64| Instruction::new(OpFamily::ConstWide).with_reg(RegOperand::wide(0)).with_literal(v);
        assert!(Format::Format21lh.is_compatible(&w(0x4000_0000_0000_0000)));
        assert!(!Format::Format31i.is_compatible(&w(1 << 40)));
        let mut out = vec![];
        Format::Format51l.write_to(0x18, &w(0x0123_4567_89ab_cdef), &mut out).expect("write");
        assert_eq!(out, vec![0x0018, 0xcdef, 0x89ab, 0x4567, 0x0123]);
        assert_eq!(Format::Format51l.decode(&out).expect("decode").literal, Some(0x0123_4567_89ab_cdef));
    }

    #[test]
    fn zero_offsets() {
        let goto = |off: i64| Instruction::new(OpFamily::Goto).with_offset(off);
        assert!(!Format::Format10t.is_compatible(&goto(0)));
        assert!(!Format::Format20t.is_compatible(&goto(0)));
        assert!(Format::Format30t.is_compatible(&goto(0)));
        let ifz = Instruction::new(OpFamily::IfZ(TestType::NotEqual)).with_regs([RegOperand::single(0)]);
        assert!(!Format::Format21t.is_compatible(&ifz.clone().with_offset(0)));
        assert!(Format::Format21t.is_compatible(&ifz.with_offset(-1)));
        let cmp = Instruction::new(OpFamily::If(TestType::Equal)).with_regs([RegOperand::single(0), RegOperand::single(1)]);
        assert!(!Format::Format22t.is_compatible(&cmp.with_offset(0)));
        assert!(Format::Format10t.is_compatible(&goto(-128)));
        assert!(!Format::Format10t.is_compatible(&goto(128)));
        assert_eq!(Format::Format20t.diagnose(&goto(40000)), Some(OverflowLimit::BranchOffset { offset: 40000 }));
    }

    #[test]
    fn closure_invoke() {
        let insn = Instruction::new(OpFamily::InvokeLambda)
            .with_regs([RegOperand::single(7), RegOperand::single(1), RegOperand::wide(2)]);
        let mut out = vec![];
        Format::Format25x.write_to(0xf3, &insn, &mut out).expect("write");
        assert_eq!(out, vec![0x37f3, 0x0321]);
        let d = Format::Format25x.decode(&out).expect("decode");
        assert_eq!(d.registers, vec![7, 1, 2, 3]);

        let too_many = Instruction::new(OpFamily::InvokeLambda).with_regs([0, 1, 2, 3, 4, 5].map(RegOperand::single));
        assert!(!Format::Format25x.is_compatible(&too_many));
    }

    #[test]
    fn truncated_units_are_malformed() {
        let e = Format::Format35c.decode(&[0x106e, 0x0001]).unwrap_err();
        assert!(!e.is_internal());
        assert!(!e.is_capacity_overflow());
    }
}
