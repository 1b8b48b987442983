//! Instruction operands prior to (and during) format selection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dex::error::DexError;
use crate::dex::families::OpFamily;
use crate::dex::opcodes::ReferenceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegOperand {
    pub reg: u16,
    /// 1 for single-word values, 2 for long/double pairs.
    pub category: u8,
}

impl RegOperand {
    pub fn new(reg: u16, category: u8) -> Self {
        RegOperand { reg, category }
    }

    pub fn single(reg: u16) -> Self {
        RegOperand::new(reg, 1)
    }

    pub fn wide(reg: u16) -> Self {
        RegOperand::new(reg, 2)
    }

    /// Highest register word this operand touches.
    pub fn last_word(&self) -> u32 {
        self.reg as u32 + self.category.max(1) as u32 - 1
    }
}

/// Index of a constant in its dex pool. Assigned exactly once after pool layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolIndex {
    #[default]
    Unresolved,
    Resolved(u32),
}

/// Symbolic constant referenced by an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Constant {
    String(String),
    /// Type descriptor.
    Type(String),
    Field { class: String, name: String, descriptor: String },
    Method { class: String, name: String, proto: String },
    /// Method prototype descriptor such as `(IJ)V`.
    Proto(String),
    CallSite(String),
    MethodHandle(String),
}

impl Constant {
    pub fn reference_type(&self) -> ReferenceType {
        match self {
            Constant::String(_) => ReferenceType::String,
            Constant::Type(_) => ReferenceType::Type,
            Constant::Field { .. } => ReferenceType::Field,
            Constant::Method { .. } => ReferenceType::Method,
            Constant::Proto(_) => ReferenceType::MethodProto,
            Constant::CallSite(_) => ReferenceType::CallSite,
            Constant::MethodHandle(_) => ReferenceType::MethodHandle,
        }
    }

    /// Prefix used when printing a resolved index, e.g. `string@12`.
    pub fn pool_name(&self) -> &'static str {
        match self {
            Constant::String(_) => "string",
            Constant::Type(_) => "type",
            Constant::Field { .. } => "field",
            Constant::Method { .. } => "method",
            Constant::Proto(_) => "proto",
            Constant::CallSite(_) => "call_site",
            Constant::MethodHandle(_) => "method_handle",
        }
    }
}

pub(crate) fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::String(s) => write!(f, "\"{}\"", escape_string(s)),
            Constant::Type(t) => write!(f, "{}", t),
            Constant::Field { class, name, descriptor } => write!(f, "{}->{}:{}", class, name, descriptor),
            Constant::Method { class, name, proto } => write!(f, "{}->{}{}", class, name, proto),
            Constant::Proto(p) => write!(f, "{}", p),
            Constant::CallSite(name) => write!(f, "call_site@{}", name),
            Constant::MethodHandle(name) => write!(f, "method_handle@{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CstOperand {
    constant: Constant,
    index: PoolIndex,
}

impl CstOperand {
    pub fn new(constant: Constant) -> Self {
        CstOperand { constant, index: PoolIndex::Unresolved }
    }

    pub fn constant(&self) -> &Constant {
        &self.constant
    }

    pub fn resolved(&self) -> Option<u32> {
        match self.index {
            PoolIndex::Resolved(i) => Some(i),
            PoolIndex::Unresolved => None,
        }
    }

    /// Reading an index before assignment is a pass-ordering bug.
    pub fn index(&self) -> Result<u32, DexError> {
        match self.index {
            PoolIndex::Resolved(i) => Ok(i),
            PoolIndex::Unresolved => fail!("index of {} read before assignment", self.constant),
        }
    }

    pub fn set_index(&mut self, index: u32) -> Result<(), DexError> {
        if let PoolIndex::Resolved(old) = self.index {
            fail!("index of {} already assigned ({} then {})", self.constant, old, index);
        }
        self.index = PoolIndex::Resolved(index);
        Ok(())
    }
}

/// One instruction with logical operands. The concrete opcode is picked later.
///
/// Registers are in Dalvik operand order: the written register first (when there is
/// one), then sources. Two-address arithmetic is written with three registers, the
/// first two equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub family: OpFamily,
    pub registers: Vec<RegOperand>,
    pub constants: Vec<CstOperand>,
    pub literal: Option<i64>,
    /// Code-unit offset to the target, relative to this instruction's address.
    pub branch_offset: Option<i64>,
}

impl Instruction {
    pub fn new(family: OpFamily) -> Self {
        Instruction { family, registers: Vec::new(), constants: Vec::new(), literal: None, branch_offset: None }
    }

    pub fn with_reg(mut self, reg: RegOperand) -> Self {
        self.registers.push(reg);
        self
    }

    pub fn with_regs(mut self, regs: impl IntoIterator<Item = RegOperand>) -> Self {
        self.registers.extend(regs);
        self
    }

    pub fn with_constant(mut self, constant: Constant) -> Self {
        self.constants.push(CstOperand::new(constant));
        self
    }

    pub fn with_literal(mut self, literal: i64) -> Self {
        self.literal = Some(literal);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.branch_offset = Some(offset);
        self
    }

    /// Total register words used by a register list.
    pub fn register_words(&self) -> usize {
        self.registers.iter().map(|r| r.category.max(1) as usize).sum()
    }

    /// Register list expanded to single words; a wide operand contributes both halves.
    pub fn word_registers(&self) -> Vec<u32> {
        self.registers
            .iter()
            .flat_map(|r| (0..r.category.max(1) as u32).map(move |i| r.reg as u32 + i))
            .collect()
    }

    /// True when each operand starts where the previous one ends.
    pub fn is_sequential(&self) -> bool {
        self.registers.windows(2).all(|w| w[1].reg as u32 == w[0].reg as u32 + w[0].category.max(1) as u32)
    }

    pub fn require_indices(&self) -> Result<(), DexError> {
        for c in &self.constants {
            c.index()?;
        }
        Ok(())
    }

    /// Highest register word referenced plus one.
    pub fn registers_used(&self) -> u32 {
        self.registers.iter().map(|r| r.last_word() + 1).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::families::InvokeKind;

    #[test]
    fn pool_index_is_assign_once() {
        let mut c = CstOperand::new(Constant::String("hi".into()));
        assert!(c.index().unwrap_err().is_internal());
        c.set_index(7).expect("first assignment");
        assert_eq!(c.index().expect("resolved"), 7);
        assert!(c.set_index(8).is_err());
        assert_eq!(c.resolved(), Some(7));
    }

    #[test]
    fn word_expansion_and_sequence() {
        let insn = Instruction::new(OpFamily::Invoke(InvokeKind::Static))
            .with_regs([RegOperand::single(4), RegOperand::wide(5), RegOperand::single(7)]);
        assert_eq!(insn.word_registers(), vec![4, 5, 6, 7]);
        assert_eq!(insn.register_words(), 4);
        assert!(insn.is_sequential());
        assert_eq!(insn.registers_used(), 8);

        let gap = Instruction::new(OpFamily::Invoke(InvokeKind::Static))
            .with_regs([RegOperand::wide(4), RegOperand::single(5)]);
        assert!(!gap.is_sequential());
    }

    #[test]
    fn constant_display() {
        let m = Constant::Method { class: "Lfoo;".into(), name: "bar".into(), proto: "(I)V".into() };
        assert_eq!(m.to_string(), "Lfoo;->bar(I)V");
        assert_eq!(Constant::String("a\"b\n".into()).to_string(), "\"a\\\"b\\n\"");
    }
}
