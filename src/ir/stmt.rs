use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dex::families::OpFamily;
use crate::dex::insn::Constant;
use crate::ir::cfg::BlockId;
use crate::ir::types::DexType;

/// A register/version pair. Version 0 marks a value that cannot reach its use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SsaVar {
    pub reg: u16,
    pub version: u32,
}

impl SsaVar {
    pub const fn new(reg: u16, version: u32) -> Self {
        SsaVar { reg, version }
    }

    pub const fn unreachable(reg: u16) -> Self {
        SsaVar { reg, version: 0 }
    }

    pub fn is_unreachable(&self) -> bool {
        self.version == 0
    }
}

impl fmt::Display for SsaVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}_{}", self.reg, self.version)
    }
}

/// Source-level variable a definition belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalInfo {
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    /// Introduced by the compiler rather than declared in source.
    pub synthetic: bool,
}

impl LocalInfo {
    pub fn new(name: &str, descriptor: &str) -> Self {
        LocalInfo { name: name.to_string(), descriptor: descriptor.to_string(), signature: None, synthetic: false }
    }

    pub fn synthetic(name: &str, descriptor: &str) -> Self {
        LocalInfo { synthetic: true, ..LocalInfo::new(name, descriptor) }
    }

    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = Some(signature.to_string());
        self
    }

    /// Identity used to decide whether two definitions name the same variable.
    pub fn same_variable(&self, other: &LocalInfo) -> bool {
        self.name == other.name && self.descriptor == other.descriptor && self.signature == other.signature
    }

    pub fn is_wide(&self) -> bool {
        self.descriptor == "J" || self.descriptor == "D"
    }
}

/// An SSA definition: the variable, its type and an optional debug local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Def {
    pub var: SsaVar,
    pub ty: DexType,
    pub local: Option<LocalInfo>,
}

impl Def {
    pub fn new(var: SsaVar, ty: DexType) -> Self {
        Def { var, ty, local: None }
    }

    pub fn with_local(mut self, local: LocalInfo) -> Self {
        self.local = Some(local);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiOperand {
    pub pred: BlockId,
    pub value: SsaVar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phi {
    pub result: Def,
    pub operands: Vec<PhiOperand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub result: Def,
    pub source: SsaVar,
}

/// Out-of-line data attached to switches and array fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Keys `first_key..first_key + targets.len()`.
    PackedSwitch { first_key: i32 },
    /// One key per target, ascending.
    SparseSwitch { keys: Vec<i32> },
    ArrayData { element_width: u16, elements: Vec<i64> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrInsn {
    pub op: OpFamily,
    pub result: Option<Def>,
    /// Read operands in Dalvik operand order.
    pub sources: Vec<SsaVar>,
    pub constants: Vec<Constant>,
    pub literal: Option<i64>,
    /// Branch targets: one for `goto`/`if`, one per case for switches.
    pub targets: Vec<BlockId>,
    pub payload: Option<Payload>,
}

impl IrInsn {
    pub fn new(op: OpFamily) -> Self {
        IrInsn {
            op,
            result: None,
            sources: Vec::new(),
            constants: Vec::new(),
            literal: None,
            targets: Vec::new(),
            payload: None,
        }
    }

    pub fn with_result(mut self, result: Def) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = SsaVar>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn with_constant(mut self, constant: Constant) -> Self {
        self.constants.push(constant);
        self
    }

    pub fn with_literal(mut self, literal: i64) -> Self {
        self.literal = Some(literal);
        self
    }

    pub fn with_target(mut self, target: BlockId) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_payload(mut self, payload: Payload, targets: Vec<BlockId>) -> Self {
        self.payload = Some(payload);
        self.targets = targets;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    Phi(Phi),
    Move(Move),
    Insn(IrInsn),
    /// Ends the debug local currently held in `reg`.
    LocalEnd { reg: u16 },
    /// Source line for the statements that follow.
    Line(u32),
}

impl Statement {
    pub fn result(&self) -> Option<&Def> {
        match self {
            Statement::Phi(phi) => Some(&phi.result),
            Statement::Move(mv) => Some(&mv.result),
            Statement::Insn(insn) => insn.result.as_ref(),
            Statement::LocalEnd { .. } | Statement::Line(_) => None,
        }
    }

    pub fn result_mut(&mut self) -> Option<&mut Def> {
        match self {
            Statement::Phi(phi) => Some(&mut phi.result),
            Statement::Move(mv) => Some(&mut mv.result),
            Statement::Insn(insn) => insn.result.as_mut(),
            Statement::LocalEnd { .. } | Statement::Line(_) => None,
        }
    }

    /// Every variable read, phi operands included.
    pub fn sources(&self) -> Vec<SsaVar> {
        match self {
            Statement::Phi(phi) => phi.operands.iter().map(|o| o.value).collect(),
            Statement::Move(mv) => vec![mv.source],
            Statement::Insn(insn) => insn.sources.clone(),
            Statement::LocalEnd { .. } | Statement::Line(_) => Vec::new(),
        }
    }

    /// Rewrites every read of `from` to `to`. Returns how many operands changed.
    pub fn replace_source(&mut self, from: SsaVar, to: SsaVar) -> usize {
        let slots: Vec<&mut SsaVar> = match self {
            Statement::Phi(phi) => phi.operands.iter_mut().map(|o| &mut o.value).collect(),
            Statement::Move(mv) => vec![&mut mv.source],
            Statement::Insn(insn) => insn.sources.iter_mut().collect(),
            Statement::LocalEnd { .. } | Statement::Line(_) => Vec::new(),
        };
        let mut n = 0;
        for slot in slots {
            if *slot == from {
                *slot = to;
                n += 1;
            }
        }
        n
    }

    pub fn can_throw(&self) -> bool {
        match self {
            Statement::Insn(insn) => insn.op.can_throw(),
            _ => false,
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Statement::Phi(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::families::{BinaryOperation, InvokeKind};

    #[test]
    fn replace_source_counts_rewrites() {
        let a = SsaVar::new(1, 1);
        let b = SsaVar::new(2, 1);
        let mut stmt = Statement::Insn(
            IrInsn::new(OpFamily::Binary(BinaryOperation::AddInt))
                .with_result(Def::new(SsaVar::new(3, 1), DexType::Int))
                .with_sources([a, a]),
        );
        assert_eq!(stmt.replace_source(a, b), 2);
        assert_eq!(stmt.sources(), vec![b, b]);
        assert!(!stmt.can_throw());
    }

    #[test]
    fn invoke_can_throw() {
        let stmt = Statement::Insn(IrInsn::new(OpFamily::Invoke(InvokeKind::Static)));
        assert!(stmt.can_throw());
        assert!(stmt.result().is_none());
    }

    #[test]
    fn local_identity_ignores_synthetic_flag() {
        let a = LocalInfo::new("i", "I");
        let b = LocalInfo::synthetic("i", "I");
        assert!(a.same_variable(&b));
        assert!(!a.same_variable(&LocalInfo::new("j", "I")));
    }
}
