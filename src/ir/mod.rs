//! SSA intermediate form handed to the backend.

pub mod cfg;
pub mod stmt;
pub mod types;

pub use cfg::{BasicBlock, BlockId, ControlFlowGraph, Edge, EdgeKind, ENTRY, EXIT};
pub use stmt::{Def, IrInsn, LocalInfo, Move, Payload, Phi, PhiOperand, SsaVar, Statement};
pub use types::DexType;

/// A method ready for lowering.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Used in diagnostics only.
    pub name: String,
    pub cfg: ControlFlowGraph,
    /// Debug names of the declared parameters, `None` for unnamed ones. Excludes `this`.
    pub parameter_names: Vec<Option<String>>,
}

impl MethodBody {
    pub fn new(name: &str, cfg: ControlFlowGraph) -> Self {
        MethodBody { name: name.to_string(), cfg, parameter_names: Vec::new() }
    }
}
