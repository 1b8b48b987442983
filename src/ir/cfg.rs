use std::collections::VecDeque;

use log::trace;

use crate::dex::error::DexError;
use crate::ir::stmt::{Def, Statement};

pub type BlockId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Normal,
    /// Edge into an exception handler, taken from any throwing statement of the source block.
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub block: BlockId,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub statements: Vec<Statement>,
    pub successors: Vec<Edge>,
    pub predecessors: Vec<Edge>,
    /// Successor reached when the last statement does not branch.
    pub fallthrough: Option<BlockId>,
}

impl BasicBlock {
    fn new(id: BlockId) -> Self {
        BasicBlock { id, statements: Vec::new(), successors: Vec::new(), predecessors: Vec::new(), fallthrough: None }
    }

    /// Kind of the edge from `pred` into this block.
    pub fn edge_from(&self, pred: BlockId) -> Option<EdgeKind> {
        self.predecessors.iter().find(|e| e.block == pred).map(|e| e.kind)
    }
}

/// Method control-flow graph. Block 0 is the entry sentinel and block 1 the exit
/// sentinel; neither holds statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    /// Parameter definitions, live on entry.
    pub params: Vec<Def>,
}

pub const ENTRY: BlockId = 0;
pub const EXIT: BlockId = 1;

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        ControlFlowGraph { blocks: vec![BasicBlock::new(ENTRY), BasicBlock::new(EXIT)], params: Vec::new() }
    }

    pub fn entry(&self) -> BlockId {
        ENTRY
    }

    pub fn exit(&self) -> BlockId {
        EXIT
    }

    /// One past the largest block id.
    pub fn max_id(&self) -> usize {
        self.blocks.len()
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock::new(id));
        id
    }

    pub fn add_param(&mut self, def: Def) {
        self.params.push(def);
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        let edge = Edge { block: to, kind };
        if self.blocks[from].successors.contains(&edge) {
            return;
        }
        self.blocks[from].successors.push(edge);
        self.blocks[to].predecessors.push(Edge { block: from, kind });
    }

    /// Adds a normal edge and marks it as the fall-through path.
    pub fn set_fallthrough(&mut self, from: BlockId, to: BlockId) {
        self.add_edge(from, to, EdgeKind::Normal);
        self.blocks[from].fallthrough = Some(to);
    }

    pub fn push(&mut self, block: BlockId, stmt: Statement) {
        self.blocks[block].statements.push(stmt);
    }

    pub fn get(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id)
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    /// Blocks reachable from the entry, indexed by id.
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut queue = VecDeque::from([ENTRY]);
        seen[ENTRY] = true;
        while let Some(b) = queue.pop_front() {
            for e in &self.blocks[b].successors {
                if !seen[e.block] {
                    seen[e.block] = true;
                    queue.push_back(e.block);
                }
            }
        }
        seen
    }

    /// Emission order: the entry's successor first, then every other reachable block by id.
    pub fn layout(&self) -> Vec<BlockId> {
        let reachable = self.reachable();
        let first = self.blocks[ENTRY].fallthrough;
        let mut order: Vec<BlockId> = first.into_iter().collect();
        order.extend((0..self.blocks.len()).filter(|b| *b != ENTRY && *b != EXIT && reachable[*b] && Some(*b) != first));
        trace!("block layout {:?}", order);
        order
    }

    /// Checks the structural invariants every pass relies on.
    pub fn validate(&self) -> Result<(), DexError> {
        let n = self.blocks.len();
        if n < 2 {
            fail!("graph has no entry/exit sentinels");
        }
        if !self.blocks[ENTRY].predecessors.is_empty() {
            fail!("entry block has predecessors");
        }
        if !self.blocks[EXIT].successors.is_empty() {
            fail!("exit block has successors");
        }
        for sentinel in [ENTRY, EXIT] {
            if !self.blocks[sentinel].statements.is_empty() {
                fail!("sentinel block {} holds statements", sentinel);
            }
        }
        if self.blocks[ENTRY].fallthrough.is_none() {
            fail!("entry block has no successor");
        }
        for (id, block) in self.blocks.iter().enumerate() {
            if block.id != id {
                fail!("block {} stored at index {}", block.id, id);
            }
            for e in &block.successors {
                if e.block >= n {
                    fail!("block {} has edge to missing block {}", id, e.block);
                }
                if !self.blocks[e.block].predecessors.contains(&Edge { block: id, kind: e.kind }) {
                    fail!("edge {} -> {} has no matching predecessor entry", id, e.block);
                }
            }
            for e in &block.predecessors {
                if e.block >= n || !self.blocks[e.block].successors.contains(&Edge { block: id, kind: e.kind }) {
                    fail!("block {} lists {} as predecessor without a matching edge", id, e.block);
                }
            }
            if let Some(f) = block.fallthrough {
                if !block.successors.contains(&Edge { block: f, kind: EdgeKind::Normal }) {
                    fail!("fall-through of block {} is not a normal successor", id);
                }
            }
            let mut past_phis = false;
            for stmt in &block.statements {
                match stmt {
                    Statement::Phi(phi) => {
                        if past_phis {
                            fail!("phi for {} is not at the start of block {}", phi.result.var, id);
                        }
                        for op in &phi.operands {
                            if block.edge_from(op.pred).is_none() {
                                fail!("phi for {} names {} which is not a predecessor of block {}", phi.result.var, op.pred, id);
                            }
                        }
                    }
                    Statement::Insn(insn) => {
                        past_phis = true;
                        if let Some(t) = insn.targets.iter().find(|t| !block.successors.contains(&Edge { block: **t, kind: EdgeKind::Normal })) {
                            fail!("branch in block {} targets {} without a normal edge", id, t);
                        }
                    }
                    _ => past_phis = true,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::stmt::{Phi, PhiOperand, SsaVar};
    use crate::ir::types::DexType;

    #[test]
    fn layout_starts_at_entry_successor_and_skips_dead_blocks() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_block();
        let b = cfg.add_block();
        let dead = cfg.add_block();
        cfg.set_fallthrough(ENTRY, b);
        cfg.set_fallthrough(b, a);
        cfg.add_edge(a, EXIT, EdgeKind::Normal);
        cfg.add_edge(dead, a, EdgeKind::Normal);
        assert_eq!(cfg.layout(), vec![b, a]);
        cfg.validate().expect("valid");
    }

    #[test]
    fn validate_rejects_misplaced_phi() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_block();
        cfg.set_fallthrough(ENTRY, a);
        cfg.push(a, Statement::Line(3));
        cfg.push(
            a,
            Statement::Phi(Phi {
                result: Def::new(SsaVar::new(0, 2), DexType::Int),
                operands: vec![PhiOperand { pred: ENTRY, value: SsaVar::new(0, 1) }],
            }),
        );
        let e = cfg.validate().unwrap_err();
        assert!(e.is_internal());
        assert!(e.to_string().contains("not at the start"));
    }

    #[test]
    fn validate_requires_entry_successor() {
        let cfg = ControlFlowGraph::new();
        assert!(cfg.validate().is_err());
    }
}
