use std::collections::BTreeMap;

use crate::dex::error::DexError;
use crate::ir::{BlockId, ControlFlowGraph, Def, DexType, SsaVar, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefSite {
    Param(usize),
    Statement { block: BlockId, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UseSite {
    Statement { block: BlockId, index: usize },
    PhiOperand { block: BlockId, index: usize, operand: usize },
}

impl UseSite {
    pub fn block(&self) -> BlockId {
        match self {
            UseSite::Statement { block, .. } | UseSite::PhiOperand { block, .. } => *block,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            UseSite::Statement { index, .. } | UseSite::PhiOperand { index, .. } => *index,
        }
    }
}

/// Definition and use lists for every SSA variable of a graph.
///
/// This is a snapshot; rebuild it after rewriting the graph.
#[derive(Debug, Clone, Default)]
pub struct SsaDefs {
    defs: BTreeMap<SsaVar, (DefSite, Def)>,
    uses: BTreeMap<SsaVar, Vec<UseSite>>,
}

impl SsaDefs {
    pub fn build(cfg: &ControlFlowGraph) -> Result<SsaDefs, DexError> {
        let mut index = SsaDefs::default();
        for (i, p) in cfg.params.iter().enumerate() {
            index.add_def(DefSite::Param(i), p)?;
        }
        for block in cfg.blocks() {
            for (i, stmt) in block.statements.iter().enumerate() {
                if let Some(def) = stmt.result() {
                    index.add_def(DefSite::Statement { block: block.id, index: i }, def)?;
                }
                match stmt {
                    Statement::Phi(phi) => {
                        for (k, op) in phi.operands.iter().enumerate() {
                            if !op.value.is_unreachable() {
                                let site = UseSite::PhiOperand { block: block.id, index: i, operand: k };
                                index.uses.entry(op.value).or_default().push(site);
                            }
                        }
                    }
                    other => {
                        for v in other.sources() {
                            if v.is_unreachable() {
                                fail!("statement {} of block {} reads unassigned register v{}", i, block.id, v.reg);
                            }
                            index.uses.entry(v).or_default().push(UseSite::Statement { block: block.id, index: i });
                        }
                    }
                }
            }
        }
        if let Some(v) = index.uses.keys().find(|v| !index.defs.contains_key(v)) {
            fail!("{} is used but never defined", v);
        }
        Ok(index)
    }

    fn add_def(&mut self, site: DefSite, def: &Def) -> Result<(), DexError> {
        if def.var.is_unreachable() {
            fail!("definition of v{} uses the unassigned version", def.var.reg);
        }
        if self.defs.insert(def.var, (site, def.clone())).is_some() {
            fail!("{} is defined twice", def.var);
        }
        Ok(())
    }

    pub fn def(&self, var: SsaVar) -> Option<&Def> {
        self.defs.get(&var).map(|(_, d)| d)
    }

    pub fn site(&self, var: SsaVar) -> Option<DefSite> {
        self.defs.get(&var).map(|(s, _)| *s)
    }

    pub fn uses(&self, var: SsaVar) -> &[UseSite] {
        self.uses.get(&var).map(|u| u.as_slice()).unwrap_or(&[])
    }

    pub fn ty(&self, var: SsaVar) -> Result<&DexType, DexError> {
        match self.def(var) {
            Some(d) => Ok(&d.ty),
            None => fail!("no definition for {}", var),
        }
    }

    pub fn vars(&self) -> impl Iterator<Item = &SsaVar> {
        self.defs.keys()
    }
}
