use std::collections::{BTreeMap, BTreeSet};

use crate::dataflow::DataflowAnalysis;
use crate::ir::{Def, SsaVar, Statement};

/// Stands in for the low half of a wide value whose high half was overwritten.
const TORN: u32 = u32::MAX;

/// Register to the set of SSA versions that may be in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReachingState {
    regs: BTreeMap<u16, BTreeSet<u32>>,
    /// Registers that may hold the low half of a wide value.
    wide: BTreeSet<u16>,
}

impl ReachingState {
    pub fn versions(&self, reg: u16) -> Option<&BTreeSet<u32>> {
        self.regs.get(&reg)
    }

    /// True when exactly `var` can be in its register here.
    pub fn holds_only(&self, var: SsaVar) -> bool {
        self.regs.get(&var.reg).is_some_and(|v| v.len() == 1 && v.contains(&var.version))
    }

    /// True when nothing has been written to `reg` since it was last clobbered.
    pub fn is_clear(&self, reg: u16) -> bool {
        self.regs.get(&reg).map_or(true, |v| v.is_empty())
    }

    fn define(&mut self, def: &Def) {
        let reg = def.var.reg;
        // Writing the high half of a wide value leaves nothing usable below it.
        if reg > 0 && self.wide.remove(&(reg - 1)) {
            self.regs.insert(reg - 1, BTreeSet::from([TORN]));
        }
        // A wide value also clobbers the register holding its high half.
        if def.ty.category() == 2 {
            let high = reg.wrapping_add(1);
            self.regs.remove(&high);
            self.wide.remove(&high);
            self.wide.insert(reg);
        } else {
            self.wide.remove(&reg);
        }
        self.regs.insert(reg, BTreeSet::from([def.var.version]));
    }

    fn join(&mut self, other: &ReachingState) {
        for (reg, versions) in &other.regs {
            self.regs.entry(*reg).or_default().extend(versions.iter().copied());
        }
        self.wide.extend(other.wide.iter().copied());
    }
}

/// Which SSA versions of each register may reach each point.
pub struct ReachingDefinitions {
    params: Vec<Def>,
}

impl ReachingDefinitions {
    pub fn new(params: &[Def]) -> Self {
        ReachingDefinitions { params: params.to_vec() }
    }
}

impl DataflowAnalysis for ReachingDefinitions {
    type State = ReachingState;

    fn new_state(&self, is_entry: bool) -> ReachingState {
        let mut state = ReachingState::default();
        if is_entry {
            for p in &self.params {
                state.define(p);
            }
        }
        state
    }

    fn merge_state(&self, dest: &mut ReachingState, src: &ReachingState) {
        dest.join(src);
    }

    fn process_statement(&self, state: &mut ReachingState, stmt: &Statement) {
        if let Some(def) = stmt.result() {
            state.define(def);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::solve;
    use crate::ir::{ControlFlowGraph, DexType, EdgeKind, Move, ENTRY, EXIT};

    fn mv(dst: SsaVar, src: SsaVar, ty: DexType) -> Statement {
        Statement::Move(Move { result: Def::new(dst, ty), source: src })
    }

    #[test]
    fn diamond_joins_versions() {
        let mut cfg = ControlFlowGraph::new();
        cfg.add_param(Def::new(SsaVar::new(1, 1), DexType::Int));
        let top = cfg.add_block();
        let left = cfg.add_block();
        let right = cfg.add_block();
        let join = cfg.add_block();
        cfg.set_fallthrough(ENTRY, top);
        cfg.set_fallthrough(top, left);
        cfg.add_edge(top, right, EdgeKind::Normal);
        cfg.push(left, mv(SsaVar::new(0, 2), SsaVar::new(1, 1), DexType::Int));
        cfg.set_fallthrough(left, join);
        cfg.push(right, mv(SsaVar::new(0, 3), SsaVar::new(1, 1), DexType::Int));
        cfg.set_fallthrough(right, join);
        cfg.add_edge(join, EXIT, EdgeKind::Normal);

        let mut analysis = ReachingDefinitions::new(&cfg.params);
        let states = solve(&cfg, &mut analysis).expect("solve");
        assert_eq!(states.input[join].versions(0), Some(&BTreeSet::from([2, 3])));
        assert!(states.input[join].holds_only(SsaVar::new(1, 1)));
        assert!(!states.input[join].holds_only(SsaVar::new(0, 2)));
    }

    #[test]
    fn wide_definition_clobbers_high_half() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_block();
        cfg.set_fallthrough(ENTRY, a);
        cfg.push(a, mv(SsaVar::new(3, 1), SsaVar::new(9, 1), DexType::Int));
        cfg.push(a, mv(SsaVar::new(2, 1), SsaVar::new(7, 1), DexType::Long));
        cfg.add_edge(a, EXIT, EdgeKind::Normal);

        let mut analysis = ReachingDefinitions::new(&[]);
        let states = solve(&cfg, &mut analysis).expect("solve");
        assert!(states.output[a].is_clear(3));
        assert!(states.output[a].holds_only(SsaVar::new(2, 1)));
    }

    #[test]
    fn narrow_write_over_high_half_tears_the_wide_value() {
        let mut cfg = ControlFlowGraph::new();
        cfg.add_param(Def::new(SsaVar::new(2, 1), DexType::Long));
        let a = cfg.add_block();
        cfg.set_fallthrough(ENTRY, a);
        cfg.push(a, mv(SsaVar::new(0, 1), SsaVar::new(2, 1), DexType::Long));
        cfg.push(a, mv(SsaVar::new(1, 1), SsaVar::new(5, 1), DexType::Int));
        cfg.add_edge(a, EXIT, EdgeKind::Normal);

        let mut analysis = ReachingDefinitions::new(&cfg.params);
        let states = solve(&cfg, &mut analysis).expect("solve");
        let out = &states.output[a];
        assert!(!out.holds_only(SsaVar::new(0, 1)));
        assert!(!out.is_clear(0));
        assert!(out.holds_only(SsaVar::new(1, 1)));
        assert!(out.holds_only(SsaVar::new(2, 1)));
    }
}
