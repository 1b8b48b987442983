//! Worklist dataflow solver over a method CFG.
//!
//! Every block carries three states. `output` is the state after the whole block.
//! `output_exception` is the state right after the last statement that can throw, and
//! it is what exception handlers see through an exception edge.

pub mod reaching;

use std::collections::VecDeque;

use log::{debug, trace};

use crate::dex::error::DexError;
use crate::ir::{BlockId, ControlFlowGraph, EdgeKind, Statement};

pub use reaching::{ReachingDefinitions, ReachingState};

pub trait DataflowAnalysis {
    type State: Clone + PartialEq;

    fn new_state(&self, is_entry: bool) -> Self::State;

    fn copy_state(&self, dest: &mut Self::State, src: &Self::State) {
        dest.clone_from(src);
    }

    fn clone_state(&self, src: &Self::State) -> Self::State {
        src.clone()
    }

    /// Joins `src` into `dest`. Must be monotone.
    fn merge_state(&self, dest: &mut Self::State, src: &Self::State);

    fn process_statement(&self, state: &mut Self::State, stmt: &Statement);

    /// Called once per block, in id order, after the fixpoint.
    fn finalize(&mut self, _block: BlockId, _input: &Self::State, _output: &Self::State, _output_exception: &Self::State) {}
}

/// Fixpoint states, indexed by block id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStates<S> {
    pub input: Vec<S>,
    pub output: Vec<S>,
    pub output_exception: Vec<S>,
}

impl<S> BlockStates<S> {
    /// State flowing along the edge `pred -> _` of the given kind.
    pub fn edge_state(&self, pred: BlockId, kind: EdgeKind) -> &S {
        match kind {
            EdgeKind::Normal => &self.output[pred],
            EdgeKind::Exception => &self.output_exception[pred],
        }
    }
}

/// Solves `analysis` over `cfg` from fresh states.
pub fn solve<A: DataflowAnalysis>(cfg: &ControlFlowGraph, analysis: &mut A) -> Result<BlockStates<A::State>, DexError> {
    cfg.validate()?;
    let n = cfg.max_id();
    let fresh = |analysis: &A| (0..n).map(|b| analysis.new_state(b == cfg.entry())).collect::<Vec<_>>();
    let states = BlockStates { input: fresh(analysis), output: fresh(analysis), output_exception: fresh(analysis) };
    run(cfg, analysis, states)
}

/// Solves `analysis` starting from previously computed states.
///
/// Starting from a fixpoint returns the same fixpoint.
pub fn resolve<A: DataflowAnalysis>(
    cfg: &ControlFlowGraph,
    analysis: &mut A,
    previous: BlockStates<A::State>,
) -> Result<BlockStates<A::State>, DexError> {
    cfg.validate()?;
    let n = cfg.max_id();
    if previous.input.len() != n || previous.output.len() != n || previous.output_exception.len() != n {
        fail!("state tables sized for {} blocks, graph has {}", previous.input.len(), n);
    }
    run(cfg, analysis, previous)
}

fn merge_predecessors<A: DataflowAnalysis>(
    cfg: &ControlFlowGraph,
    analysis: &A,
    states: &BlockStates<A::State>,
    b: BlockId,
) -> Option<A::State> {
    let mut merged: Option<A::State> = None;
    for pred in &cfg.block(b).predecessors {
        let src = states.edge_state(pred.block, pred.kind);
        match merged.as_mut() {
            None => merged = Some(analysis.clone_state(src)),
            Some(dest) => analysis.merge_state(dest, src),
        }
    }
    merged
}

fn run<A: DataflowAnalysis>(
    cfg: &ControlFlowGraph,
    analysis: &mut A,
    mut states: BlockStates<A::State>,
) -> Result<BlockStates<A::State>, DexError> {
    let n = cfg.max_id();
    let exit = cfg.exit();
    let mut queued = vec![false; n];
    let mut worklist: VecDeque<BlockId> = VecDeque::with_capacity(n);
    for b in 0..n {
        if b != exit {
            worklist.push_back(b);
            queued[b] = true;
        }
    }

    let mut iterations = 0usize;
    while let Some(b) = worklist.pop_front() {
        queued[b] = false;
        iterations += 1;

        // The entry, and blocks nothing flows into, keep their initial input.
        if let Some(merged) = merge_predecessors(cfg, analysis, &states, b) {
            analysis.copy_state(&mut states.input[b], &merged);
        }

        let mut running = analysis.clone_state(&states.input[b]);
        let mut at_throw = analysis.clone_state(&states.input[b]);
        for stmt in &cfg.block(b).statements {
            analysis.process_statement(&mut running, stmt);
            if stmt.can_throw() {
                analysis.copy_state(&mut at_throw, &running);
            }
        }

        let changed = running != states.output[b] || at_throw != states.output_exception[b];
        states.output[b] = running;
        states.output_exception[b] = at_throw;
        trace!("dataflow: block {} changed={}", b, changed);

        if changed {
            for succ in &cfg.block(b).successors {
                if succ.block != exit && !queued[succ.block] {
                    queued[succ.block] = true;
                    worklist.push_back(succ.block);
                }
            }
        }
    }

    // The exit sentinel is never queued; give it its state once.
    if let Some(merged) = merge_predecessors(cfg, analysis, &states, exit) {
        analysis.copy_state(&mut states.input[exit], &merged);
        analysis.copy_state(&mut states.output[exit], &merged);
        analysis.copy_state(&mut states.output_exception[exit], &merged);
    }
    debug!("dataflow fixpoint over {} blocks after {} iterations", n, iterations);

    for b in 0..n {
        analysis.finalize(b, &states.input[b], &states.output[b], &states.output_exception[b]);
    }
    Ok(states)
}

/// State immediately before statement `index` of `block`.
pub fn state_before<A: DataflowAnalysis>(
    cfg: &ControlFlowGraph,
    analysis: &A,
    states: &BlockStates<A::State>,
    block: BlockId,
    index: usize,
) -> A::State {
    let mut state = analysis.clone_state(&states.input[block]);
    for stmt in cfg.block(block).statements.iter().take(index) {
        analysis.process_statement(&mut state, stmt);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::families::{BinaryOperation, InvokeKind, OpFamily};
    use crate::ir::{Def, DexType, IrInsn, SsaVar, ENTRY, EXIT};

    /// Counts statements seen along every path; joins with max.
    struct Counter;

    impl DataflowAnalysis for Counter {
        type State = u32;

        fn new_state(&self, _is_entry: bool) -> u32 {
            0
        }

        fn merge_state(&self, dest: &mut u32, src: &u32) {
            *dest = (*dest).max(*src);
        }

        fn process_statement(&self, state: &mut u32, _stmt: &Statement) {
            *state = (*state + 1).min(100);
        }
    }

    fn add(reg: u16, version: u32) -> Statement {
        Statement::Insn(
            IrInsn::new(OpFamily::BinaryLit(BinaryOperation::AddInt))
                .with_result(Def::new(SsaVar::new(reg, version), DexType::Int))
                .with_sources([SsaVar::new(reg, version - 1)])
                .with_literal(1),
        )
    }

    fn call() -> Statement {
        Statement::Insn(IrInsn::new(OpFamily::Invoke(InvokeKind::Static)))
    }

    #[test]
    fn handler_sees_state_at_throw_point() {
        let mut cfg = ControlFlowGraph::new();
        let body = cfg.add_block();
        let handler = cfg.add_block();
        cfg.set_fallthrough(ENTRY, body);
        cfg.push(body, add(0, 2));
        cfg.push(body, call());
        cfg.push(body, add(0, 3));
        cfg.add_edge(body, EXIT, EdgeKind::Normal);
        cfg.add_edge(body, handler, EdgeKind::Exception);
        cfg.push(handler, Statement::Line(9));
        cfg.add_edge(handler, EXIT, EdgeKind::Normal);

        let states = solve(&cfg, &mut Counter).expect("solve");
        assert_eq!(states.output[body], 3);
        assert_eq!(states.output_exception[body], 2);
        assert_eq!(states.input[handler], 2);
        assert_eq!(states.input[EXIT], 3);
    }

    #[test]
    fn block_without_throwing_statement_exports_its_input() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_block();
        cfg.set_fallthrough(ENTRY, a);
        cfg.push(a, add(1, 2));
        cfg.add_edge(a, EXIT, EdgeKind::Normal);
        let states = solve(&cfg, &mut Counter).expect("solve");
        assert_eq!(states.output_exception[a], states.input[a]);
    }

    #[test]
    fn loops_reach_a_fixpoint_that_is_stable() {
        let mut cfg = ControlFlowGraph::new();
        let head = cfg.add_block();
        let body = cfg.add_block();
        cfg.set_fallthrough(ENTRY, head);
        cfg.push(head, add(0, 2));
        cfg.set_fallthrough(head, body);
        cfg.add_edge(head, EXIT, EdgeKind::Normal);
        cfg.push(body, add(0, 3));
        cfg.set_fallthrough(body, head);

        let states = solve(&cfg, &mut Counter).expect("solve");
        assert_eq!(states.output[head], 100);
        let again = resolve(&cfg, &mut Counter, states.clone()).expect("resolve");
        assert_eq!(again, states);
    }

    #[test]
    fn malformed_graph_is_internal_error() {
        let cfg = ControlFlowGraph::new();
        let e = solve(&cfg, &mut Counter).unwrap_err();
        assert!(e.is_internal());
    }
}
