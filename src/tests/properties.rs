use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataflow::{self, ReachingDefinitions};
use crate::dex::families::{BinaryOperation, OpFamily, RegCategory, TestType};
use crate::ir::{
    BlockId, ControlFlowGraph, Def, DexType, EdgeKind, IrInsn, MethodBody, Move, Phi, PhiOperand, SsaVar, Statement, ENTRY,
    EXIT,
};
use crate::lower::lower_method;
use crate::options::BackendOptions;
use crate::ssa::{propagate_copies, resolve_phi_types};
use crate::tests::TestPool;

const REGS: u16 = 4;

/// Builds random register-allocated programs: a straight block, a diamond, and a join
/// with phis for every register the arms disagree on.
struct Generator {
    rng: StdRng,
    counters: Vec<u32>,
}

impl Generator {
    fn new(seed: u64) -> Self {
        Generator { rng: StdRng::seed_from_u64(seed), counters: vec![1; REGS as usize] }
    }

    fn fresh(&mut self, reg: u16) -> SsaVar {
        self.counters[reg as usize] += 1;
        SsaVar::new(reg, self.counters[reg as usize])
    }

    fn fill(&mut self, cfg: &mut ControlFlowGraph, block: BlockId, current: &mut [u32]) {
        let n = self.rng.random_range(1..8);
        for _ in 0..n {
            let reg = self.rng.random_range(0..REGS);
            let read = |rng: &mut StdRng, current: &[u32]| {
                let r = rng.random_range(0..REGS);
                SsaVar::new(r, current[r as usize])
            };
            let stmt = match self.rng.random_range(0..3) {
                0 => {
                    let literal = self.rng.random_range(-8..8);
                    let var = self.fresh(reg);
                    Statement::Insn(IrInsn::new(OpFamily::Const).with_result(Def::new(var, DexType::Int)).with_literal(literal))
                }
                1 => {
                    let source = read(&mut self.rng, current);
                    let var = self.fresh(reg);
                    Statement::Move(Move { result: Def::new(var, DexType::Int), source })
                }
                _ => {
                    let a = read(&mut self.rng, current);
                    let b = read(&mut self.rng, current);
                    let var = self.fresh(reg);
                    Statement::Insn(
                        IrInsn::new(OpFamily::Binary(BinaryOperation::AddInt))
                            .with_result(Def::new(var, DexType::Int))
                            .with_sources([a, b]),
                    )
                }
            };
            if let Some(def) = stmt.result() {
                current[def.var.reg as usize] = def.var.version;
            }
            cfg.push(block, stmt);
        }
    }

    fn program(&mut self) -> ControlFlowGraph {
        let mut cfg = ControlFlowGraph::new();
        for reg in 0..REGS {
            cfg.add_param(Def::new(SsaVar::new(reg, 1), DexType::Int));
        }
        let a = cfg.add_block();
        let left = cfg.add_block();
        let right = cfg.add_block();
        let join = cfg.add_block();

        let mut current = vec![1; REGS as usize];
        cfg.set_fallthrough(ENTRY, a);
        self.fill(&mut cfg, a, &mut current);
        cfg.push(
            a,
            Statement::Insn(IrInsn::new(OpFamily::IfZ(TestType::Equal)).with_sources([SsaVar::new(0, current[0])]).with_target(right)),
        );
        cfg.add_edge(a, right, EdgeKind::Normal);
        cfg.set_fallthrough(a, left);

        let mut on_left = current.clone();
        self.fill(&mut cfg, left, &mut on_left);
        cfg.push(left, Statement::Insn(IrInsn::new(OpFamily::Goto).with_target(join)));
        cfg.add_edge(left, join, EdgeKind::Normal);

        let mut on_right = current;
        self.fill(&mut cfg, right, &mut on_right);
        cfg.set_fallthrough(right, join);

        let mut joined = on_left.clone();
        for reg in 0..REGS {
            let (l, r) = (on_left[reg as usize], on_right[reg as usize]);
            if l != r {
                let var = self.fresh(reg);
                cfg.push(
                    join,
                    Statement::Phi(Phi {
                        result: Def::new(var, DexType::Unresolved),
                        operands: vec![
                            PhiOperand { pred: left, value: SsaVar::new(reg, l) },
                            PhiOperand { pred: right, value: SsaVar::new(reg, r) },
                        ],
                    }),
                );
                joined[reg as usize] = var.version;
            }
        }
        self.fill(&mut cfg, join, &mut joined);
        cfg.push(
            join,
            Statement::Insn(IrInsn::new(OpFamily::Return(RegCategory::Single)).with_sources([SsaVar::new(0, joined[0])])),
        );
        cfg.add_edge(join, EXIT, EdgeKind::Normal);
        cfg
    }
}

/// Every read finds exactly the version it names in its register.
fn assert_reads_hold(cfg: &ControlFlowGraph, seed: u64) {
    let analysis = ReachingDefinitions::new(&cfg.params);
    let states = dataflow::solve(cfg, &mut ReachingDefinitions::new(&cfg.params)).expect("solve");
    for block in cfg.blocks() {
        for (index, stmt) in block.statements.iter().enumerate() {
            if let Statement::Phi(phi) = stmt {
                for op in &phi.operands {
                    let kind = block.edge_from(op.pred).expect("phi predecessor");
                    assert!(
                        states.edge_state(op.pred, kind).holds_only(op.value),
                        "seed {}: phi {} reads {} from block {}",
                        seed,
                        phi.result.var,
                        op.value,
                        op.pred
                    );
                }
                continue;
            }
            let state = dataflow::state_before(cfg, &analysis, &states, block.id, index);
            for var in stmt.sources() {
                assert!(state.holds_only(var), "seed {}: block {} statement {} reads {}", seed, block.id, index, var);
            }
        }
    }
}

#[test]
fn copy_propagation_keeps_every_read_valid() {
    let options = BackendOptions::default();
    let mut removed = 0;
    for seed in 0..200 {
        let mut cfg = Generator::new(seed).program();
        assert_reads_hold(&cfg, seed);
        resolve_phi_types(&mut cfg).expect("phi types");
        let stats = propagate_copies(&mut cfg, &options).expect("propagate");
        removed += stats.copies_removed + stats.phis_removed;
        cfg.validate().expect("valid after propagation");
        assert_reads_hold(&cfg, seed);

        let again = propagate_copies(&mut cfg, &options).expect("propagate again");
        assert_eq!((again.copies_removed, again.phis_removed), (0, 0), "seed {}", seed);
    }
    assert!(removed > 0);
}

#[test]
fn reaching_definitions_fixpoint_is_stable() {
    for seed in 0..50 {
        let cfg = Generator::new(seed).program();
        let mut analysis = ReachingDefinitions::new(&cfg.params);
        let states = dataflow::solve(&cfg, &mut analysis).expect("solve");
        let again = dataflow::resolve(&cfg, &mut analysis, states.clone()).expect("resolve");
        assert_eq!(again, states, "seed {}", seed);
    }
}

/// Straight-line wide and narrow writes over adjacent registers, checked against a
/// register file that tracks which halves are still intact.
#[test]
fn reaching_definitions_follow_overlapping_wide_writes() {
    const FILE: usize = 6;
    for seed in 0..100 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_block();
        cfg.set_fallthrough(ENTRY, a);

        let mut versions = [0u32; FILE];
        let mut content: [Option<u32>; FILE] = [None; FILE];
        let mut low_half = [false; FILE];
        let mut expected = Vec::new();
        for _ in 0..12 {
            let wide = rng.random_bool(0.5);
            let reg = rng.random_range(0..if wide { FILE - 1 } else { FILE });
            versions[reg] += 1;
            let ty = if wide { DexType::Long } else { DexType::Int };
            let def = Def::new(SsaVar::new(reg as u16, versions[reg]), ty);
            cfg.push(a, Statement::Insn(IrInsn::new(OpFamily::Const).with_result(def).with_literal(0)));

            if reg > 0 && low_half[reg - 1] {
                content[reg - 1] = None;
                low_half[reg - 1] = false;
            }
            if wide {
                content[reg + 1] = None;
                low_half[reg + 1] = false;
            }
            content[reg] = Some(versions[reg]);
            low_half[reg] = wide;
            expected.push(content);
        }
        cfg.push(a, Statement::Insn(IrInsn::new(OpFamily::ReturnVoid)));
        cfg.add_edge(a, EXIT, EdgeKind::Normal);

        let analysis = ReachingDefinitions::new(&[]);
        let states = dataflow::solve(&cfg, &mut ReachingDefinitions::new(&[])).expect("solve");
        for (index, content) in expected.iter().enumerate() {
            let state = dataflow::state_before(&cfg, &analysis, &states, a, index + 1);
            for reg in 0..FILE {
                for version in 1..=versions[reg] {
                    let var = SsaVar::new(reg as u16, version);
                    assert_eq!(
                        state.holds_only(var),
                        content[reg] == Some(version),
                        "seed {}: {} after statement {}",
                        seed,
                        var,
                        index
                    );
                }
            }
        }
    }
}

#[test]
fn random_programs_lower_with_and_without_copies() {
    for seed in 0..50 {
        let method = MethodBody::new("random", Generator::new(seed).program());
        let optimized = lower_method(&method, &BackendOptions::default(), &TestPool::new()).expect("optimized");
        let plain = BackendOptions { optimize_copies: false, ..BackendOptions::default() };
        let unoptimized = lower_method(&method, &plain, &TestPool::new()).expect("unoptimized");
        assert_eq!(optimized.ins_size, REGS);
        assert_eq!(unoptimized.copy_stats.copies_removed, 0);
        assert!(optimized.registers_size <= unoptimized.registers_size, "seed {}", seed);
    }
}
