//! Copy propagation and trivial phi elimination.

use std::collections::BTreeSet;

use log::{debug, trace};

use crate::dataflow::{self, BlockStates, ReachingDefinitions, ReachingState};
use crate::dex::error::DexError;
use crate::ir::{BlockId, ControlFlowGraph, Def, SsaVar, Statement};
use crate::options::BackendOptions;
use crate::ssa::defs::{SsaDefs, UseSite};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyPropStats {
    pub copies_removed: usize,
    pub phis_removed: usize,
    pub sweeps: usize,
}

/// A definition `result` that can be replaced by `source` everywhere.
struct Candidate {
    result: Def,
    source: SsaVar,
    is_phi: bool,
}

/// Work decided during one sweep, applied once the sweep is over.
#[derive(Default)]
struct SweepPlan {
    rewrites: Vec<(UseSite, SsaVar, SsaVar)>,
    removals: Vec<(BlockId, usize)>,
    dirty_regs: BTreeSet<u16>,
    touched: BTreeSet<SsaVar>,
}

impl SweepPlan {
    fn involves(&self, c: &Candidate) -> bool {
        self.touched.contains(&c.result.var)
            || self.touched.contains(&c.source)
            || self.dirty_regs.contains(&c.result.var.reg)
            || self.dirty_regs.contains(&c.source.reg)
    }

    fn clobber(&mut self, def: &Def) {
        self.dirty_regs.insert(def.var.reg);
        if def.ty.is_wide() {
            self.dirty_regs.insert(def.var.reg.wrapping_add(1));
        }
        self.touched.insert(def.var);
    }
}

/// Runs sweeps over every block until one makes no change.
pub fn propagate_copies(cfg: &mut ControlFlowGraph, options: &BackendOptions) -> Result<CopyPropStats, DexError> {
    let mut stats = CopyPropStats::default();
    loop {
        stats.sweeps += 1;
        if !sweep(cfg, options, &mut stats)? {
            break;
        }
    }
    debug!(
        "copy propagation: {} copies, {} phis removed in {} sweeps",
        stats.copies_removed, stats.phis_removed, stats.sweeps
    );
    Ok(stats)
}

fn sweep(cfg: &mut ControlFlowGraph, options: &BackendOptions, stats: &mut CopyPropStats) -> Result<bool, DexError> {
    // Both are rebuilt from the current graph before any decision of this sweep.
    let defs = SsaDefs::build(cfg)?;
    let mut analysis = ReachingDefinitions::new(&cfg.params);
    let states = dataflow::solve(cfg, &mut analysis)?;

    let mut plan = SweepPlan::default();
    for block in cfg.blocks() {
        for (index, stmt) in block.statements.iter().enumerate() {
            let candidate = match stmt {
                Statement::Move(mv) => Candidate { result: mv.result.clone(), source: mv.source, is_phi: false },
                Statement::Phi(phi) => {
                    let var = phi.result.var;
                    let readers = foreign_uses(&defs, cfg, var);
                    if readers.is_empty() {
                        if !plan.touched.contains(&var) {
                            trace!("dead phi {}", var);
                            plan.removals.push((block.id, index));
                            plan.clobber(&phi.result);
                            stats.phis_removed += 1;
                        }
                        continue;
                    }
                    let live: BTreeSet<SsaVar> = phi
                        .operands
                        .iter()
                        .map(|o| o.value)
                        .filter(|v| !v.is_unreachable() && *v != var)
                        .collect();
                    match (live.len(), live.first()) {
                        (1, Some(only)) => Candidate { result: phi.result.clone(), source: *only, is_phi: true },
                        _ => continue,
                    }
                }
                _ => continue,
            };

            if !replaceable(cfg, &defs, &analysis, &states, &candidate, options, &plan)? {
                continue;
            }
            trace!("replace {} with {}", candidate.result.var, candidate.source);
            for site in foreign_uses(&defs, cfg, candidate.result.var) {
                plan.rewrites.push((site, candidate.result.var, candidate.source));
            }
            plan.removals.push((block.id, index));
            plan.clobber(&candidate.result);
            plan.touched.insert(candidate.source);
            if candidate.is_phi {
                stats.phis_removed += 1;
            } else {
                stats.copies_removed += 1;
            }
        }
    }

    let changed = !plan.removals.is_empty();
    apply(cfg, plan);
    Ok(changed)
}

/// Use sites of `var`, minus a phi reading its own result.
fn foreign_uses(defs: &SsaDefs, cfg: &ControlFlowGraph, var: SsaVar) -> Vec<UseSite> {
    defs.uses(var)
        .iter()
        .copied()
        .filter(|site| match site {
            UseSite::PhiOperand { block, index, .. } => {
                cfg.block(*block).statements.get(*index).and_then(|s| s.result()).map(|d| d.var) != Some(var)
            }
            UseSite::Statement { .. } => true,
        })
        .collect()
}

/// Whether `state` shows only `source` in its register, treating `alias` (the
/// definition being removed) as if it were `source`.
fn reaches_only(state: &ReachingState, source: SsaVar, alias: &Def, wide: bool) -> bool {
    let ok = match state.versions(source.reg) {
        Some(versions) if !versions.is_empty() => versions
            .iter()
            .all(|v| *v == source.version || (alias.var.reg == source.reg && *v == alias.var.version)),
        _ => false,
    };
    ok && (!wide || state.is_clear(source.reg.wrapping_add(1)))
}

fn replaceable(
    cfg: &ControlFlowGraph,
    defs: &SsaDefs,
    analysis: &ReachingDefinitions,
    states: &BlockStates<ReachingState>,
    c: &Candidate,
    options: &BackendOptions,
    plan: &SweepPlan,
) -> Result<bool, DexError> {
    if c.source.is_unreachable() {
        return Ok(false);
    }
    if let Some(local) = &c.result.local {
        if options.keeps_local(local.synthetic) {
            return Ok(false);
        }
    }
    if plan.involves(c) {
        return Ok(false);
    }
    let wide = defs.ty(c.source)?.is_wide();
    if wide != c.result.ty.is_wide() {
        fail!("{} and its copy {} differ in width", c.source, c.result.var);
    }

    for site in foreign_uses(defs, cfg, c.result.var) {
        let ok = match site {
            UseSite::Statement { block, index } => {
                let state = dataflow::state_before(cfg, analysis, states, block, index);
                reaches_only(&state, c.source, &c.result, wide)
            }
            UseSite::PhiOperand { block, index, operand } => {
                let target = cfg.block(block);
                let phi = match target.statements.get(index) {
                    Some(Statement::Phi(phi)) => phi,
                    _ => fail!("use of {} at block {} index {} is not a phi", c.result.var, block, index),
                };
                if phi.result.var.reg != c.source.reg {
                    false
                } else {
                    let pred = phi.operands[operand].pred;
                    match target.edge_from(pred) {
                        Some(kind) => reaches_only(states.edge_state(pred, kind), c.source, &c.result, wide),
                        None => fail!("phi {} names {} which is not a predecessor", phi.result.var, pred),
                    }
                }
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply(cfg: &mut ControlFlowGraph, mut plan: SweepPlan) {
    for (site, from, to) in plan.rewrites {
        match site {
            UseSite::Statement { block, index } => {
                if let Some(stmt) = cfg.block_mut(block).statements.get_mut(index) {
                    stmt.replace_source(from, to);
                }
            }
            UseSite::PhiOperand { block, index, operand } => {
                if let Some(Statement::Phi(phi)) = cfg.block_mut(block).statements.get_mut(index) {
                    if let Some(op) = phi.operands.get_mut(operand) {
                        if op.value == from {
                            op.value = to;
                        }
                    }
                }
            }
        }
    }
    // Highest index first so earlier positions stay valid.
    plan.removals.sort_unstable_by(|a, b| b.cmp(a));
    plan.removals.dedup();
    for (block, index) in plan.removals {
        cfg.block_mut(block).statements.remove(index);
    }
}
