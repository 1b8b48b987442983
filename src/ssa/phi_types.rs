//! Fixpoint that gives every phi a concrete type and, where its inputs agree, a local.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, trace};

use crate::dex::error::DexError;
use crate::ir::{BlockId, ControlFlowGraph, DexType, LocalInfo, SsaVar, Statement};
use crate::ssa::defs::SsaDefs;

/// Merged local of a set of operands: unset until the first operand is seen.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LocalMerge {
    Empty,
    Same(LocalInfo),
    Conflict,
}

impl LocalMerge {
    fn add(self, local: Option<&LocalInfo>) -> LocalMerge {
        match (self, local) {
            (LocalMerge::Empty, Some(l)) => LocalMerge::Same(l.clone()),
            (LocalMerge::Same(cur), Some(l)) if cur.same_variable(l) => LocalMerge::Same(cur),
            _ => LocalMerge::Conflict,
        }
    }

    fn into_local(self) -> Option<LocalInfo> {
        match self {
            LocalMerge::Same(l) => Some(l),
            _ => None,
        }
    }
}

fn phi_sites(cfg: &ControlFlowGraph) -> BTreeMap<SsaVar, (BlockId, usize)> {
    let mut sites = BTreeMap::new();
    for block in cfg.blocks() {
        for (i, stmt) in block.statements.iter().enumerate() {
            if let Statement::Phi(phi) = stmt {
                sites.insert(phi.result.var, (block.id, i));
            }
        }
    }
    sites
}

/// Drops phis that have no reachable operand and no readers.
fn remove_empty_phis(cfg: &mut ControlFlowGraph) -> Result<usize, DexError> {
    let defs = SsaDefs::build(cfg)?;
    let mut removed = 0;
    for b in 0..cfg.max_id() {
        let before = cfg.block(b).statements.len();
        let mut stuck = None;
        cfg.block_mut(b).statements.retain(|stmt| match stmt {
            Statement::Phi(phi) if phi.operands.iter().all(|o| o.value.is_unreachable()) => {
                if defs.uses(phi.result.var).is_empty() {
                    false
                } else {
                    stuck = Some(phi.result.var);
                    true
                }
            }
            _ => true,
        });
        if let Some(var) = stuck {
            fail!("phi {} has no reachable operand but is read", var);
        }
        removed += before - cfg.block(b).statements.len();
    }
    Ok(removed)
}

/// Resolves the type of every phi whose result type is still `Unresolved`.
///
/// Returns the number of type commits made.
pub fn resolve_phi_types(cfg: &mut ControlFlowGraph) -> Result<usize, DexError> {
    let dropped = remove_empty_phis(cfg)?;

    let defs = SsaDefs::build(cfg)?;
    let sites = phi_sites(cfg);

    let mut types: BTreeMap<SsaVar, DexType> = BTreeMap::new();
    let mut locals: BTreeMap<SsaVar, Option<LocalInfo>> = BTreeMap::new();
    for var in defs.vars() {
        if let Some(def) = defs.def(*var) {
            types.insert(*var, def.ty.clone());
            locals.insert(*var, def.local.clone());
        }
    }

    // Phis reading each variable.
    let mut readers: BTreeMap<SsaVar, BTreeSet<SsaVar>> = BTreeMap::new();
    for (phi_var, (b, i)) in &sites {
        if let Statement::Phi(phi) = &cfg.block(*b).statements[*i] {
            for op in &phi.operands {
                readers.entry(op.value).or_default().insert(*phi_var);
            }
        }
    }

    let mut queue: VecDeque<SsaVar> =
        sites.keys().filter(|v| types.get(v).is_some_and(|t| !t.is_resolved())).copied().collect();
    let mut queued: BTreeSet<SsaVar> = queue.iter().copied().collect();
    let mut stalls = 0usize;
    let mut commits = 0usize;

    while let Some(var) = queue.pop_front() {
        queued.remove(&var);
        let (b, i) = sites[&var];
        let phi = match &cfg.block(b).statements[i] {
            Statement::Phi(phi) => phi,
            _ => fail!("definition of {} moved during phi resolution", var),
        };

        let mut merged: Option<DexType> = None;
        let mut local = LocalMerge::Empty;
        for op in phi.operands.iter().filter(|o| !o.value.is_unreachable()) {
            let ty = match types.get(&op.value) {
                Some(t) => t,
                None => fail!("phi {} reads undefined {}", var, op.value),
            };
            if !ty.is_resolved() {
                continue;
            }
            merged = Some(match merged {
                None => ty.clone(),
                Some(m) => m.merge(ty).map_err(|e| err!(e, "phi {}", var))?,
            });
            local = local.add(locals.get(&op.value).and_then(|l| l.as_ref()));
        }

        let merged = match merged {
            Some(m) => m,
            None => {
                stalls += 1;
                if stalls > queue.len() {
                    fail!("phi types do not converge: {} phis have no typed operand", queue.len() + 1);
                }
                trace!("phi {} has no typed operand yet", var);
                queue.push_back(var);
                queued.insert(var);
                continue;
            }
        };
        stalls = 0;

        if types.get(&var) != Some(&merged) {
            let local = local.into_local();
            trace!("phi {} := {}", var, merged);
            if let Statement::Phi(phi) = &mut cfg.block_mut(b).statements[i] {
                phi.result.ty = merged.clone();
                phi.result.local = local.clone();
            }
            types.insert(var, merged);
            locals.insert(var, local);
            commits += 1;
            for reader in readers.get(&var).into_iter().flatten() {
                if queued.insert(*reader) {
                    queue.push_back(*reader);
                }
            }
        }
    }

    debug!("phi types: {} commits, {} empty phis dropped", commits, dropped);
    Ok(commits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Def, EdgeKind, Phi, PhiOperand, ENTRY, EXIT};

    fn phi(result: SsaVar, operands: &[(BlockId, SsaVar)]) -> Statement {
        Statement::Phi(Phi {
            result: Def::new(result, DexType::Unresolved),
            operands: operands.iter().map(|(p, v)| PhiOperand { pred: *p, value: *v }).collect(),
        })
    }

    fn phi_of(cfg: &ControlFlowGraph, b: BlockId) -> Def {
        match &cfg.block(b).statements[0] {
            Statement::Phi(p) => p.result.clone(),
            other => panic!("expected phi, got {:?}", other),
        }
    }

    /// entry -> a -> head <-> body, head -> exit; phi in head merges a param and a loop value.
    fn loop_graph(param: Def, loop_def: Def) -> (ControlFlowGraph, BlockId) {
        let mut cfg = ControlFlowGraph::new();
        let pv = param.var;
        let lv = loop_def.var;
        cfg.add_param(param);
        let a = cfg.add_block();
        let head = cfg.add_block();
        let body = cfg.add_block();
        cfg.set_fallthrough(ENTRY, a);
        cfg.set_fallthrough(a, head);
        cfg.set_fallthrough(head, body);
        cfg.add_edge(head, EXIT, EdgeKind::Normal);
        cfg.set_fallthrough(body, head);
        cfg.push(head, phi(SsaVar::new(0, 9), &[(a, pv), (body, lv)]));
        cfg.push(body, Statement::Move(crate::ir::Move { result: loop_def, source: SsaVar::new(0, 9) }));
        (cfg, head)
    }

    #[test]
    fn loop_phi_resolves_through_its_back_edge() {
        let local = LocalInfo::new("count", "I");
        let (mut cfg, head) = loop_graph(
            Def::new(SsaVar::new(0, 1), DexType::Char).with_local(local.clone()),
            Def::new(SsaVar::new(0, 10), DexType::Int).with_local(local.clone()),
        );
        resolve_phi_types(&mut cfg).expect("resolve");
        let def = phi_of(&cfg, head);
        assert_eq!(def.ty, DexType::Int);
        assert_eq!(def.local, Some(local));
    }

    #[test]
    fn mismatched_locals_drop_the_name() {
        let (mut cfg, head) = loop_graph(
            Def::new(SsaVar::new(0, 1), DexType::Int).with_local(LocalInfo::new("a", "I")),
            Def::new(SsaVar::new(0, 10), DexType::Int).with_local(LocalInfo::new("b", "I")),
        );
        resolve_phi_types(&mut cfg).expect("resolve");
        assert_eq!(phi_of(&cfg, head).local, None);
    }

    #[test]
    fn chained_phis_converge() {
        let mut cfg = ControlFlowGraph::new();
        cfg.add_param(Def::new(SsaVar::new(0, 1), DexType::from_descriptor("Ljava/lang/String;").expect("type")));
        let a = cfg.add_block();
        let b = cfg.add_block();
        let c = cfg.add_block();
        cfg.set_fallthrough(ENTRY, a);
        cfg.set_fallthrough(a, b);
        cfg.set_fallthrough(b, c);
        cfg.add_edge(c, EXIT, EdgeKind::Normal);
        // c's phi is queued first and must wait for b's.
        cfg.push(c, phi(SsaVar::new(0, 3), &[(b, SsaVar::new(0, 2))]));
        cfg.push(b, phi(SsaVar::new(0, 2), &[(a, SsaVar::new(0, 1))]));
        resolve_phi_types(&mut cfg).expect("resolve");
        assert_eq!(phi_of(&cfg, c).ty.descriptor().as_deref(), Some("Ljava/lang/String;"));
    }

    #[test]
    fn cyclic_phis_without_typed_input_fail() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_block();
        let b = cfg.add_block();
        cfg.set_fallthrough(ENTRY, a);
        cfg.set_fallthrough(a, b);
        cfg.set_fallthrough(b, a);
        cfg.add_edge(b, EXIT, EdgeKind::Normal);
        cfg.push(a, phi(SsaVar::new(0, 1), &[(ENTRY, SsaVar::unreachable(0)), (b, SsaVar::new(0, 2))]));
        cfg.push(b, phi(SsaVar::new(0, 2), &[(a, SsaVar::new(0, 1))]));
        let e = resolve_phi_types(&mut cfg).unwrap_err();
        assert!(e.is_internal());
        assert!(e.to_string().contains("do not converge"));
    }

    #[test]
    fn incompatible_operands_fail() {
        let mut cfg = ControlFlowGraph::new();
        cfg.add_param(Def::new(SsaVar::new(1, 1), DexType::Int));
        cfg.add_param(Def::new(SsaVar::new(2, 1), DexType::Float));
        let a = cfg.add_block();
        let b = cfg.add_block();
        let join = cfg.add_block();
        cfg.set_fallthrough(ENTRY, a);
        cfg.set_fallthrough(a, join);
        cfg.add_edge(a, b, EdgeKind::Normal);
        cfg.set_fallthrough(b, join);
        cfg.add_edge(join, EXIT, EdgeKind::Normal);
        cfg.push(join, phi(SsaVar::new(0, 3), &[(a, SsaVar::new(1, 1)), (b, SsaVar::new(2, 1))]));
        let e = resolve_phi_types(&mut cfg).unwrap_err();
        assert!(e.to_string().contains("cannot merge"));
    }

    #[test]
    fn unread_phi_without_operands_is_dropped() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_block();
        cfg.set_fallthrough(ENTRY, a);
        cfg.add_edge(a, EXIT, EdgeKind::Normal);
        cfg.push(a, phi(SsaVar::new(4, 1), &[(ENTRY, SsaVar::unreachable(4))]));
        resolve_phi_types(&mut cfg).expect("resolve");
        assert!(cfg.block(a).statements.is_empty());
    }
}
