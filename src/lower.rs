//! Per-method lowering pipeline and batch driver.

use std::collections::BTreeMap;

use log::debug;
use rayon::prelude::*;

use crate::dex::assembler::{IndexResolver, MethodAssembler, PlacedInsn};
use crate::dex::code_item::CodeItem;
use crate::dex::debug_encode::{encode_debug_info, DebugInfoItem};
use crate::dex::debug_info::DebugInfo;
use crate::dex::error::{CapacityOverflow, DexError};
use crate::ir::{BlockId, ControlFlowGraph, MethodBody};
use crate::listing;
use crate::options::BackendOptions;
use crate::ssa::{propagate_copies, resolve_phi_types, CopyPropStats};

/// Everything the file writer needs for one method.
#[derive(Debug, Clone)]
pub struct LoweredMethod {
    pub name: String,
    pub code: Vec<u16>,
    pub instructions: Vec<PlacedInsn>,
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub block_addresses: BTreeMap<BlockId, u32>,
    pub debug_info: DebugInfo,
    pub debug_item: Option<DebugInfoItem>,
    /// `debug_item` serialized, empty when there is none.
    pub debug_bytes: Vec<u8>,
    pub phi_commits: usize,
    pub copy_stats: CopyPropStats,
}

impl LoweredMethod {
    /// The code item with a zero `debug_info_off`; the file writer patches it.
    pub fn code_item(&self) -> CodeItem {
        CodeItem {
            registers_size: self.registers_size,
            ins_size: self.ins_size,
            outs_size: self.outs_size,
            debug_info_off: 0,
            insns: self.code.clone(),
        }
    }

    pub fn listing(&self) -> String {
        listing::render(&self.instructions)
    }
}

fn ins_size(cfg: &ControlFlowGraph) -> u16 {
    cfg.params.iter().map(|p| p.ty.category() as u16).sum()
}

fn lower(method: &MethodBody, options: &BackendOptions, resolver: &dyn IndexResolver) -> Result<LoweredMethod, DexError> {
    let mut cfg = method.cfg.clone();
    cfg.validate()?;

    let phi_commits = resolve_phi_types(&mut cfg)?;
    let copy_stats = if options.optimize_copies { propagate_copies(&mut cfg, options)? } else { CopyPropStats::default() };

    let assembly = MethodAssembler::new(&cfg, options, resolver)?.assemble()?;
    let debug_info = DebugInfo::build(assembly.local_events, assembly.positions);
    let debug_item = encode_debug_info(&debug_info, &method.parameter_names, resolver)?;
    let mut debug_bytes = Vec::new();
    if let Some(item) = &debug_item {
        item.write(&mut debug_bytes);
    }

    let ins_size = ins_size(&cfg);
    let registers_size = assembly.registers_size.max(ins_size);
    debug!(
        "lowered {}: {} code units, {} registers, {} phi types, {} copies and {} phis removed",
        method.name,
        assembly.code.len(),
        registers_size,
        phi_commits,
        copy_stats.copies_removed,
        copy_stats.phis_removed
    );

    Ok(LoweredMethod {
        name: method.name.clone(),
        code: assembly.code,
        instructions: assembly.instructions,
        registers_size,
        ins_size,
        outs_size: assembly.outs_size,
        block_addresses: assembly.block_addresses,
        debug_info,
        debug_item,
        debug_bytes,
        phi_commits,
        copy_stats,
    })
}

/// Lowers one method. The input body is left untouched.
pub fn lower_method(
    method: &MethodBody,
    options: &BackendOptions,
    resolver: &dyn IndexResolver,
) -> Result<LoweredMethod, DexError> {
    lower(method, options, resolver).map_err(|e| err!(e, "method {}", method.name))
}

/// Lowers methods in parallel. Results are in input order.
pub fn lower_methods(
    methods: &[MethodBody],
    options: &BackendOptions,
    resolver: &dyn IndexResolver,
) -> Vec<Result<LoweredMethod, DexError>> {
    methods.par_iter().map(|m| lower_method(m, options, resolver)).collect()
}

/// Capacity overflows of a batch, with the index of the method that hit each.
pub fn collect_overflows(results: &[Result<LoweredMethod, DexError>]) -> Vec<(usize, CapacityOverflow)> {
    let overflows: Vec<(usize, CapacityOverflow)> = results
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.as_ref().err().and_then(DexError::overflow).map(|o| (i, o.clone())))
        .collect();
    if !overflows.is_empty() {
        debug!("{} of {} methods exceed encoding limits", overflows.len(), results.len());
    }
    overflows
}
