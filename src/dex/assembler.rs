//! Lowers a resolved SSA graph to code units.
//!
//! Blocks are emitted in layout order. Every instruction starts at its most compact
//! compatible opcode; branches are then widened until all offsets fit. Payloads for
//! switches and array fills follow the code at even addresses.

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::dex::debug_info::{LocalEvent, LocalEventKind, PositionEntry};
use crate::dex::error::{CapacityOverflow, DexError, OverflowLimit};
use crate::dex::families::OpFamily;
use crate::dex::insn::{Constant, Instruction, RegOperand};
use crate::dex::opcodes::Opcode;
use crate::ir::{BlockId, ControlFlowGraph, Def, IrInsn, LocalInfo, Payload, SsaVar, Statement, EXIT};
use crate::options::BackendOptions;
use crate::ssa::SsaDefs;

const PACKED_SWITCH_IDENT: u16 = 0x0100;
const SPARSE_SWITCH_IDENT: u16 = 0x0200;
const ARRAY_DATA_IDENT: u16 = 0x0300;

/// Pool numbering supplied by the file writer.
pub trait IndexResolver: Sync {
    fn string_index(&self, value: &str) -> Result<u32, DexError>;
    fn type_index(&self, descriptor: &str) -> Result<u32, DexError>;
    fn field_index(&self, class: &str, name: &str, descriptor: &str) -> Result<u32, DexError>;
    fn method_index(&self, class: &str, name: &str, proto: &str) -> Result<u32, DexError>;
    fn proto_index(&self, proto: &str) -> Result<u32, DexError>;
    fn call_site_index(&self, name: &str) -> Result<u32, DexError>;
    fn method_handle_index(&self, name: &str) -> Result<u32, DexError>;
}

/// Gives every constant operand of `insn` its pool index.
pub fn assign_pool_indices(insn: &mut Instruction, resolver: &dyn IndexResolver) -> Result<(), DexError> {
    for cst in insn.constants.iter_mut() {
        let index = match cst.constant() {
            Constant::String(s) => resolver.string_index(s)?,
            Constant::Type(t) => resolver.type_index(t)?,
            Constant::Field { class, name, descriptor } => resolver.field_index(class, name, descriptor)?,
            Constant::Method { class, name, proto } => resolver.method_index(class, name, proto)?,
            Constant::Proto(p) => resolver.proto_index(p)?,
            Constant::CallSite(n) => resolver.call_site_index(n)?,
            Constant::MethodHandle(n) => resolver.method_handle_index(n)?,
        };
        cst.set_index(index)?;
    }
    Ok(())
}

/// An encoded instruction and where it landed.
#[derive(Debug, Clone)]
pub struct PlacedInsn {
    pub address: u32,
    pub opcode: &'static Opcode,
    pub insn: Instruction,
}

#[derive(Debug, Clone)]
pub struct Assembly {
    pub code: Vec<u16>,
    pub instructions: Vec<PlacedInsn>,
    /// Address of the first code unit of each emitted block.
    pub block_addresses: BTreeMap<BlockId, u32>,
    pub local_events: Vec<LocalEvent>,
    pub positions: Vec<PositionEntry>,
    pub registers_size: u16,
    pub outs_size: u16,
    /// End of the instruction stream; payloads start at or after it.
    pub code_end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    None,
    Block(BlockId),
    Payload(usize),
}

#[derive(Debug)]
struct Pending {
    insn: Instruction,
    candidates: Vec<&'static Opcode>,
    choice: usize,
    target: Target,
}

impl Pending {
    fn opcode(&self) -> &'static Opcode {
        self.candidates[self.choice]
    }
}

#[derive(Debug)]
enum Slot {
    Code(Pending),
    Block(BlockId),
    Local { reg: u16, kind: LocalEventKind, local: Option<LocalInfo> },
    Line(u32),
}

#[derive(Debug)]
struct PayloadDraft {
    owner: usize,
    payload: Payload,
    targets: Vec<BlockId>,
}

impl PayloadDraft {
    fn code_size(&self) -> u32 {
        let n = self.targets.len() as u32;
        match &self.payload {
            Payload::PackedSwitch { .. } => 4 + 2 * n,
            Payload::SparseSwitch { .. } => 2 + 4 * n,
            Payload::ArrayData { element_width, elements } => {
                4 + ((elements.len() as u32 * *element_width as u32) + 1) / 2
            }
        }
    }
}

struct Addresses {
    slots: Vec<u32>,
    blocks: BTreeMap<BlockId, u32>,
    payloads: Vec<u32>,
    code_end: u32,
}

/// First candidate from `from` on that accepts `insn`.
fn select(insn: &Instruction, candidates: &[&'static Opcode], from: usize) -> Result<usize, DexError> {
    match (from..candidates.len()).find(|i| candidates[*i].format.is_compatible(insn)) {
        Some(i) => Ok(i),
        None => Err(no_fit(insn, candidates)),
    }
}

fn no_fit(insn: &Instruction, candidates: &[&'static Opcode]) -> DexError {
    match candidates.iter().rev().find_map(|op| op.format.diagnose(insn)) {
        Some(limit) => DexError::capacity(CapacityOverflow { opcode: insn.family.name().to_string(), limit }),
        None => err!("no format of {} accepts its {} operands", insn.family, insn.registers.len()),
    }
}

fn check_payload(op: OpFamily, payload: &Payload, targets: usize) -> Result<(), DexError> {
    match (op, payload) {
        (OpFamily::PackedSwitch, Payload::PackedSwitch { .. }) => {
            if targets > u16::MAX as usize {
                fail!("packed-switch with {} cases", targets);
            }
        }
        (OpFamily::SparseSwitch, Payload::SparseSwitch { keys }) => {
            if keys.len() != targets || targets > u16::MAX as usize {
                fail!("sparse-switch has {} keys for {} targets", keys.len(), targets);
            }
            if keys.windows(2).any(|w| w[0] >= w[1]) {
                fail!("sparse-switch keys are not ascending");
            }
        }
        (OpFamily::FillArrayData, Payload::ArrayData { element_width, .. }) => {
            if ![1, 2, 4, 8].contains(element_width) {
                fail!("fill-array-data element width {}", element_width);
            }
            if targets != 0 {
                fail!("fill-array-data with branch targets");
            }
        }
        (op, payload) => fail!("{} cannot carry {:?}", op, payload),
    }
    Ok(())
}

fn push_u32(out: &mut Vec<u16>, v: u32) {
    out.extend([v as u16, (v >> 16) as u16]);
}

fn write_payload(
    draft: &PayloadDraft,
    owner_address: u32,
    blocks: &BTreeMap<BlockId, u32>,
    out: &mut Vec<u16>,
) -> Result<(), DexError> {
    let mut relative = Vec::with_capacity(draft.targets.len());
    for t in &draft.targets {
        match blocks.get(t) {
            Some(addr) => relative.push((*addr as i64 - owner_address as i64) as i32 as u32),
            None => fail!("switch case targets block {} which has no code", t),
        }
    }
    match &draft.payload {
        Payload::PackedSwitch { first_key } => {
            out.extend([PACKED_SWITCH_IDENT, relative.len() as u16]);
            push_u32(out, *first_key as u32);
            for r in relative {
                push_u32(out, r);
            }
        }
        Payload::SparseSwitch { keys } => {
            out.extend([SPARSE_SWITCH_IDENT, relative.len() as u16]);
            for k in keys {
                push_u32(out, *k as u32);
            }
            for r in relative {
                push_u32(out, r);
            }
        }
        Payload::ArrayData { element_width, elements } => {
            out.push(ARRAY_DATA_IDENT);
            out.push(*element_width);
            push_u32(out, elements.len() as u32);
            let width = *element_width as usize;
            let mut bytes: Vec<u8> = elements.iter().flat_map(|e| e.to_le_bytes()[..width].to_vec()).collect();
            if bytes.len() % 2 == 1 {
                bytes.push(0);
            }
            out.extend(bytes.chunks(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])));
        }
    }
    Ok(())
}

pub struct MethodAssembler<'a> {
    cfg: &'a ControlFlowGraph,
    options: &'a BackendOptions,
    resolver: &'a dyn IndexResolver,
    defs: SsaDefs,
    slots: Vec<Slot>,
    payloads: Vec<PayloadDraft>,
    /// Local currently held by each register, following the layout linearly.
    live: BTreeMap<u16, LocalInfo>,
}

impl<'a> MethodAssembler<'a> {
    pub fn new(
        cfg: &'a ControlFlowGraph,
        options: &'a BackendOptions,
        resolver: &'a dyn IndexResolver,
    ) -> Result<Self, DexError> {
        cfg.validate()?;
        Ok(MethodAssembler {
            cfg,
            options,
            resolver,
            defs: SsaDefs::build(cfg)?,
            slots: Vec::new(),
            payloads: Vec::new(),
            live: BTreeMap::new(),
        })
    }

    pub fn assemble(mut self) -> Result<Assembly, DexError> {
        let cfg = self.cfg;
        for p in &cfg.params {
            if let Some(local) = p.local.as_ref().filter(|l| self.options.keeps_local(l.synthetic)) {
                self.slots.push(Slot::Local { reg: p.var.reg, kind: LocalEventKind::Param, local: Some(local.clone()) });
                self.live.insert(p.var.reg, local.clone());
            }
        }

        let order = cfg.layout();
        for (i, b) in order.iter().enumerate() {
            self.emit_block(*b, order.get(i + 1).copied()).map_err(|e| err!(e, "block {}", b))?;
        }
        self.size_branches()?;
        self.finish()
    }

    fn candidates(&self, family: OpFamily) -> Result<Vec<&'static Opcode>, DexError> {
        let (api, art) = (self.options.api_level, self.options.art_version);
        let ops: Vec<&'static Opcode> = family
            .candidates()
            .iter()
            .copied()
            .filter(|op| op.get_opcode_value(api, art).is_some())
            .filter(|op| !op.is_experimental() || self.options.experimental_lambdas)
            .filter(|op| !(self.options.force_jumbo && op.name == "const-string"))
            .collect();
        if ops.is_empty() {
            fail!("{} is not available at api {} / art {}", family, api, art);
        }
        Ok(ops)
    }

    fn reg_operand(&self, var: SsaVar) -> Result<RegOperand, DexError> {
        let ty = self.defs.ty(var)?;
        if !ty.is_resolved() {
            fail!("{} has no resolved type", var);
        }
        Ok(RegOperand::new(var.reg, ty.category()))
    }

    fn def_operand(&self, def: &Def) -> Result<RegOperand, DexError> {
        if !def.ty.is_resolved() {
            fail!("{} has no resolved type", def.var);
        }
        Ok(RegOperand::new(def.var.reg, def.ty.category()))
    }

    fn emit_block(&mut self, b: BlockId, next: Option<BlockId>) -> Result<(), DexError> {
        let cfg = self.cfg;
        let block = cfg.block(b);
        self.slots.push(Slot::Block(b));

        let mut falls_through = true;
        for stmt in &block.statements {
            match stmt {
                Statement::Phi(phi) => self.note_def(&phi.result),
                Statement::Move(mv) => {
                    let src = self.reg_operand(mv.source)?;
                    let dst = self.def_operand(&mv.result)?;
                    if src.reg != dst.reg {
                        let insn = Instruction::new(OpFamily::Move(mv.result.ty.reg_category())).with_regs([dst, src]);
                        self.push_insn(insn, Target::None)?;
                    }
                    self.note_def(&mv.result);
                }
                Statement::Insn(insn) => {
                    falls_through = insn.op.can_continue();
                    self.emit_insn(insn, next)?;
                    if let Some(def) = &insn.result {
                        self.note_def(def);
                    }
                }
                Statement::LocalEnd { reg } => self.end_local(*reg),
                Statement::Line(line) => {
                    if self.options.emit_line_numbers {
                        self.slots.push(Slot::Line(*line));
                    }
                }
            }
        }

        if let Some(f) = block.fallthrough {
            if falls_through && f != EXIT && Some(f) != next {
                self.push_insn(Instruction::new(OpFamily::Goto), Target::Block(f))?;
            }
        }
        Ok(())
    }

    fn emit_insn(&mut self, ir: &IrInsn, next: Option<BlockId>) -> Result<(), DexError> {
        if ir.op == OpFamily::Goto && ir.targets.first().copied() == next && next.is_some() {
            return Ok(());
        }

        let mut insn = Instruction::new(ir.op);
        if let Some(def) = &ir.result {
            insn.registers.push(self.def_operand(def)?);
        }
        for s in &ir.sources {
            insn.registers.push(self.reg_operand(*s)?);
        }
        for c in &ir.constants {
            insn = insn.with_constant(c.clone());
        }
        insn.literal = ir.literal;
        assign_pool_indices(&mut insn, self.resolver)?;

        match ir.op {
            OpFamily::PackedSwitch | OpFamily::SparseSwitch | OpFamily::FillArrayData => {
                let payload = match &ir.payload {
                    Some(p) => p.clone(),
                    None => fail!("{} without a payload", ir.op),
                };
                check_payload(ir.op, &payload, ir.targets.len())?;
                let owner = self.push_insn(insn, Target::Payload(self.payloads.len()))?;
                self.payloads.push(PayloadDraft { owner, payload, targets: ir.targets.clone() });
            }
            op if op.has_branch_target() => {
                let target = match ir.targets.first() {
                    Some(t) if *t != EXIT => *t,
                    _ => fail!("{} has no block to branch to", op),
                };
                self.push_insn(insn, Target::Block(target))?;
            }
            _ => {
                self.push_insn(insn, Target::None)?;
            }
        }
        Ok(())
    }

    /// Queues an instruction at its most compact opcode. Returns its slot.
    fn push_insn(&mut self, mut insn: Instruction, target: Target) -> Result<usize, DexError> {
        if self.lands_here(target) {
            // Only goto/32 accepts a zero offset.
            self.push_insn(Instruction::new(OpFamily::Nop), Target::None)?;
        }
        insn.require_indices()?;
        if target != Target::None {
            insn.branch_offset = Some(1);
        }
        let candidates = self.candidates(insn.family)?;
        let choice = select(&insn, &candidates, 0)?;
        self.slots.push(Slot::Code(Pending { insn, candidates, choice, target }));
        Ok(self.slots.len() - 1)
    }

    /// Whether a branch to `target` queued now would resolve to its own address:
    /// the target block is already laid out and no code follows its start.
    fn lands_here(&self, target: Target) -> bool {
        let b = match target {
            Target::Block(b) => b,
            _ => return false,
        };
        self.slots
            .iter()
            .rev()
            .take_while(|slot| !matches!(slot, Slot::Code(_)))
            .any(|slot| matches!(slot, Slot::Block(x) if *x == b))
    }

    fn note_def(&mut self, def: &Def) {
        let reg = def.var.reg;
        if def.ty.is_wide() {
            self.clobber(reg.wrapping_add(1));
        }
        if reg > 0 && self.live.get(&(reg - 1)).is_some_and(|l| l.is_wide()) {
            self.clobber(reg - 1);
        }
        match def.local.as_ref().filter(|l| self.options.keeps_local(l.synthetic)) {
            Some(local) => {
                if self.live.get(&reg).is_some_and(|l| l.same_variable(local)) {
                    return;
                }
                self.slots.push(Slot::Local { reg, kind: LocalEventKind::Start, local: Some(local.clone()) });
                self.live.insert(reg, local.clone());
            }
            None => self.clobber(reg),
        }
    }

    /// Ends whatever local `reg` holds because a value without one replaces it.
    fn clobber(&mut self, reg: u16) {
        if self.live.remove(&reg).is_some() {
            self.slots.push(Slot::Local { reg, kind: LocalEventKind::Start, local: None });
        }
    }

    fn end_local(&mut self, reg: u16) {
        if let Some(local) = self.live.remove(&reg) {
            self.slots.push(Slot::Local { reg, kind: LocalEventKind::End, local: Some(local) });
        }
    }

    fn addresses(&self) -> Addresses {
        let mut addr = 0u32;
        let mut slots = Vec::with_capacity(self.slots.len());
        let mut blocks = BTreeMap::new();
        for slot in &self.slots {
            slots.push(addr);
            match slot {
                Slot::Code(p) => addr += p.opcode().format.code_size(),
                Slot::Block(b) => {
                    blocks.insert(*b, addr);
                }
                Slot::Local { .. } | Slot::Line(_) => {}
            }
        }
        let code_end = addr;
        let mut payloads = Vec::with_capacity(self.payloads.len());
        for p in &self.payloads {
            addr += addr % 2;
            payloads.push(addr);
            addr += p.code_size();
        }
        Addresses { slots, blocks, payloads, code_end }
    }

    /// Widens branches until every offset fits its opcode. Opcodes only ever grow,
    /// so this terminates.
    fn size_branches(&mut self) -> Result<(), DexError> {
        let mut rounds = 0;
        loop {
            rounds += 1;
            let addrs = self.addresses();
            let mut widened = false;
            for (i, slot) in self.slots.iter_mut().enumerate() {
                let p = match slot {
                    Slot::Code(p) if p.target != Target::None => p,
                    _ => continue,
                };
                let target = match p.target {
                    Target::Block(b) => match addrs.blocks.get(&b) {
                        Some(a) => *a,
                        None => fail!("branch to block {} which is not laid out", b),
                    },
                    Target::Payload(k) => addrs.payloads[k],
                    Target::None => continue,
                };
                p.insn.branch_offset = Some(target as i64 - addrs.slots[i] as i64);
                if !p.opcode().format.is_compatible(&p.insn) {
                    p.choice = select(&p.insn, &p.candidates, p.choice + 1)?;
                    trace!("widened branch at 0x{:x} to {}", addrs.slots[i], p.opcode().name);
                    widened = true;
                }
            }
            if !widened {
                trace!("branches sized after {} rounds", rounds);
                return Ok(());
            }
        }
    }

    fn finish(self) -> Result<Assembly, DexError> {
        let addrs = self.addresses();
        let (api, art) = (self.options.api_level, self.options.art_version);
        let mut code: Vec<u16> = Vec::with_capacity(addrs.code_end as usize);
        let mut instructions = Vec::new();
        let mut local_events = Vec::new();
        let mut positions: Vec<PositionEntry> = Vec::new();

        for (slot, address) in self.slots.into_iter().zip(addrs.slots.iter().copied()) {
            match slot {
                Slot::Code(p) => {
                    let op = p.opcode();
                    let value = match op.get_opcode_value(api, art) {
                        Some(v) => v,
                        None => fail!("{} has no value at api {}", op.name, api),
                    };
                    op.format.write_to(value as u8, &p.insn, &mut code)?;
                    if code.len() as u32 != address + op.format.code_size() {
                        fail!("{} at 0x{:x} wrote {} units", op.name, address, code.len() as u32 - address);
                    }
                    instructions.push(PlacedInsn { address, opcode: op, insn: p.insn });
                }
                Slot::Block(_) => {}
                Slot::Local { reg, kind, local } => local_events.push(LocalEvent { address, reg, kind, local }),
                Slot::Line(line) => match positions.last_mut() {
                    Some(last) if last.address == address => last.line = line,
                    Some(last) if last.line == line => {}
                    _ => positions.push(PositionEntry { address, line }),
                },
            }
        }

        for (draft, start) in self.payloads.iter().zip(addrs.payloads.iter().copied()) {
            // nop padding up to the aligned payload start
            code.resize(start as usize, 0);
            write_payload(draft, addrs.slots[draft.owner], &addrs.blocks, &mut code)?;
        }

        let mut registers = instructions.iter().map(|p| p.insn.registers_used()).max().unwrap_or(0);
        for var in self.defs.vars() {
            if let Some(def) = self.defs.def(*var) {
                registers = registers.max(var.reg as u32 + def.ty.category() as u32);
            }
        }
        if registers > u16::MAX as u32 {
            return Err(DexError::capacity(CapacityOverflow {
                opcode: "registers_size".to_string(),
                limit: OverflowLimit::Register { register: registers - 1 },
            }));
        }
        let outs = instructions
            .iter()
            .filter(|p| p.insn.family.is_invoke())
            .map(|p| p.insn.register_words())
            .max()
            .unwrap_or(0);

        debug!(
            "assembled {} instructions into {} code units ({} registers, {} outs)",
            instructions.len(),
            code.len(),
            registers,
            outs
        );
        Ok(Assembly {
            code,
            instructions,
            block_addresses: addrs.blocks,
            local_events,
            positions,
            registers_size: registers as u16,
            outs_size: outs as u16,
            code_end: addrs.code_end,
        })
    }
}
