//! Serialized `debug_info_item`: header plus the DBG state-machine program.

use std::collections::BTreeMap;

use log::trace;

use crate::dex::assembler::IndexResolver;
use crate::dex::debug_info::{DebugInfo, LocalEvent, LocalEventKind, PositionEntry};
use crate::dex::error::DexError;
use crate::dex::{read_sleb128, read_u1, read_uleb128, read_uleb128p1, write_sleb128, write_u1, write_uleb128, write_uleb128p1};
use crate::ir::LocalInfo;

pub const DBG_END_SEQUENCE: u8 = 0x00;
pub const DBG_ADVANCE_PC: u8 = 0x01;
pub const DBG_ADVANCE_LINE: u8 = 0x02;
pub const DBG_START_LOCAL: u8 = 0x03;
pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
pub const DBG_END_LOCAL: u8 = 0x05;
pub const DBG_RESTART_LOCAL: u8 = 0x06;
pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
pub const DBG_SET_FILE: u8 = 0x09;
pub const DBG_FIRST_SPECIAL: u8 = 0x0a;
pub const DBG_LINE_BASE: i32 = -4;
pub const DBG_LINE_RANGE: i32 = 15;

/// One decoded instruction of the debug program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugOp {
    AdvancePc(u32),
    AdvanceLine(i32),
    StartLocal { reg: u32, name: Option<u32>, ty: Option<u32>, signature: Option<u32> },
    EndLocal(u32),
    RestartLocal(u32),
    PrologueEnd,
    EpilogueBegin,
    SetFile(Option<u32>),
    /// Advances both registers and emits a position entry.
    Special { address_delta: u32, line_delta: i32 },
}

fn index_or_none(idx: i32) -> Option<u32> {
    if idx < 0 { None } else { Some(idx as u32) }
}

fn write_index(bytes: &mut Vec<u8>, idx: Option<u32>) -> usize {
    write_uleb128p1(bytes, idx.map_or(-1, |i| i as i32))
}

impl DebugOp {
    /// Reads one op. Returns `None` at `DBG_END_SEQUENCE`.
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Option<DebugOp>, DexError>
    {
        let op = read_u1(bytes, ix)?;
        let decoded = match op {
            DBG_END_SEQUENCE => return Ok(None),
            DBG_ADVANCE_PC => DebugOp::AdvancePc(read_uleb128(bytes, ix)?),
            DBG_ADVANCE_LINE => DebugOp::AdvanceLine(read_sleb128(bytes, ix)?),
            DBG_START_LOCAL => DebugOp::StartLocal {
                reg: read_uleb128(bytes, ix)?,
                name: index_or_none(read_uleb128p1(bytes, ix)?),
                ty: index_or_none(read_uleb128p1(bytes, ix)?),
                signature: None,
            },
            DBG_START_LOCAL_EXTENDED => DebugOp::StartLocal {
                reg: read_uleb128(bytes, ix)?,
                name: index_or_none(read_uleb128p1(bytes, ix)?),
                ty: index_or_none(read_uleb128p1(bytes, ix)?),
                signature: index_or_none(read_uleb128p1(bytes, ix)?),
            },
            DBG_END_LOCAL => DebugOp::EndLocal(read_uleb128(bytes, ix)?),
            DBG_RESTART_LOCAL => DebugOp::RestartLocal(read_uleb128(bytes, ix)?),
            DBG_SET_PROLOGUE_END => DebugOp::PrologueEnd,
            DBG_SET_EPILOGUE_BEGIN => DebugOp::EpilogueBegin,
            DBG_SET_FILE => DebugOp::SetFile(index_or_none(read_uleb128p1(bytes, ix)?)),
            special => {
                let adjusted = (special - DBG_FIRST_SPECIAL) as i32;
                DebugOp::Special {
                    address_delta: (adjusted / DBG_LINE_RANGE) as u32,
                    line_delta: DBG_LINE_BASE + adjusted % DBG_LINE_RANGE,
                }
            }
        };
        Ok(Some(decoded))
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        match self {
            DebugOp::AdvancePc(delta) => write_u1(bytes, DBG_ADVANCE_PC) + write_uleb128(bytes, *delta),
            DebugOp::AdvanceLine(delta) => write_u1(bytes, DBG_ADVANCE_LINE) + write_sleb128(bytes, *delta),
            DebugOp::StartLocal { reg, name, ty, signature: None } => {
                write_u1(bytes, DBG_START_LOCAL)
                    + write_uleb128(bytes, *reg)
                    + write_index(bytes, *name)
                    + write_index(bytes, *ty)
            }
            DebugOp::StartLocal { reg, name, ty, signature } => {
                write_u1(bytes, DBG_START_LOCAL_EXTENDED)
                    + write_uleb128(bytes, *reg)
                    + write_index(bytes, *name)
                    + write_index(bytes, *ty)
                    + write_index(bytes, *signature)
            }
            DebugOp::EndLocal(reg) => write_u1(bytes, DBG_END_LOCAL) + write_uleb128(bytes, *reg),
            DebugOp::RestartLocal(reg) => write_u1(bytes, DBG_RESTART_LOCAL) + write_uleb128(bytes, *reg),
            DebugOp::PrologueEnd => write_u1(bytes, DBG_SET_PROLOGUE_END),
            DebugOp::EpilogueBegin => write_u1(bytes, DBG_SET_EPILOGUE_BEGIN),
            DebugOp::SetFile(idx) => write_u1(bytes, DBG_SET_FILE) + write_index(bytes, *idx),
            DebugOp::Special { address_delta, line_delta } => {
                let adjusted = (line_delta - DBG_LINE_BASE) + DBG_LINE_RANGE * *address_delta as i32;
                write_u1(bytes, DBG_FIRST_SPECIAL + adjusted as u8)
            }
        }
    }
}

/// Largest address step a special opcode can carry together with `line_delta`.
fn special_fits(address_delta: u32, line_delta: i32) -> bool {
    (DBG_LINE_BASE..DBG_LINE_BASE + DBG_LINE_RANGE).contains(&line_delta)
        && (line_delta - DBG_LINE_BASE) as i64 + DBG_LINE_RANGE as i64 * address_delta as i64
            <= (u8::MAX - DBG_FIRST_SPECIAL) as i64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfoItem
{
    pub line_start: u32,
    pub parameter_names: Vec<Option<u32>>,
    pub ops: Vec<DebugOp>,
}

impl DebugInfoItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<DebugInfoItem, DexError>
    {
        let line_start = read_uleb128(bytes, ix)?;
        let parameters_size = read_uleb128(bytes, ix)?;
        let mut parameter_names = Vec::with_capacity(parameters_size as usize);
        for _ in 0..parameters_size {
            parameter_names.push(index_or_none(read_uleb128p1(bytes, ix)?));
        }
        let mut ops = Vec::new();
        while let Some(op) = DebugOp::read(bytes, ix)? {
            ops.push(op);
        }
        Ok(DebugInfoItem { line_start, parameter_names, ops })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_uleb128(bytes, self.line_start);
        c += write_uleb128(bytes, self.parameter_names.len() as u32);
        for p in &self.parameter_names {
            c += write_index(bytes, *p);
        }
        for op in &self.ops {
            c += op.write(bytes);
        }
        c += write_u1(bytes, DBG_END_SEQUENCE);
        c
    }

    /// Runs the state machine and returns the position table it describes.
    pub fn positions(&self) -> Vec<PositionEntry>
    {
        let mut address = 0u32;
        let mut line = self.line_start as i64;
        let mut out = Vec::new();
        for op in &self.ops {
            match op {
                DebugOp::AdvancePc(delta) => address += delta,
                DebugOp::AdvanceLine(delta) => line += *delta as i64,
                DebugOp::Special { address_delta, line_delta } => {
                    address += address_delta;
                    line += *line_delta as i64;
                    out.push(PositionEntry { address, line: line as u32 });
                }
                _ => {}
            }
        }
        out
    }
}

struct OpWriter<'a> {
    resolver: &'a dyn IndexResolver,
    ops: Vec<DebugOp>,
    address: u32,
    line: i64,
    /// Locals currently started, and the last local ended, per register.
    live: BTreeMap<u16, LocalInfo>,
    ended: BTreeMap<u16, LocalInfo>,
}

impl OpWriter<'_> {
    fn advance_to(&mut self, address: u32) -> Result<(), DexError> {
        if address < self.address {
            fail!("debug event at 0x{:x} after 0x{:x}", address, self.address);
        }
        if address > self.address {
            self.ops.push(DebugOp::AdvancePc(address - self.address));
            self.address = address;
        }
        Ok(())
    }

    fn position(&mut self, entry: &PositionEntry) -> Result<(), DexError> {
        if entry.address < self.address {
            fail!("line {} at 0x{:x} after 0x{:x}", entry.line, entry.address, self.address);
        }
        let mut address_delta = entry.address - self.address;
        let mut line_delta = (entry.line as i64 - self.line) as i32;
        if !(DBG_LINE_BASE..DBG_LINE_BASE + DBG_LINE_RANGE).contains(&line_delta) {
            self.ops.push(DebugOp::AdvanceLine(line_delta));
            line_delta = 0;
        }
        if !special_fits(address_delta, line_delta) {
            self.ops.push(DebugOp::AdvancePc(address_delta));
            address_delta = 0;
        }
        self.ops.push(DebugOp::Special { address_delta, line_delta });
        self.address = entry.address;
        self.line = entry.line as i64;
        Ok(())
    }

    fn start_op(&self, reg: u16, local: &LocalInfo) -> Result<DebugOp, DexError> {
        let signature = match &local.signature {
            Some(sig) => Some(self.resolver.string_index(sig)?),
            None => None,
        };
        Ok(DebugOp::StartLocal {
            reg: reg as u32,
            name: Some(self.resolver.string_index(&local.name)?),
            ty: Some(self.resolver.type_index(&local.descriptor)?),
            signature,
        })
    }

    fn event(&mut self, event: &LocalEvent) -> Result<(), DexError> {
        let reg = event.reg;
        match (event.kind, &event.local) {
            // Parameters are named through the header; only generic ones need an op.
            (LocalEventKind::Param, Some(local)) => {
                if local.signature.is_some() {
                    self.advance_to(event.address)?;
                    let op = self.start_op(reg, local)?;
                    self.ops.push(op);
                }
                self.live.insert(reg, local.clone());
            }
            (LocalEventKind::Start, Some(local)) => {
                self.advance_to(event.address)?;
                let restart = self.ended.get(&reg).is_some_and(|l| l.same_variable(local)) && !self.live.contains_key(&reg);
                let op = if restart { DebugOp::RestartLocal(reg as u32) } else { self.start_op(reg, local)? };
                self.ops.push(op);
                self.live.insert(reg, local.clone());
            }
            (LocalEventKind::Start, None) | (LocalEventKind::End, _) => {
                if let Some(local) = self.live.remove(&reg) {
                    self.advance_to(event.address)?;
                    self.ops.push(DebugOp::EndLocal(reg as u32));
                    self.ended.insert(reg, local);
                }
            }
            (LocalEventKind::Param, None) => {}
        }
        Ok(())
    }
}

/// Serializes the line table and local events of `info`.
///
/// Returns `None` when there is nothing to describe. Positions sort before local events
/// at the same address.
pub fn encode_debug_info(
    info: &DebugInfo,
    parameter_names: &[Option<String>],
    resolver: &dyn IndexResolver,
) -> Result<Option<DebugInfoItem>, DexError>
{
    if info.is_empty() && parameter_names.iter().all(Option::is_none) {
        return Ok(None);
    }

    let mut names = Vec::with_capacity(parameter_names.len());
    for name in parameter_names {
        names.push(match name {
            Some(n) => Some(resolver.string_index(n)?),
            None => None,
        });
    }

    let positions = info.positions();
    let line_start = positions.first().map_or(0, |p| p.line);
    let mut writer = OpWriter {
        resolver,
        ops: Vec::new(),
        address: 0,
        line: line_start as i64,
        live: BTreeMap::new(),
        ended: BTreeMap::new(),
    };

    let mut lines = positions.iter().peekable();
    let mut events = info.events().iter().peekable();
    loop {
        let take_line = match (lines.peek(), events.peek()) {
            (Some(line), Some(event)) => line.address <= event.address,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        if take_line {
            if let Some(line) = lines.next() {
                writer.position(line)?;
            }
        } else if let Some(event) = events.next() {
            writer.event(event)?;
        }
    }

    trace!("debug program: {} ops, line_start {}", writer.ops.len(), line_start);
    Ok(Some(DebugInfoItem { line_start, parameter_names: names, ops: writer.ops }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestPool;

    fn pos(address: u32, line: u32) -> PositionEntry {
        PositionEntry { address, line }
    }

    fn event(address: u32, reg: u16, kind: LocalEventKind, local: Option<LocalInfo>) -> LocalEvent {
        LocalEvent { address, reg, kind, local }
    }

    #[test]
    fn special_opcode_arithmetic() {
        let mut bytes = vec![];
        DebugOp::Special { address_delta: 2, line_delta: 1 }.write(&mut bytes);
        assert_eq!(bytes, vec![DBG_FIRST_SPECIAL + 5 + 30]);
        let mut ix = 0;
        assert_eq!(
            DebugOp::read(&bytes, &mut ix).expect("read"),
            Some(DebugOp::Special { address_delta: 2, line_delta: 1 })
        );
    }

    #[test]
    fn line_table_survives_large_jumps() {
        let info = DebugInfo::build(vec![], vec![pos(0, 10), pos(3, 11), pos(40, 200), pos(41, 5)]);
        let item = encode_debug_info(&info, &[], &TestPool::new()).expect("encode").expect("item");
        assert_eq!(item.line_start, 10);
        assert_eq!(item.positions(), info.positions());
        assert!(item.ops.contains(&DebugOp::AdvanceLine(189)));

        let mut bytes = vec![];
        let written = item.write(&mut bytes);
        assert_eq!(written, bytes.len());
        let mut ix = 0;
        assert_eq!(DebugInfoItem::read(&bytes, &mut ix).expect("read"), item);
        assert_eq!(ix, bytes.len());
    }

    #[test]
    fn locals_become_start_end_and_restart() {
        let pool = TestPool::new();
        let i = LocalInfo::new("i", "I");
        let info = DebugInfo::build(
            vec![
                event(2, 1, LocalEventKind::Start, Some(i.clone())),
                event(6, 1, LocalEventKind::End, None),
                event(8, 1, LocalEventKind::Start, Some(i.clone())),
                event(9, 1, LocalEventKind::Start, None),
            ],
            vec![pos(0, 3)],
        );
        let item = encode_debug_info(&info, &[], &pool).expect("encode").expect("item");
        let name = pool.string_index("i").expect("name");
        let ty = pool.type_index("I").expect("type");
        assert_eq!(
            item.ops,
            vec![
                DebugOp::Special { address_delta: 0, line_delta: 0 },
                DebugOp::AdvancePc(2),
                DebugOp::StartLocal { reg: 1, name: Some(name), ty: Some(ty), signature: None },
                DebugOp::AdvancePc(4),
                DebugOp::EndLocal(1),
                DebugOp::AdvancePc(2),
                DebugOp::RestartLocal(1),
                DebugOp::AdvancePc(1),
                DebugOp::EndLocal(1),
            ]
        );
    }

    #[test]
    fn parameter_names_in_header() {
        let pool = TestPool::new();
        let this = LocalInfo::new("this", "LFoo;");
        let xs = LocalInfo::new("xs", "Ljava/util/List;").with_signature("Ljava/util/List<LFoo;>;");
        let info = DebugInfo::build(
            vec![event(0, 2, LocalEventKind::Param, Some(this)), event(0, 3, LocalEventKind::Param, Some(xs))],
            vec![],
        );
        let item = encode_debug_info(&info, &[Some("xs".to_string()), None], &pool).expect("encode").expect("item");
        assert_eq!(item.parameter_names, vec![Some(pool.string_index("xs").expect("name")), None]);
        // Only the generic parameter needs an explicit start.
        assert_eq!(item.ops.len(), 1);
        assert!(matches!(item.ops[0], DebugOp::StartLocal { reg: 3, signature: Some(_), .. }));
    }

    #[test]
    fn nothing_to_describe() {
        assert_eq!(encode_debug_info(&DebugInfo::default(), &[None], &TestPool::new()).expect("encode"), None);
    }
}
