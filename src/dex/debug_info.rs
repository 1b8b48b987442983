//! Local-variable intervals and the line table of one method.
//!
//! Events come from the assembler at final code addresses. Intervals are kept in
//! line space: an event at address `a` is attributed to the line of `a - 1`.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::ir::LocalInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalEventKind {
    /// A parameter, live from address 0. Named through the parameter list.
    Param,
    Start,
    End,
}

/// A register starting or ending a local at a code address.
///
/// A `Start` without a local means the register was overwritten by a value that
/// belongs to no local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEvent {
    pub address: u32,
    pub reg: u16,
    pub kind: LocalEventKind,
    pub local: Option<LocalInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionEntry {
    pub address: u32,
    pub line: u32,
}

/// Closed range of lines. `pending` counts opens that have not been closed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
    pub pending: u32,
}

impl Interval {
    fn open(line: i64) -> Self {
        Interval { start: line, end: line, pending: 1 }
    }

    pub fn contains(&self, line: i64) -> bool {
        self.start <= line && line <= self.end
    }

    /// Widens the interval to cover `limit`.
    pub fn augment(&mut self, limit: i64) {
        self.start = self.start.min(limit);
        self.end = self.end.max(limit);
    }

    pub fn is_closed(&self) -> bool {
        self.pending == 0
    }
}

/// Identifies a local across registers: its name and its signature, or its
/// descriptor when it has none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalKey {
    pub name: String,
    pub ty: String,
}

impl LocalKey {
    pub fn of(local: &LocalInfo) -> Self {
        LocalKey { name: local.name.clone(), ty: local.signature.clone().unwrap_or_else(|| local.descriptor.clone()) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    pub local: LocalInfo,
    pub intervals: Vec<Interval>,
}

impl LocalVar {
    fn open(&mut self, line: i64) {
        match self.intervals.last_mut() {
            Some(last) if last.pending > 0 || last.contains(line) => {
                last.augment(line);
                last.pending += 1;
            }
            _ => self.intervals.push(Interval::open(line)),
        }
    }

    fn close(&mut self, line: i64) {
        if let Some(last) = self.intervals.iter_mut().rev().find(|i| i.pending > 0) {
            last.augment(line);
            last.pending -= 1;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    positions: Vec<PositionEntry>,
    events: Vec<LocalEvent>,
    locals: BTreeMap<LocalKey, LocalVar>,
    implicit_closes: usize,
}

impl DebugInfo {
    /// Builds the line table and local intervals.
    ///
    /// A register that starts a new value while still holding a local closes that
    /// local at the new start's line.
    pub fn build(mut events: Vec<LocalEvent>, mut positions: Vec<PositionEntry>) -> DebugInfo {
        if positions.windows(2).any(|w| w[1].address < w[0].address) {
            warn!("line markers out of address order, sorting");
            positions.sort_by_key(|p| p.address);
        }
        events.sort_by_key(|e| e.address);

        let mut info = DebugInfo { positions, events: Vec::new(), locals: BTreeMap::new(), implicit_closes: 0 };
        let mut slots: BTreeMap<u16, LocalKey> = BTreeMap::new();

        for event in &events {
            let line = info.line_at(event.address as i64 - 1);
            match event.kind {
                LocalEventKind::Param | LocalEventKind::Start => {
                    if let Some(prev) = slots.remove(&event.reg) {
                        debug!("v{} reused at 0x{:x} without ending {}", event.reg, event.address, prev.name);
                        info.implicit_closes += 1;
                        info.close(&prev, line);
                    }
                    if let Some(local) = &event.local {
                        let key = LocalKey::of(local);
                        info.locals
                            .entry(key.clone())
                            .or_insert_with(|| LocalVar { local: local.clone(), intervals: Vec::new() })
                            .open(line);
                        slots.insert(event.reg, key);
                    }
                }
                LocalEventKind::End => {
                    let key = slots.remove(&event.reg).or_else(|| event.local.as_ref().map(LocalKey::of));
                    if let Some(key) = key {
                        info.close(&key, line);
                    }
                }
            }
        }

        let max_line = info.max_line();
        for var in info.locals.values_mut() {
            for interval in var.intervals.iter_mut().filter(|i| i.pending > 0) {
                interval.augment(max_line);
                interval.pending = 0;
            }
        }
        info.events = events;
        info
    }

    fn close(&mut self, key: &LocalKey, line: i64) {
        if let Some(var) = self.locals.get_mut(key) {
            var.close(line);
        }
    }

    /// Line of the last marker at or before `address`, else the first marker's line,
    /// else -1.
    pub fn line_at(&self, address: i64) -> i64 {
        let n = self.positions.partition_point(|p| p.address as i64 <= address);
        match n {
            0 => self.positions.first().map_or(-1, |p| p.line as i64),
            _ => self.positions[n - 1].line as i64,
        }
    }

    /// Largest line in the table, or the largest interval bound when there are no lines.
    pub fn max_line(&self) -> i64 {
        match self.positions.iter().map(|p| p.line as i64).max() {
            Some(line) => line,
            None => self.locals.values().flat_map(|v| v.intervals.iter().map(|i| i.end)).max().unwrap_or(-1),
        }
    }

    pub fn positions(&self) -> &[PositionEntry] {
        &self.positions
    }

    pub fn events(&self) -> &[LocalEvent] {
        &self.events
    }

    pub fn locals(&self) -> impl Iterator<Item = &LocalVar> {
        self.locals.values()
    }

    pub fn local(&self, name: &str, ty: &str) -> Option<&LocalVar> {
        self.locals.get(&LocalKey { name: name.to_string(), ty: ty.to_string() })
    }

    /// Registers that were reused while still holding a local.
    pub fn implicit_closes(&self) -> usize {
        self.implicit_closes
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.events.is_empty()
    }
}
