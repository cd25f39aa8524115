//! Breakpoint and watchpoint value types.

use cucaracha_asm::Word;

/// A code breakpoint.
///
/// Ids grow monotonically within a session; removing an entry never frees
/// its id for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Breakpoint {
    /// Registry id.
    pub id: u32,
    /// Code address the breakpoint arms.
    pub address: Word,
    /// Disabled breakpoints are kept but never hit.
    pub enabled: bool,
    /// Times execution stopped here.
    pub hit_count: u64,
}

impl Breakpoint {
    pub(crate) const fn new(id: u32, address: Word) -> Self {
        Self {
            id,
            address,
            enabled: true,
            hit_count: 0,
        }
    }
}

/// What kind of access triggers a watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum WatchpointKind {
    /// Trigger on loads from the watched window.
    Read,
    /// Trigger when the watched value changes.
    Write,
    /// Both of the above.
    ReadWrite,
}

impl WatchpointKind {
    /// Whether the kind observes loads.
    pub const fn watches_reads(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Whether the kind observes stores.
    pub const fn watches_writes(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// A data watchpoint over a 1-, 2- or 4-byte window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Watchpoint {
    /// Registry id; shares the breakpoint id space.
    pub id: u32,
    /// Base address of the watched window.
    pub address: Word,
    /// Window size in bytes: 1, 2 or 4.
    pub size: usize,
    /// Access kind that triggers.
    pub kind: WatchpointKind,
    /// Disabled watchpoints are kept but never hit.
    pub enabled: bool,
    /// Times the watchpoint triggered.
    pub hit_count: u64,
    /// Value observed at the last trigger (or at registration).
    pub last_value: Word,
}

impl Watchpoint {
    pub(crate) const fn new(id: u32, address: Word, size: usize, kind: WatchpointKind, value: Word) -> Self {
        Self {
            id,
            address,
            size,
            kind,
            enabled: true,
            hit_count: 0,
            last_value: value,
        }
    }

    /// Whether `[addr, addr + size)` overlaps the watched window.
    pub fn overlaps(&self, addr: Word, size: usize) -> bool {
        let a_start = self.address as u64;
        let a_end = a_start + self.size as u64;
        let b_start = addr as u64;
        let b_end = b_start + size as u64;

        a_start < b_end && b_start < a_end
    }
}
