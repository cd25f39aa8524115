//! Tunable parameters for the machine, the resolver and the debugger.

use crate::consts::*;

use cucaracha_asm::Word;

/// Construction parameters for a [`crate::interpreter::Machine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct MachineConfig {
    /// Memory size in bytes.
    pub memory_size: usize,
    /// Target execution frequency in Hz. `0` runs unthrottled.
    pub clock_hz: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            clock_hz: 0,
        }
    }
}

/// Memory-layout parameters consumed by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct LayoutConfig {
    /// Address of the first instruction.
    pub base_address: Word,
    /// Upper bound on code + data size. `0` disables the check.
    pub max_size: Word,
    /// Alignment of global data, in bytes.
    pub data_align: Word,
    /// Instruction stride.
    pub instruction_size: Word,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            base_address: DEFAULT_CODE_BASE,
            max_size: 0,
            data_align: 4,
            instruction_size: INSTRUCTION_SIZE as Word,
        }
    }
}

/// Heuristic bounds used by the runner and the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct DebugConfig {
    /// Bytes of stack scanned above `sp` while unwinding.
    pub stack_scan_window: Word,
    /// Most frames the unwinder reports.
    pub max_frames: usize,
    /// Instructions inspected backwards when classifying a branch as a call.
    pub call_backtrack_window: usize,
    /// Instructions a source-line step may execute before warning.
    pub line_step_cap: u64,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            stack_scan_window: 256,
            max_frames: 20,
            call_backtrack_window: 20,
            line_step_cap: 10_000,
        }
    }
}
