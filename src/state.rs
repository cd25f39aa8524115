//! Execution-state representation shared by the interpreter and the
//! debugger.

use crate::error::ExecuteError;

use cucaracha_asm::Word;

/// Resulting state of a single executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecuteState {
    /// The machine should proceed normally.
    Proceed,
    /// The machine proceeded but the pacing loop is behind its nominal
    /// schedule. Execution is not paused.
    Lagging {
        /// How far behind, in cycles.
        cycles: u64,
    },
}

impl ExecuteState {
    /// Lag carried by this state, if any.
    pub const fn lag(&self) -> Option<u64> {
        match self {
            Self::Proceed => None,
            Self::Lagging { cycles } => Some(*cycles),
        }
    }
}

impl Default for ExecuteState {
    fn default() -> Self {
        Self::Proceed
    }
}

/// Why a step/continue/run invocation returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum StopReason {
    /// Nothing executed yet.
    None,
    /// A single step completed.
    Step,
    /// An enabled breakpoint was reached.
    Breakpoint,
    /// A watched memory window changed.
    Watchpoint,
    /// The machine halted.
    Halt,
    /// Execution failed; see [`RunResult::error`].
    Error,
    /// A termination address was reached; the program exited normally.
    Termination,
    /// The supplied step cap was exhausted.
    MaxSteps,
    /// An external interrupt was raised.
    Interrupt,
}

impl Default for StopReason {
    fn default() -> Self {
        Self::None
    }
}

impl StopReason {
    /// Whether a continue/run loop should keep iterating after a step with
    /// this reason.
    pub const fn is_step(&self) -> bool {
        matches!(self, Self::Step)
    }
}

/// Uniform result of every execution entry point of the debugger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Why execution returned.
    pub stop_reason: StopReason,
    /// Instructions executed by this invocation.
    pub steps_executed: u64,
    /// Cycles accumulated by this invocation.
    pub cycles_executed: u64,
    /// Program counter after the last executed instruction.
    pub last_pc: Word,
    /// Breakpoint that caused the stop, if any.
    pub breakpoint_id: Option<u32>,
    /// Watchpoint that caused the stop, if any.
    pub watchpoint_id: Option<u32>,
    /// Execution error, when `stop_reason` is [`StopReason::Error`].
    pub error: Option<ExecuteError>,
    /// The pacing loop fell behind during this invocation.
    pub lagging: bool,
    /// Greatest observed lag, in cycles.
    pub lag_cycles: u64,
}

impl RunResult {
    pub(crate) fn merge_lag(&mut self, lag: Option<u64>) {
        if let Some(cycles) = lag {
            self.lagging = true;
            self.lag_cycles = self.lag_cycles.max(cycles);
        }
    }
}
