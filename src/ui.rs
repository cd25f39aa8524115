//! Outbound contract between the debug controller and a user interface.
//!
//! The contract is synchronous: every call completes before the controller
//! proceeds. The controller emits typed events for execution milestones and
//! structured views for everything it wants displayed; how they are
//! rendered is entirely the UI's business.

use crate::debug::{Breakpoint, Watchpoint};
use crate::runner::Frame;

use cucaracha_asm::Word;

use std::io;

/// Message severity for free-form notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Informational.
    Info,
    /// An operation succeeded.
    Success,
    /// Something looks wrong but execution can proceed.
    Warning,
    /// An operation failed.
    Error,
    /// Diagnostic noise.
    Debug,
}

/// Typed execution events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// Execution stopped on a breakpoint.
    BreakpointHit {
        /// Registry id.
        id: u32,
        /// Breakpoint address.
        address: Word,
    },
    /// Execution stopped on a watchpoint.
    WatchpointHit {
        /// Registry id.
        id: u32,
        /// Watched address.
        address: Word,
        /// Value observed at the trigger.
        value: Word,
    },
    /// The program reached a termination address.
    Terminated {
        /// The program's exit value (`r0`).
        exit_code: Word,
    },
    /// The machine halted.
    Halted,
    /// Execution failed.
    ExecutionError {
        /// Human-readable description.
        message: String,
    },
    /// The current source position differs from the last reported one.
    SourceLocationChanged {
        /// Source file.
        file: String,
        /// 1-based line.
        line: usize,
    },
    /// Execution was interrupted from outside.
    Interrupted,
    /// The pacing loop fell behind its nominal schedule.
    Lagging {
        /// Lag in cycles.
        cycles: u64,
    },
}

/// A structured view the controller asks the UI to display.
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    /// Named registers and their values.
    Registers(Vec<(String, Word)>),
    /// A memory window.
    Memory {
        /// First displayed address.
        base: Word,
        /// Window contents.
        bytes: Vec<u8>,
        /// Region annotations as `(start address, name)`.
        annotations: Vec<(Word, String)>,
    },
    /// Disassembled instructions.
    Disassembly {
        /// `(address, rendered instruction)` pairs.
        lines: Vec<(Word, String)>,
        /// Address to highlight, normally the program counter.
        current: Option<Word>,
    },
    /// The breakpoint registry.
    Breakpoints(Vec<Breakpoint>),
    /// The watchpoint registry.
    Watchpoints(Vec<Watchpoint>),
    /// The raw reconstructed stack.
    Stack {
        /// Frames in unwind order.
        frames: Vec<Frame>,
    },
    /// The reconstructed stack with a selected frame.
    Backtrace {
        /// Frames in unwind order.
        frames: Vec<Frame>,
        /// Index of the selected frame.
        selected: usize,
    },
    /// Source text around the current position.
    Source {
        /// Source file.
        file: String,
        /// `(1-based line number, text)` pairs.
        lines: Vec<(usize, String)>,
        /// Line to highlight.
        current: Option<usize>,
    },
    /// Variables visible at the selected frame.
    Variables(Vec<(String, Option<Word>)>),
    /// Result of an expression evaluation.
    EvalResult {
        /// The evaluated expression.
        expression: String,
        /// Its value.
        value: Word,
    },
    /// Command summary.
    Help(String),
    /// A free-form message.
    Message {
        /// How loud.
        severity: Severity,
        /// The text.
        text: String,
    },
}

/// The UI surface the controller drives.
pub trait Ui {
    /// Deliver a typed event.
    fn event(&mut self, event: &DebugEvent);

    /// Display a structured view.
    fn show(&mut self, view: &View);

    /// Request one line of input.
    fn read_line(&mut self, prompt: &str) -> io::Result<String>;

    /// Request a yes/no confirmation.
    fn confirm(&mut self, prompt: &str) -> io::Result<bool>;

    /// Current terminal size as `(columns, rows)`.
    fn size(&self) -> (u16, u16);

    /// Size change since the last call, if the terminal was resized.
    fn take_resize(&mut self) -> Option<(u16, u16)> {
        None
    }
}

/// A UI that records everything it is told; the controller tests use it,
/// and headless tools can too.
#[derive(Debug, Default)]
pub struct RecordingUi {
    /// Events received, in order.
    pub events: Vec<DebugEvent>,
    /// Views received, in order.
    pub views: Vec<View>,
    /// Lines fed to `read_line`, consumed front to back.
    pub input: Vec<String>,
}

impl Ui for RecordingUi {
    fn event(&mut self, event: &DebugEvent) {
        self.events.push(event.clone());
    }

    fn show(&mut self, view: &View) {
        self.views.push(view.clone());
    }

    fn read_line(&mut self, _prompt: &str) -> io::Result<String> {
        if self.input.is_empty() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no more input"));
        }

        Ok(self.input.remove(0))
    }

    fn confirm(&mut self, _prompt: &str) -> io::Result<bool> {
        Ok(true)
    }

    fn size(&self) -> (u16, u16) {
        (80, 24)
    }
}
