//! Emulator and source-level debugger for the Cucaracha CPU.
//!
//! The crate is layered bottom-up: the [`interpreter`] executes instructions
//! defined by the `cucaracha-asm` crate, the [`debugger`] adds breakpoints,
//! watchpoints and interruption on top of it, the [`runner`] loads resolved
//! programs and reconstructs call stacks, and the [`controller`] orchestrates
//! the user-visible commands over an abstract [`ui`] contract. Programs enter
//! the system through the [`parser`] (native assembly or ELF32 objects with
//! optional DWARF debug info) and the [`resolver`].

pub mod config;
pub mod consts;
pub mod controller;
pub mod debug;
pub mod debugger;
pub mod error;
pub mod eval;
pub mod interpreter;
pub mod parser;
pub mod program;
pub mod resolver;
pub mod runner;
pub mod state;
pub mod ui;

pub mod prelude {
    //! Re-exports of the types most callers need.

    pub use cucaracha_asm::{regs, Condition, Flags, Instruction, Opcode, RegisterId, Word};

    pub use crate::config::{DebugConfig, LayoutConfig, MachineConfig};
    pub use crate::controller::Controller;
    pub use crate::debug::{Breakpoint, Watchpoint, WatchpointKind};
    pub use crate::debugger::{Debugger, InterruptHandle};
    pub use crate::error::{
        DebuggerError, EvalError, ExecuteError, ParseError, ResolveError, VmError,
    };
    pub use crate::eval::Evaluator;
    pub use crate::interpreter::Machine;
    pub use crate::parser::{
        parse_assembly_file, parse_assembly_source, parse_object_bytes, parse_object_file,
    };
    pub use crate::program::{Global, GlobalKind, ProgramFile, SymbolRef, SymbolUsage};
    pub use crate::resolver::resolve;
    pub use crate::runner::{Frame, Runner};
    pub use crate::state::{RunResult, StopReason};
    pub use crate::ui::{DebugEvent, Severity, Ui, View};
}
