//! Error taxonomy of the emulator and its front-ends.
//!
//! Each layer owns one error enum; everything converges into [`VmError`] at
//! the crate surface. Execution errors never leave the machine in a
//! half-mutated state: the execute paths check their preconditions before
//! writing anything.

use cucaracha_asm::{InvalidOpcode, Word};

use std::io;
use thiserror::Error;

/// Failure while fetching, decoding or executing a single instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
    /// The machine is halted and cannot step.
    #[error("the machine is halted")]
    Halted,
    /// The program counter points outside memory.
    #[error("instruction fetch out of bounds at 0x{pc:08x}")]
    PcOutOfBounds {
        /// Failing program counter.
        pc: Word,
    },
    /// The fetched word carries no known opcode.
    #[error(transparent)]
    UnknownOpcode(#[from] InvalidOpcode),
    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// A data access fell outside memory.
    #[error("memory access out of bounds: 0x{addr:08x}+{size}")]
    MemoryAccess {
        /// Base address of the access.
        addr: Word,
        /// Access width in bytes.
        size: usize,
    },
    /// The conditional jump carries an undefined condition code.
    #[error("invalid condition code {0}")]
    InvalidCondition(u32),
}

/// Misuse of the debugger surface. Execution state is untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebuggerError {
    /// No breakpoint registered under this id.
    #[error("unknown breakpoint id {0}")]
    UnknownBreakpoint(u32),
    /// No watchpoint registered under this id.
    #[error("unknown watchpoint id {0}")]
    UnknownWatchpoint(u32),
    /// Not an architectural register name.
    #[error("unknown register {0:?}")]
    UnknownRegister(String),
    /// Watchpoints observe 1, 2 or 4 bytes.
    #[error("invalid watchpoint size {0}; expected 1, 2 or 4")]
    InvalidWatchSize(usize),
    /// An inspection access fell outside memory.
    #[error("memory access out of bounds: 0x{addr:08x}+{size}")]
    MemoryAccess {
        /// Base address of the access.
        addr: Word,
        /// Access width in bytes.
        size: usize,
    },
}

/// Failure while assigning addresses and resolving symbols.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A symbol reference has no known target.
    #[error("unresolved symbol {name:?}")]
    UnknownSymbol {
        /// Referenced name.
        name: String,
    },
    /// Code plus data exceed the configured maximum.
    #[error("program needs {required} bytes but the layout allows {max}")]
    ProgramTooLarge {
        /// Bytes the program requires.
        required: Word,
        /// Configured limit.
        max: Word,
    },
    /// The layout configuration is unusable.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
}

/// Failure while parsing assembly text or a binary object.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Malformed assembly input.
    #[error("line {line}: {message}")]
    Syntax {
        /// 1-based source line.
        line: usize,
        /// What went wrong.
        message: String,
    },
    /// Malformed ELF object.
    #[error("malformed ELF object: {0}")]
    Elf(String),
    /// Malformed DWARF debug data.
    #[error("malformed DWARF data: {0}")]
    Dwarf(String),
}

impl ParseError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// Failure while evaluating a debugger expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The input contains a character no token starts with.
    #[error("unexpected character {0:?}")]
    BadToken(char),
    /// A number literal does not parse.
    #[error("malformed number {0:?}")]
    BadNumber(String),
    /// The expression ended where a value was expected.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// Something other than the expected token appeared.
    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),
    /// A `[` or `(` was never closed.
    #[error("unbalanced {0:?}")]
    Unbalanced(char),
    /// The identifier resolves to neither variable, function, global nor
    /// label.
    #[error("unknown symbol {0:?}")]
    UnknownSymbol(String),
    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// A memory dereference fell outside memory.
    #[error("cannot read memory at 0x{0:08x}")]
    Memory(Word),
}

/// Top-level error of the crate.
#[derive(Debug, Error)]
pub enum VmError {
    /// Instruction execution failed.
    #[error("execution error: {0}")]
    Execute(#[from] ExecuteError),
    /// Debugger misuse.
    #[error("debugger error: {0}")]
    Debugger(#[from] DebuggerError),
    /// Resolution failed; the program was not loaded.
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),
    /// Parsing failed; no program was produced.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    /// Expression evaluation failed.
    #[error("eval error: {0}")]
    Eval(#[from] EvalError),
    /// I/O and OS related errors.
    #[error("unrecoverable error: {0}")]
    Io(#[from] io::Error),
}
