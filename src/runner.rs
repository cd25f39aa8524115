//! Program loading and call-stack reconstruction.
//!
//! The runner owns the debugger and the loaded program. Loading writes the
//! encoded instructions and the global initializers into memory, points the
//! machine at the entry function and seeds the termination sentinel into
//! `lr`. The target has no frame pointers, so call stacks are reconstructed
//! heuristically: `lr` gives the first caller and a bounded stack scan finds
//! deeper return addresses; frames beyond the first caller are reported in
//! discovery order, not call order.

use crate::config::DebugConfig;
use crate::consts::{INSTRUCTION_SIZE, REG_GP, REG_LR, TERMINATION_ADDR};
use crate::debugger::Debugger;
use crate::error::VmError;
use crate::program::ProgramFile;
use crate::state::{RunResult, StopReason};

use cucaracha_asm::{Opcode, OperandRole, Word};

use std::collections::HashSet;

use tracing::debug;

/// One reconstructed activation record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame {
    /// Code address the frame stands at.
    pub address: Word,
    /// Enclosing function, when known.
    pub function: Option<String>,
    /// Source file, from debug info.
    pub file: Option<String>,
    /// Source line, from debug info.
    pub line: Option<usize>,
}

/// Loads resolved programs into a [`Debugger`] and reconstructs call
/// stacks.
pub struct Runner {
    debugger: Debugger,
    program: Option<ProgramFile>,
    config: DebugConfig,
}

impl Runner {
    /// Wrap a debugger.
    pub fn new(debugger: Debugger) -> Self {
        Self::with_config(debugger, DebugConfig::default())
    }

    /// Wrap a debugger with explicit heuristic bounds.
    pub fn with_config(debugger: Debugger, config: DebugConfig) -> Self {
        Self {
            debugger,
            program: None,
            config,
        }
    }

    /// The wrapped debugger.
    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    /// Mutable access to the wrapped debugger.
    pub fn debugger_mut(&mut self) -> &mut Debugger {
        &mut self.debugger
    }

    /// The loaded program, when any.
    pub fn program(&self) -> Option<&ProgramFile> {
        self.program.as_ref()
    }

    /// Heuristic bounds in use.
    pub const fn config(&self) -> &DebugConfig {
        &self.config
    }

    /// Load a resolved program.
    ///
    /// Execution starts at `main` when the program has one, else at the
    /// code start. `lr` receives the termination sentinel, which is also
    /// registered as a termination address: returning from the entry
    /// function stops execution with [`StopReason::Termination`].
    pub fn load(&mut self, program: ProgramFile) -> Result<(), VmError> {
        let machine = self.debugger.machine_mut();

        for instruction in &program.instructions {
            let (address, decoded) = match (instruction.address, instruction.decoded.as_ref()) {
                (Some(address), Some(decoded)) => (address, decoded),
                _ => continue,
            };

            machine.write_bytes(address, &decoded.to_bytes())?;
        }

        for global in &program.globals {
            if let Some(address) = global.address.filter(|_| !global.data.is_empty()) {
                machine.write_bytes(address, &global.data)?;
            }
        }

        let entry = program
            .entry_address()
            .or_else(|| program.layout.map(|l| l.code_start))
            .unwrap_or_default();

        machine.set_pc(entry);
        machine.set_reg(REG_LR, TERMINATION_ADDR);
        self.debugger.add_termination_address(TERMINATION_ADDR);

        debug!(entry, "program loaded");
        self.program = Some(program);

        Ok(())
    }

    /// The emulated program's exit value: `r0` at termination.
    pub fn return_value(&self) -> Word {
        self.debugger.machine().reg(REG_GP)
    }

    /* call-stack unwinding */

    /// Reconstruct the call stack, best effort.
    pub fn backtrace(&self) -> Vec<Frame> {
        let machine = self.debugger.machine();
        let mut frames = Vec::new();
        let mut seen = HashSet::new();

        let pc = machine.pc();
        frames.push(self.frame_at(pc));
        seen.insert(pc);

        let lr = machine.lr();
        if self.plausible_return_address(lr) && seen.insert(lr) {
            frames.push(self.frame_at(lr));
        }

        // Deeper frames: scan a bounded window above the stack pointer for
        // values that look like return addresses inside known functions.
        let sp = machine.sp();
        let window = self.config.stack_scan_window;

        for offset in (0..window).step_by(4) {
            if frames.len() >= self.config.max_frames {
                break;
            }

            let value = match machine.read_u32(sp.wrapping_add(offset)) {
                Ok(value) => value,
                Err(_) => break,
            };

            if self.plausible_return_address(value)
                && self.inside_known_function(value)
                && seen.insert(value)
            {
                frames.push(self.frame_at(value));
            }
        }

        frames
    }

    fn plausible_return_address(&self, addr: Word) -> bool {
        if addr == TERMINATION_ADDR {
            return false;
        }

        match self.program.as_ref().and_then(|p| p.layout) {
            Some(layout) => layout.contains_code(addr),
            None => false,
        }
    }

    fn inside_known_function(&self, addr: Word) -> bool {
        self.program
            .as_ref()
            .map_or(false, |p| p.function_at(addr).is_some())
    }

    /// Describe the code address `addr` as a frame.
    pub fn frame_at(&self, addr: Word) -> Frame {
        let program = match self.program.as_ref() {
            Some(program) => program,
            None => {
                return Frame {
                    address: addr,
                    ..Frame::default()
                }
            }
        };

        let location = program.debug_info.location(addr);

        Frame {
            address: addr,
            function: program.function_at(addr).map(|f| f.name.clone()),
            file: location.map(|l| l.file.clone()),
            line: location.map(|l| l.line),
        }
    }

    /* step-over-call */

    /// Whether the instruction at `pc` is a call site.
    ///
    /// A jump counts as a call when its target register was most recently
    /// loaded by a `movl`/`movh` pair referencing a function symbol. The
    /// backtrack is bounded and gives up at any other write to the target
    /// register, so a pair the toolchain scheduled far from the branch may
    /// be missed.
    pub fn classify_call(&self, pc: Word) -> bool {
        let program = match self.program.as_ref() {
            Some(program) => program,
            None => return false,
        };

        let instruction = match self.debugger.machine().decode_at(pc) {
            Ok(instruction) => instruction,
            Err(_) => return false,
        };

        let target_operand = match instruction.opcode() {
            Opcode::JMP => 0,
            Opcode::CJMP => 1,
            _ => return false,
        };
        let target_reg = match instruction.operand(target_operand) {
            Some(reg) => reg,
            None => return false,
        };

        let mut addr = pc;

        for _ in 0..self.config.call_backtrack_window {
            addr = match addr.checked_sub(INSTRUCTION_SIZE as Word) {
                Some(addr) => addr,
                None => return false,
            };

            let index = match program.instruction_at(addr) {
                Some(index) => index,
                None => return false,
            };
            let entry = &program.instructions[index];
            let decoded = match entry.decoded.as_ref() {
                Some(decoded) => decoded,
                None => return false,
            };

            let writes_target = decoded
                .opcode()
                .operands()
                .iter()
                .enumerate()
                .any(|(i, desc)| {
                    matches!(desc.role, OperandRole::Destination)
                        && decoded.operand(i) == Some(target_reg)
                });

            if !writes_target {
                continue;
            }

            // The most recent write decides: an immediate-pair half naming
            // a function makes this a call, anything else does not.
            let names_function = entry
                .symbols
                .iter()
                .any(|symbol| program.function(&symbol.name).is_some());

            return matches!(decoded.opcode(), Opcode::MOVL | Opcode::MOVH) && names_function;
        }

        false
    }

    /// Execute one instruction, stepping over calls.
    ///
    /// At a call site this plants a temporary breakpoint on the return
    /// address, continues, removes it and reports the stop as a plain step.
    pub fn next(&mut self) -> RunResult {
        let pc = self.debugger.machine().pc();

        if !self.classify_call(pc) {
            return self.debugger.step();
        }

        let resume = pc.wrapping_add(INSTRUCTION_SIZE as Word);
        let id = self.debugger.add_breakpoint(resume);
        let mut result = self.debugger.continue_(None);
        let _ = self.debugger.remove(id);

        if result.stop_reason == StopReason::Breakpoint && result.breakpoint_id == Some(id) {
            result.stop_reason = StopReason::Step;
            result.breakpoint_id = None;
        }

        result
    }
}
