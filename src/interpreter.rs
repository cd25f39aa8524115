//! [`Machine`] implementation: the register file, memory and the
//! fetch/decode/execute loop.

use crate::config::MachineConfig;
use crate::consts::*;
use crate::error::ExecuteError;
use crate::state::ExecuteState;

use cucaracha_asm::{Flags, Word};

mod alu;
mod constructors;
mod executors;
mod flow;
mod memory;
mod pacer;

pub use pacer::Pacer;

/// CPU state of the emulated target.
///
/// The machine is strictly single-threaded: one fetch/decode/execute loop
/// mutates one state. Between steps the debugger may freely inspect and
/// mutate registers and memory through the accessors below.
#[derive(Debug, Clone)]
pub struct Machine {
    registers: [Word; REGISTER_COUNT],
    pc: Word,
    memory: Vec<u8>,
    halted: bool,
    cycles: u64,
    pacer: Pacer,
}

impl Machine {
    /// Current program counter.
    pub const fn pc(&self) -> Word {
        self.pc
    }

    /// Set the program counter.
    pub fn set_pc(&mut self, pc: Word) {
        self.pc = pc;
    }

    /// Whether the machine is halted.
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Halt the machine; subsequent steps fail until a program is loaded or
    /// the machine is reset.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Total cycles accumulated since construction.
    pub const fn cycles(&self) -> u64 {
        self.cycles
    }

    /// The register file.
    pub const fn registers(&self) -> &[Word; REGISTER_COUNT] {
        &self.registers
    }

    /// Read a register by index.
    pub fn reg(&self, id: usize) -> Word {
        self.registers[id & (REGISTER_COUNT - 1)]
    }

    /// Write a register by index.
    pub fn set_reg(&mut self, id: usize, value: Word) {
        self.registers[id & (REGISTER_COUNT - 1)] = value;
    }

    /// Stack pointer, through its register-file alias.
    pub fn sp(&self) -> Word {
        self.registers[REG_SP]
    }

    /// Link register, through its register-file alias.
    pub fn lr(&self) -> Word {
        self.registers[REG_LR]
    }

    /// Condition flags decoded from `cpsr`.
    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.registers[REG_CPSR])
    }

    /// Memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.len()
    }

    /// The whole memory buffer.
    pub fn memory(&self) -> &[u8] {
        self.memory.as_slice()
    }

    /// Pacing state.
    pub const fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    /// Copy `bytes` into memory at `addr`, set `pc := addr` and clear the
    /// halted flag.
    pub fn load_binary(&mut self, bytes: &[u8], addr: Word) -> Result<(), ExecuteError> {
        self.write_bytes(addr, bytes)?;
        self.pc = addr;
        self.halted = false;

        Ok(())
    }

    /// Encode a program's instructions as a contiguous image at `addr` and
    /// start there. Assigned addresses are ignored; the runner is the loader
    /// that honors them.
    pub fn load_program(
        &mut self,
        program: &crate::program::ProgramFile,
        addr: Word,
    ) -> Result<(), ExecuteError> {
        let bytes: Vec<u8> = program
            .instructions
            .iter()
            .filter_map(|entry| entry.decoded.as_ref().map(|i| i.to_bytes()).or(entry.raw))
            .flatten()
            .collect();

        self.load_binary(&bytes, addr)
    }

    /// Step until an error occurs. Useful for fire-and-forget runs; the
    /// debugger offers richer stop control.
    pub fn run(&mut self) -> Result<(), ExecuteError> {
        loop {
            self.step()?;
        }
    }

    /// Step at most `n` times, returning early on error.
    pub fn run_n(&mut self, n: u64) -> Result<ExecuteState, ExecuteError> {
        let mut state = ExecuteState::Proceed;

        for _ in 0..n {
            state = self.step()?;
        }

        Ok(state)
    }

    /// Replace this machine with a fresh one of the same configuration.
    pub fn reset(&mut self) {
        *self = Self::with_config(MachineConfig {
            memory_size: self.memory.len(),
            clock_hz: self.pacer.target_hz(),
        });
    }
}
