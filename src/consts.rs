//! Machine parameters

use cucaracha_asm::{regs, Word};

/// Register count of the target.
pub const REGISTER_COUNT: usize = regs::COUNT;

/// Stack pointer index in the register file.
pub const REG_SP: usize = regs::SP;

/// Link register index in the register file.
pub const REG_LR: usize = regs::LR;

/// Status register index in the register file.
pub const REG_CPSR: usize = regs::CPSR;

/// First general-purpose register; `r0..r9` are contiguous from here.
pub const REG_GP: usize = regs::GP_BASE;

/// Length of an instruction word, in bytes.
pub const INSTRUCTION_SIZE: usize = cucaracha_asm::Instruction::LEN;

/// Length of a memory word, in bytes.
pub const WORD_SIZE: usize = 4;

/// Default memory size, in bytes.
pub const DEFAULT_MEMORY_SIZE: usize = 128 * 1024;

/// Default base address of the code section. Everything below is left to
/// the compiler toolchain's low-address data.
pub const DEFAULT_CODE_BASE: Word = 0x10000;

/// Sentinel address seeded into `lr` at program start. Jumping to it ends
/// execution as a normal termination.
pub const TERMINATION_ADDR: Word = 0x0000_fffc;
