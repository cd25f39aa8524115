use crate::instruction::InvalidOpcode;

use core::convert::TryFrom;

/// Number of bits reserved for the opcode at the bottom of the word.
pub const OPCODE_BITS: u32 = 5;

/// Width of an encoded register field.
pub const REGISTER_BITS: u32 = 8;

/// Width of an encoded immediate field.
pub const IMMEDIATE_BITS: u32 = 16;

/// Operand fields pack upward from this bit, in declaration order.
pub const OPERAND_BASE: u32 = OPCODE_BITS;

/// What an encoded operand field contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperandKind {
    /// A register index.
    Register,
    /// A literal value.
    Immediate,
}

/// Data-flow role of an operand, used by disassembly and by the debugger's
/// call-site detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperandRole {
    /// The operand is read.
    Source,
    /// The operand is written.
    Destination,
}

/// Layout of a single operand inside the 32-bit instruction word.
///
/// A tied operand occupies no encoding bits; its decoded value is copied from
/// the operand at `tie`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperandDesc {
    /// Field contents.
    pub kind: OperandKind,
    /// Field width in bits.
    pub bits: u32,
    /// Field position (shift) in the word.
    pub position: u32,
    /// Index of the operand this one shares its encoding with.
    pub tie: Option<usize>,
    /// Read or written.
    pub role: OperandRole,
}

impl OperandDesc {
    const fn reg(position: u32, role: OperandRole) -> Self {
        Self {
            kind: OperandKind::Register,
            bits: REGISTER_BITS,
            position,
            tie: None,
            role,
        }
    }

    const fn imm(position: u32) -> Self {
        Self {
            kind: OperandKind::Immediate,
            bits: IMMEDIATE_BITS,
            position,
            tie: None,
            role: OperandRole::Source,
        }
    }

    const fn tied(to: usize, role: OperandRole) -> Self {
        Self {
            kind: OperandKind::Register,
            bits: 0,
            position: 0,
            tie: Some(to),
            role,
        }
    }

    /// Mask selecting `bits` low bits.
    pub const fn mask(&self) -> u32 {
        (1u32 << self.bits) - 1
    }
}

use OperandRole::{Destination, Source};

const R5: u32 = OPERAND_BASE;
const R13: u32 = OPERAND_BASE + REGISTER_BITS;
const R21: u32 = OPERAND_BASE + 2 * REGISTER_BITS;

const LAYOUT_NONE: &[OperandDesc] = &[];
const LAYOUT_SRC_DST: &[OperandDesc] = &[OperandDesc::reg(R5, Source), OperandDesc::reg(R13, Destination)];
const LAYOUT_IMM_DST: &[OperandDesc] = &[OperandDesc::imm(R5), OperandDesc::reg(R21, Destination)];
const LAYOUT_IMM_DST_TIED: &[OperandDesc] = &[
    OperandDesc::imm(R5),
    OperandDesc::reg(R21, Destination),
    OperandDesc::tied(1, Source),
];
const LAYOUT_BINARY: &[OperandDesc] = &[
    OperandDesc::reg(R5, Source),
    OperandDesc::reg(R13, Source),
    OperandDesc::reg(R21, Destination),
];
const LAYOUT_LOAD: &[OperandDesc] = &[OperandDesc::reg(R5, Source), OperandDesc::reg(R13, Destination)];
const LAYOUT_STORE: &[OperandDesc] = &[OperandDesc::reg(R5, Source), OperandDesc::reg(R13, Source)];
const LAYOUT_JUMP: &[OperandDesc] = &[OperandDesc::reg(R5, Source), OperandDesc::reg(R13, Destination)];
const LAYOUT_CJUMP: &[OperandDesc] = &[
    OperandDesc::reg(R5, Source),
    OperandDesc::reg(R13, Source),
    OperandDesc::reg(R21, Destination),
];

/// Instruction opcode.
///
/// The numeric assignments are fixed: they are shared by the assembler, the
/// binary loader and the interpreter, and changing them breaks every program
/// already compiled for the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// No effect.
    ///
    /// | Syntax   | `nop` |
    NOP = 0x00,

    /// Copies a register.
    ///
    /// | Operation | `dst = src` |
    /// | Syntax    | `mov src, dst` |
    MOV = 0x01,

    /// Writes a 16-bit immediate into the low half of a register, zeroing
    /// the high half.
    ///
    /// | Operation | `dst = imm16` |
    /// | Syntax    | `movl imm16, dst` |
    MOVL = 0x02,

    /// Writes a 16-bit immediate into the high half of a register. The low
    /// half is taken from the tied source, which is the destination itself.
    ///
    /// | Operation | `dst = (imm16 << 16) \| (dst & 0xFFFF)` |
    /// | Syntax    | `movh imm16, dst` |
    MOVH = 0x03,

    /// Adds two registers.
    ///
    /// | Operation | `dst = a + b` (wrapping) |
    /// | Syntax    | `add a, b, dst` |
    ADD = 0x04,

    /// Subtracts two registers.
    ///
    /// | Operation | `dst = a - b` (wrapping) |
    /// | Syntax    | `sub a, b, dst` |
    SUB = 0x05,

    /// Multiplies two registers.
    ///
    /// | Operation | `dst = a * b` (wrapping) |
    /// | Syntax    | `mul a, b, dst` |
    MUL = 0x06,

    /// Divides two registers. Fails when the divisor is zero.
    ///
    /// | Operation | `dst = a / b` |
    /// | Syntax    | `div a, b, dst` |
    DIV = 0x07,

    /// Remainder of two registers. Fails when the divisor is zero.
    ///
    /// | Operation | `dst = a % b` |
    /// | Syntax    | `mod a, b, dst` |
    MOD = 0x08,

    /// Logical shift left by the low bits of `b`.
    ///
    /// | Operation | `dst = a << (b & 0x1F)` |
    /// | Syntax    | `lsl a, b, dst` |
    LSL = 0x09,

    /// Logical shift right by the low bits of `b`.
    ///
    /// | Operation | `dst = a >> (b & 0x1F)` |
    /// | Syntax    | `lsr a, b, dst` |
    LSR = 0x0a,

    /// Arithmetic shift right by the low bits of `b`.
    ///
    /// | Operation | `dst = (a as i32) >> (b & 0x1F)` |
    /// | Syntax    | `asr a, b, dst` |
    ASR = 0x0b,

    /// Compares two registers and writes the N/Z/C/V mask into `dst`.
    ///
    /// | Operation | `dst = flags(a - b)` |
    /// | Syntax    | `cmp a, b, dst` |
    CMP = 0x0c,

    /// Loads a little-endian 32-bit word.
    ///
    /// | Operation | `dst = mem[addr..addr+4]` |
    /// | Syntax    | `ld addr, dst` |
    LD = 0x0d,

    /// Stores a little-endian 32-bit word.
    ///
    /// | Operation | `mem[addr..addr+4] = src` |
    /// | Syntax    | `st src, addr` |
    ST = 0x0e,

    /// Unconditional jump with link.
    ///
    /// | Operation | `link = pc + 4; pc = target` |
    /// | Syntax    | `jmp target, link` |
    JMP = 0x0f,

    /// Conditional jump with link. The first field holds the condition-code
    /// selector, not a register index.
    ///
    /// | Operation | `if cond(cpsr) { link = pc + 4; pc = target }` |
    /// | Syntax    | `cjmp cond, target, link` |
    CJMP = 0x10,
}

impl Opcode {
    /// Size of an encoded instruction in bytes.
    pub const BYTES_SIZE: usize = 4;

    /// Operand layout of this opcode, in declaration order.
    pub const fn operands(&self) -> &'static [OperandDesc] {
        match self {
            Opcode::NOP => LAYOUT_NONE,
            Opcode::MOV => LAYOUT_SRC_DST,
            Opcode::MOVL => LAYOUT_IMM_DST,
            Opcode::MOVH => LAYOUT_IMM_DST_TIED,
            Opcode::ADD
            | Opcode::SUB
            | Opcode::MUL
            | Opcode::DIV
            | Opcode::MOD
            | Opcode::LSL
            | Opcode::LSR
            | Opcode::ASR
            | Opcode::CMP => LAYOUT_BINARY,
            Opcode::LD => LAYOUT_LOAD,
            Opcode::ST => LAYOUT_STORE,
            Opcode::JMP => LAYOUT_JUMP,
            Opcode::CJMP => LAYOUT_CJUMP,
        }
    }

    /// Nominal cost of the instruction, in cycles. Used only for pacing.
    pub const fn cycles(&self) -> u64 {
        match self {
            Opcode::MUL => 4,
            Opcode::DIV | Opcode::MOD => 16,
            Opcode::LD | Opcode::ST => 2,
            Opcode::JMP | Opcode::CJMP => 2,
            _ => 1,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Opcode::*;

        let op = match value {
            0x00 => NOP,
            0x01 => MOV,
            0x02 => MOVL,
            0x03 => MOVH,
            0x04 => ADD,
            0x05 => SUB,
            0x06 => MUL,
            0x07 => DIV,
            0x08 => MOD,
            0x09 => LSL,
            0x0a => LSR,
            0x0b => ASR,
            0x0c => CMP,
            0x0d => LD,
            0x0e => ST,
            0x0f => JMP,
            0x10 => CJMP,
            _ => return Err(InvalidOpcode(value)),
        };

        Ok(op)
    }
}
