use crate::cond::Condition;
use crate::encoding::{extract_field, insert_field};
use crate::opcode::{Opcode, OperandKind};
use crate::regs;

use core::convert::TryFrom;
use core::fmt;

/// Most operands any opcode declares.
pub const MAX_OPERANDS: usize = 3;

/// The word does not carry a known opcode in its low bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvalidOpcode(pub u8);

impl fmt::Display for InvalidOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown opcode 0x{:02x}", self.0)
    }
}

impl std::error::Error for InvalidOpcode {}

/// A decoded instruction: opcode plus the raw value of every operand field,
/// in the opcode's declaration order. Tied operands carry the value of the
/// operand they are tied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    opcode: Opcode,
    operands: [u32; MAX_OPERANDS],
}

impl Instruction {
    /// Size of an encoded instruction in bytes.
    pub const LEN: usize = Opcode::BYTES_SIZE;

    /// Build an instruction from an opcode and operand values.
    ///
    /// Values beyond the opcode's operand count are ignored; tied operands
    /// are overwritten with the value of their target so the tie invariant
    /// holds by construction.
    pub fn new(opcode: Opcode, values: &[u32]) -> Self {
        let mut operands = [0u32; MAX_OPERANDS];

        for (i, desc) in opcode.operands().iter().enumerate() {
            operands[i] = match desc.tie {
                Some(tie) => operands[tie],
                None => values.get(i).copied().unwrap_or(0),
            };
        }

        Self { opcode, operands }
    }

    /// Decode a little-endian instruction word.
    pub fn decode(word: u32) -> Result<Self, InvalidOpcode> {
        let opcode = Opcode::try_from((word & ((1 << crate::opcode::OPCODE_BITS) - 1)) as u8)?;
        let mut operands = [0u32; MAX_OPERANDS];

        for (i, desc) in opcode.operands().iter().enumerate() {
            operands[i] = match desc.tie {
                Some(tie) => operands[tie],
                None => extract_field(word, desc.position, desc.bits),
            };
        }

        Ok(Self { opcode, operands })
    }

    /// Decode the first four bytes of `bytes` as a little-endian word.
    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Result<Self, InvalidOpcode> {
        Self::decode(u32::from_le_bytes(bytes))
    }

    /// Encode back into a 32-bit word. Tied operands occupy no bits.
    pub fn encode(&self) -> u32 {
        let mut word = self.opcode as u8 as u32;

        for (i, desc) in self.opcode.operands().iter().enumerate() {
            if desc.tie.is_none() {
                word = insert_field(word, desc.position, desc.bits, self.operands[i]);
            }
        }

        word
    }

    /// Encoded little-endian byte representation.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        self.encode().to_le_bytes()
    }

    /// The instruction's opcode.
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Decoded operand values, one per declared operand.
    pub fn operands(&self) -> &[u32] {
        &self.operands[..self.opcode.operands().len()]
    }

    /// Value of operand `i`, if declared.
    pub fn operand(&self, i: usize) -> Option<u32> {
        self.operands().get(i).copied()
    }

    /// Replace the value of operand `i`. Tied operands follow their target.
    pub fn set_operand(&mut self, i: usize, value: u32) {
        if i >= self.opcode.operands().len() {
            return;
        }

        self.operands[i] = value;

        for (j, desc) in self.opcode.operands().iter().enumerate() {
            if desc.tie == Some(i) {
                self.operands[j] = value;
            }
        }
    }

    /// Nominal cycle cost, from the opcode table.
    pub const fn cycles(&self) -> u64 {
        self.opcode.cycles()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;

        let descs = self.opcode.operands();
        let mut first = true;

        for (i, desc) in descs.iter().enumerate() {
            // Tied operands are implicit in the written form.
            if desc.tie.is_some() {
                continue;
            }

            let sep = if first { " " } else { ", " };
            first = false;

            let value = self.operands[i];

            if self.opcode == Opcode::CJMP && i == 0 {
                match Condition::try_from(value) {
                    Ok(cond) => write!(f, "{sep}{cond}")?,
                    Err(raw) => write!(f, "{sep}cond#{raw}")?,
                }
                continue;
            }

            match desc.kind {
                OperandKind::Register => write!(f, "{sep}{}", regs::display(value as usize))?,
                OperandKind::Immediate => write!(f, "{sep}0x{value:x}")?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs;

    #[test]
    fn decode_rejects_unknown_opcode() {
        assert_eq!(Err(InvalidOpcode(0x1f)), Instruction::decode(0x1f));
    }

    #[test]
    fn movl_layout() {
        let insn = Instruction::new(Opcode::MOVL, &[0x5678, regs::r(0) as u32]);
        let word = insn.encode();

        assert_eq!(0x02, word & 0x1f);
        assert_eq!(0x5678, (word >> 5) & 0xffff);
        assert_eq!(regs::r(0) as u32, (word >> 21) & 0xff);
        assert_eq!(insn, Instruction::decode(word).unwrap());
    }

    #[test]
    fn movh_tie_copies_destination() {
        let insn = Instruction::new(Opcode::MOVH, &[0x1234, regs::r(3) as u32]);

        assert_eq!(Some(regs::r(3) as u32), insn.operand(1));
        assert_eq!(Some(regs::r(3) as u32), insn.operand(2));

        let decoded = Instruction::decode(insn.encode()).unwrap();
        assert_eq!(insn, decoded);
    }

    #[test]
    fn set_operand_updates_tie() {
        let mut insn = Instruction::new(Opcode::MOVH, &[0, regs::r(0) as u32]);
        insn.set_operand(1, regs::r(7) as u32);

        assert_eq!(insn.operand(1), insn.operand(2));
    }

    #[test]
    fn display_forms() {
        let mov = Instruction::new(Opcode::MOV, &[regs::r(1) as u32, regs::r(2) as u32]);
        assert_eq!("mov r1, r2", mov.to_string());

        let movh = Instruction::new(Opcode::MOVH, &[0x1234, regs::r(0) as u32]);
        assert_eq!("movh 0x1234, r0", movh.to_string());

        let cjmp = Instruction::new(
            Opcode::CJMP,
            &[Condition::GE as u32, regs::r(4) as u32, regs::LR as u32],
        );
        assert_eq!("cjmp ge, r4, lr", cjmp.to_string());

        let nop = Instruction::new(Opcode::NOP, &[]);
        assert_eq!("nop", nop.to_string());
    }
}
