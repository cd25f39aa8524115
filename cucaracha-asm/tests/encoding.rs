use cucaracha_asm::{regs, Condition, Instruction, Opcode, OperandKind};

use strum::IntoEnumIterator;

fn sample_values(op: Opcode) -> Vec<u32> {
    op.operands()
        .iter()
        .enumerate()
        .map(|(i, desc)| match desc.kind {
            OperandKind::Immediate => 0x1234,
            OperandKind::Register if op == Opcode::CJMP && i == 0 => Condition::NE as u32,
            OperandKind::Register => regs::r(i % regs::GP_COUNT) as u32,
        })
        .collect()
}

#[test]
fn every_opcode_roundtrips_through_encoding() {
    for op in Opcode::iter() {
        let insn = Instruction::new(op, &sample_values(op));
        let word = insn.encode();
        let decoded = Instruction::decode(word).expect("decode failed");

        assert_eq!(insn, decoded, "{op}");
        assert_eq!(word, decoded.encode(), "{op}");
    }
}

#[test]
fn encoded_bytes_are_little_endian() {
    let insn = Instruction::new(Opcode::MOVL, &[0xffff, regs::r(0) as u32]);
    let word = insn.encode();
    let bytes = insn.to_bytes();

    assert_eq!((word & 0xff) as u8, bytes[0]);
    assert_eq!((word >> 24) as u8, bytes[3]);
    assert_eq!(Ok(insn), Instruction::from_bytes(bytes));
}

#[test]
fn unused_bits_stay_zero() {
    // nop declares no operands, so only the opcode bits may be set
    let nop = Instruction::new(Opcode::NOP, &[]);
    assert_eq!(0x00, nop.encode());

    // mov uses two 8-bit fields; bits 21.. stay clear
    let mov = Instruction::new(Opcode::MOV, &[regs::r(9) as u32, regs::r(8) as u32]);
    assert_eq!(0, mov.encode() >> 21);
}

#[test]
fn operand_values_survive_field_masks() {
    // a register value wider than the field is truncated by the mask
    let insn = Instruction::new(Opcode::MOV, &[0x1ff, 0x01]);
    let decoded = Instruction::decode(insn.encode()).unwrap();

    assert_eq!(Some(0xff), decoded.operand(0));
}
