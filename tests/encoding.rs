//! Algebraic invariants of the memory model and the instruction encoding.

use cucaracha::prelude::*;

use cucaracha_asm::{field_to_imm16, imm16_to_field};

use quickcheck_macros::quickcheck;

#[quickcheck]
fn memory_words_roundtrip_little_endian(offset: u16, value: u32) -> bool {
    let mut vm = Machine::default();
    let addr = offset as u32; // default memory comfortably covers u16 + 4

    vm.write_u32(addr, value).unwrap();

    let bytes = vm.memory();
    vm.read_u32(addr).unwrap() == value
        && bytes[addr as usize] == (value & 0xff) as u8
        && bytes[addr as usize + 3] == (value >> 24) as u8
}

#[quickcheck]
fn stack_pointer_alias_stays_in_sync(value: u32) -> bool {
    let mut vm = Machine::default();

    vm.set_reg(cucaracha::consts::REG_SP, value);

    vm.sp() == value && vm.registers()[cucaracha::consts::REG_SP] == value
}

#[quickcheck]
fn descriptor_encoding_roundtrips(op_index: u8, a: u32, b: u32, c: u32) -> bool {
    let opcodes = [
        Opcode::NOP,
        Opcode::MOV,
        Opcode::MOVL,
        Opcode::MOVH,
        Opcode::ADD,
        Opcode::SUB,
        Opcode::MUL,
        Opcode::DIV,
        Opcode::MOD,
        Opcode::LSL,
        Opcode::LSR,
        Opcode::ASR,
        Opcode::CMP,
        Opcode::LD,
        Opcode::ST,
        Opcode::JMP,
        Opcode::CJMP,
    ];
    let opcode = opcodes[op_index as usize % opcodes.len()];

    // clamp operand values into their fields the way the assembler does
    let values: Vec<u32> = opcode
        .operands()
        .iter()
        .zip([a, b, c])
        .map(|(desc, value)| if desc.bits == 0 { 0 } else { value & desc.mask() })
        .collect();

    let instruction = Instruction::new(opcode, &values);
    let word = instruction.encode();
    let decoded = Instruction::decode(word).unwrap();

    decoded == instruction && decoded.encode() == word
}

#[quickcheck]
fn lo_hi_reconstruction_combines(target: u32) -> bool {
    let lo = (target & 0xffff) as u16;
    let hi = (target >> 16) as u16;

    let combined = ((hi as u32) << 16) | (lo as u32 & 0xffff);

    combined == target
}

#[quickcheck]
fn shifted_immediate_form_preserves_the_opcode(imm: u16, opcode_bits: u8) -> bool {
    let opcode_bits = (opcode_bits & 0x1f) as u32;
    let word = opcode_bits | imm16_to_field(imm);

    field_to_imm16(word) == imm && word & 0x1f == opcode_bits
}

#[quickcheck]
fn pc_advances_by_four_on_non_branches(value: u16) -> bool {
    let mut vm = Machine::default();
    let instruction = Instruction::new(Opcode::MOVL, &[value as u32, regs::r(0) as u32]);

    vm.load_binary(&instruction.to_bytes(), 0x40).unwrap();
    vm.step().unwrap();

    vm.pc() == 0x44
}

#[test]
fn branch_pc_is_exactly_the_target() {
    let mut vm = Machine::default();
    let instruction = Instruction::new(Opcode::JMP, &[regs::r(1) as u32, regs::r(9) as u32]);

    vm.load_binary(&instruction.to_bytes(), 0x40).unwrap();
    vm.set_reg(regs::r(1), 0x400);
    vm.step().unwrap();

    assert_eq!(0x400, vm.pc());
}
