//! The fetch/decode/execute loop.

use super::Machine;
use crate::consts::INSTRUCTION_SIZE;
use crate::error::ExecuteError;
use crate::state::ExecuteState;

use cucaracha_asm::{Instruction, Opcode, RegisterId, Word};

impl Machine {
    /// Fetch, decode and execute one instruction.
    ///
    /// The program counter advances by one instruction unless the executed
    /// instruction wrote it. Errors leave the machine at the pre-instruction
    /// state: every execute path checks its preconditions before writing.
    pub fn step(&mut self) -> Result<ExecuteState, ExecuteError> {
        if self.halted {
            return Err(ExecuteError::Halted);
        }

        let word = self
            .read_u32(self.pc)
            .map_err(|_| ExecuteError::PcOutOfBounds { pc: self.pc })?;
        let instruction = Instruction::decode(word)?;

        let pc_old = self.pc;
        self.execute(&instruction)?;

        if self.pc == pc_old {
            self.pc = pc_old.wrapping_add(INSTRUCTION_SIZE as Word);
        }

        let cost = instruction.cycles();
        self.cycles = self.cycles.saturating_add(cost);

        let state = match self.pacer.pace(cost) {
            Some(cycles) => ExecuteState::Lagging { cycles },
            None => ExecuteState::Proceed,
        };

        Ok(state)
    }

    /// Decode the instruction stored at `addr` without executing it.
    pub fn decode_at(&self, addr: Word) -> Result<Instruction, ExecuteError> {
        let word = self
            .read_u32(addr)
            .map_err(|_| ExecuteError::PcOutOfBounds { pc: addr })?;

        Ok(Instruction::decode(word)?)
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<(), ExecuteError> {
        let ops = instruction.operands();
        let reg = |i: usize| ops[i] as RegisterId;
        let imm = |i: usize| ops[i] as Word;

        match instruction.opcode() {
            Opcode::NOP => {}

            Opcode::MOV => {
                let value = self.reg(reg(0));
                self.alu_set(reg(1), value);
            }

            Opcode::MOVL => {
                self.alu_set(reg(1), imm(0) & 0xffff);
            }

            Opcode::MOVH => {
                // The tied source equals the destination, so this keeps the
                // low half written by the preceding movl.
                let low = self.reg(reg(2)) & 0xffff;
                self.alu_set(reg(1), (imm(0) << 16) | low);
            }

            Opcode::ADD => {
                let (a, b) = (self.reg(reg(0)), self.reg(reg(1)));
                self.alu_wrapping(reg(2), Word::wrapping_add, a, b);
            }

            Opcode::SUB => {
                let (a, b) = (self.reg(reg(0)), self.reg(reg(1)));
                self.alu_wrapping(reg(2), Word::wrapping_sub, a, b);
            }

            Opcode::MUL => {
                let (a, b) = (self.reg(reg(0)), self.reg(reg(1)));
                self.alu_wrapping(reg(2), Word::wrapping_mul, a, b);
            }

            Opcode::DIV => {
                let (a, b) = (self.reg(reg(0)), self.reg(reg(1)));
                self.alu_checked(reg(2), |a, b| a / b, a, b)?;
            }

            Opcode::MOD => {
                let (a, b) = (self.reg(reg(0)), self.reg(reg(1)));
                self.alu_checked(reg(2), |a, b| a % b, a, b)?;
            }

            Opcode::LSL => {
                let (a, b) = (self.reg(reg(0)), self.reg(reg(1)));
                self.alu_wrapping(reg(2), |a, b| a << (b & 0x1f), a, b);
            }

            Opcode::LSR => {
                let (a, b) = (self.reg(reg(0)), self.reg(reg(1)));
                self.alu_wrapping(reg(2), |a, b| a >> (b & 0x1f), a, b);
            }

            Opcode::ASR => {
                let (a, b) = (self.reg(reg(0)), self.reg(reg(1)));
                self.alu_wrapping(reg(2), |a, b| ((a as i32) >> (b & 0x1f)) as Word, a, b);
            }

            Opcode::CMP => {
                let (a, b) = (self.reg(reg(0)), self.reg(reg(1)));
                self.alu_compare(reg(2), a, b);
            }

            Opcode::LD => {
                let addr = self.reg(reg(0));
                let value = self.read_u32(addr)?;
                self.alu_set(reg(1), value);
            }

            Opcode::ST => {
                let value = self.reg(reg(0));
                let addr = self.reg(reg(1));
                self.write_u32(addr, value)?;
            }

            Opcode::JMP => {
                let target = self.reg(reg(0));
                self.jump(target, reg(1));
            }

            Opcode::CJMP => {
                let target = self.reg(reg(1));
                self.cond_jump(ops[0], target, reg(2))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cucaracha_asm::{regs, Condition};

    fn load(vm: &mut Machine, program: &[Instruction]) {
        let bytes: Vec<u8> = program.iter().flat_map(|i| i.to_bytes()).collect();
        vm.load_binary(&bytes, 0).unwrap();
    }

    #[test]
    fn pc_advances_on_non_branching_instructions() {
        let mut vm = Machine::default();
        load(
            &mut vm,
            &[
                Instruction::new(Opcode::NOP, &[]),
                Instruction::new(Opcode::MOVL, &[7, regs::r(0) as u32]),
            ],
        );

        vm.step().unwrap();
        assert_eq!(4, vm.pc());

        vm.step().unwrap();
        assert_eq!(8, vm.pc());
        assert_eq!(7, vm.reg(regs::r(0)));
    }

    #[test]
    fn movl_movh_pair_builds_a_word() {
        let mut vm = Machine::default();
        load(
            &mut vm,
            &[
                Instruction::new(Opcode::MOVL, &[0x5678, regs::r(0) as u32]),
                Instruction::new(Opcode::MOVH, &[0x1234, regs::r(0) as u32]),
            ],
        );

        vm.step().unwrap();
        assert_eq!(0x5678, vm.reg(regs::r(0)));

        vm.step().unwrap();
        assert_eq!(0x1234_5678, vm.reg(regs::r(0)));
    }

    #[test]
    fn branch_does_not_advance_twice() {
        let mut vm = Machine::default();
        vm.set_reg(regs::r(1), 0x40);
        load(&mut vm, &[Instruction::new(Opcode::JMP, &[regs::r(1) as u32, regs::LR as u32])]);

        vm.step().unwrap();

        assert_eq!(0x40, vm.pc());
        assert_eq!(4, vm.lr());
    }

    #[test]
    fn conditional_fall_through_advances() {
        let mut vm = Machine::default();
        vm.set_reg(regs::r(1), 0x40);
        load(
            &mut vm,
            &[Instruction::new(
                Opcode::CJMP,
                &[Condition::EQ as u32, regs::r(1) as u32, regs::LR as u32],
            )],
        );

        vm.step().unwrap();

        assert_eq!(4, vm.pc());
    }

    #[test]
    fn division_by_zero_keeps_pc() {
        let mut vm = Machine::default();
        vm.set_reg(regs::r(0), 10);
        load(
            &mut vm,
            &[Instruction::new(
                Opcode::DIV,
                &[regs::r(0) as u32, regs::r(1) as u32, regs::r(2) as u32],
            )],
        );

        assert_eq!(Err(ExecuteError::DivisionByZero), vm.step());
        assert_eq!(0, vm.pc());
        assert_eq!(0, vm.reg(regs::r(2)));
    }

    #[test]
    fn halted_machine_cannot_step() {
        let mut vm = Machine::default();
        vm.halt();

        assert_eq!(Err(ExecuteError::Halted), vm.step());
    }

    #[test]
    fn fetch_out_of_bounds() {
        let mut vm = Machine::with_memory_size(0x10);
        vm.set_pc(0x10);

        assert_eq!(Err(ExecuteError::PcOutOfBounds { pc: 0x10 }), vm.step());
    }

    #[test]
    fn cycles_accumulate() {
        let mut vm = Machine::default();
        load(
            &mut vm,
            &[
                Instruction::new(Opcode::NOP, &[]),
                Instruction::new(Opcode::MUL, &[regs::r(0) as u32, regs::r(1) as u32, regs::r(2) as u32]),
            ],
        );

        vm.step().unwrap();
        vm.step().unwrap();

        assert_eq!(Opcode::NOP.cycles() + Opcode::MUL.cycles(), vm.cycles());
    }
}
