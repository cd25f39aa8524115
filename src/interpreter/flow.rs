use super::Machine;
use crate::consts::INSTRUCTION_SIZE;
use crate::error::ExecuteError;

use cucaracha_asm::{Condition, RegisterId, Word};

use core::convert::TryFrom;

impl Machine {
    /// Jump with link: the link register receives the address of the
    /// instruction following the one at the current `pc`.
    pub(crate) fn jump(&mut self, target: Word, link: RegisterId) {
        let next = self.pc.wrapping_add(INSTRUCTION_SIZE as Word);

        self.set_reg(link, next);
        self.pc = target;
    }

    pub(crate) fn cond_jump(
        &mut self,
        selector: u32,
        target: Word,
        link: RegisterId,
    ) -> Result<(), ExecuteError> {
        let cond = Condition::try_from(selector).map_err(ExecuteError::InvalidCondition)?;

        if cond.holds(self.flags()) {
            self.jump(target, link);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::REG_CPSR;
    use cucaracha_asm::{regs, Flags};

    #[test]
    fn jump_links_the_following_instruction() {
        let mut vm = Machine::default();
        vm.set_pc(0x100);

        vm.jump(0x200, regs::LR);

        assert_eq!(0x200, vm.pc());
        assert_eq!(0x104, vm.lr());
    }

    #[test]
    fn unsatisfied_condition_does_not_jump() {
        let mut vm = Machine::default();
        vm.set_pc(0x100);
        vm.set_reg(REG_CPSR, Flags::empty().bits());

        vm.cond_jump(Condition::EQ as u32, 0x200, regs::LR).unwrap();

        assert_eq!(0x100, vm.pc());
        assert_eq!(0, vm.lr());
    }

    #[test]
    fn bad_selector_is_an_error() {
        let mut vm = Machine::default();

        assert_eq!(
            Err(ExecuteError::InvalidCondition(99)),
            vm.cond_jump(99, 0x200, regs::LR)
        );
    }
}
