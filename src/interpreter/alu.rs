use super::Machine;
use crate::error::ExecuteError;

use cucaracha_asm::{Flags, RegisterId, Word};

impl Machine {
    pub(crate) fn alu_set(&mut self, dst: RegisterId, value: Word) {
        self.set_reg(dst, value);
    }

    pub(crate) fn alu_wrapping<F>(&mut self, dst: RegisterId, f: F, a: Word, b: Word)
    where
        F: FnOnce(Word, Word) -> Word,
    {
        self.set_reg(dst, f(a, b));
    }

    pub(crate) fn alu_checked<F>(
        &mut self,
        dst: RegisterId,
        f: F,
        a: Word,
        b: Word,
    ) -> Result<(), ExecuteError>
    where
        F: FnOnce(Word, Word) -> Word,
    {
        if b == 0 {
            return Err(ExecuteError::DivisionByZero);
        }

        self.set_reg(dst, f(a, b));

        Ok(())
    }

    pub(crate) fn alu_compare(&mut self, dst: RegisterId, a: Word, b: Word) {
        self.set_reg(dst, Flags::compare(a, b).bits());
    }
}
