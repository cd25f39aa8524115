use super::Machine;
use crate::error::ExecuteError;

use cucaracha_asm::Word;

impl Machine {
    fn window(&self, addr: Word, size: usize) -> Result<usize, ExecuteError> {
        let start = addr as usize;
        let end = start.checked_add(size).filter(|end| *end <= self.memory.len());

        match end {
            Some(_) => Ok(start),
            None => Err(ExecuteError::MemoryAccess { addr, size }),
        }
    }

    /// Read a little-endian 32-bit word. Fails if the 4-byte window exceeds
    /// the buffer.
    pub fn read_u32(&self, addr: Word) -> Result<Word, ExecuteError> {
        let start = self.window(addr, 4)?;
        let m = &self.memory;

        Ok(Word::from_le_bytes([m[start], m[start + 1], m[start + 2], m[start + 3]]))
    }

    /// Write a little-endian 32-bit word. Fails if the 4-byte window exceeds
    /// the buffer.
    pub fn write_u32(&mut self, addr: Word, value: Word) -> Result<(), ExecuteError> {
        let start = self.window(addr, 4)?;
        self.memory[start..start + 4].copy_from_slice(&value.to_le_bytes());

        Ok(())
    }

    /// Read `size` bytes starting at `addr`.
    pub fn read_bytes(&self, addr: Word, size: usize) -> Result<&[u8], ExecuteError> {
        let start = self.window(addr, size)?;

        Ok(&self.memory[start..start + size])
    }

    /// Copy `bytes` into memory starting at `addr`.
    pub fn write_bytes(&mut self, addr: Word, bytes: &[u8]) -> Result<(), ExecuteError> {
        let start = self.window(addr, bytes.len())?;
        self.memory[start..start + bytes.len()].copy_from_slice(bytes);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian() {
        let mut vm = Machine::with_memory_size(0x100);

        vm.write_u32(0x10, 0xdead_beef).unwrap();

        assert_eq!(0xef, vm.memory()[0x10]);
        assert_eq!(0xde, vm.memory()[0x13]);
        assert_eq!(0xdead_beef, vm.read_u32(0x10).unwrap());
    }

    #[test]
    fn window_must_fit() {
        let mut vm = Machine::with_memory_size(0x10);

        assert!(vm.read_u32(0x0c).is_ok());
        assert_eq!(
            Err(ExecuteError::MemoryAccess { addr: 0x0d, size: 4 }),
            vm.read_u32(0x0d)
        );
        assert_eq!(
            Err(ExecuteError::MemoryAccess { addr: 0xffff_ffff, size: 4 }),
            vm.write_u32(0xffff_ffff, 0)
        );
    }
}
