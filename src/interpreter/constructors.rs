//! Exposed constructors API for the [`Machine`]

use super::{Machine, Pacer};
use crate::config::MachineConfig;
use crate::consts::*;

impl Machine {
    /// Create a machine from a configuration.
    ///
    /// The stack pointer starts at the top word of memory; the stack grows
    /// downwards.
    pub fn with_config(config: MachineConfig) -> Self {
        let mut registers = [0; REGISTER_COUNT];
        registers[REG_SP] = (config.memory_size as u32).saturating_sub(WORD_SIZE as u32);

        Self {
            registers,
            pc: 0,
            memory: vec![0; config.memory_size],
            halted: false,
            cycles: 0,
            pacer: Pacer::new(config.clock_hz),
        }
    }

    /// Create a machine with a specific memory size, unthrottled.
    pub fn with_memory_size(memory_size: usize) -> Self {
        Self::with_config(MachineConfig {
            memory_size,
            ..MachineConfig::default()
        })
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::with_config(MachineConfig::default())
    }
}
