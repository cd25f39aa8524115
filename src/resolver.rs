//! Address assignment and symbol resolution over a parsed [`ProgramFile`].

use crate::config::LayoutConfig;
use crate::error::ResolveError;
use crate::program::{GlobalKind, MemoryLayout, ProgramFile, SymbolUsage};

use cucaracha_asm::Word;

use tracing::debug;

/// Resolve a program against a memory layout.
///
/// Instructions receive sequential addresses from the base; globals follow
/// the code section, aligned; symbol references are replaced by concrete
/// operand values. Resolution is idempotent: resolving an already-resolved
/// program with the same configuration yields an equivalent program.
pub fn resolve(mut program: ProgramFile, config: &LayoutConfig) -> Result<ProgramFile, ResolveError> {
    if config.instruction_size == 0 {
        return Err(ResolveError::InvalidLayout("instruction size is zero".into()));
    }

    if config.data_align == 0 {
        return Err(ResolveError::InvalidLayout("data alignment is zero".into()));
    }

    let code_start = config.base_address;
    let code_size = program.instructions.len() as Word * config.instruction_size;

    for (i, instruction) in program.instructions.iter_mut().enumerate() {
        instruction.address = Some(code_start + i as Word * config.instruction_size);
    }

    // Globals land right after the code, aligned, in declaration order.
    // Kinds other than function/object take no space.
    let mut cursor = align_up(code_start + code_size, config.data_align);
    let data_start = cursor;

    for global in &mut program.globals {
        match global.kind {
            GlobalKind::Function | GlobalKind::Object => {
                global.address = Some(cursor);
                cursor = align_up(cursor + global.size as Word, config.data_align);
            }
            GlobalKind::Unknown => {
                debug!(name = %global.name, "global of unknown kind skipped during layout");
            }
        }
    }

    let data_size = cursor - data_start;
    let total_size = cursor - code_start;

    if config.max_size > 0 && total_size > config.max_size {
        return Err(ResolveError::ProgramTooLarge {
            required: total_size,
            max: config.max_size,
        });
    }

    patch_symbols(&mut program)?;

    // Debug info coming from a relocatable object is section-relative.
    if !program.debug_info.is_empty() && !program.is_resolved() {
        program.debug_info.rebase(code_start);
    }

    program.layout = Some(MemoryLayout {
        base_address: code_start,
        total_size,
        code_start,
        code_size,
        data_start,
        data_size,
    });

    debug!(code_start, code_size, data_start, data_size, "program resolved");

    Ok(program)
}

fn patch_symbols(program: &mut ProgramFile) -> Result<(), ResolveError> {
    // Two passes over the same data: addresses must all be assigned before
    // references are patched, and lookup needs an immutable program.
    let mut patches = Vec::new();

    for (i, instruction) in program.instructions.iter().enumerate() {
        for symbol in &instruction.symbols {
            let address =
                program
                    .symbol_address(&symbol.name)
                    .ok_or_else(|| ResolveError::UnknownSymbol {
                        name: symbol.name.clone(),
                    })?;

            let value = match symbol.usage {
                SymbolUsage::Full => address,
                SymbolUsage::Lo => address & 0xffff,
                SymbolUsage::Hi => (address >> 16) & 0xffff,
            };

            patches.push((i, symbol.operand, value));
        }
    }

    for (i, operand, value) in patches {
        if let Some(decoded) = program.instructions[i].decoded.as_mut() {
            decoded.set_operand(operand, value);
        }
    }

    Ok(())
}

const fn align_up(value: Word, align: Word) -> Word {
    let rem = value % align;

    if rem == 0 {
        value
    } else {
        value + (align - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Global, ProgramInstruction, SymbolRef};
    use cucaracha_asm::{regs, Instruction, Opcode};

    fn program_with_symbols() -> ProgramFile {
        let mut program = ProgramFile::default();

        program.instructions.push(ProgramInstruction {
            decoded: Some(Instruction::new(Opcode::MOVL, &[0, regs::r(0) as u32])),
            symbols: vec![SymbolRef {
                name: "counter".into(),
                usage: SymbolUsage::Lo,
                operand: 0,
            }],
            ..ProgramInstruction::default()
        });
        program.instructions.push(ProgramInstruction {
            decoded: Some(Instruction::new(Opcode::MOVH, &[0, regs::r(0) as u32])),
            symbols: vec![SymbolRef {
                name: "counter".into(),
                usage: SymbolUsage::Hi,
                operand: 0,
            }],
            ..ProgramInstruction::default()
        });
        program.globals.push(Global {
            name: "counter".into(),
            size: 4,
            data: vec![1, 0, 0, 0],
            kind: GlobalKind::Object,
            address: None,
        });

        program
    }

    #[test]
    fn sequential_addresses_from_base() {
        let program = resolve(program_with_symbols(), &LayoutConfig::default()).unwrap();

        assert_eq!(Some(0x10000), program.instructions[0].address);
        assert_eq!(Some(0x10004), program.instructions[1].address);

        let layout = program.layout.unwrap();
        assert_eq!(0x10000, layout.code_start);
        assert_eq!(8, layout.code_size);
        assert_eq!(0x10008, layout.data_start);
    }

    #[test]
    fn lo_hi_references_select_address_halves() {
        let program = resolve(program_with_symbols(), &LayoutConfig::default()).unwrap();
        let counter = program.global("counter").unwrap().address.unwrap();

        let lo = program.instructions[0].decoded.unwrap();
        let hi = program.instructions[1].decoded.unwrap();

        assert_eq!(Some(counter & 0xffff), lo.operand(0));
        assert_eq!(Some((counter >> 16) & 0xffff), hi.operand(0));
    }

    #[test]
    fn unknown_symbol_fails_with_its_name() {
        let mut program = program_with_symbols();
        program.globals.clear();

        let err = resolve(program, &LayoutConfig::default()).unwrap_err();

        assert_eq!(
            ResolveError::UnknownSymbol {
                name: "counter".into()
            },
            err
        );
    }

    #[test]
    fn unknown_kind_globals_take_no_space() {
        let mut program = program_with_symbols();
        program.globals.insert(
            0,
            Global {
                name: "debug_marker".into(),
                size: 64,
                data: vec![],
                kind: GlobalKind::Unknown,
                address: None,
            },
        );

        let program = resolve(program, &LayoutConfig::default()).unwrap();

        assert_eq!(None, program.globals[0].address);
        assert_eq!(Some(0x10008), program.globals[1].address);
    }

    #[test]
    fn max_size_is_enforced() {
        let config = LayoutConfig {
            max_size: 8,
            ..LayoutConfig::default()
        };

        let err = resolve(program_with_symbols(), &config).unwrap_err();

        assert!(matches!(err, ResolveError::ProgramTooLarge { .. }));
    }

    #[test]
    fn resolution_is_idempotent() {
        let config = LayoutConfig::default();
        let once = resolve(program_with_symbols(), &config).unwrap();
        let twice = resolve(once.clone(), &config).unwrap();

        assert_eq!(once.layout, twice.layout);
        assert_eq!(once.instructions, twice.instructions);
        assert_eq!(once.globals, twice.globals);
    }
}
