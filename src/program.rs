//! The program model: the contract every parser produces and the resolver
//! and runner consume.
//!
//! Instructions, functions and labels refer to each other by index, never by
//! reference, so a whole [`ProgramFile`] is a plain value.

use cucaracha_asm::{Instruction, RegisterId, Word};

use std::collections::BTreeMap;

/// Which part of a symbol's address a reference selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum SymbolUsage {
    /// The full 32-bit address.
    Full,
    /// The low 16 bits, for the low half of an immediate pair.
    Lo,
    /// The high 16 bits, for the high half of an immediate pair.
    Hi,
}

/// A named reference inside an instruction operand, patched by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct SymbolRef {
    /// Referenced name.
    pub name: String,
    /// Address half selected.
    pub usage: SymbolUsage,
    /// Operand index the resolved value lands in.
    pub operand: usize,
}

/// One instruction of the program, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramInstruction {
    /// 1-based line in the originating text, when known.
    pub line: usize,
    /// Textual form, as written or disassembled.
    pub text: String,
    /// Raw encoding, for instructions that came from a binary.
    pub raw: Option<[u8; 4]>,
    /// Decoded form, when the encoding is known.
    pub decoded: Option<Instruction>,
    /// Absolute address once resolved.
    pub address: Option<Word>,
    /// Symbol references to patch during resolution.
    pub symbols: Vec<SymbolRef>,
}

/// A function of the program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    /// Function name.
    pub name: String,
    /// Source file, when known.
    pub file: Option<String>,
    /// First source line, when known.
    pub start_line: Option<usize>,
    /// Last source line, when known.
    pub end_line: Option<usize>,
    /// Instruction-index ranges `[start, end)` belonging to the function.
    pub ranges: Vec<(usize, usize)>,
}

impl Function {
    /// Whether instruction index `i` belongs to this function.
    pub fn contains(&self, i: usize) -> bool {
        self.ranges.iter().any(|(start, end)| (*start..*end).contains(&i))
    }

    /// First instruction index, when any range exists.
    pub fn entry(&self) -> Option<usize> {
        self.ranges.first().map(|(start, _)| *start)
    }
}

/// Kind of a global, from the `.type` directive or the ELF symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum GlobalKind {
    /// Code.
    Function,
    /// Data.
    Object,
    /// Anything else; ignored during layout.
    Unknown,
}

/// A global object and its initial bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Global {
    /// Global name.
    pub name: String,
    /// Size in bytes.
    pub size: usize,
    /// Initial contents; shorter than `size` means zero-filled.
    pub data: Vec<u8>,
    /// Function, object or unknown.
    pub kind: GlobalKind,
    /// Absolute address once resolved.
    pub address: Option<Word>,
}

/// Where code and data live once resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryLayout {
    /// First address of the program image.
    pub base_address: Word,
    /// Code + data size in bytes.
    pub total_size: Word,
    /// First code address.
    pub code_start: Word,
    /// Code size in bytes.
    pub code_size: Word,
    /// First data address.
    pub data_start: Word,
    /// Data size in bytes.
    pub data_size: Word,
}

impl MemoryLayout {
    /// Whether `addr` falls inside the code section.
    pub fn contains_code(&self, addr: Word) -> bool {
        addr >= self.code_start && addr < self.code_start + self.code_size
    }
}

/// A source position attached to a code address.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceLocation {
    /// Source file path.
    pub file: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based column; `0` when unknown.
    pub column: usize,
}

/// Where a variable lives, from the DWARF location expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum VarLocation {
    /// In a register.
    Register(RegisterId),
    /// In memory at `reg + offset`.
    RegisterOffset(RegisterId, i64),
    /// In memory at `sp + offset` (the frame base is the stack pointer).
    FrameOffset(i64),
    /// The location expression uses unsupported opcodes.
    Unavailable,
}

/// A parameter or local of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Where it lives.
    pub location: VarLocation,
}

/// Debug description of one function, from DWARF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionDebug {
    /// Function name.
    pub name: String,
    /// First code address, relative to the code section until resolution.
    pub low_pc: Word,
    /// One past the last code address.
    pub high_pc: Word,
    /// Declaring file, when known.
    pub decl_file: Option<String>,
    /// Declaring line, when known.
    pub decl_line: Option<usize>,
    /// Formal parameters.
    pub params: Vec<Variable>,
    /// Local variables, including lexical-scope locals.
    pub locals: Vec<Variable>,
}

impl FunctionDebug {
    /// Parameters and locals visible at `addr`.
    pub fn visible_at(&self, addr: Word) -> impl Iterator<Item = &Variable> {
        let inside = addr >= self.low_pc && addr < self.high_pc;

        self.params
            .iter()
            .chain(self.locals.iter())
            .filter(move |_| inside)
    }
}

/// Source-level debug info: per-address locations and per-function
/// variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    /// Source location per 4-byte-aligned code address.
    pub locations: BTreeMap<Word, SourceLocation>,
    /// Per-function parameter/local descriptions.
    pub functions: Vec<FunctionDebug>,
}

impl DebugInfo {
    /// Whether any debug data is present.
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.functions.is_empty()
    }

    /// Source location of `addr`, when mapped.
    pub fn location(&self, addr: Word) -> Option<&SourceLocation> {
        self.locations.get(&addr)
    }

    /// Debug description of the function covering `addr`.
    pub fn function_at(&self, addr: Word) -> Option<&FunctionDebug> {
        self.functions
            .iter()
            .find(|f| addr >= f.low_pc && addr < f.high_pc)
    }

    /// Shift every address by `base`, used when the resolver places the
    /// code section.
    pub fn rebase(&mut self, base: Word) {
        self.locations = std::mem::take(&mut self.locations)
            .into_iter()
            .map(|(addr, loc)| (addr.wrapping_add(base), loc))
            .collect();

        for function in &mut self.functions {
            function.low_pc = function.low_pc.wrapping_add(base);
            function.high_pc = function.high_pc.wrapping_add(base);
        }
    }
}

/// A parsed program: the contract between parsers, the resolver and the
/// runner.
#[derive(Debug, Clone, Default)]
pub struct ProgramFile {
    /// Source file name, from `.file` or the object path.
    pub source_file: Option<String>,
    /// Ordered instruction list.
    pub instructions: Vec<ProgramInstruction>,
    /// Functions by declaration order.
    pub functions: Vec<Function>,
    /// Label name to instruction index; `-1`-style unresolved labels are
    /// absent from the map.
    pub labels: BTreeMap<String, usize>,
    /// Globals by declaration order.
    pub globals: Vec<Global>,
    /// Filled in by the resolver.
    pub layout: Option<MemoryLayout>,
    /// Source-level debug info, when the input carried any.
    pub debug_info: DebugInfo,
}

impl ProgramFile {
    /// Whether addresses have been assigned.
    pub fn is_resolved(&self) -> bool {
        self.layout.is_some()
    }

    /// Function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Function covering instruction index `i`.
    pub fn function_of_instruction(&self, i: usize) -> Option<&Function> {
        self.functions.iter().find(|f| f.contains(i))
    }

    /// Instruction index whose assigned address is `addr`.
    pub fn instruction_at(&self, addr: Word) -> Option<usize> {
        self.instructions.iter().position(|i| i.address == Some(addr))
    }

    /// Function covering code address `addr`.
    pub fn function_at(&self, addr: Word) -> Option<&Function> {
        self.instruction_at(addr)
            .and_then(|i| self.function_of_instruction(i))
    }

    /// Global by name.
    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Resolved address of `name`, considering functions, globals and
    /// labels in that order.
    pub fn symbol_address(&self, name: &str) -> Option<Word> {
        if let Some(function) = self.function(name) {
            let entry = function.entry()?;
            return self.instructions.get(entry)?.address;
        }

        if let Some(global) = self.global(name) {
            return global.address;
        }

        let index = *self.labels.get(name)?;
        self.instructions.get(index)?.address
    }

    /// Address of the entry point: `main` when present, else the first
    /// instruction.
    pub fn entry_address(&self) -> Option<Word> {
        self.symbol_address("main")
            .or_else(|| self.instructions.first().and_then(|i| i.address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_program() -> ProgramFile {
        let mut program = ProgramFile::default();

        for i in 0..4 {
            program.instructions.push(ProgramInstruction {
                address: Some(0x100 + 4 * i),
                ..ProgramInstruction::default()
            });
        }

        program.functions.push(Function {
            name: "main".into(),
            ranges: vec![(2, 4)],
            ..Function::default()
        });
        program.labels.insert(".L0".into(), 1);

        program
    }

    #[test]
    fn symbol_order_prefers_functions() {
        let mut program = resolved_program();
        program.globals.push(Global {
            name: "main".into(),
            size: 4,
            data: vec![],
            kind: GlobalKind::Object,
            address: Some(0x9999),
        });

        assert_eq!(Some(0x108), program.symbol_address("main"));
        assert_eq!(Some(0x104), program.symbol_address(".L0"));
    }

    #[test]
    fn entry_point_defaults_to_first_instruction() {
        let mut program = resolved_program();
        program.functions.clear();

        assert_eq!(Some(0x100), program.entry_address());
    }

    #[test]
    fn function_lookup_by_address() {
        let program = resolved_program();

        assert_eq!("main", program.function_at(0x108).unwrap().name);
        assert!(program.function_at(0x104).is_none());
    }
}
