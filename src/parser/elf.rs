//! Loader for 32-bit little-endian ELF relocatable objects.
//!
//! One `.text` section provides the code; `.data`/`.rodata`/`.bss` objects
//! become globals; `.rel.text` carries the Lo/Hi relocation pairs of 32-bit
//! immediate address loads. The toolchain emits ARM-style MOVW fixups whose
//! low-12-bit field overlaps the 5-bit opcode, so the opcode of a relocated
//! instruction is reconstructed from the relocation type instead of trusted
//! from memory.

use crate::error::ParseError;
use crate::parser::dwarf::{self, DwarfSections};
use crate::program::{
    Function, Global, GlobalKind, ProgramFile, ProgramInstruction, SymbolRef, SymbolUsage,
};

use cucaracha_asm::{extract_field, field_to_imm16, Instruction, Opcode};

use std::collections::HashMap;
use std::path::Path;

use itertools::Itertools;
use tracing::debug;

/// Relocation selecting the low 16 bits of a symbol address.
const R_CUCARACHA_LO16: u8 = 45;

/// Relocation selecting the high 16 bits of a symbol address.
const R_CUCARACHA_HI16: u8 = 46;

const SHT_SYMTAB: u32 = 2;
const SHT_REL: u32 = 9;

const STT_OBJECT: u8 = 1;
const STT_FUNC: u8 = 2;
const STT_SECTION: u8 = 3;

/// Parse an object file from disk.
pub fn parse_object_file(path: impl AsRef<Path>) -> Result<ProgramFile, ParseError> {
    let bytes = std::fs::read(path.as_ref())?;
    let mut program = parse_object_bytes(&bytes)?;

    if program.source_file.is_none() {
        program.source_file = Some(path.as_ref().display().to_string());
    }

    Ok(program)
}

/// Parse an object image.
pub fn parse_object_bytes(bytes: &[u8]) -> Result<ProgramFile, ParseError> {
    let elf = Object::parse(bytes)?;

    let text = elf
        .section_by_name(".text")
        .ok_or_else(|| ParseError::Elf("missing .text section".into()))?;
    let code = elf.section_bytes(text)?;

    let mut program = ProgramFile::default();
    decode_code(&mut program, code);

    let symbols = elf.symbols()?;
    collect_functions(&mut program, &symbols);
    collect_globals(&mut program, &elf, &symbols)?;
    apply_relocations(&mut program, &elf, &symbols, code)?;

    if let Some(info) = elf.section_by_name(".debug_info") {
        let sections = DwarfSections {
            info: elf.section_bytes(info)?,
            abbrev: elf.named_section_bytes(".debug_abbrev")?,
            str_data: elf.named_section_bytes(".debug_str")?,
            line: elf.named_section_bytes(".debug_line")?,
        };

        program.debug_info = dwarf::parse(&sections)?;
    }

    debug!(
        instructions = program.instructions.len(),
        functions = program.functions.len(),
        globals = program.globals.len(),
        has_debug = !program.debug_info.is_empty(),
        "object parsed"
    );

    Ok(program)
}

fn decode_code(program: &mut ProgramFile, code: &[u8]) {
    for chunk in code.chunks(4) {
        let mut raw = [0u8; 4];
        raw[..chunk.len()].copy_from_slice(chunk);

        let word = u32::from_le_bytes(raw);
        let decoded = Instruction::decode(word).ok();
        let text = match decoded.as_ref() {
            Some(instruction) => instruction.to_string(),
            None => format!("unknown 0x{word:08x}"),
        };

        program.instructions.push(ProgramInstruction {
            line: 0,
            text,
            raw: Some(raw),
            decoded,
            address: None,
            symbols: Vec::new(),
        });
    }
}

fn collect_functions(program: &mut ProgramFile, symbols: &[Symbol]) {
    for symbol in symbols {
        if symbol.kind != STT_FUNC || symbol.name.is_empty() {
            continue;
        }

        let start = (symbol.value / 4) as usize;
        let end = ((symbol.value + symbol.size.max(4) + 3) / 4) as usize;

        program.functions.push(Function {
            name: symbol.name.clone(),
            file: None,
            start_line: None,
            end_line: None,
            ranges: vec![(start, end.min(program.instructions.len()))],
        });
    }
}

fn collect_globals(
    program: &mut ProgramFile,
    elf: &Object<'_>,
    symbols: &[Symbol],
) -> Result<(), ParseError> {
    for symbol in symbols {
        if symbol.kind != STT_OBJECT || symbol.name.is_empty() {
            continue;
        }

        let section = match elf.section(symbol.shndx as usize) {
            Some(section) => section,
            None => continue,
        };

        let name = elf.section_name(section)?;
        if !matches!(name, ".data" | ".rodata" | ".bss") {
            continue;
        }

        // .bss carries no image bytes; everything else provides the
        // symbol's slice of the section.
        let data = if name == ".bss" {
            Vec::new()
        } else {
            let bytes = elf.section_bytes(section)?;
            let start = symbol.value as usize;
            let end = start + symbol.size as usize;

            bytes
                .get(start..end)
                .ok_or_else(|| ParseError::Elf(format!("object {} exceeds {name}", symbol.name)))?
                .to_vec()
        };

        program.globals.push(Global {
            name: symbol.name.clone(),
            size: symbol.size as usize,
            data,
            kind: GlobalKind::Object,
            address: None,
        });
    }

    Ok(())
}

fn apply_relocations(
    program: &mut ProgramFile,
    elf: &Object<'_>,
    symbols: &[Symbol],
    code: &[u8],
) -> Result<(), ParseError> {
    let section = match elf.section_by_name(".rel.text") {
        Some(section) => section,
        None => return Ok(()),
    };

    let relocations = elf.relocations(section)?;
    let mut auto_labels = 0usize;
    let mut data_globals: HashMap<u16, String> = HashMap::new();

    for (lo, hi) in relocations.iter().tuples() {
        if lo.kind != R_CUCARACHA_LO16 || hi.kind != R_CUCARACHA_HI16 {
            return Err(ParseError::Elf(format!(
                "unsupported relocation pair ({}, {}) at 0x{:x}",
                lo.kind, hi.kind, lo.offset
            )));
        }

        if hi.offset != lo.offset + 4 {
            return Err(ParseError::Elf(format!(
                "lo/hi relocations not adjacent at 0x{:x}",
                lo.offset
            )));
        }

        let lo_word = read_code_word(code, lo.offset)?;
        let hi_word = read_code_word(code, hi.offset)?;

        // The fixup clobbered bits 0-11; the immediate field (bits 5-20)
        // and the register field (bits 21-28) are what survives.
        let lo_imm = field_to_imm16(lo_word);
        let hi_imm = field_to_imm16(hi_word);
        let register = extract_field(lo_word, 21, 8);

        let combined = ((hi_imm as u32) << 16) | (lo_imm as u32 & 0xffff);

        let symbol = symbols
            .get(lo.symbol as usize)
            .ok_or_else(|| ParseError::Elf(format!("relocation names symbol {}", lo.symbol)))?;

        let target = match symbol.kind {
            STT_FUNC | STT_OBJECT if !symbol.name.is_empty() => symbol.name.clone(),

            STT_SECTION => {
                let section = elf
                    .section(symbol.shndx as usize)
                    .ok_or_else(|| ParseError::Elf("section symbol without section".into()))?;

                match elf.section_name(section)? {
                    ".text" => {
                        // Internal branch target: the combined addend is an
                        // offset into the code.
                        let index = (combined / 4) as usize;
                        let existing = program
                            .labels
                            .iter()
                            .find(|(_, i)| **i == index)
                            .map(|(name, _)| name.clone());

                        existing.unwrap_or_else(|| {
                            let name = format!(".L_auto_{auto_labels}");
                            auto_labels += 1;
                            program.labels.insert(name.clone(), index);
                            name
                        })
                    }

                    ".rodata" => data_globals
                        .entry(symbol.shndx)
                        .or_insert_with(|| {
                            let name = format!(".L_data_{}", program.globals.len());
                            let bytes = elf.section_bytes(section).unwrap_or_default();

                            program.globals.push(Global {
                                name: name.clone(),
                                size: bytes.len(),
                                data: bytes.to_vec(),
                                kind: GlobalKind::Object,
                                address: None,
                            });

                            name
                        })
                        .clone(),

                    other => {
                        return Err(ParseError::Elf(format!(
                            "relocation against unsupported section {other}"
                        )))
                    }
                }
            }

            _ => {
                return Err(ParseError::Elf(format!(
                    "relocation against unsupported symbol {:?}",
                    symbol.name
                )))
            }
        };

        patch_pair_half(program, lo.offset, Opcode::MOVL, lo_imm, register, &target, SymbolUsage::Lo);
        patch_pair_half(program, hi.offset, Opcode::MOVH, hi_imm, register, &target, SymbolUsage::Hi);
    }

    if relocations.len() % 2 != 0 {
        return Err(ParseError::Elf("dangling lo relocation without hi".into()));
    }

    Ok(())
}

fn read_code_word(code: &[u8], offset: u32) -> Result<u32, ParseError> {
    let start = offset as usize;

    code.get(start..start + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ParseError::Elf(format!("relocation offset 0x{offset:x} outside .text")))
}

fn patch_pair_half(
    program: &mut ProgramFile,
    offset: u32,
    opcode: Opcode,
    imm: u16,
    register: u32,
    target: &str,
    usage: SymbolUsage,
) {
    let index = (offset / 4) as usize;

    if let Some(entry) = program.instructions.get_mut(index) {
        let instruction = Instruction::new(opcode, &[imm as u32, register]);

        entry.text = instruction.to_string();
        entry.decoded = Some(instruction);
        entry.symbols.push(SymbolRef {
            name: target.to_string(),
            usage,
            operand: 0,
        });
    }
}

/* minimal ELF32 reader */

#[derive(Debug, Clone, Copy)]
struct Section {
    name_offset: u32,
    kind: u32,
    offset: u32,
    size: u32,
    link: u32,
    entsize: u32,
}

#[derive(Debug, Clone)]
struct Symbol {
    name: String,
    value: u32,
    size: u32,
    kind: u8,
    shndx: u16,
}

#[derive(Debug, Clone, Copy)]
struct Relocation {
    offset: u32,
    symbol: u32,
    kind: u8,
}

struct Object<'a> {
    bytes: &'a [u8],
    sections: Vec<Section>,
    shstrtab: usize,
}

impl<'a> Object<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self, ParseError> {
        if bytes.len() < 52 || &bytes[..4] != b"\x7fELF" {
            return Err(ParseError::Elf("not an ELF image".into()));
        }

        // Class and endianness are the only identity fields the loader
        // insists on.
        if bytes[4] != 1 {
            return Err(ParseError::Elf("not a 32-bit object".into()));
        }

        if bytes[5] != 1 {
            return Err(ParseError::Elf("not a little-endian object".into()));
        }

        let shoff = read_u32(bytes, 32)? as usize;
        let shentsize = read_u16(bytes, 46)? as usize;
        let shnum = read_u16(bytes, 48)? as usize;
        let shstrndx = read_u16(bytes, 50)? as usize;

        if shentsize < 40 {
            return Err(ParseError::Elf("section header entry too small".into()));
        }

        let mut sections = Vec::with_capacity(shnum);

        for i in 0..shnum {
            let base = shoff + i * shentsize;

            sections.push(Section {
                name_offset: read_u32(bytes, base)?,
                kind: read_u32(bytes, base + 4)?,
                offset: read_u32(bytes, base + 16)?,
                size: read_u32(bytes, base + 20)?,
                link: read_u32(bytes, base + 24)?,
                entsize: read_u32(bytes, base + 36)?,
            });
        }

        if shstrndx >= sections.len() {
            return Err(ParseError::Elf("section name table missing".into()));
        }

        Ok(Self {
            bytes,
            sections,
            shstrtab: shstrndx,
        })
    }

    fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    fn section_name(&self, section: &Section) -> Result<&str, ParseError> {
        let table = self.sections[self.shstrtab];
        let strings = self.section_bytes_of(&table)?;

        read_cstr(strings, section.name_offset as usize)
            .ok_or_else(|| ParseError::Elf("bad section name offset".into()))
    }

    fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| self.section_name(s).map_or(false, |n| n == name))
    }

    fn section_bytes(&self, section: &Section) -> Result<&'a [u8], ParseError> {
        self.section_bytes_of(section)
    }

    fn section_bytes_of(&self, section: &Section) -> Result<&'a [u8], ParseError> {
        let start = section.offset as usize;
        let end = start + section.size as usize;

        self.bytes
            .get(start..end)
            .ok_or_else(|| ParseError::Elf("section exceeds the image".into()))
    }

    /// Bytes of a named section, or empty when the section is absent.
    fn named_section_bytes(&self, name: &str) -> Result<&'a [u8], ParseError> {
        match self.section_by_name(name) {
            Some(section) => self.section_bytes(section),
            None => Ok(&[]),
        }
    }

    fn symbols(&self) -> Result<Vec<Symbol>, ParseError> {
        let symtab = match self.sections.iter().find(|s| s.kind == SHT_SYMTAB) {
            Some(section) => *section,
            None => return Ok(Vec::new()),
        };

        let strtab = self
            .section(symtab.link as usize)
            .copied()
            .ok_or_else(|| ParseError::Elf("symbol table without string table".into()))?;
        let strings = self.section_bytes_of(&strtab)?;

        let bytes = self.section_bytes_of(&symtab)?;
        let entsize = if symtab.entsize == 0 { 16 } else { symtab.entsize as usize };
        let mut symbols = Vec::new();

        for entry in bytes.chunks_exact(entsize) {
            let name_offset = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as usize;
            let name = read_cstr(strings, name_offset).unwrap_or_default().to_string();

            symbols.push(Symbol {
                name,
                value: u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]),
                size: u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]),
                kind: entry[12] & 0x0f,
                shndx: u16::from_le_bytes([entry[14], entry[15]]),
            });
        }

        Ok(symbols)
    }

    fn relocations(&self, section: &Section) -> Result<Vec<Relocation>, ParseError> {
        if section.kind != SHT_REL {
            return Err(ParseError::Elf("expected a REL section".into()));
        }

        let bytes = self.section_bytes_of(section)?;
        let entsize = if section.entsize == 0 { 8 } else { section.entsize as usize };

        Ok(bytes
            .chunks_exact(entsize)
            .map(|entry| {
                let info = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);

                Relocation {
                    offset: u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]),
                    symbol: info >> 8,
                    kind: (info & 0xff) as u8,
                }
            })
            .collect())
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, ParseError> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| ParseError::Elf("truncated image".into()))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, ParseError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ParseError::Elf("truncated image".into()))
}

fn read_cstr(bytes: &[u8], offset: usize) -> Option<&str> {
    let tail = bytes.get(offset..)?;
    let end = tail.iter().position(|b| *b == 0)?;

    std::str::from_utf8(&tail[..end]).ok()
}
