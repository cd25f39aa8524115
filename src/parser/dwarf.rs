//! Minimal DWARF consumer: line tables and a small set of location
//! expressions.
//!
//! `.debug_info`/`.debug_abbrev` provide compilation units, subprograms,
//! parameters, variables and lexical scopes; `.debug_line` provides the
//! statement table, which is propagated to every 4-byte-aligned address so
//! the debugger can map any instruction back to a source position. Location
//! expressions decode `DW_OP_regN`, `DW_OP_bregN`, `DW_OP_fbreg` and
//! `DW_OP_plus_uconst`; everything else yields an unavailable location.

use crate::error::ParseError;
use crate::program::{DebugInfo, FunctionDebug, SourceLocation, VarLocation, Variable};

use cucaracha_asm::{regs, RegisterId, Word};

use std::collections::HashMap;

use tracing::debug;

/* tags */
const DW_TAG_LEXICAL_BLOCK: u64 = 0x0b;
const DW_TAG_COMPILE_UNIT: u64 = 0x11;
const DW_TAG_FORMAL_PARAMETER: u64 = 0x05;
const DW_TAG_SUBPROGRAM: u64 = 0x2e;
const DW_TAG_VARIABLE: u64 = 0x34;

/* attributes */
const DW_AT_LOCATION: u64 = 0x02;
const DW_AT_NAME: u64 = 0x03;
const DW_AT_STMT_LIST: u64 = 0x10;
const DW_AT_LOW_PC: u64 = 0x11;
const DW_AT_HIGH_PC: u64 = 0x12;
const DW_AT_DECL_FILE: u64 = 0x3a;
const DW_AT_DECL_LINE: u64 = 0x3b;

/* location opcodes */
const DW_OP_PLUS_UCONST: u8 = 0x23;
const DW_OP_REG0: u8 = 0x50;
const DW_OP_REG31: u8 = 0x6f;
const DW_OP_BREG0: u8 = 0x70;
const DW_OP_BREG31: u8 = 0x8f;
const DW_OP_FBREG: u8 = 0x91;

/// The DWARF sections of an object; absent sections are empty slices.
pub(crate) struct DwarfSections<'a> {
    pub info: &'a [u8],
    pub abbrev: &'a [u8],
    pub str_data: &'a [u8],
    pub line: &'a [u8],
}

/// Parse the debug sections into the program's debug-info model. Addresses
/// stay `.text`-relative; the resolver rebases them when it places the code
/// section.
pub(crate) fn parse(sections: &DwarfSections<'_>) -> Result<DebugInfo, ParseError> {
    let mut info = DebugInfo::default();
    let mut reader = Reader::new(sections.info);

    while !reader.is_empty() {
        let unit = UnitHeader::parse(&mut reader)?;
        let mut unit_reader = Reader::new(unit.entries);

        let abbrevs = parse_abbrevs(sections.abbrev, unit.abbrev_offset)?;
        let mut cu = Unit {
            sections,
            abbrevs,
            files: Vec::new(),
            info: &mut info,
        };

        cu.walk(&mut unit_reader, unit.version)?;
    }

    debug!(
        functions = info.functions.len(),
        locations = info.locations.len(),
        "debug info parsed"
    );

    Ok(info)
}

/* .debug_info */

struct UnitHeader<'a> {
    entries: &'a [u8],
    abbrev_offset: usize,
    version: u16,
}

impl<'a> UnitHeader<'a> {
    fn parse(reader: &mut Reader<'a>) -> Result<Self, ParseError> {
        let unit_length = reader.u32()? as usize;
        let body = reader.take(unit_length)?;

        let mut header = Reader::new(body);
        let version = header.u16()?;

        if !(2..=4).contains(&version) {
            return Err(ParseError::Dwarf(format!("unsupported DWARF version {version}")));
        }

        let abbrev_offset = header.u32()? as usize;
        let _address_size = header.u8()?;

        Ok(Self {
            entries: header.rest(),
            abbrev_offset,
            version,
        })
    }
}

#[derive(Debug, Clone)]
struct Abbrev {
    tag: u64,
    has_children: bool,
    attributes: Vec<(u64, u64)>,
}

fn parse_abbrevs(bytes: &[u8], offset: usize) -> Result<HashMap<u64, Abbrev>, ParseError> {
    let bytes = bytes
        .get(offset..)
        .ok_or_else(|| ParseError::Dwarf("abbrev offset outside .debug_abbrev".into()))?;
    let mut reader = Reader::new(bytes);
    let mut abbrevs = HashMap::new();

    loop {
        let code = reader.uleb()?;
        if code == 0 {
            break;
        }

        let tag = reader.uleb()?;
        let has_children = reader.u8()? != 0;
        let mut attributes = Vec::new();

        loop {
            let attr = reader.uleb()?;
            let form = reader.uleb()?;

            if attr == 0 && form == 0 {
                break;
            }

            attributes.push((attr, form));
        }

        abbrevs.insert(
            code,
            Abbrev {
                tag,
                has_children,
                attributes,
            },
        );
    }

    Ok(abbrevs)
}

/// An attribute value in one of the shapes the subset cares about.
#[derive(Debug, Clone, Default)]
struct Attributes {
    name: Option<String>,
    low_pc: Option<Word>,
    high_pc: Option<Word>,
    high_pc_is_offset: bool,
    decl_file: Option<u64>,
    decl_line: Option<u64>,
    location: Option<Vec<u8>>,
    stmt_list: Option<u64>,
}

struct Unit<'a, 'b> {
    sections: &'b DwarfSections<'a>,
    abbrevs: HashMap<u64, Abbrev>,
    files: Vec<String>,
    info: &'b mut DebugInfo,
}

impl<'a, 'b> Unit<'a, 'b> {
    /// Walk the DIE tree of one compilation unit.
    fn walk(&mut self, reader: &mut Reader<'a>, version: u16) -> Result<(), ParseError> {
        // The root DIE is the compile unit; its stmt_list points at the line
        // program, which also provides the file table for decl_file
        // indices.
        let root = match self.entry(reader, version)? {
            Some((abbrev, attrs)) if abbrev.tag == DW_TAG_COMPILE_UNIT => (abbrev, attrs),
            Some(_) => return Err(ParseError::Dwarf("root DIE is not a compile unit".into())),
            None => return Ok(()),
        };

        if let Some(offset) = root.1.stmt_list {
            let line = LineProgram::parse(self.sections.line, offset as usize)?;
            self.files = line.files;
            propagate_rows(&line.rows, self.info);
        }

        if root.0.has_children {
            self.children(reader, version, None)?;
        }

        Ok(())
    }

    /// Parse the children of a DIE, attaching subprogram members to
    /// `function` (an index into `info.functions`).
    fn children(
        &mut self,
        reader: &mut Reader<'a>,
        version: u16,
        function: Option<usize>,
    ) -> Result<(), ParseError> {
        loop {
            let (abbrev, attrs) = match self.entry(reader, version)? {
                Some(entry) => entry,
                None => return Ok(()),
            };

            match abbrev.tag {
                DW_TAG_SUBPROGRAM => {
                    let low_pc = attrs.low_pc.unwrap_or(0);
                    let high_pc = match (attrs.high_pc, attrs.high_pc_is_offset) {
                        (Some(pc), true) => low_pc + pc,
                        (Some(pc), false) => pc,
                        (None, _) => low_pc,
                    };

                    self.info.functions.push(FunctionDebug {
                        name: attrs.name.clone().unwrap_or_default(),
                        low_pc,
                        high_pc,
                        decl_file: attrs.decl_file.and_then(|i| self.file_name(i)),
                        decl_line: attrs.decl_line.map(|l| l as usize),
                        params: Vec::new(),
                        locals: Vec::new(),
                    });

                    if abbrev.has_children {
                        let index = self.info.functions.len() - 1;
                        self.children(reader, version, Some(index))?;
                    }
                }

                DW_TAG_FORMAL_PARAMETER | DW_TAG_VARIABLE => {
                    if let Some(index) = function {
                        let variable = Variable {
                            name: attrs.name.clone().unwrap_or_default(),
                            location: attrs
                                .location
                                .as_deref()
                                .map(decode_location)
                                .unwrap_or(VarLocation::Unavailable),
                        };

                        let target = &mut self.info.functions[index];
                        if abbrev.tag == DW_TAG_FORMAL_PARAMETER {
                            target.params.push(variable);
                        } else {
                            target.locals.push(variable);
                        }
                    }

                    if abbrev.has_children {
                        self.children(reader, version, function)?;
                    }
                }

                // Lexical-scope locals belong to the enclosing function.
                DW_TAG_LEXICAL_BLOCK => {
                    if abbrev.has_children {
                        self.children(reader, version, function)?;
                    }
                }

                _ => {
                    if abbrev.has_children {
                        self.children(reader, version, None)?;
                    }
                }
            }
        }
    }

    /// One DIE: `None` marks the end of a sibling list.
    fn entry(
        &mut self,
        reader: &mut Reader<'a>,
        version: u16,
    ) -> Result<Option<(Abbrev, Attributes)>, ParseError> {
        if reader.is_empty() {
            return Ok(None);
        }

        let code = reader.uleb()?;
        if code == 0 {
            return Ok(None);
        }

        let abbrev = self
            .abbrevs
            .get(&code)
            .cloned()
            .ok_or_else(|| ParseError::Dwarf(format!("unknown abbreviation code {code}")))?;

        let mut attrs = Attributes::default();

        for (attr, form) in &abbrev.attributes {
            let value = read_form(reader, *form, version, self.sections.str_data)?;

            match *attr {
                DW_AT_NAME => attrs.name = value.into_string(),
                DW_AT_LOW_PC => attrs.low_pc = value.into_word(),
                DW_AT_HIGH_PC => {
                    // DWARF 4 encodes high_pc as an offset when the form is
                    // a constant rather than an address.
                    attrs.high_pc_is_offset = !matches!(value, FormValue::Addr(_));
                    attrs.high_pc = value.into_word();
                }
                DW_AT_DECL_FILE => attrs.decl_file = value.into_u64(),
                DW_AT_DECL_LINE => attrs.decl_line = value.into_u64(),
                DW_AT_LOCATION => attrs.location = value.into_block(),
                DW_AT_STMT_LIST => attrs.stmt_list = value.into_u64(),
                _ => {}
            }
        }

        Ok(Some((abbrev, attrs)))
    }

    /// decl_file indices are 1-based into the line program's file table.
    fn file_name(&self, index: u64) -> Option<String> {
        (index > 0)
            .then(|| self.files.get(index as usize - 1).cloned())
            .flatten()
    }
}

/* forms */

#[derive(Debug, Clone)]
enum FormValue {
    Addr(Word),
    UInt(u64),
    Int(i64),
    Str(String),
    Block(Vec<u8>),
    Flag(bool),
}

impl FormValue {
    fn into_string(self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    fn into_word(self) -> Option<Word> {
        match self {
            Self::Addr(w) => Some(w),
            Self::UInt(v) => Some(v as Word),
            Self::Int(v) => Some(v as Word),
            _ => None,
        }
    }

    fn into_u64(self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(v),
            Self::Int(v) => Some(v as u64),
            Self::Addr(v) => Some(v as u64),
            _ => None,
        }
    }

    fn into_block(self) -> Option<Vec<u8>> {
        match self {
            Self::Block(b) => Some(b),
            _ => None,
        }
    }
}

fn read_form(
    reader: &mut Reader<'_>,
    form: u64,
    version: u16,
    str_data: &[u8],
) -> Result<FormValue, ParseError> {
    let value = match form {
        0x01 => FormValue::Addr(reader.u32()?),                        // addr
        0x03 => {
            let len = reader.u16()? as usize;                          // block2
            FormValue::Block(reader.take(len)?.to_vec())
        }
        0x04 => {
            let len = reader.u32()? as usize;                          // block4
            FormValue::Block(reader.take(len)?.to_vec())
        }
        0x05 => FormValue::UInt(reader.u16()? as u64),                 // data2
        0x06 => FormValue::UInt(reader.u32()? as u64),                 // data4
        0x07 => FormValue::UInt(reader.u64()?),                        // data8
        0x08 => FormValue::Str(reader.cstr()?),                        // string
        0x09 => {
            let len = reader.uleb()? as usize;                         // block
            FormValue::Block(reader.take(len)?.to_vec())
        }
        0x0a => {
            let len = reader.u8()? as usize;                           // block1
            FormValue::Block(reader.take(len)?.to_vec())
        }
        0x0b => FormValue::UInt(reader.u8()? as u64),                  // data1
        0x0c => FormValue::Flag(reader.u8()? != 0),                    // flag
        0x0d => FormValue::Int(reader.sleb()?),                        // sdata
        0x0e => {
            let offset = reader.u32()? as usize;                       // strp
            let text = read_cstr_at(str_data, offset)
                .ok_or_else(|| ParseError::Dwarf("bad .debug_str offset".into()))?;
            FormValue::Str(text)
        }
        0x0f => FormValue::UInt(reader.uleb()?),                       // udata
        0x10 => FormValue::UInt(reader.u32()? as u64),                 // ref_addr
        0x11 => FormValue::UInt(reader.u8()? as u64),                  // ref1
        0x12 => FormValue::UInt(reader.u16()? as u64),                 // ref2
        0x13 => FormValue::UInt(reader.u32()? as u64),                 // ref4
        0x14 => FormValue::UInt(reader.u64()?),                        // ref8
        0x15 => FormValue::UInt(reader.uleb()?),                       // ref_udata
        0x16 => {
            let real = reader.uleb()?;                                 // indirect
            return read_form(reader, real, version, str_data);
        }
        0x17 => FormValue::UInt(reader.u32()? as u64),                 // sec_offset
        0x18 => {
            let len = reader.uleb()? as usize;                         // exprloc
            FormValue::Block(reader.take(len)?.to_vec())
        }
        0x19 => FormValue::Flag(true),                                 // flag_present
        0x20 => FormValue::UInt(reader.u64()?),                        // ref_sig8
        other => {
            return Err(ParseError::Dwarf(format!("unsupported form 0x{other:x}")));
        }
    };

    Ok(value)
}

/* location expressions */

/// DWARF register numbers translate to the target's file: 0-9 are the
/// general-purpose set, 13 the stack pointer, 14 the link register.
fn translate_register(dwarf: u8) -> Option<RegisterId> {
    match dwarf {
        0..=9 => Some(regs::r(dwarf as usize)),
        13 => Some(regs::SP),
        14 => Some(regs::LR),
        _ => None,
    }
}

fn decode_location(expr: &[u8]) -> VarLocation {
    let mut reader = Reader::new(expr);

    let op = match reader.u8() {
        Ok(op) => op,
        Err(_) => return VarLocation::Unavailable,
    };

    match op {
        DW_OP_REG0..=DW_OP_REG31 => translate_register(op - DW_OP_REG0)
            .map(VarLocation::Register)
            .unwrap_or(VarLocation::Unavailable),

        DW_OP_BREG0..=DW_OP_BREG31 => {
            let offset = match reader.sleb() {
                Ok(offset) => offset,
                Err(_) => return VarLocation::Unavailable,
            };

            translate_register(op - DW_OP_BREG0)
                .map(|reg| VarLocation::RegisterOffset(reg, offset))
                .unwrap_or(VarLocation::Unavailable)
        }

        DW_OP_FBREG => match reader.sleb() {
            Ok(offset) => VarLocation::FrameOffset(offset),
            Err(_) => VarLocation::Unavailable,
        },

        DW_OP_PLUS_UCONST => match reader.uleb() {
            Ok(offset) => VarLocation::FrameOffset(offset as i64),
            Err(_) => VarLocation::Unavailable,
        },

        _ => VarLocation::Unavailable,
    }
}

/* .debug_line */

struct LineProgram {
    files: Vec<String>,
    /// `(address, file index, line, column)` statement rows plus
    /// end-of-sequence boundaries.
    rows: Vec<LineRow>,
}

#[derive(Debug, Clone)]
struct LineRow {
    address: Word,
    file: String,
    line: usize,
    column: usize,
    end_sequence: bool,
}

impl LineProgram {
    fn parse(bytes: &[u8], offset: usize) -> Result<Self, ParseError> {
        let bytes = bytes
            .get(offset..)
            .ok_or_else(|| ParseError::Dwarf("line program offset outside .debug_line".into()))?;
        let mut reader = Reader::new(bytes);

        let unit_length = reader.u32()? as usize;
        let mut unit = Reader::new(Reader::new(reader.rest()).take(unit_length)?);

        let version = unit.u16()?;
        if !(2..=4).contains(&version) {
            return Err(ParseError::Dwarf(format!("unsupported line table version {version}")));
        }

        let header_length = unit.u32()? as usize;
        let header_end = unit.consumed() + header_length;

        let minimum_instruction_length = unit.u8()? as u64;
        if version >= 4 {
            let _max_ops = unit.u8()?;
        }
        let _default_is_stmt = unit.u8()?;
        let line_base = unit.u8()? as i8 as i64;
        let line_range = unit.u8()? as u64;
        let opcode_base = unit.u8()?;

        let mut std_lengths = Vec::new();
        for _ in 1..opcode_base {
            std_lengths.push(unit.u8()?);
        }

        // include directories, terminated by an empty name
        loop {
            let dir = unit.cstr()?;
            if dir.is_empty() {
                break;
            }
        }

        let mut files = Vec::new();
        loop {
            let name = unit.cstr()?;
            if name.is_empty() {
                break;
            }

            let _dir = unit.uleb()?;
            let _mtime = unit.uleb()?;
            let _size = unit.uleb()?;
            files.push(name);
        }

        // The program itself starts right after the declared header length.
        while unit.consumed() < header_end {
            let _ = unit.u8()?;
        }

        let mut rows = Vec::new();
        let mut state = LineState::new();

        while !unit.is_empty() {
            let opcode = unit.u8()?;

            if opcode >= opcode_base {
                let adjusted = (opcode - opcode_base) as u64;
                state.address += (adjusted / line_range) * minimum_instruction_length;
                state.line += line_base + (adjusted % line_range) as i64;
                state.emit(&files, &mut rows, false);
            } else if opcode == 0 {
                // extended
                let length = unit.uleb()? as usize;
                let mut extended = Reader::new(unit.take(length)?);
                let sub = extended.u8()?;

                match sub {
                    0x01 => {
                        state.emit(&files, &mut rows, true);
                        state = LineState::new();
                    }
                    0x02 => state.address = extended.u32()? as u64,
                    _ => {} // define_file and vendor extensions change nothing we track
                }
            } else {
                match opcode {
                    0x01 => state.emit(&files, &mut rows, false),
                    0x02 => state.address += unit.uleb()? * minimum_instruction_length,
                    0x03 => state.line += unit.sleb()?,
                    0x04 => state.file = unit.uleb()?,
                    0x05 => state.column = unit.uleb()?,
                    0x06 | 0x07 | 0x0a | 0x0b => {}
                    0x08 => {
                        let adjusted = (255 - opcode_base) as u64;
                        state.address += (adjusted / line_range) * minimum_instruction_length;
                    }
                    0x09 => state.address += unit.u16()? as u64,
                    0x0c => {
                        let _isa = unit.uleb()?;
                    }
                    other => {
                        // Unknown standard opcode: skip its declared operands.
                        let operands = std_lengths.get(other as usize - 1).copied().unwrap_or(0);
                        for _ in 0..operands {
                            let _ = unit.uleb()?;
                        }
                    }
                }
            }
        }

        rows.sort_by_key(|row| row.address);

        Ok(Self { files, rows })
    }
}

struct LineState {
    address: u64,
    file: u64,
    line: i64,
    column: u64,
}

impl LineState {
    fn new() -> Self {
        Self {
            address: 0,
            file: 1,
            line: 1,
            column: 0,
        }
    }

    fn emit(&self, files: &[String], rows: &mut Vec<LineRow>, end_sequence: bool) {
        let file = (self.file > 0)
            .then(|| files.get(self.file as usize - 1).cloned())
            .flatten()
            .unwrap_or_default();

        rows.push(LineRow {
            address: self.address as Word,
            file,
            line: self.line.max(0) as usize,
            column: self.column as usize,
            end_sequence,
        });
    }
}

/// The line program only marks statement boundaries; fill every
/// 4-byte-aligned address up to the next row with the current row's
/// location.
fn propagate_rows(rows: &[LineRow], info: &mut DebugInfo) {
    for pair in rows.windows(2) {
        let (row, next) = (&pair[0], &pair[1]);

        if row.end_sequence {
            continue;
        }

        let mut addr = row.address & !3;
        while addr < next.address {
            info.locations.insert(
                addr,
                SourceLocation {
                    file: row.file.clone(),
                    line: row.line,
                    column: row.column,
                },
            );
            addr += 4;
        }
    }

    if let Some(last) = rows.last().filter(|row| !row.end_sequence) {
        info.locations.insert(
            last.address & !3,
            SourceLocation {
                file: last.file.clone(),
                line: last.line,
                column: last.column,
            },
        );
    }
}

/* byte reader */

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn is_empty(&self) -> bool {
        self.position >= self.bytes.len()
    }

    fn consumed(&self) -> usize {
        self.position
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.position.min(self.bytes.len())..]
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let start = self.position;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| ParseError::Dwarf("truncated data".into()))?;

        self.position = end;
        Ok(&self.bytes[start..end])
    }

    fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ParseError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, ParseError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn cstr(&mut self) -> Result<String, ParseError> {
        let rest = self.rest();
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| ParseError::Dwarf("unterminated string".into()))?;

        let text = std::str::from_utf8(&rest[..end])
            .map_err(|_| ParseError::Dwarf("non-UTF-8 string".into()))?
            .to_string();
        self.position += end + 1;

        Ok(text)
    }

    fn uleb(&mut self) -> Result<u64, ParseError> {
        let mut value = 0u64;
        let mut shift = 0u32;

        loop {
            let byte = self.u8()?;
            value |= ((byte & 0x7f) as u64) << shift;

            if byte & 0x80 == 0 {
                return Ok(value);
            }

            shift += 7;
            if shift >= 64 {
                return Err(ParseError::Dwarf("ULEB128 too long".into()));
            }
        }
    }

    fn sleb(&mut self) -> Result<i64, ParseError> {
        let mut value = 0i64;
        let mut shift = 0u32;

        loop {
            let byte = self.u8()?;
            value |= ((byte & 0x7f) as i64) << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }

                return Ok(value);
            }

            if shift >= 64 {
                return Err(ParseError::Dwarf("SLEB128 too long".into()));
            }
        }
    }
}

fn read_cstr_at(bytes: &[u8], offset: usize) -> Option<String> {
    let tail = bytes.get(offset..)?;
    let end = tail.iter().position(|b| *b == 0)?;

    std::str::from_utf8(&tail[..end]).ok().map(str::to_string)
}
