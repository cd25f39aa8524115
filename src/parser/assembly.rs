//! Two-pass parser for the target's assembly dialect.
//!
//! The dialect is shaped like ELF-toolchain output: `#` line comments,
//! `.file`/`.globl`/`.type`/`.size` directives, data directives accumulating
//! bytes into the most recent object, labels ending with `:` at the start of
//! a line, and identifiers carrying `@lo`/`@hi` suffixes to select a
//! relocation half. Instruction lines are assembled in place against the
//! instruction table; symbol operands stay zero until the resolver patches
//! them.

use crate::error::ParseError;
use crate::program::{
    Function, Global, GlobalKind, ProgramFile, ProgramInstruction, SymbolRef, SymbolUsage,
};

use cucaracha_asm::{regs, Condition, Instruction, Opcode, OperandKind};

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

/// Parse an assembly file from disk.
pub fn parse_assembly_file(path: impl AsRef<Path>) -> Result<ProgramFile, ParseError> {
    let source = std::fs::read_to_string(path.as_ref())?;
    let mut program = parse_assembly_source(&source)?;

    if program.source_file.is_none() {
        program.source_file = Some(path.as_ref().display().to_string());
    }

    Ok(program)
}

/// Parse assembly text.
pub fn parse_assembly_source(source: &str) -> Result<ProgramFile, ParseError> {
    // Pass 1: function names, so pass 2 can tell function labels from code
    // labels.
    let functions = collect_function_names(source);

    Pass2::new(functions).run(source)
}

fn collect_function_names(source: &str) -> HashSet<String> {
    source
        .lines()
        .filter_map(|line| {
            let (name, kind) = parse_type_directive(strip_comment(line).trim())?;
            (kind == GlobalKind::Function).then(|| name.to_string())
        })
        .collect()
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

/// `.type name,@function` / `.type name, @object`
fn parse_type_directive(line: &str) -> Option<(&str, GlobalKind)> {
    let rest = line.strip_prefix(".type")?;
    let mut parts = rest.splitn(2, ',');

    let name = parts.next()?.trim();
    let kind = match parts.next()?.trim() {
        "@function" => GlobalKind::Function,
        "@object" => GlobalKind::Object,
        _ => GlobalKind::Unknown,
    };

    (!name.is_empty()).then_some((name, kind))
}

struct Pass2 {
    program: ProgramFile,
    function_names: HashSet<String>,
    current_function: Option<(String, usize, usize)>,
    pending_labels: Vec<String>,
    /// Index into `program.globals` of the object data directives feed.
    pending_object: Option<usize>,
}

impl Pass2 {
    fn new(function_names: HashSet<String>) -> Self {
        Self {
            program: ProgramFile::default(),
            function_names,
            current_function: None,
            pending_labels: Vec::new(),
            pending_object: None,
        }
    }

    fn run(mut self, source: &str) -> Result<ProgramFile, ParseError> {
        for (i, raw_line) in source.lines().enumerate() {
            let line_no = i + 1;
            let line = strip_comment(raw_line).trim();

            if line.is_empty() {
                continue;
            }

            if let Some(label) = line.strip_suffix(':') {
                self.label(label.trim(), line_no);
                continue;
            }

            if line.starts_with('.') {
                self.directive(line, line_no)?;
                continue;
            }

            self.instruction(line, line_no)?;
        }

        self.close_function(None);
        debug!(
            instructions = self.program.instructions.len(),
            functions = self.program.functions.len(),
            globals = self.program.globals.len(),
            "assembly parsed"
        );

        Ok(self.program)
    }

    fn label(&mut self, name: &str, line_no: usize) {
        if self.function_names.contains(name) {
            self.close_function(Some(line_no));
            self.current_function = Some((name.to_string(), self.program.instructions.len(), line_no));
            return;
        }

        // An object's own label attaches data collection to it rather than
        // marking a code position.
        if let Some(index) = self.program.globals.iter().position(|g| g.name == name) {
            self.pending_object = Some(index);
            return;
        }

        self.pending_labels.push(name.to_string());
    }

    fn close_function(&mut self, next_line: Option<usize>) {
        if let Some((name, start, start_line)) = self.current_function.take() {
            let end = self.program.instructions.len();
            let end_line = self
                .program
                .instructions
                .last()
                .map(|i| i.line)
                .filter(|line| *line >= start_line);

            self.program.functions.push(Function {
                name,
                file: self.program.source_file.clone(),
                start_line: Some(start_line),
                end_line: end_line.or(next_line.map(|l| l.saturating_sub(1))),
                ranges: vec![(start, end)],
            });
        }
    }

    fn directive(&mut self, line: &str, line_no: usize) -> Result<(), ParseError> {
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        match name {
            ".file" => {
                let file = rest
                    .trim_matches('"')
                    .to_string();
                self.program.source_file = Some(file);
            }

            // Visibility has no effect on the model; every named symbol is
            // resolvable. Section structure and alignment are the
            // resolver's business, not the parser's.
            ".globl" | ".global" | ".text" | ".section" | ".align" | ".p2align" | ".ident" => {}

            ".type" => {
                let (symbol, kind) = parse_type_directive(line)
                    .ok_or_else(|| ParseError::syntax(line_no, "malformed .type directive"))?;

                if kind == GlobalKind::Object {
                    self.program.globals.push(Global {
                        name: symbol.to_string(),
                        size: 0,
                        data: Vec::new(),
                        kind,
                        address: None,
                    });
                    self.pending_object = Some(self.program.globals.len() - 1);
                }
            }

            ".size" => {
                let mut parts = rest.splitn(2, ',');
                let symbol = parts.next().unwrap_or("").trim();
                let size = parts
                    .next()
                    .map(str::trim)
                    .and_then(parse_number)
                    .ok_or_else(|| ParseError::syntax(line_no, "malformed .size directive"))?;

                if let Some(global) = self.program.globals.iter_mut().find(|g| g.name == symbol) {
                    global.size = size as usize;
                }
            }

            ".long" | ".word" | ".byte" | ".zero" => {
                self.data_directive(name, rest, line_no)?;
            }

            other => {
                return Err(ParseError::syntax(line_no, format!("unknown directive {other}")));
            }
        }

        Ok(())
    }

    fn data_directive(&mut self, name: &str, rest: &str, line_no: usize) -> Result<(), ParseError> {
        let index = self
            .pending_object
            .ok_or_else(|| ParseError::syntax(line_no, format!("{name} outside an object")))?;
        let data = &mut self.program.globals[index].data;

        if name == ".zero" {
            let count = parse_number(rest.trim())
                .ok_or_else(|| ParseError::syntax(line_no, "malformed .zero directive"))?;
            data.extend(std::iter::repeat(0u8).take(count as usize));
            return Ok(());
        }

        for value in rest.split(',') {
            let value = parse_number(value.trim())
                .ok_or_else(|| ParseError::syntax(line_no, format!("bad number in {name}")))?;

            match name {
                ".byte" => data.push(value as u8),
                ".word" => data.extend_from_slice(&(value as u16).to_le_bytes()),
                ".long" => data.extend_from_slice(&value.to_le_bytes()),
                _ => unreachable!(),
            }
        }

        Ok(())
    }

    fn instruction(&mut self, line: &str, line_no: usize) -> Result<(), ParseError> {
        let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
            Some((mnemonic, rest)) => (mnemonic, rest.trim()),
            None => (line, ""),
        };

        let opcode = Opcode::from_str(mnemonic)
            .map_err(|_| ParseError::syntax(line_no, format!("unknown mnemonic {mnemonic:?}")))?;

        let written: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };

        // Tied operands are implicit in the written form.
        let expected = opcode.operands().iter().filter(|d| d.tie.is_none()).count();
        if written.len() != expected {
            return Err(ParseError::syntax(
                line_no,
                format!("{mnemonic} expects {expected} operands, found {}", written.len()),
            ));
        }

        let mut values = Vec::with_capacity(opcode.operands().len());
        let mut symbols = Vec::new();
        let mut written_iter = written.iter();

        for (i, desc) in opcode.operands().iter().enumerate() {
            if desc.tie.is_some() {
                values.push(0); // Instruction::new re-derives tied values
                continue;
            }

            let text = written_iter.next().copied().unwrap_or("");
            values.push(self.operand(opcode, i, text, line_no, &mut symbols)?);
        }

        let instruction = Instruction::new(opcode, &values);

        self.program.instructions.push(ProgramInstruction {
            line: line_no,
            text: line.to_string(),
            raw: None,
            decoded: Some(instruction),
            address: None,
            symbols,
        });

        // Labels collected since the previous instruction point here.
        let index = self.program.instructions.len() - 1;
        for label in self.pending_labels.drain(..) {
            self.program.labels.insert(label, index);
        }

        Ok(())
    }

    fn operand(
        &self,
        opcode: Opcode,
        index: usize,
        text: &str,
        line_no: usize,
        symbols: &mut Vec<SymbolRef>,
    ) -> Result<u32, ParseError> {
        let desc = &opcode.operands()[index];

        match desc.kind {
            OperandKind::Register if opcode == Opcode::CJMP && index == 0 => {
                Condition::from_str(text)
                    .map(|cond| cond as u32)
                    .map_err(|_| ParseError::syntax(line_no, format!("unknown condition {text:?}")))
            }

            OperandKind::Register => regs::parse(text)
                .map(|id| id as u32)
                .ok_or_else(|| ParseError::syntax(line_no, format!("unknown register {text:?}"))),

            OperandKind::Immediate => {
                if let Some(value) = parse_number(text) {
                    return Ok(value);
                }

                let (name, usage) = split_usage(text);

                if !is_identifier(name) {
                    return Err(ParseError::syntax(line_no, format!("bad operand {text:?}")));
                }

                symbols.push(SymbolRef {
                    name: name.to_string(),
                    usage,
                    operand: index,
                });

                Ok(0)
            }
        }
    }
}

fn split_usage(text: &str) -> (&str, SymbolUsage) {
    if let Some(name) = text.strip_suffix("@lo") {
        return (name, SymbolUsage::Lo);
    }

    if let Some(name) = text.strip_suffix("@hi") {
        return (name, SymbolUsage::Hi);
    }

    (text, SymbolUsage::Full)
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'))
        && !text.starts_with(|c: char| c.is_ascii_digit())
}

/// Decimal, hexadecimal (`0x`), binary (`0b`) and negative decimal
/// literals.
fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim();

    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }

    if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        return u32::from_str_radix(&bin.replace('_', ""), 2).ok();
    }

    if let Some(negative) = text.strip_prefix('-') {
        return negative.parse::<u32>().ok().map(|v| (v as i64).wrapping_neg() as u32);
    }

    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cucaracha_asm::regs;

    const SOURCE: &str = r#"
	.file	"sum.c"
	.globl	main
	.type	main,@function
main:
	movl	counter@lo, r0
	movh	counter@hi, r0
	ld	r0, r1          # load the counter
.L_loop:
	movl	1, r2
	sub	r1, r2, r1
	cmp	r1, r2, r3
	jmp	lr, r4
	.globl	counter
	.type	counter,@object
	.size	counter, 8
counter:
	.long	5
	.long	0xdead
"#;

    #[test]
    fn functions_labels_and_globals() {
        let program = parse_assembly_source(SOURCE).unwrap();

        assert_eq!(Some("sum.c".to_string()), program.source_file);
        assert_eq!(7, program.instructions.len());

        let main = program.function("main").unwrap();
        assert_eq!(vec![(0, 7)], main.ranges);

        // .L_loop points at the movl after it; main is not a label
        assert_eq!(Some(&3), program.labels.get(".L_loop"));
        assert!(!program.labels.contains_key("main"));

        let counter = program.global("counter").unwrap();
        assert_eq!(8, counter.size);
        assert_eq!(GlobalKind::Object, counter.kind);
        assert_eq!(vec![5, 0, 0, 0, 0xad, 0xde, 0, 0], counter.data);
    }

    #[test]
    fn symbol_suffixes_become_usage_tags() {
        let program = parse_assembly_source(SOURCE).unwrap();

        let lo = &program.instructions[0].symbols[0];
        assert_eq!(("counter", SymbolUsage::Lo), (lo.name.as_str(), lo.usage));

        let hi = &program.instructions[1].symbols[0];
        assert_eq!(SymbolUsage::Hi, hi.usage);
    }

    #[test]
    fn instructions_are_assembled() {
        let program = parse_assembly_source(SOURCE).unwrap();

        let ld = program.instructions[2].decoded.unwrap();
        assert_eq!(Opcode::LD, ld.opcode());
        assert_eq!(Some(regs::r(0) as u32), ld.operand(0));
        assert_eq!(Some(regs::r(1) as u32), ld.operand(1));

        let movl = program.instructions[3].decoded.unwrap();
        assert_eq!(Some(1), movl.operand(0));
    }

    #[test]
    fn unknown_mnemonic_names_the_line() {
        let err = parse_assembly_source("frobnicate r0, r1\n").unwrap_err();

        match err {
            ParseError::Syntax { line, message } => {
                assert_eq!(1, line);
                assert!(message.contains("frobnicate"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn wrong_operand_count_fails() {
        assert!(parse_assembly_source("add r0, r1\n").is_err());
    }

    #[test]
    fn movh_written_form_has_two_operands() {
        let program = parse_assembly_source("movh 0x1234, r0\n").unwrap();
        let insn = program.instructions[0].decoded.unwrap();

        assert_eq!(insn.operand(1), insn.operand(2));
    }

    #[test]
    fn data_outside_an_object_fails() {
        assert!(parse_assembly_source(".long 1\n").is_err());
    }

    #[test]
    fn cjmp_condition_names() {
        let program = parse_assembly_source("cjmp ge, r1, lr\n").unwrap();
        let insn = program.instructions[0].decoded.unwrap();

        assert_eq!(Opcode::CJMP, insn.opcode());
        assert_eq!(Some(Condition::GE as u32), insn.operand(0));
    }

    #[test]
    fn number_forms() {
        assert_eq!(Some(255), parse_number("0xff"));
        assert_eq!(Some(5), parse_number("0b101"));
        assert_eq!(Some(10), parse_number("0b10_10"));
        assert_eq!(Some(0xffff_ffff), parse_number("-1"));
        assert_eq!(None, parse_number("counter"));
    }
}
