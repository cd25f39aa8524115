//! Expression evaluator for the interactive debugger.
//!
//! A small recursive-descent calculator over 32-bit unsigned values.
//! Primitives are number literals, registers, symbols and memory
//! dereferences; precedence from lowest to highest is add/sub, mul/div/mod,
//! bitwise and/or/xor, shifts, unary.

use crate::debugger::Debugger;
use crate::error::EvalError;
use crate::program::{ProgramFile, VarLocation};

use cucaracha_asm::{regs, Word};

/// Evaluates expressions against a debugger's registers and memory and a
/// program's symbols.
pub struct Evaluator<'a> {
    debugger: &'a Debugger,
    program: Option<&'a ProgramFile>,
}

impl<'a> Evaluator<'a> {
    /// Bind an evaluator to the debugger state and, optionally, a loaded
    /// program for symbol lookup.
    pub fn new(debugger: &'a Debugger, program: Option<&'a ProgramFile>) -> Self {
        Self { debugger, program }
    }

    /// Evaluate `input` to a 32-bit value.
    pub fn eval(&self, input: &str) -> Result<Word, EvalError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens,
            position: 0,
            eval: self,
        };

        let value = parser.add_sub()?;

        match parser.peek() {
            None => Ok(value),
            Some(token) => Err(EvalError::UnexpectedToken(token.text())),
        }
    }

    fn register(&self, name: &str) -> Result<Word, EvalError> {
        if name.eq_ignore_ascii_case("pc") {
            return Ok(self.debugger.machine().pc());
        }

        regs::parse(name)
            .map(|id| self.debugger.machine().reg(id))
            .ok_or_else(|| EvalError::UnknownSymbol(name.into()))
    }

    /// Symbols resolve, in order, against: source-level variables visible at
    /// the current `pc`, functions, globals, labels.
    fn symbol(&self, name: &str) -> Result<Word, EvalError> {
        let program = match self.program {
            Some(program) => program,
            None => return Err(EvalError::UnknownSymbol(name.into())),
        };

        if let Some(value) = self.variable(program, name) {
            return value;
        }

        program
            .symbol_address(name)
            .ok_or_else(|| EvalError::UnknownSymbol(name.into()))
    }

    fn variable(&self, program: &ProgramFile, name: &str) -> Option<Result<Word, EvalError>> {
        let pc = self.debugger.machine().pc();
        let function = program.debug_info.function_at(pc)?;
        let variable = function.visible_at(pc).find(|v| v.name == name)?;

        let value = match variable.location {
            VarLocation::Register(id) => Ok(self.debugger.machine().reg(id)),
            VarLocation::RegisterOffset(id, offset) => {
                let base = self.debugger.machine().reg(id);
                self.deref(base.wrapping_add(offset as Word))
            }
            VarLocation::FrameOffset(offset) => {
                let base = self.debugger.machine().sp();
                self.deref(base.wrapping_add(offset as Word))
            }
            VarLocation::Unavailable => Err(EvalError::UnknownSymbol(name.into())),
        };

        Some(value)
    }

    fn deref(&self, addr: Word) -> Result<Word, EvalError> {
        self.debugger
            .machine()
            .read_u32(addr)
            .map_err(|_| EvalError::Memory(addr))
    }
}

/* tokens */

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(Word),
    Register(String),
    Symbol(String),
    Op(&'static str),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::Number(value) => value.to_string(),
            Token::Register(name) | Token::Symbol(name) => name.clone(),
            Token::Op(op) => (*op).to_string(),
        }
    }
}

fn is_register(name: &str) -> bool {
    name.eq_ignore_ascii_case("pc") || regs::parse(name).is_some()
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.peek().copied() {
        match c {
            _ if c.is_whitespace() => {
                chars.next();
            }

            '0'..='9' => {
                let mut end = start;
                while let Some((i, c)) = chars.peek().copied() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }

                let text = &input[start..end];
                let value = parse_literal(text).ok_or_else(|| EvalError::BadNumber(text.into()))?;
                tokens.push(Token::Number(value));
            }

            _ if c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '$' => {
                let mut end = start;
                while let Some((i, c)) = chars.peek().copied() {
                    if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$') {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }

                let text = &input[start..end];
                if is_register(text) {
                    tokens.push(Token::Register(text.to_string()));
                } else {
                    tokens.push(Token::Symbol(text.to_string()));
                }
            }

            '<' | '>' => {
                chars.next();
                match chars.peek().copied() {
                    Some((_, next)) if next == c => {
                        chars.next();
                        tokens.push(Token::Op(if c == '<' { "<<" } else { ">>" }));
                    }
                    _ => return Err(EvalError::BadToken(c)),
                }
            }

            '+' | '-' | '*' | '/' | '%' | '&' | '|' | '^' | '(' | ')' | '[' | ']' => {
                chars.next();
                let op = match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '%' => "%",
                    '&' => "&",
                    '|' => "|",
                    '^' => "^",
                    '(' => "(",
                    ')' => ")",
                    '[' => "[",
                    _ => "]",
                };
                tokens.push(Token::Op(op));
            }

            other => return Err(EvalError::BadToken(other)),
        }
    }

    Ok(tokens)
}

/// Decimal, `0x` hexadecimal and `0b` binary with optional `_` separators.
fn parse_literal(text: &str) -> Option<Word> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return Word::from_str_radix(&hex.replace('_', ""), 16).ok();
    }

    if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        return Word::from_str_radix(&bin.replace('_', ""), 2).ok();
    }

    text.replace('_', "").parse().ok()
}

/* recursive descent */

struct Parser<'a, 'b> {
    tokens: Vec<Token>,
    position: usize,
    eval: &'b Evaluator<'a>,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }

        token
    }

    fn eat_op(&mut self, candidates: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if candidates.contains(op) => {
                let op = *op;
                self.position += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect_op(&mut self, op: &'static str) -> Result<(), EvalError> {
        match self.next() {
            Some(Token::Op(found)) if found == op => Ok(()),
            Some(token) => Err(EvalError::UnexpectedToken(token.text())),
            None => Err(EvalError::Unbalanced(op.chars().next().unwrap_or('?'))),
        }
    }

    fn add_sub(&mut self) -> Result<Word, EvalError> {
        let mut value = self.mul_div()?;

        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.mul_div()?;
            value = match op {
                "+" => value.wrapping_add(rhs),
                _ => value.wrapping_sub(rhs),
            };
        }

        Ok(value)
    }

    fn mul_div(&mut self) -> Result<Word, EvalError> {
        let mut value = self.bitwise()?;

        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let rhs = self.bitwise()?;
            value = match op {
                "*" => value.wrapping_mul(rhs),
                "/" => value.checked_div(rhs).ok_or(EvalError::DivisionByZero)?,
                _ => value.checked_rem(rhs).ok_or(EvalError::DivisionByZero)?,
            };
        }

        Ok(value)
    }

    fn bitwise(&mut self) -> Result<Word, EvalError> {
        let mut value = self.shift()?;

        while let Some(op) = self.eat_op(&["&", "|", "^"]) {
            let rhs = self.shift()?;
            value = match op {
                "&" => value & rhs,
                "|" => value | rhs,
                _ => value ^ rhs,
            };
        }

        Ok(value)
    }

    fn shift(&mut self) -> Result<Word, EvalError> {
        let mut value = self.unary()?;

        while let Some(op) = self.eat_op(&["<<", ">>"]) {
            let rhs = self.unary()?;
            value = match op {
                "<<" => value.wrapping_shl(rhs),
                _ => value.wrapping_shr(rhs),
            };
        }

        Ok(value)
    }

    fn unary(&mut self) -> Result<Word, EvalError> {
        if self.eat_op(&["-"]).is_some() {
            return Ok(self.unary()?.wrapping_neg());
        }

        if self.eat_op(&["["]).is_some() {
            let addr = self.add_sub()?;
            self.expect_op("]")?;
            return self.eval.deref(addr);
        }

        self.primary()
    }

    fn primary(&mut self) -> Result<Word, EvalError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::Register(name)) => self.eval.register(&name),
            Some(Token::Symbol(name)) => self.eval.symbol(&name),
            Some(Token::Op("(")) => {
                let value = self.add_sub()?;
                self.expect_op(")")?;
                Ok(value)
            }
            Some(token) => Err(EvalError::UnexpectedToken(token.text())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }
}
