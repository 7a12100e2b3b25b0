//! Line-oriented assembler for the target VM
//!
//! Translates the code generator's textual assembly into bytecode. Labels
//! (`@name:` definition lines) are collected in a first pass-free manner:
//! forward references leave a four-byte placeholder that is patched once the
//! label's offset is known.
//!
//! The assembler also reports the byte offset of every input line and of
//! every label, which the compiler uses for ABI method offsets and the
//! optional source-line map.

use std::collections::HashMap;

use super::opcode::Opcode;
use crate::error::{Error, Result};

/// Byte-offset patch for a forward label reference
struct Fixup {
    at: usize,
    label: String,
}

/// Result of assembling one module's worth of assembly text
#[derive(Debug, Clone)]
pub struct AssembledProgram {
    /// Final bytecode with all label references resolved
    pub bytecode: Vec<u8>,
    /// Byte offset of every defined label
    pub labels: HashMap<String, u32>,
    /// Byte offset at the start of each input line, index-aligned with the
    /// assembled line slice
    pub line_offsets: Vec<u32>,
}

/// Assembler state: emitted code, known labels, pending fixups
pub struct Assembler {
    code: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<Fixup>,
    line_offsets: Vec<u32>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    /// Creates an empty assembler
    pub fn new() -> Self {
        Assembler {
            code: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            line_offsets: Vec::new(),
        }
    }

    /// Assemble a module's emitted lines into bytecode
    pub fn assemble(mut self, lines: &[String]) -> Result<AssembledProgram> {
        for line in lines {
            self.line_offsets.push(self.code.len() as u32);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('@').and_then(|l| l.strip_suffix(':')) {
                self.define_label(name)?;
                continue;
            }
            self.assemble_instruction(line)?;
        }
        for fixup in self.fixups.drain(..) {
            let target = self
                .labels
                .get(&fixup.label)
                .copied()
                .ok_or_else(|| Error::internal(format!("unknown label '@{}'", fixup.label)))?;
            self.code[fixup.at..fixup.at + 4].copy_from_slice(&target.to_le_bytes());
        }
        Ok(AssembledProgram {
            bytecode: self.code,
            labels: self.labels,
            line_offsets: self.line_offsets,
        })
    }

    fn define_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::internal(format!("duplicate label '@{}'", name)));
        }
        self.labels.insert(name.to_string(), self.code.len() as u32);
        Ok(())
    }

    fn assemble_instruction(&mut self, line: &str) -> Result<()> {
        let (mnemonic, rest) = split_word(line);
        let opcode = Opcode::from_mnemonic(mnemonic)
            .ok_or_else(|| Error::internal(format!("unknown opcode '{}'", mnemonic)))?;
        self.code.push(opcode.byte());

        match opcode {
            Opcode::Ret => expect_empty(rest),

            Opcode::Not | Opcode::Throw => {
                let (reg, rest) = split_word(rest);
                self.emit_register(reg)?;
                expect_empty(rest)
            }

            Opcode::Alias | Opcode::Gload | Opcode::Gstore | Opcode::Meta => {
                let (reg, rest) = split_word(rest);
                self.emit_register(reg)?;
                let (name, rest) = split_word(rest);
                self.emit_sigil_name(name)?;
                expect_empty(rest)
            }

            Opcode::Load => {
                let (reg, literal) = split_word(rest);
                self.emit_register(reg)?;
                self.emit_literal(literal)
            }

            Opcode::Cast => {
                let (reg, rest) = split_word(rest);
                self.emit_register(reg)?;
                let (ty, rest) = split_word(rest);
                self.emit_string(ty);
                expect_empty(rest)
            }

            Opcode::Move
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Equal
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::Lte
            | Opcode::Gte => {
                let (left, rest) = split_word(rest);
                self.emit_register(left)?;
                let (right, rest) = split_word(rest);
                self.emit_register(right)?;
                expect_empty(rest)
            }

            Opcode::Jmp => {
                let (label, rest) = split_word(rest);
                self.emit_label_ref(label)?;
                expect_empty(rest)
            }

            Opcode::JmpIf | Opcode::JmpNot => {
                let (reg, rest) = split_word(rest);
                self.emit_register(reg)?;
                let (label, rest) = split_word(rest);
                self.emit_label_ref(label)?;
                expect_empty(rest)
            }

            Opcode::Call => {
                let (dst, rest) = split_word(rest);
                self.emit_register(dst)?;
                let (base, rest) = split_word(rest);
                self.emit_register(base)?;
                let (argc, rest) = split_word(rest);
                let count: u8 = argc
                    .parse()
                    .map_err(|_| Error::internal(format!("bad argument count '{}'", argc)))?;
                self.code.push(count);
                let (target, rest) = split_word(rest);
                self.emit_sigil_name(target)?;
                expect_empty(rest)
            }

            Opcode::Emit => {
                let (addr, rest) = split_word(rest);
                self.emit_register(addr)?;
                let (data, rest) = split_word(rest);
                self.emit_register(data)?;
                let (value, rest) = split_word(rest);
                let value: u32 = value
                    .parse()
                    .map_err(|_| Error::internal(format!("bad event value '{}'", value)))?;
                self.code.extend_from_slice(&value.to_le_bytes());
                expect_empty(rest)
            }
        }
    }

    fn emit_register(&mut self, text: &str) -> Result<()> {
        let index = text
            .strip_prefix('r')
            .and_then(|digits| digits.parse::<u8>().ok())
            .ok_or_else(|| Error::internal(format!("bad register operand '{}'", text)))?;
        self.code.push(index);
        Ok(())
    }

    fn emit_sigil_name(&mut self, text: &str) -> Result<()> {
        let name = text
            .strip_prefix('$')
            .ok_or_else(|| Error::internal(format!("expected $name operand, got '{}'", text)))?;
        self.emit_string(name);
        Ok(())
    }

    fn emit_string(&mut self, text: &str) {
        let bytes = text.as_bytes();
        self.code
            .extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        self.code.extend_from_slice(bytes);
    }

    fn emit_label_ref(&mut self, text: &str) -> Result<()> {
        let name = text
            .strip_prefix('@')
            .ok_or_else(|| Error::internal(format!("expected @label operand, got '{}'", text)))?;
        self.fixups.push(Fixup {
            at: self.code.len(),
            label: name.to_string(),
        });
        self.code.extend_from_slice(&[0, 0, 0, 0]);
        Ok(())
    }

    /// Encode a textual literal operand: tag byte plus payload
    fn emit_literal(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            self.code.push(literal_tag::STRING);
            self.emit_string(inner);
        } else if let Some(addr) = text.strip_prefix('@') {
            let bytes = bs58::decode(addr)
                .into_vec()
                .map_err(|_| Error::internal(format!("bad address literal '{}'", text)))?;
            self.code.push(literal_tag::ADDRESS);
            self.code
                .extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            self.code.extend_from_slice(&bytes);
        } else if let Some(hash) = text.strip_prefix('#') {
            let bytes = hex::decode(hash)
                .map_err(|_| Error::internal(format!("bad hash literal '{}'", text)))?;
            self.code.push(literal_tag::HASH);
            self.code
                .extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            self.code.extend_from_slice(&bytes);
        } else if let Some(hexdigits) = text.strip_prefix("0x") {
            let bytes = hex::decode(hexdigits)
                .map_err(|_| Error::internal(format!("bad bytes literal '{}'", text)))?;
            self.code.push(literal_tag::BYTES);
            self.code
                .extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            self.code.extend_from_slice(&bytes);
        } else if text == "true" || text == "false" {
            self.code.push(literal_tag::BOOL);
            self.code.push((text == "true") as u8);
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| Error::internal(format!("bad literal operand '{}'", text)))?;
            self.code.push(literal_tag::NUMBER);
            self.code.extend_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }
}

/// Literal payload tags used by `LOAD`
mod literal_tag {
    pub const NUMBER: u8 = 0;
    pub const STRING: u8 = 1;
    pub const BOOL: u8 = 2;
    pub const ADDRESS: u8 = 3;
    pub const HASH: u8 = 4;
    pub const BYTES: u8 = 5;
}

/// Split the first whitespace-delimited word off a line
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], text[end..].trim_start()),
        None => (text, ""),
    }
}

fn expect_empty(rest: &str) -> Result<()> {
    if rest.trim().is_empty() {
        Ok(())
    } else {
        Err(Error::internal(format!(
            "trailing operands '{}'",
            rest.trim()
        )))
    }
}
