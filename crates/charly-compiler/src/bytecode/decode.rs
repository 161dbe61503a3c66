//! Instruction stream decoding and disassembly.
//!
//! The decoder walks a code stream using the opcode table, so it is the
//! reference reader for the binary format: whatever the encoder writes, the
//! reader must reproduce opcode for opcode and operand for operand.

use std::fmt;

use charly_core::SymbolId;
use thiserror::Error;

use super::buffer::Operand;
use super::{CompiledBlock, FunctionFlags, Opcode, OperandKind, ThrowType};

/// Errors produced while decoding an instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The tag byte is not a known opcode.
    #[error("unknown opcode {byte:#04x} at offset {offset}")]
    UnknownOpcode { offset: u32, byte: u8 },

    /// The stream ends in the middle of an instruction.
    #[error("truncated {} instruction at offset {offset}", .opcode.name())]
    Truncated { offset: u32, opcode: Opcode },

    /// An operand byte is not a valid value for its kind.
    #[error("invalid operand for {} at offset {offset}", .opcode.name())]
    InvalidOperand { offset: u32, opcode: Opcode },
}

/// A decoded operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperandValue {
    Int(u32),
    /// Relative offset together with the absolute target it points to.
    Offset { relative: i32, target: i64 },
    Long(u64),
    Double(f64),
    Symbol(SymbolId),
    Pointer(u64),
    /// A `PutFunction` body slot flagged as an inline body: the offset from
    /// the slot and the absolute offset of the body.
    Body { relative: i64, target: i64 },
    ThrowType(ThrowType),
    Flags(FunctionFlags),
    StringOffset(u32),
    StringLength(u32),
}

impl fmt::Display for OperandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandValue::Int(value) => write!(f, "{value}"),
            OperandValue::Offset { relative, target } => write!(f, "{relative:+} -> {target:04}"),
            OperandValue::Long(value) => write!(f, "{value:#x}"),
            OperandValue::Double(value) => write!(f, "{value:?}"),
            OperandValue::Symbol(symbol) => write!(f, "{symbol}"),
            OperandValue::Pointer(value) => write!(f, "*{value:#x}"),
            OperandValue::Body { relative, target } => write!(f, "body {relative:+} -> {target:04}"),
            OperandValue::ThrowType(throw_type) => write!(f, "{}", throw_type.name()),
            OperandValue::Flags(flags) => write!(f, "flags={:#04x}", flags.bits()),
            OperandValue::StringOffset(offset) => write!(f, "@{offset}"),
            OperandValue::StringLength(len) => write!(f, "len={len}"),
        }
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the tag byte.
    pub offset: u32,
    pub opcode: Opcode,
    pub operands: Vec<OperandValue>,
}

impl Instruction {
    /// Encoded size including the tag byte.
    pub fn size(&self) -> usize {
        self.opcode.encoded_size()
    }

    /// The `(offset, length)` pair of a `PutString`.
    pub fn string_ref(&self) -> Option<(u32, u32)> {
        match self.operands.as_slice() {
            [OperandValue::StringOffset(offset), OperandValue::StringLength(len)] => {
                Some((*offset, *len))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04} {}", self.offset, self.opcode.name())?;
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// Iterator over the instructions of a code stream.
///
/// Stops after the first error.
pub struct InstructionReader<'a> {
    code: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> InstructionReader<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            offset: 0,
            failed: false,
        }
    }

    fn read<T: Operand>(&self, at: usize) -> Option<T> {
        let end = at.checked_add(T::WIDTH)?;
        self.code.get(at..end).map(T::decode)
    }

    fn decode_one(&self) -> Result<Instruction, DecodeError> {
        let start = self.offset;
        let offset = start as u32;
        let byte = self.code[start];
        let opcode =
            Opcode::from_u8(byte).ok_or(DecodeError::UnknownOpcode { offset, byte })?;

        if start + opcode.encoded_size() > self.code.len() {
            return Err(DecodeError::Truncated { offset, opcode });
        }

        let invalid = DecodeError::InvalidOperand { offset, opcode };
        let truncated = DecodeError::Truncated { offset, opcode };
        let mut at = start + 1;
        let mut operands = Vec::with_capacity(opcode.operands().len());
        for &kind in opcode.operands() {
            let value = match kind {
                OperandKind::Int => OperandValue::Int(self.read(at).ok_or(truncated)?),
                OperandKind::Offset => {
                    let relative: i32 = self.read(at).ok_or(truncated)?;
                    OperandValue::Offset {
                        relative,
                        target: at as i64 + i64::from(relative),
                    }
                }
                OperandKind::Long => OperandValue::Long(self.read(at).ok_or(truncated)?),
                OperandKind::Double => OperandValue::Double(self.read(at).ok_or(truncated)?),
                OperandKind::Symbol => {
                    OperandValue::Symbol(SymbolId::new(self.read(at).ok_or(truncated)?))
                }
                OperandKind::Pointer => OperandValue::Pointer(self.read(at).ok_or(truncated)?),
                OperandKind::ThrowType => {
                    let raw: u8 = self.read(at).ok_or(truncated)?;
                    OperandValue::ThrowType(ThrowType::from_u8(raw).ok_or(invalid)?)
                }
                OperandKind::Flags => {
                    let raw: u8 = self.read(at).ok_or(truncated)?;
                    OperandValue::Flags(FunctionFlags::from_bits(raw).ok_or(invalid)?)
                }
                OperandKind::StringOffset => {
                    OperandValue::StringOffset(self.read(at).ok_or(truncated)?)
                }
                OperandKind::StringLength => {
                    OperandValue::StringLength(self.read(at).ok_or(truncated)?)
                }
            };
            operands.push(value);
            at += kind.width();
        }

        let inline_body = match operands.as_slice() {
            [_, OperandValue::Pointer(raw), OperandValue::Flags(flags), _]
                if opcode == Opcode::PutFunction && flags.contains(FunctionFlags::INLINE_BODY) =>
            {
                Some(*raw as i64)
            }
            _ => None,
        };
        if let Some(relative) = inline_body {
            let slot = start + 1 + OperandKind::Symbol.width();
            operands[1] = OperandValue::Body {
                relative,
                target: (slot as i64).wrapping_add(relative),
            };
        }

        Ok(Instruction {
            offset,
            opcode,
            operands,
        })
    }
}

impl Iterator for InstructionReader<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.code.len() {
            return None;
        }

        match self.decode_one() {
            Ok(instruction) => {
                self.offset += instruction.size();
                Some(Ok(instruction))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Decode a whole code stream.
pub fn decode_all(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    InstructionReader::new(code).collect()
}

/// The opcode sequence of a code stream, ignoring operands.
pub fn opcodes(code: &[u8]) -> Result<Vec<Opcode>, DecodeError> {
    InstructionReader::new(code)
        .map(|instruction| instruction.map(|i| i.opcode))
        .collect()
}

/// Check that a code stream contains exactly the given opcode sequence.
///
/// Panics with a descriptive message if the sequences don't match.
#[track_caller]
pub fn assert_opcodes(code: &[u8], expected: &[Opcode]) {
    let actual = match opcodes(code) {
        Ok(actual) => actual,
        Err(err) => panic!("Bytecode does not decode: {err}"),
    };
    assert_eq!(
        actual,
        expected,
        "Bytecode mismatch.\nExpected: {:?}\nActual:   {:?}",
        expected.iter().map(|op| op.name()).collect::<Vec<_>>(),
        actual.iter().map(|op| op.name()).collect::<Vec<_>>(),
    );
}

/// Render a compiled block and its children as text.
///
/// String operands are shown with their contents from the static segment.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn disassemble(block: &CompiledBlock) -> Result<String, DecodeError> {
    let mut out = String::new();
    write_block(&mut out, block, 0)?;
    Ok(out)
}

fn write_block(out: &mut String, block: &CompiledBlock, depth: usize) -> Result<(), DecodeError> {
    let indent = "  ".repeat(depth);
    for instruction in InstructionReader::new(block.code()) {
        let instruction = instruction?;
        out.push_str(&format!("{indent}{instruction}"));
        if let Some((offset, len)) = instruction.string_ref() {
            match block.string_at(offset, len) {
                Some(bytes) => out.push_str(&format!(" {:?}", String::from_utf8_lossy(bytes))),
                None => out.push_str(" <out of segment>"),
            }
        }
        out.push('\n');
    }

    for (index, child) in block.children().iter().enumerate() {
        out.push_str(&format!("{indent}child {index}:\n"));
        write_block(out, child, depth + 1)?;
    }
    Ok(())
}
