//! Bytecode types for the Charly backend.
//!
//! This module contains the core bytecode types:
//!
//! - [`Opcode`] - The instruction set and its operand layouts
//! - [`ByteBuffer`] - Geometrically growing byte storage
//! - [`InstructionBlock`] - A code unit under construction (the encoder)
//! - [`CompiledBlock`] - A finished, read-only code unit
//! - [`Patch`] - Handles to operands that are filled in later
//! - [`decode`] - The reference reader and disassembler

mod block;
mod buffer;
pub mod decode;
mod opcode;
mod patch;

pub use block::{BlockConfig, CompiledBlock, InstructionBlock};
pub use buffer::{ByteBuffer, Operand, RelativeOperand};
pub use decode::{DecodeError, Instruction, InstructionReader, OperandValue};
pub use opcode::{FunctionFlags, Opcode, OperandKind, ThrowType};
pub use patch::{OffsetPatch, Patch, PointerPatch};
