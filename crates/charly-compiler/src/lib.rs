//! Charly bytecode backend.
//!
//! Turns operand values handed over by a code generator into a compact,
//! tagged instruction stream plus a static segment for string constants, and
//! resolves symbolic labels so branches, catch tables and function bodies can
//! be emitted before their targets are known.
//!
//! ## Architecture
//!
//! - **Encoder**: [`InstructionBlock`] appends one tag byte and a fixed
//!   operand sequence per instruction
//! - **Patch handles**: [`Patch`] rewrites a single operand later by offset
//! - **Assembler**: [`Assembler`] tracks labels and resolves every pending
//!   reference in one pass
//!
//! ## Modules
//!
//! - [`bytecode`]: Opcode table, buffers, blocks, patch handles and decoder
//! - [`emit`]: Forward-reference assembler

pub mod bytecode;
pub mod emit;

pub use bytecode::{
    BlockConfig, CompiledBlock, FunctionFlags, InstructionBlock, OffsetPatch, Opcode, Patch,
    PointerPatch, ThrowType,
};
pub use emit::{Assembler, RelocKind, UnresolvedReference};

pub use charly_core::{CodegenError, CodegenResult, LabelId, SymbolId};
