//! Charly bytecode generation.
//!
//! Re-exports the shared identifiers and errors from `charly-core` and the
//! encoder and assembler from `charly-compiler`.

pub use charly_compiler::{bytecode, emit};

pub use charly_core::{CodegenError, CodegenResult, LabelId, SymbolId, UnresolvedLabel};

// Re-export main types
pub mod prelude {
    pub use charly_compiler::bytecode::decode::{assert_opcodes, decode_all, disassemble};
    pub use charly_compiler::bytecode::{
        BlockConfig, CompiledBlock, FunctionFlags, InstructionBlock, OffsetPatch, Opcode, Patch,
        PointerPatch, ThrowType,
    };
    pub use charly_compiler::emit::{Assembler, RelocKind, UnresolvedReference};
    pub use charly_core::{CodegenError, CodegenResult, LabelId, SymbolId};
}
