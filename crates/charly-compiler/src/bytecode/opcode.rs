//! Bytecode operation codes.
//!
//! This module defines the instruction set understood by the Charly VM.
//! Each instruction is a one-byte tag followed by a fixed sequence of
//! operands; the sequence for every opcode is listed in [`Opcode::operands`]
//! and is part of the wire format.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Bytecode operation codes.
///
/// The VM is a stack machine. Operand layouts are fixed per opcode, all
/// integers little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    // =========================================================================
    // Reads
    // =========================================================================
    /// Push a local variable.
    /// Operands: u32 index, u32 frame level
    ReadLocal = 0x00,
    /// Read a member by symbol from the value on top of the stack.
    /// Operand: u64 symbol
    ReadMemberSymbol,
    /// Read a member whose key is on the stack.
    ReadMemberValue,
    /// Read an element of the array on top of the stack.
    /// Operand: u32 index
    ReadArrayIndex,

    // =========================================================================
    // Writes
    // =========================================================================
    /// Store into a local variable.
    /// Operands: u32 index, u32 frame level
    SetLocal,
    /// Store into a member by symbol.
    /// Operand: u64 symbol
    SetMemberSymbol,
    /// Store into a member whose key is on the stack.
    SetMemberValue,
    /// Store into an array element.
    /// Operand: u32 index
    SetArrayIndex,

    // =========================================================================
    // Values
    // =========================================================================
    /// Push the current self value.
    PutSelf,
    /// Push an immediate value.
    /// Operand: u64 value
    PutValue,
    /// Push a float.
    /// Operand: f64
    PutFloat,
    /// Push a string from the static segment.
    /// Operands: u32 offset, u32 length
    PutString,
    /// Push a function object.
    /// Operands: u64 symbol, u64 body slot, u8 flags, u32 argc
    ///
    /// The body slot holds the index of a child block, or, when the flags
    /// carry [`FunctionFlags::INLINE_BODY`], an i64 offset from the slot to
    /// a body emitted in the same block.
    PutFunction,
    /// Push a native function object.
    /// Operands: u64 symbol, u64 address slot, u32 argc
    PutCFunction,
    /// Pop `count` values into a new array.
    /// Operand: u32 count
    PutArray,
    /// Pop `count` key/value pairs into a new hash.
    /// Operand: u32 count
    PutHash,
    /// Build a class from values on the stack.
    /// Operands: u64 symbol, u32 properties, u32 static properties,
    /// u32 methods, u32 static methods, u32 parent classes
    PutClass,

    // =========================================================================
    // Stack Operations
    // =========================================================================
    /// Mark a local slot as constant.
    /// Operand: u32 index
    MakeConstant,
    /// Pop `count` values.
    /// Operand: u32 count
    Pop,
    /// Duplicate top of stack.
    Dup,
    /// Swap the two topmost values.
    Swap,
    /// Copy the value `index` slots below the top to the top.
    /// Operand: u32 index
    Topn,
    /// Overwrite the value `index` slots below the top with the top.
    /// Operand: u32 index
    Setn,

    // =========================================================================
    // Calls
    // =========================================================================
    /// Call a function.
    /// Operand: u32 argc
    Call,
    /// Call a member function with an explicit receiver.
    /// Operand: u32 argc
    CallMember,
    /// Return from the current frame.
    Return,

    // =========================================================================
    // Exceptions
    // =========================================================================
    /// Throw a value.
    /// Operand: u8 throw type
    Throw,
    /// Push a catch table.
    /// Operands: u8 throw type, i32 relative handler offset
    RegisterCatchTable,
    /// Pop the innermost catch table.
    PopCatchTable,

    // =========================================================================
    // Branches
    // =========================================================================
    /// Unconditional relative branch.
    /// Operand: i32 relative offset
    Branch,
    /// Branch if the popped value is truthy.
    /// Operand: i32 relative offset
    BranchIf,
    /// Branch if the popped value is falsy.
    /// Operand: i32 relative offset
    BranchUnless,

    // =========================================================================
    // Operators
    // =========================================================================
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    UAdd,
    USub,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Shr,
    Shl,
    And,
    Or,
    Xor,
    UNot,
    UBNot,

    /// Stop the machine.
    Halt,
}

/// Kind of a single operand in an instruction's fixed layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// Unsigned 32-bit integer.
    Int,
    /// Signed 32-bit offset relative to the operand's own position.
    Offset,
    /// Unsigned 64-bit value.
    Long,
    /// IEEE-754 double.
    Double,
    /// Interned symbol (8 bytes).
    Symbol,
    /// Pointer-sized slot (8 bytes): child index, native address or relative offset.
    Pointer,
    /// [`ThrowType`](crate::bytecode::ThrowType) byte.
    ThrowType,
    /// [`FunctionFlags`](crate::bytecode::FunctionFlags) byte.
    Flags,
    /// Offset into the static segment (u32).
    StringOffset,
    /// Length of a static segment entry (u32).
    StringLength,
}

impl OperandKind {
    /// Encoded width in bytes.
    pub const fn width(self) -> usize {
        match self {
            OperandKind::ThrowType | OperandKind::Flags => 1,
            OperandKind::Int
            | OperandKind::Offset
            | OperandKind::StringOffset
            | OperandKind::StringLength => 4,
            OperandKind::Long | OperandKind::Double | OperandKind::Symbol | OperandKind::Pointer => 8,
        }
    }
}

impl Opcode {
    /// Decode an opcode tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::try_from(value).ok()
    }

    /// The fixed operand layout following the tag byte.
    pub fn operands(self) -> &'static [OperandKind] {
        use OperandKind as K;

        match self {
            Opcode::ReadLocal | Opcode::SetLocal => &[K::Int, K::Int],
            Opcode::ReadMemberSymbol | Opcode::SetMemberSymbol => &[K::Symbol],
            Opcode::ReadArrayIndex | Opcode::SetArrayIndex => &[K::Int],
            Opcode::PutValue => &[K::Long],
            Opcode::PutFloat => &[K::Double],
            Opcode::PutString => &[K::StringOffset, K::StringLength],
            Opcode::PutFunction => &[K::Symbol, K::Pointer, K::Flags, K::Int],
            Opcode::PutCFunction => &[K::Symbol, K::Pointer, K::Int],
            Opcode::PutClass => &[K::Symbol, K::Int, K::Int, K::Int, K::Int, K::Int],
            Opcode::PutArray
            | Opcode::PutHash
            | Opcode::MakeConstant
            | Opcode::Pop
            | Opcode::Topn
            | Opcode::Setn
            | Opcode::Call
            | Opcode::CallMember => &[K::Int],
            Opcode::Throw => &[K::ThrowType],
            Opcode::RegisterCatchTable => &[K::ThrowType, K::Offset],
            Opcode::Branch | Opcode::BranchIf | Opcode::BranchUnless => &[K::Offset],
            Opcode::ReadMemberValue
            | Opcode::SetMemberValue
            | Opcode::PutSelf
            | Opcode::Dup
            | Opcode::Swap
            | Opcode::Return
            | Opcode::PopCatchTable
            | Opcode::Halt => &[],
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Pow
            | Opcode::UAdd
            | Opcode::USub
            | Opcode::Eq
            | Opcode::Neq
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::Le
            | Opcode::Ge
            | Opcode::Shr
            | Opcode::Shl
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::UNot
            | Opcode::UBNot => &[],
        }
    }

    /// Size of the operands in bytes, not including the tag byte.
    pub fn operand_size(self) -> usize {
        self.operands().iter().map(|kind| kind.width()).sum()
    }

    /// Total encoded size of the instruction including the tag byte.
    pub fn encoded_size(self) -> usize {
        1 + self.operand_size()
    }

    /// Whether this opcode is one of the operand-less arithmetic, comparison
    /// or bitwise operators.
    pub fn is_operator(self) -> bool {
        (Opcode::Add as u8..=Opcode::UBNot as u8).contains(&(self as u8))
    }

    /// Whether this opcode carries a relative offset that may target a label.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Branch | Opcode::BranchIf | Opcode::BranchUnless
        )
    }

    /// Get the name of this opcode for debugging.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::ReadLocal => "READ_LOCAL",
            Opcode::ReadMemberSymbol => "READ_MEMBER_SYMBOL",
            Opcode::ReadMemberValue => "READ_MEMBER_VALUE",
            Opcode::ReadArrayIndex => "READ_ARRAY_INDEX",
            Opcode::SetLocal => "SET_LOCAL",
            Opcode::SetMemberSymbol => "SET_MEMBER_SYMBOL",
            Opcode::SetMemberValue => "SET_MEMBER_VALUE",
            Opcode::SetArrayIndex => "SET_ARRAY_INDEX",
            Opcode::PutSelf => "PUT_SELF",
            Opcode::PutValue => "PUT_VALUE",
            Opcode::PutFloat => "PUT_FLOAT",
            Opcode::PutString => "PUT_STRING",
            Opcode::PutFunction => "PUT_FUNCTION",
            Opcode::PutCFunction => "PUT_CFUNCTION",
            Opcode::PutArray => "PUT_ARRAY",
            Opcode::PutHash => "PUT_HASH",
            Opcode::PutClass => "PUT_CLASS",
            Opcode::MakeConstant => "MAKE_CONSTANT",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::Swap => "SWAP",
            Opcode::Topn => "TOPN",
            Opcode::Setn => "SETN",
            Opcode::Call => "CALL",
            Opcode::CallMember => "CALL_MEMBER",
            Opcode::Return => "RETURN",
            Opcode::Throw => "THROW",
            Opcode::RegisterCatchTable => "REGISTER_CATCH_TABLE",
            Opcode::PopCatchTable => "POP_CATCH_TABLE",
            Opcode::Branch => "BRANCH",
            Opcode::BranchIf => "BRANCH_IF",
            Opcode::BranchUnless => "BRANCH_UNLESS",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Pow => "POW",
            Opcode::UAdd => "UADD",
            Opcode::USub => "USUB",
            Opcode::Eq => "EQ",
            Opcode::Neq => "NEQ",
            Opcode::Lt => "LT",
            Opcode::Gt => "GT",
            Opcode::Le => "LE",
            Opcode::Ge => "GE",
            Opcode::Shr => "SHR",
            Opcode::Shl => "SHL",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Xor => "XOR",
            Opcode::UNot => "UNOT",
            Opcode::UBNot => "UBNOT",
            Opcode::Halt => "HALT",
        }
    }
}

/// Kind of non-local control transfer carried by `Throw` and catch tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ThrowType {
    Exception = 0,
    Break = 1,
    Continue = 2,
    Return = 3,
}

impl ThrowType {
    /// Decode a throw type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::try_from(value).ok()
    }

    /// Get the name of this throw type for debugging.
    pub fn name(self) -> &'static str {
        match self {
            ThrowType::Exception => "exception",
            ThrowType::Break => "break",
            ThrowType::Continue => "continue",
            ThrowType::Return => "return",
        }
    }
}

bitflags! {
    /// Flag byte of a `PutFunction` instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FunctionFlags: u8 {
        /// The function literal has no name binding.
        const ANONYMOUS = 1 << 0;
        /// The body slot is a relative offset into the same block instead
        /// of a child index.
        const INLINE_BODY = 1 << 1;
    }
}
