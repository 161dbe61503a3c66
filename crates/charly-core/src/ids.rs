//! Identifier types for code generation.
//!
//! Labels name byte positions inside a single instruction block. Symbols are
//! interned names handed to the backend by the code generator.

use std::fmt;

/// Identifies a label within one assembler.
///
/// Label ids are only unique per assembler instance and carry no meaning
/// across instruction blocks.
///
/// # Example
///
/// ```
/// use charly_core::LabelId;
///
/// let label = LabelId::new(3);
/// assert_eq!(label.index(), 3);
/// assert_eq!(label.to_string(), "L3");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelId(u32);

impl LabelId {
    /// Create a new label ID with the given index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the underlying index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl From<u32> for LabelId {
    fn from(index: u32) -> Self {
        Self::new(index)
    }
}

impl From<LabelId> for u32 {
    fn from(id: LabelId) -> Self {
        id.0
    }
}

/// An interned symbol.
///
/// The backend never looks inside a symbol; it is written to the instruction
/// stream as an opaque 8-byte value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SymbolId(u64);

impl SymbolId {
    /// Wrap a raw symbol value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value as written to the instruction stream.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:#x}", self.0)
    }
}

impl From<u64> for SymbolId {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}
