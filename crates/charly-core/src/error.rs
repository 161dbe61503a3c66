//! Error types for the bytecode backend.
//!
//! Every error aborts compilation of the current instruction block; the
//! backend never hands out a partially patched byte stream.
//!
//! ```text
//! CodegenError
//! ├── DuplicateLabel       - label placed twice
//! ├── UnknownLabel         - label id never reserved by this assembler
//! ├── UnresolvedLabels     - labels referenced but never placed
//! ├── PatchOutOfRange      - patch site outside the written code
//! └── RelocationOutOfRange - relative offset does not fit its operand
//! ```

use thiserror::Error;

use crate::LabelId;

/// Result type for code generation.
pub type CodegenResult<T> = Result<T, CodegenError>;

/// A label reference that was still pending when resolution ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedLabel {
    /// The label that was never placed.
    pub label: LabelId,
    /// Byte offset of the operand waiting for the label.
    pub patch_site: u32,
    /// Name of the instruction that requested the label.
    pub requested_by: &'static str,
}

/// Errors produced while encoding or resolving an instruction block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    /// A label was placed a second time. The first placement is kept.
    #[error("label {label} is already placed at offset {offset}")]
    DuplicateLabel { label: LabelId, offset: u32 },

    /// A label id that this assembler never handed out.
    #[error("label {label} was never reserved")]
    UnknownLabel { label: LabelId },

    /// Labels were referenced but never placed.
    #[error("unresolved labels: {}", describe_unresolved(.0))]
    UnresolvedLabels(Vec<UnresolvedLabel>),

    /// A patch targets bytes outside the written part of the buffer.
    #[error("patch of {width} bytes at offset {offset} is outside the written code (length {len})")]
    PatchOutOfRange { offset: u32, width: usize, len: u32 },

    /// A relative offset does not fit into its operand slot.
    #[error("relative offset {distance} at offset {offset} does not fit a {width}-byte operand")]
    RelocationOutOfRange {
        offset: u32,
        distance: i64,
        width: usize,
    },
}

impl CodegenError {
    /// Every distinct label named by an `UnresolvedLabels` error, ascending.
    ///
    /// Returns an empty list for other error kinds.
    pub fn unresolved_labels(&self) -> Vec<LabelId> {
        match self {
            CodegenError::UnresolvedLabels(references) => {
                let mut labels: Vec<LabelId> = references.iter().map(|r| r.label).collect();
                labels.sort_unstable();
                labels.dedup();
                labels
            }
            _ => Vec::new(),
        }
    }
}

fn describe_unresolved(references: &[UnresolvedLabel]) -> String {
    references
        .iter()
        .map(|r| format!("{} ({} at {})", r.label, r.requested_by, r.patch_site))
        .collect::<Vec<_>>()
        .join(", ")
}
