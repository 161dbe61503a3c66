//! Pending label references and the resolution pass.
//!
//! Every operand that targets a label is recorded as an
//! [`UnresolvedReference`]. Resolution is a single pass over that list: it
//! either patches every reference or patches nothing.

use charly_core::{CodegenError, CodegenResult, LabelId, UnresolvedLabel};
use rustc_hash::FxHashMap;

use crate::bytecode::{InstructionBlock, Opcode, Patch};

/// Width of the relative offset written into a patch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocKind {
    /// Signed 32-bit offset (branches, catch tables).
    Rel32,
    /// Signed 64-bit offset in a pointer-sized slot (function bodies).
    Rel64,
}

impl RelocKind {
    /// Encoded width in bytes.
    pub const fn width(self) -> usize {
        match self {
            RelocKind::Rel32 => 4,
            RelocKind::Rel64 => 8,
        }
    }

    fn fits(self, distance: i64) -> bool {
        match self {
            RelocKind::Rel32 => i32::try_from(distance).is_ok(),
            RelocKind::Rel64 => true,
        }
    }
}

/// An operand waiting for a label to be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedReference {
    /// The label the operand refers to.
    pub label: LabelId,
    /// Offset of the operand to overwrite.
    pub patch_site: u32,
    /// Offset the relative value is measured from.
    pub instruction_base: u32,
    /// Width of the slot at `patch_site`.
    pub kind: RelocKind,
    /// The instruction that requested the label.
    pub opcode: Opcode,
}

impl UnresolvedReference {
    fn unresolved(&self) -> UnresolvedLabel {
        UnresolvedLabel {
            label: self.label,
            patch_site: self.patch_site,
            requested_by: self.opcode.name(),
        }
    }
}

/// Patch every reference with `label offset - instruction base`.
///
/// Fails without touching the block if any label is unplaced, if any patch
/// site lies outside the written code, or if any distance does not fit its
/// slot.
pub(crate) fn apply_relocations(
    block: &mut InstructionBlock,
    labels: &FxHashMap<LabelId, u32>,
    references: &[UnresolvedReference],
) -> CodegenResult<()> {
    let missing: Vec<UnresolvedLabel> = references
        .iter()
        .filter(|reference| !labels.contains_key(&reference.label))
        .map(UnresolvedReference::unresolved)
        .collect();
    if !missing.is_empty() {
        return Err(CodegenError::UnresolvedLabels(missing));
    }

    let len = block.write_offset();
    let mut patches = Vec::with_capacity(references.len());
    for reference in references {
        let width = reference.kind.width();
        let site_end = u64::from(reference.patch_site) + width as u64;
        if site_end > u64::from(len) {
            return Err(CodegenError::PatchOutOfRange {
                offset: reference.patch_site,
                width,
                len,
            });
        }

        let target = labels[&reference.label];
        let distance = i64::from(target) - i64::from(reference.instruction_base);
        if !reference.kind.fits(distance) {
            return Err(CodegenError::RelocationOutOfRange {
                offset: reference.patch_site,
                distance,
                width,
            });
        }
        patches.push((reference, target));
    }

    for (reference, target) in patches {
        match reference.kind {
            RelocKind::Rel32 => Patch::<i32>::at(reference.patch_site).write_relative(
                block,
                reference.instruction_base,
                target,
            )?,
            RelocKind::Rel64 => Patch::<i64>::at(reference.patch_site).write_relative(
                block,
                reference.instruction_base,
                target,
            )?,
        }
    }
    Ok(())
}
