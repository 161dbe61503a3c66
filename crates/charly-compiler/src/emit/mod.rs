//! Forward-reference assembler.
//!
//! The [`Assembler`] wraps an [`InstructionBlock`] and adds symbolic labels.
//! Branches, catch tables and function bodies can target a label before it is
//! placed; each such operand is written as zero and recorded as an
//! [`UnresolvedReference`]. After the whole block is emitted a single
//! resolution pass patches every reference.
//!
//! # Example
//!
//! ```
//! use charly_compiler::emit::Assembler;
//!
//! let mut asm = Assembler::new();
//! let end = asm.reserve_label();
//!
//! asm.block_mut().write_putvalue(1);
//! asm.write_branchunless_to_label(end);
//! asm.block_mut().write_putvalue(2);
//! asm.place_label_at(end).unwrap();
//! asm.block_mut().write_return();
//!
//! let block = asm.finish().unwrap();
//! assert_eq!(block.code().len(), 9 + 5 + 9 + 1);
//! ```
//!
//! Relative offsets are measured from the first byte of the offset operand,
//! the same convention [`Patch::write_current_offset`] uses.
//!
//! [`Patch::write_current_offset`]: crate::bytecode::Patch::write_current_offset

mod relocation;

use charly_core::{CodegenError, CodegenResult, LabelId, SymbolId};
use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::bytecode::{CompiledBlock, FunctionFlags, InstructionBlock, Opcode, ThrowType};
pub use relocation::{RelocKind, UnresolvedReference};

/// Handles label resolution and compile-time offset calculations for one
/// instruction block.
#[derive(Debug, Default)]
pub struct Assembler {
    /// The block being built.
    block: InstructionBlock,

    /// Mapping from label id to its placed offset.
    labels: FxHashMap<LabelId, u32>,

    /// Operands waiting for the resolution pass.
    unresolved_label_references: Vec<UnresolvedReference>,

    next_label_id: u32,
}

impl Assembler {
    /// Create an assembler around an empty block.
    pub fn new() -> Self {
        Self::with_block(InstructionBlock::new())
    }

    /// Create an assembler around an existing block.
    pub fn with_block(block: InstructionBlock) -> Self {
        Self {
            block,
            labels: FxHashMap::default(),
            unresolved_label_references: Vec::new(),
            next_label_id: 0,
        }
    }

    /// The block being built.
    pub fn block(&self) -> &InstructionBlock {
        &self.block
    }

    /// The block being built, for emitting instructions that don't involve
    /// labels.
    pub fn block_mut(&mut self) -> &mut InstructionBlock {
        &mut self.block
    }

    /// Current write offset of the block.
    pub fn write_offset(&self) -> u32 {
        self.block.write_offset()
    }

    // ==========================================================================
    // Labels
    // ==========================================================================

    /// Allocate a fresh label without placing it.
    ///
    /// # Panics
    ///
    /// Panics once all `u32::MAX` label ids of this assembler are used.
    pub fn reserve_label(&mut self) -> LabelId {
        let label = LabelId::new(self.next_label_id);
        self.next_label_id = self
            .next_label_id
            .checked_add(1)
            .unwrap_or_else(|| panic!("assembler ran out of label ids after {label}"));
        trace!("reserved {label}");
        label
    }

    /// Allocate a fresh label and place it at the current write offset.
    pub fn place_label(&mut self) -> LabelId {
        let label = self.reserve_label();
        let offset = self.block.write_offset();
        self.labels.insert(label, offset);
        trace!("placed {label} at {offset}");
        label
    }

    /// Place a reserved label at the current write offset.
    ///
    /// Placing a label twice is an error and keeps the first placement.
    pub fn place_label_at(&mut self, label: LabelId) -> CodegenResult<LabelId> {
        if label.index() >= self.next_label_id {
            return Err(CodegenError::UnknownLabel { label });
        }
        if let Some(&offset) = self.labels.get(&label) {
            return Err(CodegenError::DuplicateLabel { label, offset });
        }

        let offset = self.block.write_offset();
        self.labels.insert(label, offset);
        trace!("placed {label} at {offset}");
        Ok(label)
    }

    /// The offset a label was placed at, if any.
    pub fn label_offset(&self, label: LabelId) -> Option<u32> {
        self.labels.get(&label).copied()
    }

    // ==========================================================================
    // Label-targeting Instructions
    // ==========================================================================

    pub fn write_branch_to_label(&mut self, label: LabelId) -> UnresolvedReference {
        let patch = self.block.write_branch(0);
        self.record(label, patch.offset(), RelocKind::Rel32, Opcode::Branch)
    }

    pub fn write_branchif_to_label(&mut self, label: LabelId) -> UnresolvedReference {
        let patch = self.block.write_branchif(0);
        self.record(label, patch.offset(), RelocKind::Rel32, Opcode::BranchIf)
    }

    pub fn write_branchunless_to_label(&mut self, label: LabelId) -> UnresolvedReference {
        let patch = self.block.write_branchunless(0);
        self.record(label, patch.offset(), RelocKind::Rel32, Opcode::BranchUnless)
    }

    /// Register a catch table whose handler starts at `label`.
    pub fn write_registercatchtable_to_label(
        &mut self,
        throw_type: ThrowType,
        label: LabelId,
    ) -> UnresolvedReference {
        let patch = self.block.write_registercatchtable(throw_type, 0);
        self.record(label, patch.offset(), RelocKind::Rel32, Opcode::RegisterCatchTable)
    }

    /// Push a function whose body is emitted inline in this block at `label`.
    ///
    /// The pointer-sized body slot receives the relative offset to the label
    /// and the flags always carry [`FunctionFlags::INLINE_BODY`].
    pub fn write_putfunction_to_label(
        &mut self,
        symbol: SymbolId,
        label: LabelId,
        flags: FunctionFlags,
        argc: u32,
    ) -> UnresolvedReference {
        let flags = flags | FunctionFlags::INLINE_BODY;
        let patch = self.block.write_putfunction_slot(symbol, 0, flags, argc);
        self.record(label, patch.offset(), RelocKind::Rel64, Opcode::PutFunction)
    }

    fn record(
        &mut self,
        label: LabelId,
        patch_site: u32,
        kind: RelocKind,
        opcode: Opcode,
    ) -> UnresolvedReference {
        let reference = UnresolvedReference {
            label,
            patch_site,
            instruction_base: patch_site,
            kind,
            opcode,
        };
        trace!("{} at {patch_site} references {label}", opcode.name());
        self.unresolved_label_references.push(reference);
        reference
    }

    // ==========================================================================
    // Resolution
    // ==========================================================================

    /// Patch every recorded reference.
    ///
    /// Fails with [`CodegenError::UnresolvedLabels`] naming every reference
    /// whose label was never placed; in that case nothing is patched and the
    /// references stay pending. Running it again after success does nothing.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn resolve_unresolved_label_references(&mut self) -> CodegenResult<()> {
        if self.unresolved_label_references.is_empty() {
            return Ok(());
        }

        relocation::apply_relocations(
            &mut self.block,
            &self.labels,
            &self.unresolved_label_references,
        )?;
        debug!(
            "resolved {} label references against {} labels",
            self.unresolved_label_references.len(),
            self.labels.len()
        );
        self.unresolved_label_references.clear();
        Ok(())
    }

    /// Check if any reference is still waiting for resolution.
    #[inline]
    pub fn has_unresolved_label_references(&self) -> bool {
        !self.unresolved_label_references.is_empty()
    }

    /// References waiting for resolution, in emission order.
    pub fn unresolved_label_references(&self) -> &[UnresolvedReference] {
        &self.unresolved_label_references
    }

    /// Resolve all references and freeze the block.
    ///
    /// On error the whole block is rejected.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn finish(mut self) -> CodegenResult<CompiledBlock> {
        self.resolve_unresolved_label_references()?;
        Ok(self.block.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::decode;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn reserve_does_not_touch_block() {
        let mut asm = Assembler::new();
        let a = asm.reserve_label();
        let b = asm.reserve_label();
        assert_ne!(a, b);
        assert_eq!(asm.write_offset(), 0);
        assert_eq!(asm.label_offset(a), None);
    }

    #[test]
    #[should_panic(expected = "ran out of label ids")]
    fn label_ids_do_not_wrap() {
        let mut asm = Assembler::new();
        asm.next_label_id = u32::MAX;
        asm.reserve_label();
    }

    #[test]
    fn place_label_binds_current_offset() {
        let mut asm = Assembler::new();
        asm.block_mut().write_putself();
        let label = asm.place_label();
        assert_eq!(asm.label_offset(label), Some(1));
    }

    #[test]
    fn duplicate_placement_keeps_first_offset() {
        let mut asm = Assembler::new();
        let label = asm.reserve_label();
        asm.place_label_at(label).unwrap();
        asm.block_mut().write_return();

        let err = asm.place_label_at(label).unwrap_err();
        assert_eq!(err, CodegenError::DuplicateLabel { label, offset: 0 });
        assert_eq!(asm.label_offset(label), Some(0));
    }

    #[test]
    fn placing_unknown_label_fails() {
        let mut asm = Assembler::new();
        let err = asm.place_label_at(LabelId::new(3)).unwrap_err();
        assert_eq!(
            err,
            CodegenError::UnknownLabel {
                label: LabelId::new(3)
            }
        );
    }

    #[test]
    fn forward_branch_resolves() {
        init_logging();
        let mut asm = Assembler::new();
        let end = asm.reserve_label();

        let reference = asm.write_branch_to_label(end);
        asm.block_mut().write_putvalue(7);
        asm.place_label_at(end).unwrap();
        asm.resolve_unresolved_label_references().unwrap();

        assert_eq!(reference.patch_site, 1);
        assert_eq!(reference.instruction_base, 1);
        // label at 1 + 4 + 9 = 14
        assert_eq!(asm.block().read::<i32>(1), Some(13));
        assert!(!asm.has_unresolved_label_references());
    }

    #[test]
    fn backward_branch_resolves() {
        let mut asm = Assembler::new();
        let top = asm.place_label();
        asm.block_mut().write_dup();
        asm.write_branchif_to_label(top);
        asm.resolve_unresolved_label_references().unwrap();

        assert_eq!(asm.block().read::<i32>(2), Some(-2));
    }

    #[test]
    fn catch_table_targets_handler() {
        let mut asm = Assembler::new();
        let handler = asm.reserve_label();
        let reference = asm.write_registercatchtable_to_label(ThrowType::Exception, handler);
        asm.block_mut().write_putvalue(1);
        asm.block_mut().write_popcatchtable();
        asm.place_label_at(handler).unwrap();
        asm.block_mut().write_return();
        asm.resolve_unresolved_label_references().unwrap();

        assert_eq!(reference.patch_site, 2);
        assert_eq!(reference.opcode, Opcode::RegisterCatchTable);
        // handler at 6 + 9 + 1 = 16
        assert_eq!(asm.block().read::<i32>(2), Some(14));
    }

    #[test]
    fn putfunction_to_label_uses_pointer_slot() {
        let mut asm = Assembler::new();
        let body = asm.reserve_label();
        let skip = asm.reserve_label();

        let reference =
            asm.write_putfunction_to_label(SymbolId::new(5), body, FunctionFlags::ANONYMOUS, 1);
        asm.write_branch_to_label(skip);
        asm.place_label_at(body).unwrap();
        asm.block_mut().write_return();
        asm.place_label_at(skip).unwrap();

        let block = asm.finish().unwrap();
        assert_eq!(reference.kind, RelocKind::Rel64);
        assert_eq!(reference.patch_site, 9);

        let instructions = decode::decode_all(block.code()).unwrap();
        assert_eq!(instructions[0].opcode, Opcode::PutFunction);
        // body at 22 + 5 = 27, measured from the slot at 9
        assert_eq!(
            instructions[0].operands[1],
            decode::OperandValue::Body {
                relative: 18,
                target: 27
            }
        );
        assert_eq!(
            instructions[0].operands[2],
            decode::OperandValue::Flags(FunctionFlags::ANONYMOUS | FunctionFlags::INLINE_BODY)
        );
    }

    #[test]
    fn unresolved_reference_fails_and_stays_pending() {
        let mut asm = Assembler::new();
        let missing = asm.reserve_label();
        asm.write_branch_to_label(missing);

        let err = asm.resolve_unresolved_label_references().unwrap_err();
        assert_eq!(err.unresolved_labels(), vec![missing]);
        assert!(asm.has_unresolved_label_references());
        assert_eq!(asm.block().read::<i32>(1), Some(0));
    }

    #[test]
    fn unused_reserved_label_is_harmless() {
        let mut asm = Assembler::new();
        asm.reserve_label();
        asm.block_mut().write_return();
        let block = asm.finish().unwrap();
        assert_eq!(block.code(), &[Opcode::Return as u8]);
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut asm = Assembler::new();
        let label = asm.reserve_label();
        asm.write_branch_to_label(label);
        asm.place_label_at(label).unwrap();

        asm.resolve_unresolved_label_references().unwrap();
        let after_first = asm.block().code().to_vec();
        asm.resolve_unresolved_label_references().unwrap();

        assert_eq!(asm.block().code(), after_first.as_slice());
        assert!(asm.unresolved_label_references().is_empty());
    }

    #[test]
    fn finish_rejects_unresolved_block() {
        let mut asm = Assembler::new();
        let label = asm.reserve_label();
        asm.write_branchunless_to_label(label);
        assert!(matches!(
            asm.finish(),
            Err(CodegenError::UnresolvedLabels(_))
        ));
    }
}
