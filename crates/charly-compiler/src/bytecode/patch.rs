//! Patchable operand handles.
//!
//! A [`Patch`] remembers the byte offset of one operand so it can be
//! overwritten once its final value is known. It holds no borrow of the block:
//! every write goes through a fresh `&mut InstructionBlock`, so the handle
//! stays valid while the block keeps growing.

use std::fmt;
use std::marker::PhantomData;

use charly_core::{CodegenError, CodegenResult};

use super::InstructionBlock;
use super::buffer::{Operand, RelativeOperand};

/// A handle to an operand slot of type `T` inside an instruction block.
pub struct Patch<T> {
    offset: u32,
    _operand: PhantomData<fn() -> T>,
}

/// Handle to a signed 32-bit relative offset (branches, catch tables).
pub type OffsetPatch = Patch<i32>;

/// Handle to a pointer-sized slot (function bodies, native addresses).
pub type PointerPatch = Patch<u64>;

impl<T: Operand> Patch<T> {
    /// Bind to the block's current write offset, i.e. the operand that is
    /// about to be written.
    pub fn here(block: &InstructionBlock) -> Self {
        Self::at(block.write_offset())
    }

    /// Bind to an explicit offset.
    pub const fn at(offset: u32) -> Self {
        Self {
            offset,
            _operand: PhantomData,
        }
    }

    /// The bound offset.
    #[inline]
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Overwrite the slot with `value`.
    pub fn write(&self, block: &mut InstructionBlock, value: T) -> CodegenResult<()> {
        block.code_mut().write_at(self.offset as usize, value)
    }

    /// Read the slot's current value.
    pub fn read(&self, block: &InstructionBlock) -> Option<T> {
        block.read(self.offset)
    }
}

impl<T: RelativeOperand> Patch<T> {
    /// Overwrite the slot with the distance from the slot itself to the
    /// block's current write offset.
    pub fn write_current_offset(&self, block: &mut InstructionBlock) -> CodegenResult<()> {
        let target = block.write_offset();
        self.write_relative(block, self.offset, target)
    }

    /// Overwrite the slot with `target - base`.
    pub fn write_relative(
        &self,
        block: &mut InstructionBlock,
        base: u32,
        target: u32,
    ) -> CodegenResult<()> {
        let distance = i64::from(target) - i64::from(base);
        let value = T::from_distance(distance).ok_or(CodegenError::RelocationOutOfRange {
            offset: self.offset,
            distance,
            width: T::WIDTH,
        })?;
        self.write(block, value)
    }
}

impl<T> Clone for Patch<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Patch<T> {}

impl<T> PartialEq for Patch<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl<T> Eq for Patch<T> {}

impl<T> fmt::Debug for Patch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch")
            .field("offset", &self.offset)
            .field("operand", &std::any::type_name::<T>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;

    #[test]
    fn write_current_offset_measures_from_operand() {
        let mut block = InstructionBlock::new();
        let patch = block.write_branch(0);
        assert_eq!(patch.offset(), 1);

        block.write_putvalue(1);
        block.write_return();

        patch.write_current_offset(&mut block).unwrap();
        // 4 bytes of offset operand + 9 bytes PutValue + 1 byte Return
        assert_eq!(patch.read(&block), Some(14));
    }

    #[test]
    fn backward_patch_is_negative() {
        let mut block = InstructionBlock::new();
        block.write_dup();
        let patch = block.write_branch(0);
        patch.write_relative(&mut block, patch.offset(), 0).unwrap();
        assert_eq!(patch.read(&block), Some(-2));
    }

    #[test]
    fn patch_survives_growth() {
        let mut block = InstructionBlock::with_config(
            crate::bytecode::BlockConfig::default().with_initial_code_capacity(8),
        );
        let patch = block.write_branchunless(0);
        for value in 0..100 {
            block.write_putvalue(value);
        }
        assert!(block.code_growth_count() >= 3);

        patch.write(&mut block, 1234).unwrap();
        assert_eq!(patch.read(&block), Some(1234));
        assert_eq!(block.read::<u8>(0), Some(Opcode::BranchUnless as u8));
    }

    #[test]
    fn explicit_offset_handle() {
        let mut block = InstructionBlock::new();
        let original = block.write_branchif(0);
        let resumed = OffsetPatch::at(original.offset());
        resumed.write(&mut block, 42).unwrap();
        assert_eq!(original.read(&block), Some(42));
        assert_eq!(original, resumed);
    }

    #[test]
    fn write_past_end_is_rejected() {
        let mut block = InstructionBlock::new();
        block.write_return();
        let patch = OffsetPatch::here(&block);
        let err = patch.write(&mut block, 5).unwrap_err();
        assert!(matches!(err, CodegenError::PatchOutOfRange { offset: 1, .. }));
        assert_eq!(block.write_offset(), 1);
    }

    #[test]
    fn unsigned_slot_rejects_negative_distance() {
        let mut block = InstructionBlock::new();
        block.write_return();
        let slot = Patch::<u32>::here(&block);
        block.write_int(0);
        let err = slot.write_relative(&mut block, 5, 0).unwrap_err();
        assert_eq!(
            err,
            CodegenError::RelocationOutOfRange {
                offset: 1,
                distance: -5,
                width: 4
            }
        );
    }
}
