//! Instruction blocks.
//!
//! An [`InstructionBlock`] is one code unit under construction: a tagged
//! instruction stream, a static segment for string constants, and the
//! already-compiled child blocks it refers to. Each `write_*` method appends
//! exactly one instruction; the operand layouts match [`Opcode::operands`].
//!
//! Once a block is complete it is frozen into a [`CompiledBlock`].

use log::trace;

use charly_core::SymbolId;

use super::buffer::{ByteBuffer, Operand};
use super::patch::{OffsetPatch, Patch, PointerPatch};
use super::{FunctionFlags, Opcode, ThrowType};

/// Initial sizes and growth factors for instruction blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockConfig {
    /// Initial capacity of the instruction stream in bytes.
    pub initial_code_capacity: usize,
    /// Factor the instruction stream capacity is multiplied by when full.
    pub code_growth_factor: usize,
    /// Initial capacity of the static segment in bytes.
    pub initial_text_capacity: usize,
    /// Factor the static segment capacity is multiplied by when full.
    pub text_growth_factor: usize,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            initial_code_capacity: 256,
            code_growth_factor: 2,
            initial_text_capacity: 32,
            text_growth_factor: 2,
        }
    }
}

impl BlockConfig {
    pub fn with_initial_code_capacity(mut self, capacity: usize) -> Self {
        self.initial_code_capacity = capacity;
        self
    }

    pub fn with_code_growth_factor(mut self, factor: usize) -> Self {
        self.code_growth_factor = factor;
        self
    }

    pub fn with_initial_text_capacity(mut self, capacity: usize) -> Self {
        self.initial_text_capacity = capacity;
        self
    }

    pub fn with_text_growth_factor(mut self, factor: usize) -> Self {
        self.text_growth_factor = factor;
        self
    }
}

/// Convert a buffer length to a 32-bit offset.
///
/// # Panics
///
/// Panics if the block outgrew the 32-bit offsets of the format. This is
/// treated like allocation failure.
fn to_offset(len: usize) -> u32 {
    u32::try_from(len)
        .unwrap_or_else(|_| panic!("instruction block of {len} bytes exceeds 32-bit offsets"))
}

/// A code unit under construction.
#[derive(Debug, Clone)]
pub struct InstructionBlock {
    /// The tagged instruction stream.
    code: ByteBuffer,
    /// Static segment holding string constants.
    text: ByteBuffer,
    /// Compiled child blocks, referenced by index from `PutFunction`.
    children: Vec<CompiledBlock>,
}

impl Default for InstructionBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionBlock {
    /// Create an empty block with the default configuration.
    pub fn new() -> Self {
        Self::with_config(BlockConfig::default())
    }

    /// Create an empty block with the given sizes and growth factors.
    pub fn with_config(config: BlockConfig) -> Self {
        Self {
            code: ByteBuffer::new(config.initial_code_capacity, config.code_growth_factor),
            text: ByteBuffer::new(config.initial_text_capacity, config.text_growth_factor),
            children: Vec::new(),
        }
    }

    /// Current write offset of the instruction stream.
    #[inline]
    pub fn write_offset(&self) -> u32 {
        to_offset(self.code.len())
    }

    /// Current write offset of the static segment.
    #[inline]
    pub fn text_offset(&self) -> u32 {
        to_offset(self.text.len())
    }

    /// The instruction stream written so far.
    pub fn code(&self) -> &[u8] {
        self.code.as_slice()
    }

    /// The static segment written so far.
    pub fn text(&self) -> &[u8] {
        self.text.as_slice()
    }

    /// Child blocks attached so far.
    pub fn children(&self) -> &[CompiledBlock] {
        &self.children
    }

    /// How many times the instruction stream has grown.
    pub fn code_growth_count(&self) -> u32 {
        self.code.growth_count()
    }

    /// How many times the static segment has grown.
    pub fn text_growth_count(&self) -> u32 {
        self.text.growth_count()
    }

    /// Read a value from the instruction stream.
    pub fn read<T: Operand>(&self, offset: u32) -> Option<T> {
        self.code.read_at(offset as usize)
    }

    /// Bytes of a static segment entry.
    pub fn string_at(&self, offset: u32, len: u32) -> Option<&[u8]> {
        self.text.bytes_at(offset as usize, len as usize)
    }

    pub(crate) fn code_mut(&mut self) -> &mut ByteBuffer {
        &mut self.code
    }

    /// Freeze the block.
    ///
    /// Blocks that use labels should be finished through
    /// [`Assembler::finish`](crate::emit::Assembler::finish) so that every
    /// reference is resolved first.
    pub fn finish(self) -> CompiledBlock {
        CompiledBlock {
            code: self.code.into_boxed_slice(),
            text: self.text.into_boxed_slice(),
            children: self.children,
        }
    }

    // ==========================================================================
    // Primitive Operands
    // ==========================================================================

    pub fn write_byte(&mut self, value: u8) {
        self.code.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.code.push(value);
    }

    pub fn write_short(&mut self, value: u16) {
        self.code.push(value);
    }

    pub fn write_int(&mut self, value: u32) {
        self.code.push(value);
    }

    pub fn write_signed_int(&mut self, value: i32) {
        self.code.push(value);
    }

    pub fn write_long(&mut self, value: u64) {
        self.code.push(value);
    }

    /// Write a pointer-sized slot. Slots are always 8 bytes wide.
    pub fn write_pointer(&mut self, value: u64) {
        self.code.push(value);
    }

    pub fn write_double(&mut self, value: f64) {
        self.code.push(value);
    }

    pub fn write_symbol(&mut self, symbol: SymbolId) {
        self.code.push(symbol.raw());
    }

    fn write_opcode(&mut self, op: Opcode) {
        self.code.push(u8::from(op));
    }

    /// Append raw bytes to the static segment and return their offset.
    pub fn write_string(&mut self, data: &[u8]) -> u32 {
        to_offset(self.text.extend_from_slice(data))
    }

    // ==========================================================================
    // Reads and Writes
    // ==========================================================================

    pub fn write_readlocal(&mut self, index: u32, level: u32) {
        self.write_opcode(Opcode::ReadLocal);
        self.write_int(index);
        self.write_int(level);
    }

    pub fn write_readmembersymbol(&mut self, symbol: SymbolId) {
        self.write_opcode(Opcode::ReadMemberSymbol);
        self.write_symbol(symbol);
    }

    pub fn write_readmembervalue(&mut self) {
        self.write_opcode(Opcode::ReadMemberValue);
    }

    pub fn write_readarrayindex(&mut self, index: u32) {
        self.write_opcode(Opcode::ReadArrayIndex);
        self.write_int(index);
    }

    pub fn write_setlocal(&mut self, index: u32, level: u32) {
        self.write_opcode(Opcode::SetLocal);
        self.write_int(index);
        self.write_int(level);
    }

    pub fn write_setmembersymbol(&mut self, symbol: SymbolId) {
        self.write_opcode(Opcode::SetMemberSymbol);
        self.write_symbol(symbol);
    }

    pub fn write_setmembervalue(&mut self) {
        self.write_opcode(Opcode::SetMemberValue);
    }

    pub fn write_setarrayindex(&mut self, index: u32) {
        self.write_opcode(Opcode::SetArrayIndex);
        self.write_int(index);
    }

    // ==========================================================================
    // Values
    // ==========================================================================

    pub fn write_putself(&mut self) {
        self.write_opcode(Opcode::PutSelf);
    }

    pub fn write_putvalue(&mut self, value: u64) {
        self.write_opcode(Opcode::PutValue);
        self.write_long(value);
    }

    pub fn write_putfloat(&mut self, value: f64) {
        self.write_opcode(Opcode::PutFloat);
        self.write_double(value);
    }

    /// Emit a string push.
    ///
    /// The bytes go to the static segment; the instruction carries their
    /// offset and length.
    pub fn write_putstring(&mut self, data: impl AsRef<[u8]>) {
        let data = data.as_ref();
        self.write_opcode(Opcode::PutString);
        let offset = self.write_string(data);
        self.write_int(offset);
        self.write_int(to_offset(data.len()));
    }

    /// Emit a function push referring to an already compiled child block.
    ///
    /// The block takes ownership of `child`; the returned handle points at
    /// the slot holding the child's index. [`FunctionFlags::INLINE_BODY`] is
    /// cleared from `flags`.
    pub fn write_putfunction(
        &mut self,
        symbol: SymbolId,
        child: CompiledBlock,
        flags: FunctionFlags,
        argc: u32,
    ) -> PointerPatch {
        let index = self.children.len() as u64;
        trace!("attaching child block {index} ({} bytes)", child.code().len());
        self.children.push(child);
        self.write_putfunction_slot(symbol, index, flags - FunctionFlags::INLINE_BODY, argc)
    }

    /// Emit a function push with an explicit body slot value.
    pub(crate) fn write_putfunction_slot(
        &mut self,
        symbol: SymbolId,
        slot: u64,
        flags: FunctionFlags,
        argc: u32,
    ) -> PointerPatch {
        self.write_opcode(Opcode::PutFunction);
        self.write_symbol(symbol);

        let patch = Patch::here(self);
        self.write_pointer(slot);
        self.write_byte(flags.bits());
        self.write_int(argc);

        patch
    }

    /// Emit a native function push. The returned handle points at the
    /// address slot.
    pub fn write_putcfunction(&mut self, symbol: SymbolId, address: u64, argc: u32) -> PointerPatch {
        self.write_opcode(Opcode::PutCFunction);
        self.write_symbol(symbol);

        let patch = Patch::here(self);
        self.write_pointer(address);
        self.write_int(argc);

        patch
    }

    pub fn write_putarray(&mut self, count: u32) {
        self.write_opcode(Opcode::PutArray);
        self.write_int(count);
    }

    pub fn write_puthash(&mut self, count: u32) {
        self.write_opcode(Opcode::PutHash);
        self.write_int(count);
    }

    pub fn write_putclass(
        &mut self,
        symbol: SymbolId,
        property_count: u32,
        static_property_count: u32,
        method_count: u32,
        static_method_count: u32,
        parent_class_count: u32,
    ) {
        self.write_opcode(Opcode::PutClass);
        self.write_symbol(symbol);
        self.write_int(property_count);
        self.write_int(static_property_count);
        self.write_int(method_count);
        self.write_int(static_method_count);
        self.write_int(parent_class_count);
    }

    // ==========================================================================
    // Stack Operations
    // ==========================================================================

    pub fn write_makeconstant(&mut self, index: u32) {
        self.write_opcode(Opcode::MakeConstant);
        self.write_int(index);
    }

    pub fn write_pop(&mut self, count: u32) {
        self.write_opcode(Opcode::Pop);
        self.write_int(count);
    }

    pub fn write_dup(&mut self) {
        self.write_opcode(Opcode::Dup);
    }

    pub fn write_swap(&mut self) {
        self.write_opcode(Opcode::Swap);
    }

    pub fn write_topn(&mut self, index: u32) {
        self.write_opcode(Opcode::Topn);
        self.write_int(index);
    }

    pub fn write_setn(&mut self, index: u32) {
        self.write_opcode(Opcode::Setn);
        self.write_int(index);
    }

    // ==========================================================================
    // Calls and Exceptions
    // ==========================================================================

    pub fn write_call(&mut self, argc: u32) {
        self.write_opcode(Opcode::Call);
        self.write_int(argc);
    }

    pub fn write_callmember(&mut self, argc: u32) {
        self.write_opcode(Opcode::CallMember);
        self.write_int(argc);
    }

    pub fn write_return(&mut self) {
        self.write_opcode(Opcode::Return);
    }

    pub fn write_throw(&mut self, throw_type: ThrowType) {
        self.write_opcode(Opcode::Throw);
        self.write_byte(u8::from(throw_type));
    }

    /// Register a catch table whose handler lies `offset` bytes from the
    /// offset operand. The returned handle points at that operand.
    pub fn write_registercatchtable(&mut self, throw_type: ThrowType, offset: i32) -> OffsetPatch {
        self.write_opcode(Opcode::RegisterCatchTable);
        self.write_byte(u8::from(throw_type));

        let patch = Patch::here(self);
        self.write_signed_int(offset);
        patch
    }

    pub fn write_popcatchtable(&mut self) {
        self.write_opcode(Opcode::PopCatchTable);
    }

    // ==========================================================================
    // Branches
    // ==========================================================================

    pub fn write_branch(&mut self, offset: i32) -> OffsetPatch {
        self.write_relative_branch(Opcode::Branch, offset)
    }

    pub fn write_branchif(&mut self, offset: i32) -> OffsetPatch {
        self.write_relative_branch(Opcode::BranchIf, offset)
    }

    pub fn write_branchunless(&mut self, offset: i32) -> OffsetPatch {
        self.write_relative_branch(Opcode::BranchUnless, offset)
    }

    fn write_relative_branch(&mut self, op: Opcode, offset: i32) -> OffsetPatch {
        debug_assert!(op.is_branch());
        self.write_opcode(op);

        let patch = Patch::here(self);
        self.write_signed_int(offset);
        patch
    }

    // ==========================================================================
    // Operators
    // ==========================================================================

    /// Emit an operand-less operator such as `Add` or `UNot`.
    ///
    /// # Panics
    ///
    /// Panics if `op` is not an operator. Any other opcode would be written
    /// without its operands.
    pub fn write_operator(&mut self, op: Opcode) {
        assert!(op.is_operator(), "{} is not an operator", op.name());
        self.write_opcode(op);
    }

    pub fn write_halt(&mut self) {
        self.write_opcode(Opcode::Halt);
    }
}

/// A finished, read-only code unit.
///
/// Owns its child blocks; `PutFunction` slots refer to them by index.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledBlock {
    code: Box<[u8]>,
    text: Box<[u8]>,
    children: Vec<CompiledBlock>,
}

impl CompiledBlock {
    /// The instruction stream.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// The static segment.
    pub fn text(&self) -> &[u8] {
        &self.text
    }

    /// Child blocks in attachment order.
    pub fn children(&self) -> &[CompiledBlock] {
        &self.children
    }

    /// The child stored at `index` by a `PutFunction` slot.
    pub fn child(&self, index: u64) -> Option<&CompiledBlock> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.children.get(index))
    }

    /// Bytes of a static segment entry.
    pub fn string_at(&self, offset: u32, len: u32) -> Option<&[u8]> {
        let start = offset as usize;
        let end = start.checked_add(len as usize)?;
        self.text.get(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_block_is_empty() {
        let block = InstructionBlock::new();
        assert_eq!(block.write_offset(), 0);
        assert_eq!(block.text_offset(), 0);
        assert!(block.children().is_empty());
    }

    #[test]
    fn readlocal_layout() {
        let mut block = InstructionBlock::new();
        block.write_readlocal(3, 1);

        assert_eq!(block.write_offset(), 9);
        assert_eq!(block.read::<u8>(0), Some(Opcode::ReadLocal as u8));
        assert_eq!(block.read::<u32>(1), Some(3));
        assert_eq!(block.read::<u32>(5), Some(1));
    }

    #[test]
    fn putstring_goes_to_static_segment() {
        let mut block = InstructionBlock::new();
        block.write_putstring("hello");
        block.write_putstring("");
        block.write_putstring("world");

        assert_eq!(block.text(), b"helloworld");
        assert_eq!(block.read::<u32>(1), Some(0));
        assert_eq!(block.read::<u32>(5), Some(5));
        assert_eq!(block.read::<u32>(10), Some(5));
        assert_eq!(block.read::<u32>(14), Some(0));
        assert_eq!(block.read::<u32>(19), Some(5));
        assert_eq!(block.string_at(5, 5), Some(&b"world"[..]));
    }

    #[test]
    fn putfunction_attaches_child() {
        let mut inner = InstructionBlock::new();
        inner.write_putvalue(1);
        inner.write_return();
        let inner = inner.finish();

        let mut outer = InstructionBlock::new();
        outer.write_putself();
        let slot = outer.write_putfunction(SymbolId::new(9), inner.clone(), FunctionFlags::ANONYMOUS, 2);

        assert_eq!(slot.offset(), 1 + 1 + 8);
        assert_eq!(slot.read(&outer), Some(0));
        assert_eq!(outer.read::<u8>(slot.offset() + 8), Some(1));
        assert_eq!(outer.read::<u32>(slot.offset() + 9), Some(2));
        assert_eq!(outer.write_offset() as usize, 1 + Opcode::PutFunction.encoded_size());

        let compiled = outer.finish();
        assert_eq!(compiled.child(0), Some(&inner));
        assert_eq!(compiled.child(1), None);
    }

    #[test]
    fn putfunction_clears_inline_body_flag() {
        let mut block = InstructionBlock::new();
        let slot = block.write_putfunction(
            SymbolId::new(1),
            InstructionBlock::new().finish(),
            FunctionFlags::ANONYMOUS | FunctionFlags::INLINE_BODY,
            0,
        );
        assert_eq!(
            block.read::<u8>(slot.offset() + 8),
            Some(FunctionFlags::ANONYMOUS.bits())
        );
    }

    #[test]
    fn putcfunction_slot() {
        let mut block = InstructionBlock::new();
        let slot = block.write_putcfunction(SymbolId::new(1), 0xfeed, 3);
        assert_eq!(slot.read(&block), Some(0xfeed));
        slot.write(&mut block, 0xbeef).unwrap();
        assert_eq!(slot.read(&block), Some(0xbeef));
        assert_eq!(block.write_offset() as usize, Opcode::PutCFunction.encoded_size());
    }

    #[test]
    fn registercatchtable_layout() {
        let mut block = InstructionBlock::new();
        let patch = block.write_registercatchtable(ThrowType::Break, 0);
        assert_eq!(block.read::<u8>(1), Some(ThrowType::Break as u8));
        assert_eq!(patch.offset(), 2);
        assert_eq!(block.write_offset(), 6);
    }

    #[test]
    fn putclass_layout() {
        let mut block = InstructionBlock::new();
        block.write_putclass(SymbolId::new(77), 1, 2, 3, 4, 5);
        assert_eq!(block.read::<u64>(1), Some(77));
        for (i, expected) in (1..=5u32).enumerate() {
            assert_eq!(block.read::<u32>(9 + 4 * i as u32), Some(expected));
        }
    }

    #[test]
    fn every_writer_matches_the_opcode_table() {
        let mut block = InstructionBlock::new();
        let mut expected = 0;
        let mut check = |block: &InstructionBlock, op: Opcode| {
            expected += op.encoded_size();
            assert_eq!(block.write_offset() as usize, expected, "{}", op.name());
        };

        block.write_readlocal(0, 0);
        check(&block, Opcode::ReadLocal);
        block.write_readmembersymbol(SymbolId::new(1));
        check(&block, Opcode::ReadMemberSymbol);
        block.write_readmembervalue();
        check(&block, Opcode::ReadMemberValue);
        block.write_readarrayindex(1);
        check(&block, Opcode::ReadArrayIndex);
        block.write_setlocal(0, 0);
        check(&block, Opcode::SetLocal);
        block.write_setmembersymbol(SymbolId::new(1));
        check(&block, Opcode::SetMemberSymbol);
        block.write_setmembervalue();
        check(&block, Opcode::SetMemberValue);
        block.write_setarrayindex(1);
        check(&block, Opcode::SetArrayIndex);
        block.write_putself();
        check(&block, Opcode::PutSelf);
        block.write_putvalue(5);
        check(&block, Opcode::PutValue);
        block.write_putfloat(1.5);
        check(&block, Opcode::PutFloat);
        block.write_putstring("abc");
        check(&block, Opcode::PutString);
        block.write_putfunction(
            SymbolId::new(2),
            InstructionBlock::new().finish(),
            FunctionFlags::empty(),
            0,
        );
        check(&block, Opcode::PutFunction);
        block.write_putcfunction(SymbolId::new(3), 0, 1);
        check(&block, Opcode::PutCFunction);
        block.write_putarray(2);
        check(&block, Opcode::PutArray);
        block.write_puthash(2);
        check(&block, Opcode::PutHash);
        block.write_putclass(SymbolId::new(4), 0, 0, 0, 0, 0);
        check(&block, Opcode::PutClass);
        block.write_makeconstant(0);
        check(&block, Opcode::MakeConstant);
        block.write_pop(1);
        check(&block, Opcode::Pop);
        block.write_dup();
        check(&block, Opcode::Dup);
        block.write_swap();
        check(&block, Opcode::Swap);
        block.write_topn(1);
        check(&block, Opcode::Topn);
        block.write_setn(1);
        check(&block, Opcode::Setn);
        block.write_call(0);
        check(&block, Opcode::Call);
        block.write_callmember(0);
        check(&block, Opcode::CallMember);
        block.write_return();
        check(&block, Opcode::Return);
        block.write_throw(ThrowType::Exception);
        check(&block, Opcode::Throw);
        block.write_registercatchtable(ThrowType::Exception, 0);
        check(&block, Opcode::RegisterCatchTable);
        block.write_popcatchtable();
        check(&block, Opcode::PopCatchTable);
        block.write_branch(0);
        check(&block, Opcode::Branch);
        block.write_branchif(0);
        check(&block, Opcode::BranchIf);
        block.write_branchunless(0);
        check(&block, Opcode::BranchUnless);
        block.write_operator(Opcode::Mul);
        check(&block, Opcode::Mul);
        block.write_halt();
        check(&block, Opcode::Halt);
    }

    #[test]
    fn config_controls_growth() {
        let config = BlockConfig::default()
            .with_initial_code_capacity(4)
            .with_code_growth_factor(4)
            .with_initial_text_capacity(1)
            .with_text_growth_factor(2);
        let mut block = InstructionBlock::with_config(config);
        block.write_putvalue(1);
        assert_eq!(block.code_growth_count(), 1);

        block.write_putstring([0u8; 9]);
        assert_eq!(block.text_growth_count(), 1);
        assert_eq!(block.text().len(), 9);
    }

    #[test]
    #[should_panic(expected = "BRANCH is not an operator")]
    fn write_operator_rejects_non_operators() {
        let mut block = InstructionBlock::new();
        block.write_operator(Opcode::Branch);
    }

    #[test]
    fn write_operator_accepts_every_operator() {
        let mut block = InstructionBlock::new();
        let operators: Vec<Opcode> = (0..=Opcode::Halt as u8)
            .filter_map(Opcode::from_u8)
            .filter(|op| op.is_operator())
            .collect();
        for &op in &operators {
            block.write_operator(op);
        }
        assert_eq!(operators.len(), 21);
        assert_eq!(block.write_offset(), 21);
    }
}
