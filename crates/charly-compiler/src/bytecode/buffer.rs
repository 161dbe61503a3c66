//! Growable byte buffers.
//!
//! [`ByteBuffer`] backs both the instruction stream and the static segment of
//! an instruction block. It grows geometrically and only ever exposes byte
//! offsets, so positions handed out before a growth stay valid after it.

use charly_core::{CodegenError, CodegenResult};
use log::debug;

/// A fixed-width value that can be stored in a buffer.
///
/// All operands are little-endian regardless of the host.
pub trait Operand: Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Encode into exactly `WIDTH` bytes.
    fn encode(self, out: &mut [u8]);

    /// Decode from exactly `WIDTH` bytes.
    fn decode(bytes: &[u8]) -> Self;
}

/// An integer operand that can hold a signed byte distance.
pub trait RelativeOperand: Operand {
    /// Convert a distance, or `None` if it does not fit.
    fn from_distance(distance: i64) -> Option<Self>;
}

macro_rules! impl_operand {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Operand for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_operand!(u8, u16, u32, u64, i32, i64, f64);

impl Operand for bool {
    const WIDTH: usize = 1;

    #[inline]
    fn encode(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

macro_rules! impl_relative_operand {
    ($($ty:ty),* $(,)?) => {
        $(
            impl RelativeOperand for $ty {
                #[inline]
                fn from_distance(distance: i64) -> Option<Self> {
                    <$ty>::try_from(distance).ok()
                }
            }
        )*
    };
}

impl_relative_operand!(i32, i64, u32, u64);

/// An owned, geometrically growing byte buffer.
///
/// `len()` is the write cursor. The buffer tracks its own logical capacity so
/// the growth policy is explicit: when an append does not fit, the capacity
/// is multiplied by the growth factor until it does.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    capacity: usize,
    growth_factor: usize,
    growths: u32,
}

impl ByteBuffer {
    /// Create an empty buffer.
    ///
    /// A zero capacity is raised to one byte and factors below two are raised
    /// to two, so growth always makes progress.
    pub fn new(initial_capacity: usize, growth_factor: usize) -> Self {
        let capacity = initial_capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            growth_factor: growth_factor.max(2),
            growths: 0,
        }
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current logical capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many times the buffer has grown.
    #[inline]
    pub fn growth_count(&self) -> u32 {
        self.growths
    }

    /// The written bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Make room for `additional` more bytes.
    ///
    /// Allocation failure aborts through the global allocation error handler.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        if needed <= self.capacity {
            return;
        }

        let old_capacity = self.capacity;
        let mut new_capacity = self.capacity;
        while new_capacity < needed {
            new_capacity = new_capacity.saturating_mul(self.growth_factor);
        }

        self.data.reserve_exact(new_capacity - self.data.len());
        self.capacity = new_capacity;
        self.growths += 1;
        debug!("buffer grew from {old_capacity} to {new_capacity} bytes");
    }

    /// Append a value and return the offset it was written at.
    pub fn push<T: Operand>(&mut self, value: T) -> usize {
        self.reserve(T::WIDTH);
        let offset = self.data.len();
        self.data.resize(offset + T::WIDTH, 0);
        value.encode(&mut self.data[offset..]);
        offset
    }

    /// Append raw bytes and return the offset of the first one.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> usize {
        self.reserve(bytes.len());
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Overwrite a value inside the written part of the buffer.
    ///
    /// Never extends the buffer; a slot that is not entirely inside
    /// `0..len()` is a `PatchOutOfRange` error.
    pub fn write_at<T: Operand>(&mut self, offset: usize, value: T) -> CodegenResult<()> {
        let slot = self.slot_mut(offset, T::WIDTH)?;
        value.encode(slot);
        Ok(())
    }

    /// Read a value from the written part of the buffer.
    pub fn read_at<T: Operand>(&self, offset: usize) -> Option<T> {
        let end = offset.checked_add(T::WIDTH)?;
        self.data.get(offset..end).map(T::decode)
    }

    /// Read `len` raw bytes starting at `offset`.
    pub fn bytes_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.data.get(offset..end)
    }

    /// Give up the buffer, keeping only the written bytes.
    pub fn into_boxed_slice(self) -> Box<[u8]> {
        self.data.into_boxed_slice()
    }

    fn slot_mut(&mut self, offset: usize, width: usize) -> CodegenResult<&mut [u8]> {
        let len = self.data.len();
        match offset.checked_add(width) {
            Some(end) if end <= len => Ok(&mut self.data[offset..end]),
            _ => Err(CodegenError::PatchOutOfRange {
                offset: u32::try_from(offset).unwrap_or(u32::MAX),
                width,
                len: u32::try_from(len).unwrap_or(u32::MAX),
            }),
        }
    }
}
