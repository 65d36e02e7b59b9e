// SPDX-License-Identifier: MIT
//! Wire format constants and the offset model shared by builder and reader
//!
//! All multi-byte values are little-endian.
//!
//! ```text
//! Root    : u32 offset from buffer start to the root table
//!           [optional 4-byte file identifier]
//! VTable  : u16 vtable size | u16 inline object size | N x u16 field offset (0 = absent)
//! Table   : i32 vtable offset (vtable = table - value) | inline field bytes
//! Struct  : fixed positional fields, no header
//! Vector  : u32 element count | elements
//! String  : u32 byte length | bytes | 0x00 (not counted)
//! ```
//!
//! An unsigned offset stored at position `P` refers to `P + value`. The only
//! signed offset is the table's vtable reference, which may point either way.

use crate::error::ReadError;

/// Unsigned forward offset to a sub-object.
pub type UOffset = u32;

/// Signed table-to-vtable offset.
pub type SOffset = i32;

/// Offset of a field inside its table, as stored in a vtable slot.
pub type VOffset = u16;

pub const SIZE_UOFFSET: usize = 4;
pub const SIZE_SOFFSET: usize = 4;
pub const SIZE_VOFFSET: usize = 2;

/// Length prefix written by `finish_size_prefixed`.
pub const SIZE_PREFIX_LENGTH: usize = 4;

/// File identifier written right after the root offset.
pub const FILE_IDENTIFIER_LENGTH: usize = 4;

/// Vtable size and object size precede the field slots.
pub const VTABLE_METADATA_FIELDS: usize = 2;

pub const VTABLE_HEADER_SIZE: usize = VTABLE_METADATA_FIELDS * SIZE_VOFFSET;

/// Most field slots a table may declare while its vtable size still fits a `u16`.
pub const MAX_TABLE_FIELDS: u16 = ((u16::MAX as usize - VTABLE_HEADER_SIZE) / SIZE_VOFFSET) as u16;

/// Largest buffer the codec builds or reads. Keeps every displacement
/// representable as an `i32`.
pub const MAX_BUFFER_SIZE: usize = i32::MAX as usize;

/// Largest alignment any scalar or struct may request.
pub const MAX_ALIGNMENT: usize = 16;

/// Every table starts at this alignment, the size of the widest scalar.
pub const TABLE_START_ALIGNMENT: usize = 8;

/// Byte position of `field_id`'s slot inside a vtable.
#[inline]
pub const fn field_slot_offset(field_id: u16) -> usize {
    VTABLE_HEADER_SIZE + field_id as usize * SIZE_VOFFSET
}

/// Zero bytes needed so that `buf_size` becomes a multiple of `alignment`.
///
/// `alignment` must be a power of two.
#[inline]
pub const fn padding_bytes(buf_size: usize, alignment: usize) -> usize {
    (!buf_size).wrapping_add(1) & (alignment - 1)
}

/// Fixed-size little-endian value that can live inline in a table or vector.
pub trait Scalar: Copy + PartialEq + std::fmt::Debug {
    /// Encoded size, which is also the required alignment.
    const SIZE: usize;

    /// Write the value into `dst[..SIZE]`.
    fn write_le(self, dst: &mut [u8]);

    /// Read the value from `src[..SIZE]`.
    fn read_le(src: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn write_le(self, dst: &mut [u8]) {
                    dst[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(src: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&src[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl Scalar for bool {
    const SIZE: usize = 1;

    #[inline]
    fn write_le(self, dst: &mut [u8]) {
        dst[0] = self as u8;
    }

    #[inline]
    fn read_le(src: &[u8]) -> Self {
        src[0] != 0
    }
}

/// Fixed-size, fixed-layout aggregate stored inline with no vtable.
///
/// The layout is positional and frozen: fields can never be added or
/// removed without breaking every buffer already written.
pub trait Struct: Sized {
    /// Encoded size in bytes, including any internal padding.
    const SIZE: usize;
    /// Required alignment; a power of two no larger than [`MAX_ALIGNMENT`].
    const ALIGN: usize;

    /// Encode into `dst`, which is exactly `SIZE` bytes long.
    fn encode(&self, dst: &mut [u8]);

    /// Decode from `src`, which is exactly `SIZE` bytes long.
    fn decode(src: &[u8]) -> Self;
}

/// Borrow `len` bytes at `pos`, failing instead of reading past the end.
#[inline]
pub fn slice_at(buf: &[u8], pos: usize, len: usize) -> Result<&[u8], ReadError> {
    pos.checked_add(len)
        .and_then(|end| buf.get(pos..end))
        .ok_or(ReadError::OutOfBounds {
            position: pos,
            size: len,
            buffer_len: buf.len(),
        })
}

/// Bounds-checked scalar read at an absolute position.
#[inline]
pub fn read_scalar<T: Scalar>(buf: &[u8], pos: usize) -> Result<T, ReadError> {
    slice_at(buf, pos, T::SIZE).map(T::read_le)
}

/// Resolve the unsigned forward offset stored at `pos`.
#[inline]
pub fn follow_uoffset(buf: &[u8], pos: usize) -> Result<usize, ReadError> {
    let offset = read_scalar::<UOffset>(buf, pos)? as usize;
    pos.checked_add(offset)
        .filter(|&target| target < buf.len())
        .ok_or(ReadError::OutOfBounds {
            position: pos.saturating_add(offset),
            size: 0,
            buffer_len: buf.len(),
        })
}
