// SPDX-License-Identifier: MIT
//! Table accessor and root readers
//!
//! A [`Table`] is a position inside a finished buffer plus its resolved
//! vtable. Field reads are `O(1)`: one vtable slot lookup, then a read (or an
//! offset chase) at `table + slot`. Fields the writer never emitted, including
//! ids newer than the writer's schema, resolve to `None` or to the caller's
//! default.

use crate::error::ReadError;
use crate::follow::{Fixed, Follow, ForwardsUOffset, Inline};
use crate::format::{
    follow_uoffset, read_scalar, slice_at, SOffset, Struct, FILE_IDENTIFIER_LENGTH, SIZE_PREFIX_LENGTH,
    SIZE_UOFFSET,
};
use crate::vector::Vector;
use crate::vtable::VTable;

#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    buf: &'a [u8],
    loc: usize,
    vtable: VTable<'a>,
}

impl<'a> Table<'a> {
    /// Resolve the table at absolute position `loc`, validating its vtable
    /// and that its inline bytes are in bounds
    pub fn init(buf: &'a [u8], loc: usize) -> Result<Self, ReadError> {
        let stored = read_scalar::<SOffset>(buf, loc)?;
        let vtable_loc = loc as i64 - stored as i64;
        if vtable_loc < 0 || vtable_loc as usize >= buf.len() {
            return Err(ReadError::InvalidVTable {
                position: loc,
                reason: "vtable offset points outside the buffer",
            });
        }

        let vtable = VTable::init(buf, vtable_loc as usize)?;
        slice_at(buf, loc, vtable.object_inline_size())?;

        Ok(Self { buf, loc, vtable })
    }

    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    /// Absolute position of the table's vtable offset
    pub fn location(&self) -> usize {
        self.loc
    }

    pub fn vtable(&self) -> VTable<'a> {
        self.vtable
    }

    /// Absolute position of `field_id`, or `None` when absent
    #[inline]
    pub fn field_position(&self, field_id: u16) -> Result<Option<usize>, ReadError> {
        let slot = self.vtable.get(field_id) as usize;
        if slot == 0 {
            return Ok(None);
        }
        Ok(Some(self.loc + slot))
    }

    /// Whether the writer emitted `field_id`
    pub fn has_field(&self, field_id: u16) -> bool {
        self.vtable.get(field_id) != 0
    }

    /// Absolute position of a `size`-byte inline value for `field_id`,
    /// checked against the table's declared inline size
    pub fn inline_field(&self, field_id: u16, size: usize) -> Result<Option<usize>, ReadError> {
        let slot = self.vtable.get(field_id) as usize;
        if slot == 0 {
            return Ok(None);
        }
        if slot + size > self.vtable.object_inline_size() {
            return Err(ReadError::FieldOutsideObject {
                field_id,
                position: self.loc + slot,
                object_size: self.vtable.object_inline_size(),
            });
        }
        Ok(Some(self.loc + slot))
    }

    /// Read `field_id` with strategy `T`, or `None` when absent.
    ///
    /// Unlike [`get_or`](Self::get_or) this tells an unset field apart from
    /// one explicitly written with its default value.
    pub fn get<T: Inline<'a>>(&self, field_id: u16) -> Result<Option<T::Inner>, ReadError> {
        match self.inline_field(field_id, T::SIZE)? {
            Some(position) => T::follow(self.buf, position).map(Some),
            None => Ok(None),
        }
    }

    /// Read `field_id`, falling back to `default` when absent
    #[inline]
    pub fn get_or<T: Inline<'a>>(
        &self,
        field_id: u16,
        default: T::Inner,
    ) -> Result<T::Inner, ReadError> {
        Ok(self.get::<T>(field_id)?.unwrap_or(default))
    }

    pub fn get_str(&self, field_id: u16) -> Result<Option<&'a str>, ReadError> {
        self.get::<ForwardsUOffset<&'a str>>(field_id)
    }

    pub fn get_bytes(&self, field_id: u16) -> Result<Option<&'a [u8]>, ReadError> {
        self.get::<ForwardsUOffset<&'a [u8]>>(field_id)
    }

    /// Nested table referenced by `field_id`
    pub fn get_table(&self, field_id: u16) -> Result<Option<Table<'a>>, ReadError> {
        self.get::<ForwardsUOffset<Table<'a>>>(field_id)
    }

    /// Vector referenced by `field_id`, elements decoded with strategy `T`
    pub fn get_vector<T: Inline<'a>>(
        &self,
        field_id: u16,
    ) -> Result<Option<Vector<'a, T>>, ReadError> {
        self.get::<ForwardsUOffset<Vector<'a, T>>>(field_id)
    }

    /// Struct stored inline at `field_id`
    pub fn get_struct<S: Struct>(&self, field_id: u16) -> Result<Option<S>, ReadError> {
        self.get::<Fixed<S>>(field_id)
    }
}

impl<'a> Follow<'a> for Table<'a> {
    type Inner = Table<'a>;

    #[inline]
    fn follow(buf: &'a [u8], loc: usize) -> Result<Self::Inner, ReadError> {
        Table::init(buf, loc)
    }
}

/// Resolve the root table of a finished buffer
pub fn root_as_table(buf: &[u8]) -> Result<Table<'_>, ReadError> {
    if buf.len() < SIZE_UOFFSET {
        return Err(ReadError::BufferTooShort {
            needed: SIZE_UOFFSET,
            actual: buf.len(),
        });
    }
    let root = follow_uoffset(buf, 0)?;
    Table::init(buf, root)
}

/// Resolve the root table of a buffer finished with `finish_with_identifier`
pub fn root_with_identifier<'a>(
    buf: &'a [u8],
    identifier: &[u8; FILE_IDENTIFIER_LENGTH],
) -> Result<Table<'a>, ReadError> {
    check_identifier(buf, identifier, false)?;
    root_as_table(buf)
}

/// Resolve the root table of a size-prefixed buffer.
///
/// The prefix must match the number of bytes that follow it exactly.
pub fn size_prefixed_root_as_table(buf: &[u8]) -> Result<Table<'_>, ReadError> {
    let needed = SIZE_PREFIX_LENGTH + SIZE_UOFFSET;
    if buf.len() < needed {
        return Err(ReadError::BufferTooShort {
            needed,
            actual: buf.len(),
        });
    }
    let declared = read_scalar::<u32>(buf, 0)? as usize;
    let actual = buf.len() - SIZE_PREFIX_LENGTH;
    if declared != actual {
        return Err(ReadError::SizePrefixMismatch { declared, actual });
    }
    let root = follow_uoffset(buf, SIZE_PREFIX_LENGTH)?;
    Table::init(buf, root)
}

/// Whether the buffer carries `identifier` after its root offset
pub fn buffer_has_identifier(
    buf: &[u8],
    identifier: &[u8; FILE_IDENTIFIER_LENGTH],
    size_prefixed: bool,
) -> bool {
    check_identifier(buf, identifier, size_prefixed).is_ok()
}

pub(crate) fn check_identifier(
    buf: &[u8],
    identifier: &[u8; FILE_IDENTIFIER_LENGTH],
    size_prefixed: bool,
) -> Result<(), ReadError> {
    let start = SIZE_UOFFSET + if size_prefixed { SIZE_PREFIX_LENGTH } else { 0 };
    let found = slice_at(buf, start, FILE_IDENTIFIER_LENGTH)?;
    if found != identifier {
        let mut raw = [0u8; FILE_IDENTIFIER_LENGTH];
        raw.copy_from_slice(found);
        return Err(ReadError::IdentifierMismatch {
            expected: *identifier,
            found: raw,
        });
    }
    Ok(())
}
