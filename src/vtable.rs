// SPDX-License-Identifier: MIT
//! Vtable emission with per-buffer deduplication, and the read-side view

use std::collections::HashMap;

use tracing::trace;

use crate::buffer::Buffer;
use crate::error::{ReadError, WriteError};
use crate::format::{
    field_slot_offset, read_scalar, slice_at, Scalar, VOffset, SIZE_SOFFSET, SIZE_VOFFSET,
    VTABLE_HEADER_SIZE,
};

/// Canonical vtable bytes: size header, object size, then field slots with
/// trailing absent slots removed.
pub fn canonical_vtable(field_offsets: &[VOffset], object_size: VOffset) -> Vec<u8> {
    let used = field_offsets
        .iter()
        .rposition(|&offset| offset != 0)
        .map_or(0, |last| last + 1);
    let vtable_size = VTABLE_HEADER_SIZE + used * SIZE_VOFFSET;

    let mut bytes = Vec::with_capacity(vtable_size);
    bytes.extend_from_slice(&(vtable_size as VOffset).to_le_bytes());
    bytes.extend_from_slice(&object_size.to_le_bytes());
    for offset in &field_offsets[..used] {
        bytes.extend_from_slice(&offset.to_le_bytes());
    }
    bytes
}

/// Vtables written into the current buffer, keyed by exact content
#[derive(Debug, Default)]
pub struct VTableRegistry {
    /// Canonical bytes -> location measured from the buffer end.
    written: HashMap<Vec<u8>, usize>,
    dedup_hits: usize,
}

impl VTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the location of a vtable matching `field_offsets`, writing it
    /// into `buffer` only if no identical one exists yet.
    ///
    /// Locations are measured from the end of the buffer, like every other
    /// position handed out during construction.
    pub fn register(
        &mut self,
        buffer: &mut Buffer,
        field_offsets: &[VOffset],
        object_size: VOffset,
    ) -> Result<usize, WriteError> {
        let canonical = canonical_vtable(field_offsets, object_size);
        if let Some(&location) = self.written.get(&canonical) {
            self.dedup_hits += 1;
            trace!(location, size = canonical.len(), "reusing vtable");
            return Ok(location);
        }

        buffer.place_bytes(&canonical)?;
        let location = buffer.current_offset();
        self.written.insert(canonical, location);
        Ok(location)
    }

    /// Distinct vtables written so far
    pub fn len(&self) -> usize {
        self.written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }

    /// Tables that reused an existing vtable
    pub fn dedup_hits(&self) -> usize {
        self.dedup_hits
    }

    pub fn clear(&mut self) {
        self.written.clear();
        self.dedup_hits = 0;
    }
}

/// Read-only view of a vtable inside a finished buffer
#[derive(Debug, Clone, Copy)]
pub struct VTable<'a> {
    buf: &'a [u8],
    loc: usize,
    size: usize,
    object_size: usize,
}

impl<'a> VTable<'a> {
    /// Validate the headers at `loc` and that the whole vtable is in bounds
    pub fn init(buf: &'a [u8], loc: usize) -> Result<Self, ReadError> {
        let size = read_scalar::<VOffset>(buf, loc)? as usize;
        let object_size = read_scalar::<VOffset>(buf, loc + SIZE_VOFFSET)? as usize;

        if size < VTABLE_HEADER_SIZE {
            return Err(ReadError::InvalidVTable {
                position: loc,
                reason: "size smaller than its own header",
            });
        }
        if size % SIZE_VOFFSET != 0 {
            return Err(ReadError::InvalidVTable {
                position: loc,
                reason: "odd size",
            });
        }
        if object_size < SIZE_SOFFSET {
            return Err(ReadError::InvalidVTable {
                position: loc,
                reason: "object size smaller than the vtable offset",
            });
        }
        slice_at(buf, loc, size)?;

        Ok(Self {
            buf,
            loc,
            size,
            object_size,
        })
    }

    pub fn location(&self) -> usize {
        self.loc
    }

    /// Declared vtable size in bytes, headers included
    pub fn num_bytes(&self) -> usize {
        self.size
    }

    /// Declared inline size of the table, vtable offset included
    pub fn object_inline_size(&self) -> usize {
        self.object_size
    }

    /// Number of field slots the writer emitted
    pub fn num_fields(&self) -> usize {
        (self.size - VTABLE_HEADER_SIZE) / SIZE_VOFFSET
    }

    /// Slot value for `field_id`; ids past the stored slots read as absent
    #[inline]
    pub fn get(&self, field_id: u16) -> VOffset {
        let slot = field_slot_offset(field_id);
        if slot + SIZE_VOFFSET > self.size {
            return 0;
        }
        VOffset::read_le(&self.buf[self.loc + slot..])
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        &self.buf[self.loc..self.loc + self.size]
    }
}
