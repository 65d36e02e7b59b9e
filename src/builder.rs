// SPDX-License-Identifier: MIT
//! Buffer construction: tables, vectors, strings and the root
//!
//! The builder lays bytes out back-to-front while control flows top-down
//! through nested `start`/`add`/`end` calls. Every object under construction
//! owns a frame on an explicit stack; only the frame on top may be mutated,
//! and misuse is reported at the offending call.
//!
//! ```rust
//! use zerobuf::{root_as_table, Builder};
//!
//! let mut builder = Builder::new();
//! let name = builder.create_string("Milky Way").unwrap();
//!
//! builder.start_table(2).unwrap();
//! builder.add_field(0, 500_000_000_000u64, 0).unwrap();
//! builder.add_offset_field(1, name).unwrap();
//! let galaxy = builder.end_table().unwrap();
//! builder.finish(galaxy).unwrap();
//!
//! let table = root_as_table(builder.finished_data().unwrap()).unwrap();
//! assert_eq!(table.get_or::<u64>(0, 0).unwrap(), 500_000_000_000);
//! assert_eq!(table.get_str(1).unwrap(), Some("Milky Way"));
//! ```

use std::fmt;
use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::config::BuilderConfig;
use crate::error::WriteError;
use crate::format::{
    padding_bytes, Scalar, Struct, SOffset, UOffset, VOffset, FILE_IDENTIFIER_LENGTH,
    MAX_ALIGNMENT, MAX_BUFFER_SIZE, MAX_TABLE_FIELDS, SIZE_PREFIX_LENGTH, SIZE_SOFFSET,
    SIZE_UOFFSET, SIZE_VOFFSET, TABLE_START_ALIGNMENT, VTABLE_HEADER_SIZE,
};
use crate::table::Table;
use crate::vtable::VTableRegistry;

/// Marker for offsets to tables
#[derive(Debug)]
pub enum TableKind {}

/// Marker for offsets to vectors
#[derive(Debug)]
pub enum VectorKind {}

/// Marker for offsets to strings
#[derive(Debug)]
pub enum StringKind {}

/// Location of a finished object, measured from the end of the buffer
/// under construction. Only meaningful for the builder that produced it.
pub struct Offset<K> {
    value: UOffset,
    _kind: PhantomData<fn() -> K>,
}

pub type TableOffset = Offset<TableKind>;
pub type VectorOffset = Offset<VectorKind>;
pub type StringOffset = Offset<StringKind>;

impl<K> Offset<K> {
    #[inline]
    pub fn new(value: UOffset) -> Self {
        Self {
            value,
            _kind: PhantomData,
        }
    }

    #[inline]
    pub fn value(&self) -> UOffset {
        self.value
    }
}

impl<K> Clone for Offset<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Offset<K> {}

impl<K> PartialEq for Offset<K> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<K> Eq for Offset<K> {}

impl<K> fmt::Debug for Offset<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Offset").field(&self.value).finish()
    }
}

/// Open table: one slot per declared field, 0 meaning absent
#[derive(Debug)]
struct TableFrame {
    field_count: u16,
    /// Field locations measured from the buffer end.
    slots: Vec<usize>,
    /// Lowest offset-from-end covered by a field; padding written before the
    /// first field is not part of the object.
    inline_end: Option<usize>,
}

#[derive(Debug)]
struct VectorFrame {
    elem_size: usize,
    declared: usize,
    pushed: usize,
}

#[derive(Debug)]
enum Frame {
    Table(TableFrame),
    Vector(VectorFrame),
}

/// Stateful, single-threaded writer for one buffer at a time
pub struct Builder {
    buffer: Buffer,
    vtables: VTableRegistry,
    frames: Vec<Frame>,
    min_align: usize,
    finished: bool,
    config: BuilderConfig,
}

impl Builder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self::with_config(BuilderConfig::default())
    }

    /// Create a builder with `capacity` bytes allocated up front
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(BuilderConfig {
            initial_capacity: capacity,
            ..BuilderConfig::default()
        })
    }

    /// Create a builder from `config`.
    ///
    /// Limits beyond what the wire format can address are clamped.
    pub fn with_config(mut config: BuilderConfig) -> Self {
        if let Err(reason) = config.validate() {
            warn!(%reason, "clamping builder config to supported limits");
            config.max_buffer_size = config.max_buffer_size.min(MAX_BUFFER_SIZE);
            config.initial_capacity = config.initial_capacity.min(config.max_buffer_size);
        }
        Self {
            buffer: Buffer::with_capacity(config.initial_capacity, config.max_buffer_size),
            vtables: VTableRegistry::new(),
            frames: Vec::new(),
            min_align: 1,
            finished: false,
            config,
        }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Discard everything built so far, keeping the allocation.
    ///
    /// Vtable deduplication starts over: vtables are never shared across buffers.
    pub fn reset(&mut self) {
        if !self.frames.is_empty() {
            warn!(
                open = self.frames.len(),
                "resetting builder with objects still under construction"
            );
        }
        self.buffer.clear();
        self.vtables.clear();
        self.frames.clear();
        self.min_align = 1;
        self.finished = false;
    }

    /// Bytes written so far
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.buffer.current_offset()
    }

    /// Objects currently under construction
    pub fn open_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Distinct vtables written into the current buffer
    pub fn vtable_count(&self) -> usize {
        self.vtables.len()
    }

    /// Tables that reused an existing vtable in the current buffer
    pub fn vtable_dedup_hits(&self) -> usize {
        self.vtables.dedup_hits()
    }

    // --- tables ---

    /// Open a table frame with room for `field_count` field ids.
    ///
    /// Tables are started at an 8-byte boundary, so adding the same fields
    /// in the same order yields the same vtable wherever the table lands.
    pub fn start_table(&mut self, field_count: u16) -> Result<(), WriteError> {
        self.ensure_building()?;
        self.ensure_no_open_vector("start a table")?;
        if field_count > MAX_TABLE_FIELDS {
            return Err(WriteError::TooManyFields {
                requested: field_count,
                max: MAX_TABLE_FIELDS,
            });
        }

        let padding = padding_bytes(self.buffer.current_offset(), TABLE_START_ALIGNMENT);
        self.buffer.pad(padding)?;

        self.frames.push(Frame::Table(TableFrame {
            field_count,
            slots: vec![0; field_count as usize],
            inline_end: None,
        }));
        Ok(())
    }

    /// Add a scalar field, omitted when equal to `default`
    ///
    /// Omitted fields cost zero bytes and decode to `default`.
    #[inline]
    pub fn add_field<T: Scalar>(&mut self, id: u16, value: T, default: T) -> Result<(), WriteError> {
        self.check_field(id)?;
        if value == default && !self.config.force_defaults {
            return Ok(());
        }
        let location = self.push_scalar(value)?;
        self.record_field(id, location, T::SIZE);
        Ok(())
    }

    /// Add a scalar field regardless of any default
    pub fn add_field_always<T: Scalar>(&mut self, id: u16, value: T) -> Result<(), WriteError> {
        self.check_field(id)?;
        let location = self.push_scalar(value)?;
        self.record_field(id, location, T::SIZE);
        Ok(())
    }

    /// Add a field referring to a string, vector or table built earlier
    pub fn add_offset_field<K>(&mut self, id: u16, child: Offset<K>) -> Result<(), WriteError> {
        self.check_field(id)?;
        let location = self.push_uoffset(child.value())?;
        self.record_field(id, location, SIZE_UOFFSET);
        Ok(())
    }

    /// Add a struct stored inline in the table
    pub fn add_struct_field<S: Struct>(&mut self, id: u16, value: &S) -> Result<(), WriteError> {
        self.check_field(id)?;
        check_alignment(S::ALIGN)?;
        self.prep(S::ALIGN, S::SIZE)?;
        self.buffer.place_with(S::SIZE, |dst| value.encode(dst))?;
        let location = self.buffer.current_offset();
        self.record_field(id, location, S::SIZE);
        Ok(())
    }

    /// Close the table on top of the stack and return its location.
    ///
    /// On error nothing is written and the table stays open; the builder
    /// must then be [`reset`](Self::reset) to discard the partial object.
    pub fn end_table(&mut self) -> Result<TableOffset, WriteError> {
        self.ensure_building()?;
        let frame = match self.frames.last() {
            Some(Frame::Table(frame)) => frame,
            Some(Frame::Vector(_)) => {
                return Err(WriteError::VectorInProgress {
                    operation: "end a table",
                })
            }
            None => return Err(WriteError::NoOpenTable),
        };

        let current = self.buffer.current_offset();
        let padding = padding_bytes(current, SIZE_SOFFSET);
        let object_offset = current + padding + SIZE_SOFFSET;

        let inline_end = frame.inline_end.unwrap_or(object_offset - SIZE_SOFFSET);
        let object_size = object_offset - inline_end;
        if object_size > VOffset::MAX as usize {
            return Err(WriteError::ObjectTooLarge { size: object_size });
        }

        let field_offsets: Vec<VOffset> = frame
            .slots
            .iter()
            .map(|&location| {
                if location == 0 {
                    0
                } else {
                    (object_offset - location) as VOffset
                }
            })
            .collect();

        // Room for the vtable offset and a worst-case vtable, so the writes
        // below cannot fail halfway
        let vtable_size = VTABLE_HEADER_SIZE + field_offsets.len() * SIZE_VOFFSET;
        self.buffer.reserve(padding + SIZE_SOFFSET + vtable_size)?;
        self.frames.pop();

        // Placeholder for the vtable offset, patched once the vtable is known
        self.prep(SIZE_SOFFSET, 0)?;
        self.buffer.place::<SOffset>(0)?;

        let vtable_location =
            self.vtables
                .register(&mut self.buffer, &field_offsets, object_size as VOffset)?;

        // Table position minus this value is the vtable position
        let vtable_offset = vtable_location as i64 - object_offset as i64;
        self.buffer
            .write_scalar_at(object_offset, vtable_offset as SOffset);

        Ok(Offset::new(object_offset as UOffset))
    }

    /// Fail unless `field_id` is present in a table ended by this builder
    pub fn required(&self, table: TableOffset, field_id: u16) -> Result<(), WriteError> {
        let data = self.buffer.data();
        let dangling = WriteError::DanglingOffset {
            offset: table.value(),
            written: data.len(),
        };
        let position = data
            .len()
            .checked_sub(table.value() as usize)
            .ok_or_else(|| dangling.clone())?;
        let view = Table::init(data, position).map_err(|_| dangling)?;
        match view.field_position(field_id) {
            Ok(Some(_)) => Ok(()),
            _ => Err(WriteError::MissingRequiredField { id: field_id }),
        }
    }

    // --- vectors and strings ---

    /// Open a vector of `count` elements of `elem_size` bytes each.
    ///
    /// Elements must then be pushed in reverse index order, last one first.
    pub fn start_vector(
        &mut self,
        elem_size: usize,
        count: usize,
        alignment: usize,
    ) -> Result<(), WriteError> {
        self.ensure_building()?;
        self.ensure_no_open_vector("start a vector")?;
        check_alignment(alignment)?;

        let block = elem_size
            .checked_mul(count)
            .ok_or(WriteError::BufferTooLarge {
                requested: usize::MAX,
                max: self.config.max_buffer_size,
            })?;
        self.prep(SIZE_UOFFSET, block)?;
        self.prep(alignment, block)?;

        self.frames.push(Frame::Vector(VectorFrame {
            elem_size,
            declared: count,
            pushed: 0,
        }));
        Ok(())
    }

    /// Push one scalar element into the open vector
    #[inline]
    pub fn push_element<T: Scalar>(&mut self, value: T) -> Result<(), WriteError> {
        self.claim_element(T::SIZE)?;
        self.buffer.place(value)
    }

    /// Push one offset element into the open vector
    pub fn push_offset_element<K>(&mut self, child: Offset<K>) -> Result<(), WriteError> {
        self.claim_element(SIZE_UOFFSET)?;
        self.push_uoffset(child.value()).map(|_| ())
    }

    /// Push one struct element into the open vector
    pub fn push_struct_element<S: Struct>(&mut self, value: &S) -> Result<(), WriteError> {
        self.claim_element(S::SIZE)?;
        self.buffer.place_with(S::SIZE, |dst| value.encode(dst))
    }

    /// Close the open vector, writing its length header
    pub fn end_vector(&mut self, count: usize) -> Result<VectorOffset, WriteError> {
        self.ensure_building()?;
        let frame = match self.frames.last() {
            Some(Frame::Vector(frame)) => frame,
            _ => return Err(WriteError::NoOpenVector),
        };
        if count != frame.declared || frame.pushed != frame.declared {
            return Err(WriteError::VectorLengthMismatch {
                declared: frame.declared,
                pushed: frame.pushed,
                ended: count,
            });
        }
        self.frames.pop();

        let length = UOffset::try_from(count).map_err(|_| WriteError::BufferTooLarge {
            requested: count,
            max: self.config.max_buffer_size,
        })?;
        self.push_scalar(length)?;
        Ok(Offset::new(self.buffer.current_offset() as UOffset))
    }

    /// Build a vector of scalars in one call
    pub fn create_vector<T: Scalar>(&mut self, items: &[T]) -> Result<VectorOffset, WriteError> {
        self.start_vector(T::SIZE, items.len(), T::SIZE)?;
        for &item in items.iter().rev() {
            self.push_element(item)?;
        }
        self.end_vector(items.len())
    }

    /// Build a vector of offsets to objects created earlier
    pub fn create_vector_of_offsets<K>(
        &mut self,
        items: &[Offset<K>],
    ) -> Result<VectorOffset, WriteError> {
        self.start_vector(SIZE_UOFFSET, items.len(), SIZE_UOFFSET)?;
        for &item in items.iter().rev() {
            self.push_offset_element(item)?;
        }
        self.end_vector(items.len())
    }

    /// Build a vector of inline structs
    pub fn create_vector_of_structs<S: Struct>(
        &mut self,
        items: &[S],
    ) -> Result<VectorOffset, WriteError> {
        self.start_vector(S::SIZE, items.len(), S::ALIGN)?;
        for item in items.iter().rev() {
            self.push_struct_element(item)?;
        }
        self.end_vector(items.len())
    }

    /// Build each string, then a vector referring to them
    pub fn create_vector_of_strings(&mut self, items: &[&str]) -> Result<VectorOffset, WriteError> {
        let offsets = items
            .iter()
            .map(|item| self.create_string(item))
            .collect::<Result<Vec<_>, _>>()?;
        self.create_vector_of_offsets(&offsets)
    }

    /// Write a length-prefixed, zero-terminated UTF-8 string
    #[inline]
    pub fn create_string(&mut self, value: &str) -> Result<StringOffset, WriteError> {
        self.create_byte_string(value.as_bytes())
    }

    /// Write a length-prefixed, zero-terminated byte string
    pub fn create_byte_string(&mut self, bytes: &[u8]) -> Result<StringOffset, WriteError> {
        self.ensure_building()?;
        self.ensure_no_open_vector("create a string")?;
        let length = UOffset::try_from(bytes.len()).map_err(|_| WriteError::BufferTooLarge {
            requested: bytes.len(),
            max: self.config.max_buffer_size,
        })?;

        self.prep(SIZE_UOFFSET, bytes.len() + 1)?;
        self.buffer.place(0u8)?;
        self.buffer.place_bytes(bytes)?;
        self.buffer.place(length)?;
        Ok(Offset::new(self.buffer.current_offset() as UOffset))
    }

    // --- finishing ---

    /// Write the root offset; the buffer becomes immutable
    pub fn finish(&mut self, root: TableOffset) -> Result<(), WriteError> {
        self.finish_with(root, None, false)
    }

    /// Write the root offset followed by a 4-byte file identifier
    pub fn finish_with_identifier(
        &mut self,
        root: TableOffset,
        identifier: &[u8; FILE_IDENTIFIER_LENGTH],
    ) -> Result<(), WriteError> {
        self.finish_with(root, Some(identifier), false)
    }

    /// Like [`finish`](Self::finish), prefixed with the length of the rest
    pub fn finish_size_prefixed(
        &mut self,
        root: TableOffset,
        identifier: Option<&[u8; FILE_IDENTIFIER_LENGTH]>,
    ) -> Result<(), WriteError> {
        self.finish_with(root, identifier, true)
    }

    fn finish_with(
        &mut self,
        root: TableOffset,
        identifier: Option<&[u8; FILE_IDENTIFIER_LENGTH]>,
        size_prefixed: bool,
    ) -> Result<(), WriteError> {
        self.ensure_building()?;
        if !self.frames.is_empty() {
            return Err(WriteError::UnfinishedObjects {
                open: self.frames.len(),
            });
        }

        let trailer = SIZE_UOFFSET
            + identifier.map_or(0, |_| FILE_IDENTIFIER_LENGTH)
            + if size_prefixed { SIZE_PREFIX_LENGTH } else { 0 };
        let alignment = self.min_align.max(SIZE_UOFFSET);
        self.prep(alignment, trailer)?;

        if let Some(identifier) = identifier {
            self.buffer.place_bytes(identifier)?;
        }
        self.push_uoffset(root.value())?;
        if size_prefixed {
            let rest = self.buffer.current_offset() as UOffset;
            self.push_scalar(rest)?;
        }

        self.finished = true;
        debug!(
            size = self.buffer.current_offset(),
            vtables = self.vtables.len(),
            vtable_dedup_hits = self.vtables.dedup_hits(),
            size_prefixed,
            "finished buffer"
        );
        Ok(())
    }

    /// The finished buffer, borrowed
    pub fn finished_data(&self) -> Result<&[u8], WriteError> {
        if !self.finished {
            return Err(WriteError::NotFinished);
        }
        Ok(self.buffer.data())
    }

    /// Hand the finished buffer over to its new owner
    pub fn into_finished(self) -> Result<Vec<u8>, WriteError> {
        if !self.finished {
            return Err(WriteError::NotFinished);
        }
        Ok(self.buffer.into_vec())
    }

    // --- internals ---

    fn ensure_building(&self) -> Result<(), WriteError> {
        if self.finished {
            return Err(WriteError::AlreadyFinished);
        }
        Ok(())
    }

    fn ensure_no_open_vector(&self, operation: &'static str) -> Result<(), WriteError> {
        if let Some(Frame::Vector(_)) = self.frames.last() {
            return Err(WriteError::VectorInProgress { operation });
        }
        Ok(())
    }

    /// Validate that `id` can be written into the table on top of the stack
    fn check_field(&self, id: u16) -> Result<(), WriteError> {
        self.ensure_building()?;
        match self.frames.last() {
            Some(Frame::Table(frame)) if id < frame.field_count => Ok(()),
            Some(Frame::Table(frame)) => Err(WriteError::FieldOutOfRange {
                id,
                field_count: frame.field_count,
            }),
            Some(Frame::Vector(_)) => Err(WriteError::VectorInProgress {
                operation: "add a table field",
            }),
            None => Err(WriteError::NoOpenTable),
        }
    }

    fn record_field(&mut self, id: u16, location: usize, size: usize) {
        if let Some(Frame::Table(frame)) = self.frames.last_mut() {
            frame.slots[id as usize] = location;
            let end = location - size;
            frame.inline_end = Some(frame.inline_end.map_or(end, |current| current.min(end)));
        }
    }

    fn claim_element(&mut self, elem_size: usize) -> Result<(), WriteError> {
        self.ensure_building()?;
        match self.frames.last_mut() {
            Some(Frame::Vector(frame)) => {
                if elem_size != frame.elem_size {
                    return Err(WriteError::ElementSizeMismatch {
                        expected: frame.elem_size,
                        actual: elem_size,
                    });
                }
                if frame.pushed == frame.declared {
                    return Err(WriteError::VectorLengthMismatch {
                        declared: frame.declared,
                        pushed: frame.pushed + 1,
                        ended: frame.declared,
                    });
                }
                frame.pushed += 1;
                Ok(())
            }
            _ => Err(WriteError::NoOpenVector),
        }
    }

    /// Pad so that after writing `additional` bytes the cursor is aligned to `size`
    fn prep(&mut self, size: usize, additional: usize) -> Result<(), WriteError> {
        self.min_align = self.min_align.max(size);
        let current = self.buffer.current_offset();
        let too_large = WriteError::BufferTooLarge {
            requested: current.saturating_add(additional),
            max: self.config.max_buffer_size,
        };
        let unaligned = current
            .checked_add(additional)
            .ok_or_else(|| too_large.clone())?;
        let padding = padding_bytes(unaligned, size);
        let needed = padding
            .checked_add(size)
            .and_then(|n| n.checked_add(additional))
            .ok_or(too_large)?;
        self.buffer.reserve(needed)?;
        self.buffer.pad(padding)
    }

    /// Aligned scalar write; returns the value's location
    #[inline]
    fn push_scalar<T: Scalar>(&mut self, value: T) -> Result<usize, WriteError> {
        self.prep(T::SIZE, 0)?;
        self.buffer.place(value)?;
        Ok(self.buffer.current_offset())
    }

    /// Write a forward offset to `target`; returns the offset's own location
    fn push_uoffset(&mut self, target: UOffset) -> Result<usize, WriteError> {
        self.prep(SIZE_UOFFSET, 0)?;
        let written = self.buffer.current_offset();
        if target == 0 || target as usize > written {
            return Err(WriteError::DanglingOffset {
                offset: target,
                written,
            });
        }
        // Written position minus child location, read back as position plus value
        let relative = (written + SIZE_UOFFSET) as UOffset - target;
        self.buffer.place(relative)?;
        Ok(self.buffer.current_offset())
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("written", &self.buffer.current_offset())
            .field("open_frames", &self.frames.len())
            .field("vtables", &self.vtables.len())
            .field("finished", &self.finished)
            .finish()
    }
}

fn check_alignment(alignment: usize) -> Result<(), WriteError> {
    if !alignment.is_power_of_two() || alignment > MAX_ALIGNMENT {
        return Err(WriteError::InvalidAlignment(alignment));
    }
    Ok(())
}
