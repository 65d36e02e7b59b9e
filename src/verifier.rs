// SPDX-License-Identifier: MIT
//! Up-front structural verification of untrusted buffers
//!
//! Accessors are already bounds-checked on every read. The verifier is for
//! callers that want a buffer rejected as a whole before any field is used:
//! it walks the structure once, enforcing the limits in [`VerifierConfig`].

use tracing::debug;

use crate::config::VerifierConfig;
use crate::error::{ReadError, SchemaError};
use crate::follow::Follow;
use crate::format::{
    follow_uoffset, read_scalar, slice_at, UOffset, SIZE_PREFIX_LENGTH, SIZE_SOFFSET,
    SIZE_UOFFSET, SIZE_VOFFSET,
};
use crate::schema::{FieldDef, FieldType, Schema, TableDef};
use crate::table::{check_identifier, Table};

pub struct Verifier<'a> {
    buf: &'a [u8],
    config: VerifierConfig,
    size_prefixed: bool,
    depth: usize,
    tables: usize,
}

impl<'a> Verifier<'a> {
    pub fn new(buf: &'a [u8], config: &VerifierConfig) -> Self {
        Self {
            buf,
            config: *config,
            size_prefixed: false,
            depth: 0,
            tables: 0,
        }
    }

    /// Expect a buffer written by `finish_size_prefixed`
    pub fn with_size_prefix(mut self) -> Self {
        self.size_prefixed = true;
        self
    }

    /// Tables visited by the last verification
    pub fn tables_visited(&self) -> usize {
        self.tables
    }

    /// Verify the root table's header, vtable and field slots
    pub fn verify_root(&mut self) -> Result<Table<'a>, ReadError> {
        let result = self
            .root_position()
            .and_then(|loc| self.verify_table(loc));
        if let Err(err) = &result {
            debug!(error = %err, "buffer verification failed");
        }
        result
    }

    /// Walk every field reachable from the schema's root table
    pub fn verify_with_schema(&mut self, schema: &Schema) -> Result<Table<'a>, SchemaError> {
        let result = self.walk_schema(schema);
        if let Err(err) = &result {
            debug!(error = %err, "buffer verification failed");
        }
        result
    }

    fn walk_schema(&mut self, schema: &Schema) -> Result<Table<'a>, SchemaError> {
        let root = schema.root_table()?;
        let loc = self.root_position()?;
        if let Some(identifier) = schema.file_identifier() {
            check_identifier(self.buf, &identifier, self.size_prefixed)?;
        }
        self.verify_schema_table(schema, root, loc)
    }

    /// Check one table's header and vtable and that every present slot lies
    /// inside the object's declared inline size
    pub fn verify_table(&mut self, loc: usize) -> Result<Table<'a>, ReadError> {
        self.tables += 1;
        if self.tables > self.config.max_tables {
            return Err(ReadError::TooManyTables {
                max: self.config.max_tables,
            });
        }
        self.check_alignment(loc, SIZE_SOFFSET)?;

        let table = Table::init(self.buf, loc)?;
        let vtable = table.vtable();
        self.check_alignment(vtable.location(), SIZE_VOFFSET)?;

        let object_size = vtable.object_inline_size();
        for field_id in 0..vtable.num_fields() as u16 {
            let slot = vtable.get(field_id) as usize;
            if slot != 0 && (slot < SIZE_SOFFSET || slot >= object_size) {
                return Err(ReadError::FieldOutsideObject {
                    field_id,
                    position: loc + slot,
                    object_size,
                });
            }
        }
        Ok(table)
    }

    /// Check a string's length, terminator and encoding
    pub fn verify_string(&self, loc: usize) -> Result<&'a str, ReadError> {
        self.check_alignment(loc, SIZE_UOFFSET)?;
        <&'a str>::follow(self.buf, loc)
    }

    /// Check that a vector's header and element block are in bounds;
    /// returns its length
    pub fn verify_vector(
        &self,
        loc: usize,
        elem_size: usize,
        alignment: usize,
    ) -> Result<usize, ReadError> {
        self.check_alignment(loc, SIZE_UOFFSET)?;
        let len = read_scalar::<UOffset>(self.buf, loc)? as usize;
        let start = loc + SIZE_UOFFSET;
        let block = len.checked_mul(elem_size).ok_or(ReadError::OutOfBounds {
            position: start,
            size: usize::MAX,
            buffer_len: self.buf.len(),
        })?;
        slice_at(self.buf, start, block)?;
        if len > 0 {
            self.check_alignment(start, alignment)?;
        }
        Ok(len)
    }

    fn root_position(&mut self) -> Result<usize, ReadError> {
        self.depth = 0;
        self.tables = 0;

        let len = self.buf.len();
        if len > self.config.max_apparent_size {
            return Err(ReadError::BufferTooLarge {
                size: len,
                max: self.config.max_apparent_size,
            });
        }

        let header = if self.size_prefixed {
            SIZE_PREFIX_LENGTH
        } else {
            0
        };
        if len < header + SIZE_UOFFSET {
            return Err(ReadError::BufferTooShort {
                needed: header + SIZE_UOFFSET,
                actual: len,
            });
        }
        if self.size_prefixed {
            let declared = read_scalar::<u32>(self.buf, 0)? as usize;
            if declared != len - SIZE_PREFIX_LENGTH {
                return Err(ReadError::SizePrefixMismatch {
                    declared,
                    actual: len - SIZE_PREFIX_LENGTH,
                });
            }
        }
        follow_uoffset(self.buf, header)
    }

    fn enter(&mut self) -> Result<(), ReadError> {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            return Err(ReadError::DepthLimitExceeded {
                max: self.config.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn check_alignment(&self, position: usize, alignment: usize) -> Result<(), ReadError> {
        if self.config.check_alignment && alignment > 1 && position % alignment != 0 {
            return Err(ReadError::Misaligned {
                position,
                alignment,
            });
        }
        Ok(())
    }

    fn verify_schema_table(
        &mut self,
        schema: &Schema,
        def: &TableDef,
        loc: usize,
    ) -> Result<Table<'a>, SchemaError> {
        self.enter()?;
        let table = self.verify_table(loc)?;
        for field in &def.fields {
            self.verify_field(schema, def, &table, field)?;
        }
        self.leave();
        Ok(table)
    }

    fn verify_field(
        &mut self,
        schema: &Schema,
        def: &TableDef,
        table: &Table<'a>,
        field: &FieldDef,
    ) -> Result<(), SchemaError> {
        let size = field.ty.inline_size();
        let position = match table.inline_field(field.id, size)? {
            Some(position) => position,
            None if field.required => {
                return Err(ReadError::MissingRequiredField {
                    table: def.name.clone(),
                    field: field.name.clone(),
                }
                .into())
            }
            None => return Ok(()),
        };
        self.check_alignment(position, size)?;

        match &field.ty {
            FieldType::Union(members) => {
                let tag = read_scalar::<u8>(self.buf, position)?;
                if tag == 0 {
                    return Ok(());
                }
                let member = members
                    .get(tag as usize - 1)
                    .ok_or(ReadError::UnknownUnionTag { tag })?;
                if let Some(value) = table.inline_field(field.id + 1, SIZE_UOFFSET)? {
                    self.check_alignment(value, SIZE_UOFFSET)?;
                    let target = follow_uoffset(self.buf, value)?;
                    self.verify_schema_table(schema, schema.table(member)?, target)?;
                }
                Ok(())
            }
            ty if ty.is_scalar() => Ok(()),
            ty => {
                let target = follow_uoffset(self.buf, position)?;
                self.verify_value(schema, ty, target)
            }
        }
    }

    /// Verify the object an offset of type `ty` points at
    fn verify_value(
        &mut self,
        schema: &Schema,
        ty: &FieldType,
        target: usize,
    ) -> Result<(), SchemaError> {
        match ty {
            FieldType::String => {
                self.verify_string(target)?;
            }
            FieldType::Table(name) => {
                self.verify_schema_table(schema, schema.table(name)?, target)?;
            }
            FieldType::Vector(elem) => {
                self.enter()?;
                let size = elem.inline_size();
                let len = self.verify_vector(target, size, size)?;
                if !elem.is_scalar() {
                    for index in 0..len {
                        let element = target + SIZE_UOFFSET + index * size;
                        let child = follow_uoffset(self.buf, element)?;
                        self.verify_value(schema, elem, child)?;
                    }
                }
                self.leave();
            }
            FieldType::Union(_) => {
                return Err(SchemaError::InvalidType {
                    field: ty.to_string(),
                    reason: "unions cannot be vector elements",
                })
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Builder;

    fn simple_buffer() -> Vec<u8> {
        let mut builder = Builder::new();
        let name = builder.create_string("node").unwrap();
        builder.start_table(3).unwrap();
        builder.add_field(0, 42u32, 0).unwrap();
        builder.add_offset_field(1, name).unwrap();
        builder.add_field(2, 7u64, 0).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish(root).unwrap();
        builder.into_finished().unwrap()
    }

    fn chain(depth: usize) -> Vec<u8> {
        let mut builder = Builder::new();
        builder.start_table(1).unwrap();
        let mut child = builder.end_table().unwrap();
        for _ in 1..depth {
            builder.start_table(1).unwrap();
            builder.add_offset_field(0, child).unwrap();
            child = builder.end_table().unwrap();
        }
        builder.finish(child).unwrap();
        builder.into_finished().unwrap()
    }

    const NODE_SCHEMA: &str = r#"{
        "root_table": "Node",
        "tables": [ { "name": "Node", "fields": [
            { "name": "next", "id": 0, "type": { "table": "Node" } }
        ] } ]
    }"#;

    #[test]
    fn test_valid_root() {
        let data = simple_buffer();
        let mut verifier = Verifier::new(&data, &VerifierConfig::default());
        let table = verifier.verify_root().unwrap();
        assert_eq!(table.get_or::<u32>(0, 0).unwrap(), 42);
        assert_eq!(verifier.tables_visited(), 1);
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let data = simple_buffer();
        for len in [0, 3, 8, 16] {
            let mut verifier = Verifier::new(&data[..len], &VerifierConfig::default());
            assert!(verifier.verify_root().is_err(), "length {} accepted", len);
        }
    }

    #[test]
    fn test_apparent_size_limit() {
        let data = simple_buffer();
        let config = VerifierConfig {
            max_apparent_size: 8,
            ..VerifierConfig::default()
        };
        assert!(matches!(
            Verifier::new(&data, &config).verify_root(),
            Err(ReadError::BufferTooLarge { max: 8, .. })
        ));
    }

    #[test]
    fn test_slot_inside_header_rejected() {
        let mut data = simple_buffer();
        let vtable = Verifier::new(&data, &VerifierConfig::default())
            .verify_root()
            .unwrap()
            .vtable()
            .location();
        // Slot 0 pointing into the vtable offset itself
        data[vtable + 4..vtable + 6].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(
            Verifier::new(&data, &VerifierConfig::default()).verify_root(),
            Err(ReadError::FieldOutsideObject { field_id: 0, .. })
        ));
    }

    #[test]
    fn test_misaligned_root_detected() {
        let mut data = simple_buffer();
        let root = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        data[..4].copy_from_slice(&(root + 1).to_le_bytes());
        let strict = Verifier::new(&data, &VerifierConfig::default()).verify_root();
        assert!(matches!(
            strict,
            Err(ReadError::Misaligned { alignment: 4, .. })
        ));
    }

    #[test]
    fn test_depth_limit() {
        let schema = Schema::from_json(NODE_SCHEMA).unwrap();
        let data = chain(10);

        let mut verifier = Verifier::new(&data, &VerifierConfig::default());
        verifier.verify_with_schema(&schema).unwrap();
        assert_eq!(verifier.tables_visited(), 10);

        let config = VerifierConfig {
            max_depth: 5,
            ..VerifierConfig::default()
        };
        assert!(matches!(
            Verifier::new(&data, &config).verify_with_schema(&schema),
            Err(SchemaError::Read(ReadError::DepthLimitExceeded { max: 5 }))
        ));
    }

    #[test]
    fn test_table_count_limit() {
        let schema = Schema::from_json(NODE_SCHEMA).unwrap();
        let data = chain(4);
        let config = VerifierConfig {
            max_tables: 3,
            ..VerifierConfig::default()
        };
        assert!(matches!(
            Verifier::new(&data, &config).verify_with_schema(&schema),
            Err(SchemaError::Read(ReadError::TooManyTables { max: 3 }))
        ));
    }

    #[test]
    fn test_required_field_missing() {
        let schema = Schema::from_json(
            r#"{ "root_table": "T", "tables": [ { "name": "T", "fields": [
                { "name": "label", "id": 0, "type": "string", "required": true }
            ] } ] }"#,
        )
        .unwrap();

        let mut builder = Builder::new();
        builder.start_table(1).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish(root).unwrap();
        let data = builder.into_finished().unwrap();

        let err = Verifier::new(&data, &VerifierConfig::default())
            .verify_with_schema(&schema)
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Read(ReadError::MissingRequiredField { ref field, .. }) if field == "label"
        ));
    }

    #[test]
    fn test_invalid_utf8_in_nested_string() {
        let schema = Schema::from_json(
            r#"{ "root_table": "T", "tables": [ { "name": "T", "fields": [
                { "name": "names", "id": 0, "type": { "vector": "string" } }
            ] } ] }"#,
        )
        .unwrap();

        let mut builder = Builder::new();
        let good = builder.create_string("ok").unwrap();
        let bad = builder.create_byte_string(&[0xc3, 0x28]).unwrap();
        let names = builder.create_vector_of_offsets(&[good, bad]).unwrap();
        builder.start_table(1).unwrap();
        builder.add_offset_field(0, names).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish(root).unwrap();
        let data = builder.into_finished().unwrap();

        // The schema-less check only looks at the root table
        assert!(Verifier::new(&data, &VerifierConfig::default())
            .verify_root()
            .is_ok());
        assert!(matches!(
            Verifier::new(&data, &VerifierConfig::default()).verify_with_schema(&schema),
            Err(SchemaError::Read(ReadError::InvalidUtf8 { .. }))
        ));
    }

    #[test]
    fn test_size_prefixed() {
        let mut builder = Builder::new();
        builder.start_table(1).unwrap();
        builder.add_field(0, 5u16, 0).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish_size_prefixed(root, None).unwrap();
        let data = builder.into_finished().unwrap();

        let mut verifier = Verifier::new(&data, &VerifierConfig::default()).with_size_prefix();
        assert_eq!(verifier.verify_root().unwrap().get_or::<u16>(0, 0).unwrap(), 5);

        let mut wrong = data.clone();
        wrong.push(0);
        assert!(matches!(
            Verifier::new(&wrong, &VerifierConfig::default())
                .with_size_prefix()
                .verify_root(),
            Err(ReadError::SizePrefixMismatch { .. })
        ));
    }

    #[test]
    fn test_vector_overflow_rejected() {
        let buf = [0xffu8, 0xff, 0xff, 0x7f, 0, 0, 0, 0];
        let verifier = Verifier::new(&buf, &VerifierConfig::default());
        assert!(matches!(
            verifier.verify_vector(0, 8, 8),
            Err(ReadError::OutOfBounds { .. })
        ));
        let empty = [0u8; 4];
        let verifier = Verifier::new(&empty, &VerifierConfig::default());
        assert_eq!(verifier.verify_vector(0, 8, 8).unwrap(), 0);
    }
}
