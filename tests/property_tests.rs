// SPDX-License-Identifier: MIT
//! Property-based tests using proptest
//!
//! Random field sets and values are built, finished and read back to check
//! round trip, vtable deduplication and alignment for all inputs.

use proptest::prelude::*;

use zerobuf::{root_as_table, Builder, ForwardsUOffset, Table, Verifier, VerifierConfig};

/// One scalar field of any supported width
#[derive(Debug, Clone, Copy, PartialEq)]
enum FieldValue {
    Bool(bool),
    U8(u8),
    I16(i16),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl FieldValue {
    fn size(&self) -> usize {
        match self {
            FieldValue::Bool(_) | FieldValue::U8(_) => 1,
            FieldValue::I16(_) => 2,
            FieldValue::U32(_) | FieldValue::F32(_) => 4,
            FieldValue::I64(_) | FieldValue::F64(_) => 8,
        }
    }

    fn write(&self, builder: &mut Builder, id: u16) {
        let result = match *self {
            FieldValue::Bool(v) => builder.add_field_always(id, v),
            FieldValue::U8(v) => builder.add_field_always(id, v),
            FieldValue::I16(v) => builder.add_field_always(id, v),
            FieldValue::U32(v) => builder.add_field_always(id, v),
            FieldValue::I64(v) => builder.add_field_always(id, v),
            FieldValue::F32(v) => builder.add_field_always(id, v),
            FieldValue::F64(v) => builder.add_field_always(id, v),
        };
        result.unwrap();
    }

    fn read(&self, table: &Table<'_>, id: u16) -> Option<FieldValue> {
        match self {
            FieldValue::Bool(_) => table.get::<bool>(id).unwrap().map(FieldValue::Bool),
            FieldValue::U8(_) => table.get::<u8>(id).unwrap().map(FieldValue::U8),
            FieldValue::I16(_) => table.get::<i16>(id).unwrap().map(FieldValue::I16),
            FieldValue::U32(_) => table.get::<u32>(id).unwrap().map(FieldValue::U32),
            FieldValue::I64(_) => table.get::<i64>(id).unwrap().map(FieldValue::I64),
            FieldValue::F32(_) => table.get::<f32>(id).unwrap().map(FieldValue::F32),
            FieldValue::F64(_) => table.get::<f64>(id).unwrap().map(FieldValue::F64),
        }
    }

    /// Bit-level equality, so NaN payloads count too
    fn same_bits(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::F32(a), FieldValue::F32(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::F64(a), FieldValue::F64(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

/// Strategy for generating a field value of random type
fn field_value_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<bool>().prop_map(FieldValue::Bool),
        any::<u8>().prop_map(FieldValue::U8),
        any::<i16>().prop_map(FieldValue::I16),
        any::<u32>().prop_map(FieldValue::U32),
        any::<i64>().prop_map(FieldValue::I64),
        any::<f32>().prop_map(FieldValue::F32),
        any::<f64>().prop_map(FieldValue::F64),
    ]
}

/// Strategy for a table layout: each slot either absent or a value
fn table_strategy() -> impl Strategy<Value = Vec<Option<FieldValue>>> {
    prop::collection::vec(prop::option::of(field_value_strategy()), 0..24)
}

fn build_table(fields: &[Option<FieldValue>]) -> Vec<u8> {
    let mut builder = Builder::new();
    builder.start_table(fields.len() as u16).unwrap();
    for (id, field) in fields.iter().enumerate() {
        if let Some(value) = field {
            value.write(&mut builder, id as u16);
        }
    }
    let root = builder.end_table().unwrap();
    builder.finish(root).unwrap();
    builder.into_finished().unwrap()
}

proptest! {
    /// Present fields read back bit-identical, absent ones read as absent
    #[test]
    fn scalar_fields_round_trip(fields in table_strategy()) {
        let data = build_table(&fields);
        let table = root_as_table(&data).unwrap();

        for (id, field) in fields.iter().enumerate() {
            let id = id as u16;
            match field {
                Some(value) => {
                    let read = value.read(&table, id);
                    prop_assert!(read.is_some(), "field {} missing", id);
                    prop_assert!(value.same_bits(&read.unwrap()));
                }
                None => prop_assert!(!table.has_field(id)),
            }
        }
        // Ids beyond the declared count are absent, never a fault
        prop_assert_eq!(table.get_or::<u32>(fields.len() as u16 + 3, 9).unwrap(), 9);
    }

    /// Every scalar sits at a multiple of its own size
    #[test]
    fn scalar_fields_are_aligned(
        prefix in "[a-z]{0,7}",
        fields in table_strategy(),
    ) {
        let mut builder = Builder::new();
        // An odd-sized string first shifts everything written after it
        let label = builder.create_string(&prefix).unwrap();
        builder.start_table(fields.len() as u16 + 1).unwrap();
        for (id, field) in fields.iter().enumerate() {
            if let Some(value) = field {
                value.write(&mut builder, id as u16);
            }
        }
        builder.add_offset_field(fields.len() as u16, label).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish(root).unwrap();
        let data = builder.into_finished().unwrap();

        let table = root_as_table(&data).unwrap();
        prop_assert_eq!(table.location() % 4, 0);
        prop_assert_eq!(table.vtable().location() % 2, 0);
        for (id, field) in fields.iter().enumerate() {
            if let Some(value) = field {
                let position = table.field_position(id as u16).unwrap().unwrap();
                prop_assert_eq!(position % value.size(), 0, "field {} at {}", id, position);
            }
        }
        prop_assert_eq!(table.get_str(fields.len() as u16).unwrap(), Some(prefix.as_str()));

        let mut verifier = Verifier::new(&data, &VerifierConfig::default());
        prop_assert!(verifier.verify_root().is_ok());
    }

    /// Identical field sets added in id order share one vtable wherever each
    /// table starts; a different presence pattern gets its own
    #[test]
    fn vtables_deduplicated(
        pattern in prop::collection::vec(prop::option::of(field_value_strategy()), 1..12),
        labels in prop::collection::vec("[a-z]{0,9}", 1..20),
    ) {
        let mut builder = Builder::new();
        for label in &labels {
            // Odd-sized strings shift where each table starts
            builder.create_string(label).unwrap();
            builder.start_table(pattern.len() as u16).unwrap();
            for (id, field) in pattern.iter().enumerate() {
                if let Some(value) = field {
                    value.write(&mut builder, id as u16);
                }
            }
            builder.end_table().unwrap();
        }
        prop_assert_eq!(builder.vtable_count(), 1);
        prop_assert_eq!(builder.vtable_dedup_hits(), labels.len() - 1);

        let mut flipped = pattern.clone();
        flipped[0] = match flipped[0] {
            Some(_) => None,
            None => Some(FieldValue::U32(1)),
        };
        builder.start_table(flipped.len() as u16).unwrap();
        for (id, field) in flipped.iter().enumerate() {
            if let Some(value) = field {
                value.write(&mut builder, id as u16);
            }
        }
        builder.end_table().unwrap();
        prop_assert_eq!(builder.vtable_count(), 2);
    }

    /// Vectors keep logical order whatever their element count
    #[test]
    fn vectors_round_trip(
        numbers in prop::collection::vec(any::<i64>(), 0..64),
        words in prop::collection::vec("[ -~]{0,16}", 0..16),
    ) {
        let mut builder = Builder::new();
        let number_vec = builder.create_vector(&numbers).unwrap();
        let word_refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let word_vec = builder.create_vector_of_strings(&word_refs).unwrap();
        builder.start_table(2).unwrap();
        builder.add_offset_field(0, number_vec).unwrap();
        builder.add_offset_field(1, word_vec).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish(root).unwrap();
        let data = builder.into_finished().unwrap();

        let table = root_as_table(&data).unwrap();
        let read_numbers = table.get_vector::<i64>(0).unwrap().unwrap();
        prop_assert_eq!((read_numbers.location() + 4) % 8, 0);
        let read_numbers: Vec<i64> = read_numbers.iter().collect::<Result<_, _>>().unwrap();
        prop_assert_eq!(read_numbers, numbers);

        let read_words: Vec<&str> = table
            .get_vector::<ForwardsUOffset<&str>>(1)
            .unwrap()
            .unwrap()
            .iter()
            .collect::<Result<_, _>>()
            .unwrap();
        prop_assert_eq!(read_words, word_refs);
    }

    /// Arbitrary bytes never panic a reader or the verifier
    #[test]
    fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Verifier::new(&bytes, &VerifierConfig::default()).verify_root();
        if let Ok(table) = root_as_table(&bytes) {
            for id in 0..8u16 {
                let _ = table.get::<u64>(id);
                let _ = table.get_str(id);
                let _ = table.get_table(id);
                if let Ok(Some(vector)) = table.get_vector::<ForwardsUOffset<&str>>(id) {
                    for item in vector.iter() {
                        let _ = item;
                    }
                }
            }
        }
    }
}
