// SPDX-License-Identifier: MIT
//! # zerobuf
//!
//! A zero-copy binary serialization codec. A [`Builder`] lays out tables,
//! vectors and strings into one contiguous little-endian buffer; readers
//! resolve individual fields straight from that buffer with offset
//! arithmetic, without a parse or allocation pass.
//!
//! ## Wire Format
//!
//! ```text
//! Root    : u32 offset to the root table [+ optional 4-byte file identifier]
//! VTable  : u16 vtable size | u16 inline object size | N x u16 field offset (0 = absent)
//! Table   : i32 offset to its vtable (vtable = table - value) | inline fields
//! Struct  : fixed positional fields, no header
//! Vector  : u32 element count | elements
//! String  : u32 byte length | bytes | 0x00
//! ```
//!
//! Every scalar sits at a position that is a multiple of its own size.
//! Structurally identical vtables are written once per buffer.
//!
//! ## Schema Evolution
//!
//! Field presence is decided only by the vtable slot. A reader asking for
//! an id the writer never knew about gets the default; a reader that does
//! not know about newer ids simply never asks for them. No negotiation is
//! needed in either direction.
//!
//! ## Usage
//!
//! ```rust
//! use zerobuf::{root_as_table, Builder, ForwardsUOffset};
//!
//! let mut builder = Builder::new();
//! let tags = builder.create_vector_of_strings(&["spiral", "barred"]).unwrap();
//! let name = builder.create_string("Milky Way").unwrap();
//!
//! builder.start_table(3).unwrap();
//! builder.add_field(0, 100_000_000_000u64, 0).unwrap();
//! builder.add_offset_field(1, name).unwrap();
//! builder.add_offset_field(2, tags).unwrap();
//! let galaxy = builder.end_table().unwrap();
//! builder.finish(galaxy).unwrap();
//!
//! let data = builder.into_finished().unwrap();
//! let galaxy = root_as_table(&data).unwrap();
//! assert_eq!(galaxy.get_or::<u64>(0, 0).unwrap(), 100_000_000_000);
//! assert_eq!(galaxy.get_str(1).unwrap(), Some("Milky Way"));
//!
//! let tags = galaxy.get_vector::<ForwardsUOffset<&str>>(2).unwrap().unwrap();
//! assert_eq!(tags.get(1).unwrap(), "barred");
//! ```
//!
//! Untrusted input can be checked as a whole with [`Verifier`] first, or
//! read by field name through a JSON-defined [`Schema`].

pub mod buffer;
pub mod builder;
pub mod config;
pub mod error;
pub mod follow;
pub mod format;
pub mod schema;
pub mod table;
pub mod vector;
pub mod verifier;
pub mod vtable;

// Re-export main types
pub use builder::{
    Builder, Offset, StringKind, StringOffset, TableKind, TableOffset, VectorKind, VectorOffset,
};
pub use config::{BuilderConfig, VerifierConfig};
pub use error::{ReadError, SchemaError, WriteError};
pub use follow::{Fixed, Follow, ForwardsUOffset, Inline};
pub use format::{Scalar, Struct, FILE_IDENTIFIER_LENGTH};
pub use schema::{FieldDef, FieldType, Schema, SchemaDef, SchemaTable, SchemaVector, TableDef, Value};
pub use table::{
    buffer_has_identifier, root_as_table, root_with_identifier, size_prefixed_root_as_table, Table,
};
pub use vector::{Vector, VectorIter};
pub use verifier::Verifier;
pub use vtable::{VTable, VTableRegistry};

/// Result of reading from a finished buffer
pub type Result<T, E = ReadError> = std::result::Result<T, E>;
