// SPDX-License-Identifier: MIT
//! Error types for building, reading and schema handling

use thiserror::Error;

/// Builder misuse, raised synchronously at the offending call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("No table is under construction")]
    NoOpenTable,

    #[error("No vector is under construction")]
    NoOpenVector,

    #[error("Cannot {operation} while a vector is under construction")]
    VectorInProgress { operation: &'static str },

    #[error("Field id {id} out of range for a table declared with {field_count} fields")]
    FieldOutOfRange { id: u16, field_count: u16 },

    #[error("Table declares {requested} fields, at most {max} are supported")]
    TooManyFields { requested: u16, max: u16 },

    #[error("Vector declared with {declared} elements, {pushed} pushed, ended with {ended}")]
    VectorLengthMismatch {
        declared: usize,
        pushed: usize,
        ended: usize,
    },

    #[error("Vector element of {actual} bytes pushed into a vector of {expected}-byte elements")]
    ElementSizeMismatch { expected: usize, actual: usize },

    #[error("Cannot finish: {open} object(s) still under construction")]
    UnfinishedObjects { open: usize },

    #[error("Buffer already finished; call reset() before building again")]
    AlreadyFinished,

    #[error("Buffer has not been finished")]
    NotFinished,

    #[error("Object of {size} bytes exceeds the 16-bit vtable slot range")]
    ObjectTooLarge { size: usize },

    #[error("Buffer would grow to {requested} bytes, maximum is {max}")]
    BufferTooLarge { requested: usize, max: usize },

    #[error("Offset {offset} does not refer to an object in this buffer (written: {written})")]
    DanglingOffset { offset: u32, written: usize },

    #[error("Required field {id} is missing")]
    MissingRequiredField { id: u16 },

    #[error("Invalid alignment {0}: must be a power of two no larger than 16")]
    InvalidAlignment(usize),
}

/// Malformed buffer detected while following offsets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("Read of {size} bytes at {position} exceeds buffer of {buffer_len} bytes")]
    OutOfBounds {
        position: usize,
        size: usize,
        buffer_len: usize,
    },

    #[error("Buffer too short: need at least {needed} bytes, got {actual}")]
    BufferTooShort { needed: usize, actual: usize },

    #[error("Invalid vtable at {position}: {reason}")]
    InvalidVTable {
        position: usize,
        reason: &'static str,
    },

    #[error("Field {field_id} at {position} extends past its table's inline size {object_size}")]
    FieldOutsideObject {
        field_id: u16,
        position: usize,
        object_size: usize,
    },

    #[error("Value at {position} is not aligned to {alignment} bytes")]
    Misaligned { position: usize, alignment: usize },

    #[error("String at {position} is not valid UTF-8")]
    InvalidUtf8 { position: usize },

    #[error("String at {position} is missing its zero terminator")]
    MissingTerminator { position: usize },

    #[error("Vector index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Nesting depth exceeds limit of {max}")]
    DepthLimitExceeded { max: usize },

    #[error("Table count exceeds limit of {max}")]
    TooManyTables { max: usize },

    #[error("Buffer of {size} bytes exceeds the {max}-byte limit")]
    BufferTooLarge { size: usize, max: usize },

    #[error("Size prefix says {declared} bytes but {actual} follow")]
    SizePrefixMismatch { declared: usize, actual: usize },

    #[error("File identifier mismatch: expected {expected:?}, found {found:?}")]
    IdentifierMismatch { expected: [u8; 4], found: [u8; 4] },

    #[error("Required field '{field}' missing from table '{table}'")]
    MissingRequiredField { table: String, field: String },

    #[error("Union type tag {tag} has no member table")]
    UnknownUnionTag { tag: u8 },
}

/// Schema definition and schema-driven access failures
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to parse schema: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Table '{0}' is defined more than once")]
    DuplicateTable(String),

    #[error("Schema declares no root table")]
    NoRootTable,

    #[error("File identifier '{0}' must be exactly 4 bytes")]
    InvalidIdentifier(String),

    #[error("Invalid type for field '{field}': {reason}")]
    InvalidType { field: String, reason: &'static str },

    #[error("Unknown field '{field}' in table '{table}'")]
    UnknownField { table: String, field: String },

    #[error("Duplicate field {what} '{value}' in table '{table}'")]
    DuplicateField {
        table: String,
        what: &'static str,
        value: String,
    },

    #[error("Invalid default for field '{field}': {reason}")]
    InvalidDefault { field: String, reason: String },

    #[error("Type mismatch for field '{field}': declared {declared}, requested {requested}")]
    TypeMismatch {
        field: String,
        declared: String,
        requested: &'static str,
    },

    #[error(transparent)]
    Read(#[from] ReadError),
}
