// SPDX-License-Identifier: MIT
//! Schema-driven generic accessor
//!
//! A [`Schema`] maps field names to an id, a declared type and a default so
//! that buffers can be read by name without per-table generated code. It is
//! loaded from JSON:
//!
//! ```json
//! {
//!   "root_table": "Galaxy",
//!   "tables": [
//!     { "name": "Galaxy", "fields": [
//!       { "name": "num_stars", "id": 0, "type": "ulong", "default": 0 },
//!       { "name": "name", "id": 1, "type": "string", "required": true },
//!       { "name": "arms", "id": 2, "type": { "vector": { "table": "Arm" } } }
//!     ] },
//!     { "name": "Arm", "fields": [ { "name": "length", "id": 0, "type": "float" } ] }
//!   ]
//! }
//! ```
//!
//! A union field `{ "union": ["A", "B"] }` with id `n` stores its `u8` type
//! tag at id `n` (0 meaning none, 1 the first member) and the member table
//! at id `n + 1`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::VerifierConfig;
use crate::error::{ReadError, SchemaError};
use crate::follow::{Follow, ForwardsUOffset};
use crate::format::{
    follow_uoffset, read_scalar, slice_at, UOffset, FILE_IDENTIFIER_LENGTH, MAX_TABLE_FIELDS,
    SIZE_UOFFSET,
};
use crate::table::{root_as_table, root_with_identifier, Table};
use crate::verifier::Verifier;

/// Declared type of a field or vector element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    String,
    Table(String),
    Vector(Box<FieldType>),
    Union(Vec<String>),
}

impl FieldType {
    /// Bytes occupied inline in a table slot or vector element.
    ///
    /// For a union this is its type tag.
    pub fn inline_size(&self) -> usize {
        match self {
            FieldType::Bool | FieldType::Byte | FieldType::UByte | FieldType::Union(_) => 1,
            FieldType::Short | FieldType::UShort => 2,
            FieldType::Int | FieldType::UInt | FieldType::Float => 4,
            FieldType::Long | FieldType::ULong | FieldType::Double => 8,
            FieldType::String | FieldType::Table(_) | FieldType::Vector(_) => SIZE_UOFFSET,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Table(_) | FieldType::Vector(_) | FieldType::Union(_)
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Bool => f.write_str("bool"),
            FieldType::Byte => f.write_str("byte"),
            FieldType::UByte => f.write_str("ubyte"),
            FieldType::Short => f.write_str("short"),
            FieldType::UShort => f.write_str("ushort"),
            FieldType::Int => f.write_str("int"),
            FieldType::UInt => f.write_str("uint"),
            FieldType::Long => f.write_str("long"),
            FieldType::ULong => f.write_str("ulong"),
            FieldType::Float => f.write_str("float"),
            FieldType::Double => f.write_str("double"),
            FieldType::String => f.write_str("string"),
            FieldType::Table(name) => write!(f, "table({})", name),
            FieldType::Vector(elem) => write!(f, "vector({})", elem),
            FieldType::Union(members) => write!(f, "union({})", members.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub id: u16,
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// JSON literal used when the field is absent; scalars only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub required: bool,
}

impl FieldDef {
    /// Value an absent field decodes to
    pub fn default_value(&self) -> Result<Value<'static>, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidDefault {
            field: self.name.clone(),
            reason: reason.to_string(),
        };
        let default = self.default.as_ref();

        let signed = |min: i64, max: i64| -> Result<Value<'static>, SchemaError> {
            let value = match default {
                None => 0,
                Some(json) => json
                    .as_i64()
                    .ok_or_else(|| invalid("expected an integer"))?,
            };
            if value < min || value > max {
                return Err(invalid("out of range"));
            }
            Ok(Value::Int(value))
        };
        let unsigned = |max: u64| -> Result<Value<'static>, SchemaError> {
            let value = match default {
                None => 0,
                Some(json) => json
                    .as_u64()
                    .ok_or_else(|| invalid("expected an unsigned integer"))?,
            };
            if value > max {
                return Err(invalid("out of range"));
            }
            Ok(Value::UInt(value))
        };

        match &self.ty {
            FieldType::Bool => match default {
                None => Ok(Value::Bool(false)),
                Some(json) => json
                    .as_bool()
                    .map(Value::Bool)
                    .ok_or_else(|| invalid("expected a boolean")),
            },
            FieldType::Byte => signed(i8::MIN.into(), i8::MAX.into()),
            FieldType::Short => signed(i16::MIN.into(), i16::MAX.into()),
            FieldType::Int => signed(i32::MIN.into(), i32::MAX.into()),
            FieldType::Long => signed(i64::MIN, i64::MAX),
            FieldType::UByte => unsigned(u8::MAX.into()),
            FieldType::UShort => unsigned(u16::MAX.into()),
            FieldType::UInt => unsigned(u32::MAX.into()),
            FieldType::ULong => unsigned(u64::MAX),
            FieldType::Float | FieldType::Double => match default {
                None => Ok(Value::Float(0.0)),
                Some(json) => json
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| invalid("expected a number")),
            },
            _ => match default {
                None => Ok(Value::Absent),
                Some(_) => Err(invalid("only scalar fields take a default")),
            },
        }
    }

    /// Ids this field occupies: one, or two for a union
    fn claimed_ids(&self) -> Option<(u16, Option<u16>)> {
        match self.ty {
            FieldType::Union(_) => self.id.checked_add(1).map(|value| (self.id, Some(value))),
            _ => Some((self.id, None)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl TableDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Field slots to declare with `Builder::start_table`
    pub fn field_count(&self) -> u16 {
        self.fields
            .iter()
            .filter_map(FieldDef::claimed_ids)
            .map(|(id, value)| value.unwrap_or(id).saturating_add(1))
            .max()
            .unwrap_or(0)
    }
}

/// Serialized form of a [`Schema`], before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub tables: Vec<TableDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_identifier: Option<String>,
}

/// Validated schema: every table reference resolves, ids and names are unique
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SchemaDef", into = "SchemaDef")]
pub struct Schema {
    def: SchemaDef,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn new(def: SchemaDef) -> Result<Self, SchemaError> {
        let mut by_name = HashMap::with_capacity(def.tables.len());
        for (index, table) in def.tables.iter().enumerate() {
            if by_name.insert(table.name.clone(), index).is_some() {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
        }

        for table in &def.tables {
            validate_table(table, &by_name)?;
        }

        if let Some(root) = &def.root_table {
            if !by_name.contains_key(root) {
                return Err(SchemaError::UnknownTable(root.clone()));
            }
        }

        if let Some(identifier) = &def.file_identifier {
            if identifier.len() != FILE_IDENTIFIER_LENGTH {
                return Err(SchemaError::InvalidIdentifier(identifier.clone()));
            }
        }

        debug!(
            tables = def.tables.len(),
            root = ?def.root_table,
            "schema loaded"
        );
        Ok(Self { def, by_name })
    }

    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let def: SchemaDef = serde_json::from_str(json)?;
        Self::new(def)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(&self.def)?)
    }

    pub fn def(&self) -> &SchemaDef {
        &self.def
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.def.tables
    }

    pub fn table(&self, name: &str) -> Result<&TableDef, SchemaError> {
        self.by_name
            .get(name)
            .map(|&index| &self.def.tables[index])
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    pub fn root_table(&self) -> Result<&TableDef, SchemaError> {
        let name = self
            .def
            .root_table
            .as_deref()
            .ok_or(SchemaError::NoRootTable)?;
        self.table(name)
    }

    pub fn file_identifier(&self) -> Option<[u8; FILE_IDENTIFIER_LENGTH]> {
        self.def
            .file_identifier
            .as_ref()
            .and_then(|identifier| identifier.as_bytes().try_into().ok())
    }

    /// Root table of `buf`, checked lazily as fields are read
    pub fn root<'a>(&'a self, buf: &'a [u8]) -> Result<SchemaTable<'a>, SchemaError> {
        let def = self.root_table()?;
        let table = match self.file_identifier() {
            Some(identifier) => root_with_identifier(buf, &identifier)?,
            None => root_as_table(buf)?,
        };
        Ok(SchemaTable::new(self, def, table))
    }

    /// Root table of `buf` after verifying every reachable field
    pub fn verified_root<'a>(
        &'a self,
        buf: &'a [u8],
        config: &VerifierConfig,
    ) -> Result<SchemaTable<'a>, SchemaError> {
        let table = Verifier::new(buf, config).verify_with_schema(self)?;
        Ok(SchemaTable::new(self, self.root_table()?, table))
    }
}

impl TryFrom<SchemaDef> for Schema {
    type Error = SchemaError;

    fn try_from(def: SchemaDef) -> Result<Self, Self::Error> {
        Schema::new(def)
    }
}

impl From<Schema> for SchemaDef {
    fn from(schema: Schema) -> Self {
        schema.def
    }
}

fn validate_table(table: &TableDef, known: &HashMap<String, usize>) -> Result<(), SchemaError> {
    let mut names = HashSet::new();
    let mut ids = HashSet::new();

    for field in &table.fields {
        if !names.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                table: table.name.clone(),
                what: "name",
                value: field.name.clone(),
            });
        }

        let (id, value_id) = field.claimed_ids().ok_or_else(|| SchemaError::InvalidType {
            field: field.name.clone(),
            reason: "union value id overflows",
        })?;
        for claimed in std::iter::once(id).chain(value_id) {
            if claimed >= MAX_TABLE_FIELDS {
                return Err(SchemaError::InvalidType {
                    field: field.name.clone(),
                    reason: "field id exceeds the table field limit",
                });
            }
            if !ids.insert(claimed) {
                return Err(SchemaError::DuplicateField {
                    table: table.name.clone(),
                    what: "id",
                    value: claimed.to_string(),
                });
            }
        }

        check_type(&field.ty, &field.name, known, false)?;
        field.default_value()?;
    }
    Ok(())
}

fn check_type(
    ty: &FieldType,
    field: &str,
    known: &HashMap<String, usize>,
    in_vector: bool,
) -> Result<(), SchemaError> {
    match ty {
        FieldType::Table(name) if !known.contains_key(name) => {
            Err(SchemaError::UnknownTable(name.clone()))
        }
        FieldType::Vector(elem) => check_type(elem, field, known, true),
        FieldType::Union(_) if in_vector => Err(SchemaError::InvalidType {
            field: field.to_string(),
            reason: "unions cannot be vector elements",
        }),
        FieldType::Union(members) => {
            if members.is_empty() {
                return Err(SchemaError::InvalidType {
                    field: field.to_string(),
                    reason: "union has no member tables",
                });
            }
            if members.len() > u8::MAX as usize {
                return Err(SchemaError::InvalidType {
                    field: field.to_string(),
                    reason: "union has more than 255 members",
                });
            }
            match members.iter().find(|member| !known.contains_key(*member)) {
                Some(member) => Err(SchemaError::UnknownTable(member.clone())),
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

/// Dynamically typed field value
#[derive(Debug, Clone, Copy)]
pub enum Value<'a> {
    /// Non-scalar field the writer never emitted
    Absent,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(&'a str),
    Table(SchemaTable<'a>),
    Vector(SchemaVector<'a>),
}

impl<'a> Value<'a> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(value) => Some(value),
            Value::UInt(value) => i64::try_from(value).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt(value) => Some(value),
            Value::Int(value) => u64::try_from(value).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<SchemaTable<'a>> {
        match *self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<SchemaVector<'a>> {
        match *self {
            Value::Vector(vector) => Some(vector),
            _ => None,
        }
    }
}

/// Table view that resolves fields by name
#[derive(Clone, Copy)]
pub struct SchemaTable<'a> {
    schema: &'a Schema,
    def: &'a TableDef,
    table: Table<'a>,
}

impl<'a> SchemaTable<'a> {
    pub fn new(schema: &'a Schema, def: &'a TableDef, table: Table<'a>) -> Self {
        Self { schema, def, table }
    }

    pub fn name(&self) -> &'a str {
        &self.def.name
    }

    pub fn def(&self) -> &'a TableDef {
        self.def
    }

    /// Underlying positioned view
    pub fn table(&self) -> Table<'a> {
        self.table
    }

    /// Read `name`; absent scalars decode to their declared default
    pub fn field(&self, name: &str) -> Result<Value<'a>, SchemaError> {
        let field = self.lookup(name)?;
        if let FieldType::Union(members) = &field.ty {
            return Ok(self
                .union_member(field, members)?
                .map_or(Value::Absent, Value::Table));
        }
        match self.table.inline_field(field.id, field.ty.inline_size())? {
            Some(position) => decode(self.schema, self.table.buf(), &field.ty, position),
            None => field.default_value(),
        }
    }

    /// Whether the writer emitted `name`
    pub fn has(&self, name: &str) -> Result<bool, SchemaError> {
        Ok(self.table.has_field(self.lookup(name)?.id))
    }

    pub fn get_str(&self, name: &str) -> Result<Option<&'a str>, SchemaError> {
        let field = self.lookup(name)?;
        match field.ty {
            FieldType::String => Ok(self.table.get_str(field.id)?),
            _ => Err(mismatch(field, "string")),
        }
    }

    /// Nested table, or the member table of a union field
    pub fn get_table(&self, name: &str) -> Result<Option<SchemaTable<'a>>, SchemaError> {
        let field = self.lookup(name)?;
        match &field.ty {
            FieldType::Table(table_name) => match self.table.get_table(field.id)? {
                Some(table) => Ok(Some(SchemaTable::new(
                    self.schema,
                    self.schema.table(table_name)?,
                    table,
                ))),
                None => Ok(None),
            },
            FieldType::Union(members) => self.union_member(field, members),
            _ => Err(mismatch(field, "table")),
        }
    }

    pub fn get_vector(&self, name: &str) -> Result<Option<SchemaVector<'a>>, SchemaError> {
        let field = self.lookup(name)?;
        let elem = match &field.ty {
            FieldType::Vector(elem) => elem,
            _ => return Err(mismatch(field, "vector")),
        };
        match self.table.inline_field(field.id, SIZE_UOFFSET)? {
            Some(position) => {
                let buf = self.table.buf();
                let target = follow_uoffset(buf, position)?;
                Ok(Some(SchemaVector::init(self.schema, elem, buf, target)?))
            }
            None => Ok(None),
        }
    }

    /// Member table name selected by a union field's type tag
    pub fn union_type(&self, name: &str) -> Result<Option<&'a str>, SchemaError> {
        let field = self.lookup(name)?;
        let members = match &field.ty {
            FieldType::Union(members) => members,
            _ => return Err(mismatch(field, "union")),
        };
        match self.union_tag(field)? {
            0 => Ok(None),
            tag => members
                .get(tag as usize - 1)
                .map(|member| Some(member.as_str()))
                .ok_or(SchemaError::Read(ReadError::UnknownUnionTag { tag })),
        }
    }

    fn lookup(&self, name: &str) -> Result<&'a FieldDef, SchemaError> {
        self.def
            .field(name)
            .ok_or_else(|| SchemaError::UnknownField {
                table: self.def.name.clone(),
                field: name.to_string(),
            })
    }

    fn union_tag(&self, field: &FieldDef) -> Result<u8, ReadError> {
        match self.table.inline_field(field.id, 1)? {
            Some(position) => read_scalar::<u8>(self.table.buf(), position),
            None => Ok(0),
        }
    }

    fn union_member(
        &self,
        field: &FieldDef,
        members: &'a [String],
    ) -> Result<Option<SchemaTable<'a>>, SchemaError> {
        let tag = self.union_tag(field)?;
        if tag == 0 {
            return Ok(None);
        }
        let member = members
            .get(tag as usize - 1)
            .ok_or(ReadError::UnknownUnionTag { tag })?;
        let position = match self.table.inline_field(field.id + 1, SIZE_UOFFSET)? {
            Some(position) => position,
            None => return Ok(None),
        };
        let table = <ForwardsUOffset<Table<'a>>>::follow(self.table.buf(), position)?;
        Ok(Some(SchemaTable::new(
            self.schema,
            self.schema.table(member)?,
            table,
        )))
    }
}

impl<'a> fmt::Debug for SchemaTable<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaTable")
            .field("name", &self.def.name)
            .field("loc", &self.table.location())
            .finish()
    }
}

/// Vector view whose elements decode by declared type
#[derive(Clone, Copy)]
pub struct SchemaVector<'a> {
    schema: &'a Schema,
    elem: &'a FieldType,
    buf: &'a [u8],
    loc: usize,
    len: usize,
}

impl<'a> SchemaVector<'a> {
    fn init(
        schema: &'a Schema,
        elem: &'a FieldType,
        buf: &'a [u8],
        loc: usize,
    ) -> Result<Self, ReadError> {
        let len = read_scalar::<UOffset>(buf, loc)? as usize;
        let start = loc + SIZE_UOFFSET;
        let block = len
            .checked_mul(elem.inline_size())
            .ok_or(ReadError::OutOfBounds {
                position: start,
                size: usize::MAX,
                buffer_len: buf.len(),
            })?;
        slice_at(buf, start, block)?;
        Ok(Self {
            schema,
            elem,
            buf,
            loc,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn element_type(&self) -> &'a FieldType {
        self.elem
    }

    pub fn get(&self, index: usize) -> Result<Value<'a>, SchemaError> {
        if index >= self.len {
            return Err(ReadError::IndexOutOfRange {
                index,
                len: self.len,
            }
            .into());
        }
        let position = self.loc + SIZE_UOFFSET + index * self.elem.inline_size();
        decode(self.schema, self.buf, self.elem, position)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Value<'a>, SchemaError>> + 'a {
        let vector = *self;
        (0..vector.len).map(move |index| vector.get(index))
    }
}

impl<'a> fmt::Debug for SchemaVector<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaVector")
            .field("element", &self.elem.to_string())
            .field("loc", &self.loc)
            .field("len", &self.len)
            .finish()
    }
}

/// Decode a value of type `ty` stored inline at `position`
fn decode<'a>(
    schema: &'a Schema,
    buf: &'a [u8],
    ty: &'a FieldType,
    position: usize,
) -> Result<Value<'a>, SchemaError> {
    let value = match ty {
        FieldType::Bool => Value::Bool(read_scalar::<bool>(buf, position)?),
        FieldType::Byte => Value::Int(read_scalar::<i8>(buf, position)?.into()),
        FieldType::UByte => Value::UInt(read_scalar::<u8>(buf, position)?.into()),
        FieldType::Short => Value::Int(read_scalar::<i16>(buf, position)?.into()),
        FieldType::UShort => Value::UInt(read_scalar::<u16>(buf, position)?.into()),
        FieldType::Int => Value::Int(read_scalar::<i32>(buf, position)?.into()),
        FieldType::UInt => Value::UInt(read_scalar::<u32>(buf, position)?.into()),
        FieldType::Long => Value::Int(read_scalar::<i64>(buf, position)?),
        FieldType::ULong => Value::UInt(read_scalar::<u64>(buf, position)?),
        FieldType::Float => Value::Float(read_scalar::<f32>(buf, position)?.into()),
        FieldType::Double => Value::Float(read_scalar::<f64>(buf, position)?),
        FieldType::String => Value::Str(<ForwardsUOffset<&'a str>>::follow(buf, position)?),
        FieldType::Table(name) => {
            let table = <ForwardsUOffset<Table<'a>>>::follow(buf, position)?;
            Value::Table(SchemaTable::new(schema, schema.table(name)?, table))
        }
        FieldType::Vector(elem) => {
            let target = follow_uoffset(buf, position)?;
            Value::Vector(SchemaVector::init(schema, elem, buf, target)?)
        }
        FieldType::Union(_) => {
            return Err(SchemaError::InvalidType {
                field: ty.to_string(),
                reason: "union values resolve through their owning table",
            })
        }
    };
    Ok(value)
}

fn mismatch(field: &FieldDef, requested: &'static str) -> SchemaError {
    SchemaError::TypeMismatch {
        field: field.name.clone(),
        declared: field.ty.to_string(),
        requested,
    }
}
