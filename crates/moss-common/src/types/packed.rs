//! Packed composite keys.
//!
//! A key schema is an ordered list of column types; a [`PackedKey`] is one
//! row of typed column values ([`Datum`]s) under that schema. The value
//! vector *is* the key's representation: comparison walks the columns with
//! their declared semantics, and the fixed-width byte encoding the key
//! stands for is never materialized — only its width survives, as the
//! per-entry cost in the node-budget calculation. Width depends only on the
//! schema; string columns count as fixed-width by-reference slots.
//!
//! A distinguished *null* key (an empty column vector) acts as the
//! plus-infinity sentinel: it compares greater than every real key.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::constants::KEY_ALIGN;
use crate::error::{MossError, MossResult};
use crate::types::{Date, DateTime, HashedInt, Rid};

/// Column types a key schema may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// UTF-8 string, compared lexicographically.
    String,
    /// Day count, compared as its `i32` backing.
    Date,
    /// Second count, compared as its `i64` backing.
    DateTime,
    /// Precomputed rolling hash, compared as its `i64` backing.
    HashedInt,
}

impl ColumnType {
    /// Bytes this column occupies in a key's fixed-width encoding.
    ///
    /// String columns occupy a fixed-width by-reference slot, so the width
    /// depends only on the schema.
    #[must_use]
    pub const fn packed_width(self) -> usize {
        match self {
            ColumnType::Int32 | ColumnType::Date | ColumnType::String => 4,
            ColumnType::Int64 | ColumnType::DateTime | ColumnType::HashedInt => 8,
        }
    }

    /// The type's display name, used in parse errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ColumnType::Int32 => "INT32",
            ColumnType::Int64 => "INT64",
            ColumnType::String => "STRING",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "DATETIME",
            ColumnType::HashedInt => "HASHED_INT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One typed column value inside a packed key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datum {
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// UTF-8 string.
    String(String),
    /// Day-count date.
    Date(Date),
    /// Second-count datetime.
    DateTime(DateTime),
    /// Precomputed rolling hash.
    HashedInt(HashedInt),
}

impl Datum {
    /// The column type this value belongs to.
    #[must_use]
    pub const fn column_type(&self) -> ColumnType {
        match self {
            Datum::Int32(_) => ColumnType::Int32,
            Datum::Int64(_) => ColumnType::Int64,
            Datum::String(_) => ColumnType::String,
            Datum::Date(_) => ColumnType::Date,
            Datum::DateTime(_) => ColumnType::DateTime,
            Datum::HashedInt(_) => ColumnType::HashedInt,
        }
    }

    /// Bytes this value occupies in a key's fixed-width encoding.
    #[must_use]
    pub const fn packed_width(&self) -> usize {
        self.column_type().packed_width()
    }

    /// Compares two values of the same column type.
    ///
    /// Panics when the variants differ; keys are only ever compared under
    /// one schema.
    #[must_use]
    pub fn compare(&self, other: &Datum) -> Ordering {
        match (self, other) {
            (Datum::Int32(a), Datum::Int32(b)) => a.cmp(b),
            (Datum::Int64(a), Datum::Int64(b)) => a.cmp(b),
            (Datum::String(a), Datum::String(b)) => a.cmp(b),
            (Datum::Date(a), Datum::Date(b)) => a.cmp(b),
            (Datum::DateTime(a), Datum::DateTime(b)) => a.cmp(b),
            (Datum::HashedInt(a), Datum::HashedInt(b)) => a.cmp(b),
            _ => panic!(
                "comparing column values of different types: {} vs {}",
                self.column_type(),
                other.column_type()
            ),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Int32(v) => write!(f, "{v}"),
            Datum::Int64(v) => write!(f, "{v}"),
            Datum::String(s) => write!(f, "{s}"),
            Datum::Date(d) => write!(f, "{d}"),
            Datum::DateTime(dt) => write!(f, "{dt}"),
            Datum::HashedInt(h) => write!(f, "{h}"),
        }
    }
}

/// An ordered list of column types describing a packed key's layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    types: Vec<ColumnType>,
}

impl Schema {
    /// Creates a schema from an ordered column-type list.
    #[must_use]
    pub fn new(types: Vec<ColumnType>) -> Self {
        Self { types }
    }

    /// The declared column types.
    #[must_use]
    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True if the schema has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Byte width of a key's fixed-width encoding under this schema.
    #[must_use]
    pub fn width(&self) -> usize {
        self.types.iter().map(|t| t.packed_width()).sum()
    }

    /// Width rounded up to the key alignment; node budgeting uses this.
    #[must_use]
    pub fn padded_width(&self) -> usize {
        self.width().div_ceil(KEY_ALIGN) * KEY_ALIGN
    }

    /// This schema with an `Int64` rid column appended.
    ///
    /// Duplicate-allowing indexes key their entries with the rid suffix so
    /// that every stored key is unique.
    #[must_use]
    pub fn with_rid_suffix(&self) -> Schema {
        let mut types = self.types.clone();
        types.push(ColumnType::Int64);
        Schema { types }
    }

    /// Packs one row of stringified column values into a key.
    ///
    /// Numeric columns are parsed per their declared type; `DATE` parses as a
    /// day count, `DATETIME` as a second count and `HASHED_INT` as an
    /// already-computed hash value.
    pub fn pack(&self, columns: &[&str]) -> MossResult<PackedKey> {
        if columns.len() != self.types.len() {
            return Err(MossError::ColumnCountMismatch {
                expected: self.types.len(),
                found: columns.len(),
            });
        }
        let mut values = Vec::with_capacity(self.types.len());
        for (index, (&ty, &raw)) in self.types.iter().zip(columns.iter()).enumerate() {
            let parse_err = || MossError::ColumnParse {
                index,
                type_name: ty.name(),
                value: raw.to_string(),
            };
            let datum = match ty {
                ColumnType::Int32 => Datum::Int32(raw.parse().map_err(|_| parse_err())?),
                ColumnType::Int64 => Datum::Int64(raw.parse().map_err(|_| parse_err())?),
                ColumnType::String => Datum::String(raw.to_string()),
                ColumnType::Date => {
                    Datum::Date(Date::new(raw.parse().map_err(|_| parse_err())?))
                }
                ColumnType::DateTime => {
                    Datum::DateTime(DateTime::new(raw.parse().map_err(|_| parse_err())?))
                }
                ColumnType::HashedInt => {
                    Datum::HashedInt(HashedInt::new(raw.parse().map_err(|_| parse_err())?))
                }
            };
            values.push(datum);
        }
        Ok(PackedKey { columns: values })
    }

    /// Compares two packed keys column by column.
    ///
    /// The null key compares greater than every real key; two null keys
    /// compare equal.
    #[must_use]
    pub fn compare(&self, a: &PackedKey, b: &PackedKey) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        debug_assert_eq!(a.columns.len(), self.types.len());
        debug_assert_eq!(b.columns.len(), self.types.len());
        for (x, y) in a.columns.iter().zip(b.columns.iter()) {
            let ord = x.compare(y);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// A packed key: one row of typed column values.
///
/// Clones copy the column values; strings are owned per key and duplicated
/// on copy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedKey {
    columns: Vec<Datum>,
}

impl PackedKey {
    /// The plus-infinity sentinel key.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    /// Builds a key directly from typed column values.
    #[must_use]
    pub fn from_columns(columns: Vec<Datum>) -> Self {
        Self { columns }
    }

    /// The key's column values, in schema order.
    #[must_use]
    pub fn columns(&self) -> &[Datum] {
        &self.columns
    }

    /// True for the plus-infinity sentinel.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.columns.is_empty()
    }

    /// Byte width of the key's fixed-width encoding (zero for the null key).
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.iter().map(Datum::packed_width).sum()
    }

    /// A new key with an `Int64` rid column appended.
    #[must_use]
    pub fn combine(&self, rid: Rid) -> PackedKey {
        debug_assert!(!self.is_null(), "cannot extend the null key");
        let mut columns = self.columns.clone();
        columns.push(Datum::Int64(rid.as_i64()));
        PackedKey { columns }
    }
}

impl fmt::Debug for PackedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "PackedKey(null)");
        }
        write!(f, "PackedKey(")?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{column}")?;
        }
        write!(f, ")")
    }
}
