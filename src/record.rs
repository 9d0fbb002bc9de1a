//! Field descriptors for persisted record types.
//!
//! A [`Record`] publishes its columns as a static, ordered list of
//! [`FieldDef`]s and converts itself to and from [`Value`]s in that order.
//! The [`record!`](crate::record!) macro writes the impl from a plain struct
//! definition, so the repository can generate every statement without
//! per-type SQL.

use chrono::NaiveDateTime;

use crate::{Result, Row, Value};

/// Text layout used for timestamp columns.
/// Fractional seconds are written only when present.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Semantic type of a record field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Boolean,
    /// Stored as text in [`TIMESTAMP_FORMAT`].
    Timestamp,
    Blob,
}

impl ColumnKind {
    /// SQLite column type for the kind.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text | Self::Timestamp => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

/// One column of a record type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

/// Rust types that can be stored in a record column.
///
/// `Option<T>` maps to the same kind as `T` with `NULLABLE` set.
pub trait FieldType: Sized {
    const KIND: ColumnKind;
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;

    /// Converts a stored value back, describing the mismatch on failure.
    fn from_value(value: Value) -> std::result::Result<Self, String>;
}

/// A type persisted by [`crate::Repository`].
pub trait Record: Sized {
    /// Columns in declaration order.
    fn fields() -> &'static [FieldDef];

    /// Column values aligned with [`Record::fields`].
    fn values(&self) -> Vec<Value>;

    fn from_row(row: &Row) -> Result<Self>;
}

fn mismatch(expected: &str, value: &Value) -> String {
    format!("expected {expected}, found {}", value.kind_name())
}

impl FieldType for i64 {
    const KIND: ColumnKind = ColumnKind::Integer;

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Integer(value) => Ok(value),
            other => Err(mismatch("integer", &other)),
        }
    }
}

impl FieldType for i32 {
    const KIND: ColumnKind = ColumnKind::Integer;

    fn to_value(&self) -> Value {
        Value::Integer((*self).into())
    }

    fn from_value(value: Value) -> std::result::Result<Self, String> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| format!("integer {wide} out of range for i32"))
    }
}

impl FieldType for u32 {
    const KIND: ColumnKind = ColumnKind::Integer;

    fn to_value(&self) -> Value {
        Value::Integer((*self).into())
    }

    fn from_value(value: Value) -> std::result::Result<Self, String> {
        let wide = i64::from_value(value)?;
        u32::try_from(wide).map_err(|_| format!("integer {wide} out of range for u32"))
    }
}

impl FieldType for f64 {
    const KIND: ColumnKind = ColumnKind::Real;

    fn to_value(&self) -> Value {
        Value::Real(*self)
    }

    fn from_value(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Real(value) => Ok(value),
            // REAL affinity stores integral values as integers
            Value::Integer(value) => Ok(value as f64),
            other => Err(mismatch("real", &other)),
        }
    }
}

impl FieldType for bool {
    const KIND: ColumnKind = ColumnKind::Boolean;

    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Integer(value) => Ok(value != 0),
            other => Err(mismatch("boolean integer", &other)),
        }
    }
}

impl FieldType for String {
    const KIND: ColumnKind = ColumnKind::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Text(value) => Ok(value),
            other => Err(mismatch("text", &other)),
        }
    }
}

impl FieldType for Vec<u8> {
    const KIND: ColumnKind = ColumnKind::Blob;

    fn to_value(&self) -> Value {
        Value::Blob(self.clone())
    }

    fn from_value(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Blob(value) => Ok(value),
            other => Err(mismatch("blob", &other)),
        }
    }
}

impl FieldType for NaiveDateTime {
    const KIND: ColumnKind = ColumnKind::Timestamp;

    fn to_value(&self) -> Value {
        Value::Text(self.format(TIMESTAMP_FORMAT).to_string())
    }

    fn from_value(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Text(text) => NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT)
                .map_err(|err| format!("invalid timestamp '{text}': {err}")),
            other => Err(mismatch("timestamp text", &other)),
        }
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const KIND: ColumnKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, FieldType::to_value)
    }

    fn from_value(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Declares a struct and implements [`Record`] for it.
///
/// Column names are the field names as written.
///
/// ```
/// kp_loader::record! {
///     #[derive(Clone, Debug, PartialEq)]
///     pub struct Genre {
///         pub id: i64,
///         pub name: String,
///         pub description: Option<String>,
///     }
/// }
///
/// use kp_loader::Record;
/// assert_eq!(Genre::fields().len(), 3);
/// assert!(Genre::fields()[2].nullable);
/// ```
#[macro_export]
macro_rules! record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::Record for $name {
            fn fields() -> &'static [$crate::FieldDef] {
                const FIELDS: &[$crate::FieldDef] = &[
                    $(
                        $crate::FieldDef {
                            name: stringify!($field),
                            kind: <$ty as $crate::FieldType>::KIND,
                            nullable: <$ty as $crate::FieldType>::NULLABLE,
                        },
                    )*
                ];
                FIELDS
            }

            fn values(&self) -> ::std::vec::Vec<$crate::Value> {
                ::std::vec![$($crate::FieldType::to_value(&self.$field)),*]
            }

            fn from_row(row: &$crate::Row) -> $crate::Result<Self> {
                ::std::result::Result::Ok(Self {
                    $($field: row.field(stringify!($field))?,)*
                })
            }
        }
    };
}
