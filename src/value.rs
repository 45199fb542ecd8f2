//! Runtime operand values and declared field types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of an integer field or value, ordered from narrowest to widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntWidth {
    Int8,
    Int16,
    Int32,
    Int64,
}

/// Declared type of a field, as published by the schema registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Text,
    /// Named enumeration stored as an integer of the given width.
    Enum { name: String, underlying: IntWidth },
    /// Nested document / embedded record; only valid as an inner path segment.
    Embedded,
}

impl FieldType {
    pub fn int_width(&self) -> Option<IntWidth> {
        match self {
            FieldType::Int8 => Some(IntWidth::Int8),
            FieldType::Int16 => Some(IntWidth::Int16),
            FieldType::Int32 => Some(IntWidth::Int32),
            FieldType::Int64 => Some(IntWidth::Int64),
            FieldType::Enum { underlying, .. } => Some(*underlying),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        self.int_width().is_some()
    }

    pub fn is_text(&self) -> bool {
        matches!(self, FieldType::Text)
    }

    /// Whether a scalar value can be compared against a field of this type.
    ///
    /// Accepted: exact type, the enum's underlying integer type, or an integer
    /// that widens losslessly into the field.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Text, Value::Text(_)) => true,
            (FieldType::Float32, Value::Float32(_)) => true,
            (FieldType::Float64, Value::Float64(_)) => true,
            (FieldType::Enum { name, .. }, Value::Enum { type_name, .. }) => name == type_name,
            (field, value) => match (field.int_width(), value.int_width()) {
                (Some(field_width), Some(value_width)) => value_width <= field_width,
                _ => false,
            },
        }
    }

    /// Same rules as [`FieldType::accepts`], applied to a declared parameter type.
    pub fn accepts_type(&self, other: &FieldType) -> bool {
        if self == other {
            return !matches!(self, FieldType::Embedded);
        }
        match (self, other) {
            (FieldType::Enum { .. }, FieldType::Enum { .. }) => false,
            (field, other) if !matches!(other, FieldType::Enum { .. }) => {
                match (field.int_width(), other.int_width()) {
                    (Some(field_width), Some(other_width)) => other_width <= field_width,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Bool => write!(f, "bool"),
            FieldType::Int8 => write!(f, "int8"),
            FieldType::Int16 => write!(f, "int16"),
            FieldType::Int32 => write!(f, "int32"),
            FieldType::Int64 => write!(f, "int64"),
            FieldType::Float32 => write!(f, "float32"),
            FieldType::Float64 => write!(f, "float64"),
            FieldType::Text => write!(f, "text"),
            FieldType::Enum { name, .. } => write!(f, "enum {name}"),
            FieldType::Embedded => write!(f, "embedded"),
        }
    }
}

/// Literal or bound parameter value.
///
/// `List` is the operand of `In`/`NotIn`, `Range` the operand of
/// `Between`/`NotBetween`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Enum { type_name: String, value: i64 },
    List(Vec<Value>),
    Range(Box<Value>, Box<Value>),
}

impl Value {
    pub fn range(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Value::Range(Box::new(low.into()), Box::new(high.into()))
    }

    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn int_width(&self) -> Option<IntWidth> {
        match self {
            Value::Int8(_) => Some(IntWidth::Int8),
            Value::Int16(_) => Some(IntWidth::Int16),
            Value::Int32(_) => Some(IntWidth::Int32),
            Value::Int64(_) => Some(IntWidth::Int64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::Enum { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int8(_) => "int8".to_string(),
            Value::Int16(_) => "int16".to_string(),
            Value::Int32(_) => "int32".to_string(),
            Value::Int64(_) => "int64".to_string(),
            Value::Float32(_) => "float32".to_string(),
            Value::Float64(_) => "float64".to_string(),
            Value::Text(_) => "text".to_string(),
            Value::Enum { type_name, .. } => format!("enum {type_name}"),
            Value::List(_) => "list".to_string(),
            Value::Range(_, _) => "range".to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "\"{v}\""),
            Value::Enum { type_name, value } => write!(f, "{type_name}({value})"),
            Value::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Value::Range(low, high) => write!(f, "{low} AND {high}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
