//! The typed scalar domain of the index engine.

use std::cmp::Ordering;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Result, ShelfDbError};

/// Tag identifying the concrete case of a [`Value`].
///
/// The wire names (`int64`, `uint64`, `float64`, `string`) are the
/// `cast` strings persisted with every field index, so that values
/// read back through generic JSON parsing can recover their exact
/// case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Uint,
    Float,
    Str,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Int => "int64",
            ValueKind::Uint => "uint64",
            ValueKind::Float => "float64",
            ValueKind::Str => "string",
        }
    }

    pub fn parse(s: &str) -> Result<ValueKind> {
        match s {
            "int64" => Ok(ValueKind::Int),
            "uint64" => Ok(ValueKind::Uint),
            "float64" => Ok(ValueKind::Float),
            "string" => Ok(ValueKind::Str),
            other => Err(ShelfDbError::UnknownKeyType(other.to_string())),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged scalar held by a field index.
///
/// Total order is defined within one case only; the owning index
/// guards casts at its boundary, so a cross-case comparison is an
/// invariant violation rather than a runtime error.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Uint(_) => ValueKind::Uint,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Total order within one case. Floats use `total_cmp`.
    pub fn cmp_same_kind(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Uint(a), Value::Uint(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (a, b) => unreachable!(
                "comparison across value kinds: {} vs {}",
                a.kind(),
                b.kind()
            ),
        }
    }

    /// Re-applies a declared cast after generic parsing. A generic
    /// JSON reader places numbers in whichever case fits first; the
    /// cast recorded by the owning index restores the original one.
    pub fn retag(&mut self, kind: ValueKind) -> Result<()> {
        match (kind, &*self) {
            (ValueKind::Int, Value::Int(_)) => {}
            (ValueKind::Int, Value::Uint(u)) => *self = Value::Int(*u as i64),
            (ValueKind::Int, Value::Float(f)) => *self = Value::Int(*f as i64),
            (ValueKind::Uint, Value::Uint(_)) => {}
            (ValueKind::Uint, Value::Int(i)) => *self = Value::Uint(*i as u64),
            (ValueKind::Uint, Value::Float(f)) => *self = Value::Uint(*f as u64),
            (ValueKind::Float, Value::Float(_)) => {}
            (ValueKind::Float, Value::Int(i)) => *self = Value::Float(*i as f64),
            (ValueKind::Float, Value::Uint(u)) => *self = Value::Float(*u as f64),
            (ValueKind::Str, Value::Str(_)) => {}
            (kind, value) => {
                return Err(ShelfDbError::Casting {
                    value: value.to_string(),
                    cast: kind.as_str().to_string(),
                })
            }
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Uint(v) => serializer.serialize_u64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Str(v) => serializer.serialize_str(v),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number or a string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::Uint(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::Str(v))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

macro_rules! value_from_int {
    ($($t:ty),+) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Value {
                Value::Int(v as i64)
            }
        })+
    };
}

macro_rules! value_from_uint {
    ($($t:ty),+) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Value {
                Value::Uint(v as u64)
            }
        })+
    };
}

value_from_int!(i8, i16, i32, i64);
value_from_uint!(u8, u16, u32, u64);

impl From<f32> for Value {
    fn from(v: f32) -> Value {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Str(v)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(v: chrono::DateTime<chrono::Utc>) -> Value {
        Value::Int(v.timestamp_nanos_opt().unwrap_or_default())
    }
}

/// One entry of a field index: an indexed value tied to the internal
/// id of the object it came from. Persisted as the two-element tuple
/// `[value, object_id]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedField {
    pub value: Value,
    pub object_id: u64,
}

impl IndexedField {
    pub fn new(value: Value, object_id: u64) -> Self {
        IndexedField { value, object_id }
    }
}

impl fmt::Display for IndexedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.value, self.object_id)
    }
}

impl Serialize for IndexedField {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (&self.value, self.object_id).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IndexedField {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<IndexedField, D::Error> {
        let (value, object_id) = <(Value, u64)>::deserialize(deserializer)?;
        Ok(IndexedField { value, object_id })
    }
}
