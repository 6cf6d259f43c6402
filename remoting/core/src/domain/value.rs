// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Typed Attribute Values
//!
//! Every attribute holds a [`Value`] whose [`ValueType`] is fixed once the first
//! non-null value lands. [`ValueType::coerce`] is the single place where the
//! declared type decides whether an incoming value is acceptable; only lossless
//! numeric conversions are allowed.
//!
//! ## Wire Representation
//!
//! The codec never sees Rust enums. A value crosses the wire as
//! `{"type": <type id>, "value": <json>}`:
//!
//! | Id | Type | JSON payload |
//! |----|------|--------------|
//! | 0 | `Unknown` | `null` only |
//! | 1 | `Boolean` | bool |
//! | 2 | `Long` | number |
//! | 3 | `Integer` | number |
//! | 4 | `Double` | number, or `"NaN"` / `"Infinity"` / `"-Infinity"` |
//! | 5 | `String` | string |
//! | 6 | `Date` | RFC 3339 string |
//! | 7 | `Enum` | variant name |
//! | 8 | `Bean` | referenced model id |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::presentation_model::ModelId;

/// Declared type of an attribute, identified on the wire by a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ValueType {
    Unknown = 0,
    Boolean = 1,
    Long = 2,
    Integer = 3,
    Double = 4,
    String = 5,
    Date = 6,
    Enum = 7,
    Bean = 8,
}

impl ValueType {
    /// Wire identifier for this type.
    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Map `value` onto this declared type.
    ///
    /// `Null` is accepted by every type and `Unknown` accepts anything. Numeric
    /// conversions succeed only when no information is lost.
    ///
    /// # Errors
    ///
    /// Returns [`TypeMismatch`] when the value cannot be represented.
    pub fn coerce(self, value: Value) -> Result<Value, TypeMismatch> {
        let found = value.value_type();
        let coerced = match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (ValueType::Unknown, value) => Some(value),
            (ValueType::Boolean, v @ Value::Boolean(_)) => Some(v),
            (ValueType::Long, v @ Value::Long(_)) => Some(v),
            (ValueType::Long, Value::Integer(i)) => Some(Value::Long(i64::from(i))),
            (ValueType::Long, Value::Double(d)) => exact_integer(d).map(Value::Long),
            (ValueType::Integer, v @ Value::Integer(_)) => Some(v),
            (ValueType::Integer, Value::Long(l)) => i32::try_from(l).ok().map(Value::Integer),
            (ValueType::Integer, Value::Double(d)) => exact_integer(d)
                .and_then(|l| i32::try_from(l).ok())
                .map(Value::Integer),
            (ValueType::Double, v @ Value::Double(_)) => Some(v),
            (ValueType::Double, Value::Integer(i)) => Some(Value::Double(f64::from(i))),
            (ValueType::Double, Value::Long(l)) => {
                (l.unsigned_abs() <= MAX_EXACT_DOUBLE).then(|| Value::Double(l as f64))
            }
            (ValueType::String, v @ Value::String(_)) => Some(v),
            (ValueType::Date, v @ Value::Date(_)) => Some(v),
            (ValueType::Enum, v @ Value::Enum(_)) => Some(v),
            (ValueType::Enum, Value::String(s)) => Some(Value::Enum(s)),
            (ValueType::Bean, v @ Value::Bean(_)) => Some(v),
            _ => None,
        };
        coerced.ok_or(TypeMismatch {
            expected: self,
            found,
        })
    }
}

const MAX_EXACT_DOUBLE: u64 = 1 << 53;

fn exact_integer(d: f64) -> Option<i64> {
    (d.is_finite() && d.fract() == 0.0 && d.abs() <= MAX_EXACT_DOUBLE as f64).then(|| d as i64)
}

impl From<ValueType> for u8 {
    fn from(value_type: ValueType) -> Self {
        value_type.id()
    }
}

impl TryFrom<u8> for ValueType {
    type Error = UnknownValueType;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0 => ValueType::Unknown,
            1 => ValueType::Boolean,
            2 => ValueType::Long,
            3 => ValueType::Integer,
            4 => ValueType::Double,
            5 => ValueType::String,
            6 => ValueType::Date,
            7 => ValueType::Enum,
            8 => ValueType::Bean,
            other => return Err(UnknownValueType(other)),
        })
    }
}

/// Wire type identifier outside the known range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown value type identifier: {0}")]
pub struct UnknownValueType(pub u8);

/// A value could not be mapped onto an attribute's declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot store a {found:?} value in an attribute declared as {expected:?}")]
pub struct TypeMismatch {
    pub expected: ValueType,
    pub found: ValueType,
}

/// Content of an attribute cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "WireValue", try_from = "WireValue")]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Long(i64),
    Integer(i32),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    Enum(String),
    Bean(ModelId),
}

impl Value {
    /// Type carried by this value; `Null` reports `Unknown`.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Unknown,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Integer(_) => ValueType::Integer,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Date(_) => ValueType::Date,
            Value::Enum(_) => ValueType::Enum,
            Value::Bean(_) => ValueType::Bean,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(l) => Some(*l),
            Value::Integer(i) => Some(i64::from(*i)),
            Value::Double(d) => exact_integer(*d),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Integer(i) => Some(f64::from(*i)),
            Value::Long(l) => Some(*l as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            Value::Bean(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

// NaN must compare equal to itself or a NaN attribute would never settle.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Bean(a), Value::Bean(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Long(l) => write!(f, "{}", l),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Enum(s) => write!(f, "{}", s),
            Value::Bean(id) => write!(f, "@{}", id),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<ModelId> for Value {
    fn from(value: ModelId) -> Self {
        Value::Bean(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Type-tagged JSON form handed to the codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireValue {
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(default)]
    value: serde_json::Value,
}

/// A wire value did not match its declared type identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed {value_type:?} value on the wire: {detail}")]
pub struct WireValueError {
    pub value_type: ValueType,
    pub detail: String,
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        use serde_json::Value as Json;

        let value_type = value.value_type();
        let value = match value {
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(b),
            Value::Long(l) => Json::from(l),
            Value::Integer(i) => Json::from(i),
            Value::Double(d) => match serde_json::Number::from_f64(d) {
                Some(n) => Json::Number(n),
                None if d.is_nan() => Json::String("NaN".to_string()),
                None if d.is_sign_positive() => Json::String("Infinity".to_string()),
                None => Json::String("-Infinity".to_string()),
            },
            Value::String(s) | Value::Enum(s) => Json::String(s),
            Value::Date(d) => Json::String(d.to_rfc3339()),
            Value::Bean(id) => Json::String(id.as_str().to_string()),
        };
        WireValue { value_type, value }
    }
}

impl TryFrom<WireValue> for Value {
    type Error = WireValueError;

    fn try_from(wire: WireValue) -> Result<Self, Self::Error> {
        use serde_json::Value as Json;

        let value_type = wire.value_type;
        let malformed = |detail: &str| WireValueError {
            value_type,
            detail: detail.to_string(),
        };

        match (value_type, wire.value) {
            (_, Json::Null) => Ok(Value::Null),
            (ValueType::Boolean, Json::Bool(b)) => Ok(Value::Boolean(b)),
            (ValueType::Long, Json::Number(n)) => n
                .as_i64()
                .map(Value::Long)
                .ok_or_else(|| malformed("not a 64-bit integer")),
            (ValueType::Integer, Json::Number(n)) => n
                .as_i64()
                .and_then(|l| i32::try_from(l).ok())
                .map(Value::Integer)
                .ok_or_else(|| malformed("not a 32-bit integer")),
            (ValueType::Double, Json::Number(n)) => n
                .as_f64()
                .map(Value::Double)
                .ok_or_else(|| malformed("not a number")),
            (ValueType::Double, Json::String(s)) => match s.as_str() {
                "NaN" => Ok(Value::Double(f64::NAN)),
                "Infinity" => Ok(Value::Double(f64::INFINITY)),
                "-Infinity" => Ok(Value::Double(f64::NEG_INFINITY)),
                _ => Err(malformed("unexpected string for a double")),
            },
            (ValueType::String, Json::String(s)) => Ok(Value::String(s)),
            (ValueType::Date, Json::String(s)) => DateTime::parse_from_rfc3339(&s)
                .map(|d| Value::Date(d.with_timezone(&Utc)))
                .map_err(|e| malformed(&e.to_string())),
            (ValueType::Enum, Json::String(s)) => Ok(Value::Enum(s)),
            (ValueType::Bean, Json::String(s)) => Ok(Value::Bean(ModelId::new(s))),
            (_, other) => Err(malformed(&format!("unexpected payload {}", other))),
        }
    }
}
