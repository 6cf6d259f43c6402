// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Converters between attribute values and typed local values.
//!
//! One [`Converter`] interface covers every type: compare a remote value with a
//! local one, convert remote to local, and convert local back to remote. The
//! stock [`ValueConverter`] handles every [`Convertible`] type; applications
//! implement [`Converter`] directly for custom mappings.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};

use crate::domain::presentation_model::ModelId;
use crate::domain::value::{Value, ValueType};

/// A value that cannot be represented in the local type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Cannot convert {value} to {target}")]
pub struct ConversionError {
    pub value: Value,
    pub target: &'static str,
}

pub trait Converter<T>: Send + Sync {
    /// True when `remote` already represents `local`.
    fn equals(&self, remote: &Value, local: Option<&T>) -> bool;

    fn convert(&self, remote: &Value) -> Result<Option<T>, ConversionError>;

    fn convert_back(&self, local: Option<&T>) -> Value;
}

/// Local types with a canonical attribute representation.
pub trait Convertible: Sized + Clone + PartialEq + Send + Sync + 'static {
    const VALUE_TYPE: ValueType;

    fn from_value(value: &Value) -> Option<Self>;

    fn to_value(&self) -> Value;
}

impl Convertible for bool {
    const VALUE_TYPE: ValueType = ValueType::Boolean;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }
}

impl Convertible for i32 {
    const VALUE_TYPE: ValueType = ValueType::Integer;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }
}

impl Convertible for i64 {
    const VALUE_TYPE: ValueType = ValueType::Long;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }

    fn to_value(&self) -> Value {
        Value::Long(*self)
    }
}

impl Convertible for f64 {
    const VALUE_TYPE: ValueType = ValueType::Double;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }

    fn to_value(&self) -> Value {
        Value::Double(*self)
    }
}

impl Convertible for String {
    const VALUE_TYPE: ValueType = ValueType::String;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) | Value::Enum(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl Convertible for DateTime<Utc> {
    const VALUE_TYPE: ValueType = ValueType::Date;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }
}

impl Convertible for ModelId {
    const VALUE_TYPE: ValueType = ValueType::Bean;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bean(id) => Some(id.clone()),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::Bean(self.clone())
    }
}

/// Converter for any [`Convertible`] type. `Null` maps to `None`.
pub struct ValueConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ValueConverter<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for ValueConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Convertible> Converter<T> for ValueConverter<T> {
    fn equals(&self, remote: &Value, local: Option<&T>) -> bool {
        match (remote, local) {
            (Value::Null, None) => true,
            (remote, Some(local)) => T::from_value(remote).as_ref() == Some(local),
            _ => false,
        }
    }

    fn convert(&self, remote: &Value) -> Result<Option<T>, ConversionError> {
        if remote.is_null() {
            return Ok(None);
        }
        T::from_value(remote).map(Some).ok_or_else(|| ConversionError {
            value: remote.clone(),
            target: std::any::type_name::<T>(),
        })
    }

    fn convert_back(&self, local: Option<&T>) -> Value {
        local.map(T::to_value).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_converter() {
        let converter = ValueConverter::<i32>::new();
        assert_eq!(converter.convert(&Value::Integer(3)), Ok(Some(3)));
        assert_eq!(converter.convert(&Value::Long(3)), Ok(Some(3)));
        assert_eq!(converter.convert(&Value::Null), Ok(None));
        assert!(converter.convert(&Value::from("3")).is_err());
        assert_eq!(converter.convert_back(Some(&4)), Value::Integer(4));
        assert_eq!(converter.convert_back(None), Value::Null);
    }

    #[test]
    fn test_equals_compares_in_local_domain() {
        let converter = ValueConverter::<f64>::new();
        assert!(converter.equals(&Value::Integer(2), Some(&2.0)));
        assert!(converter.equals(&Value::Null, None));
        assert!(!converter.equals(&Value::Null, Some(&0.0)));
    }

    #[test]
    fn test_bean_reference_converter() {
        let converter = ValueConverter::<ModelId>::new();
        let id = ModelId::new("4-S");
        assert_eq!(converter.convert(&Value::Bean(id.clone())), Ok(Some(id.clone())));
        assert_eq!(converter.convert_back(Some(&id)), Value::Bean(id));
    }
}
