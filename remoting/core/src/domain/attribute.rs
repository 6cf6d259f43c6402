// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Attribute
//!
//! The smallest synchronized unit: a named, typed value cell addressed by
//! `(model id, name, tag)`.
//!
//! Mutation is pure. [`Attribute::set`] returns the [`ValueChange`] it caused (or
//! `None` for an equal value) and leaves dirty marking, change tracking and
//! listener dispatch to the owning store. That keeps the equal-value no-op rule
//! in exactly one place.

use serde::{Deserialize, Serialize};

use crate::domain::presentation_model::ModelId;
use crate::domain::value::{TypeMismatch, Value, ValueType};

/// Facet of a named attribute. A model may carry one attribute per `(name, tag)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tag {
    #[default]
    Value,
    ValueType,
    Label,
    Tooltip,
    Mandatory,
    Visible,
    Enabled,
    Regex,
}

/// Store-wide address of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeKey {
    pub model_id: ModelId,
    pub name: String,
    pub tag: Tag,
}

impl AttributeKey {
    /// Key of the `VALUE`-tagged attribute `name`.
    pub fn new(model_id: impl Into<ModelId>, name: impl Into<String>) -> Self {
        Self::with_tag(model_id, name, Tag::Value)
    }

    pub fn with_tag(model_id: impl Into<ModelId>, name: impl Into<String>, tag: Tag) -> Self {
        Self {
            model_id: model_id.into(),
            name: name.into(),
            tag,
        }
    }
}

impl std::fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.tag {
            Tag::Value => write!(f, "{}.{}", self.model_id, self.name),
            tag => write!(f, "{}.{}[{:?}]", self.model_id, self.name, tag),
        }
    }
}

/// One effective update of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub key: AttributeKey,
    pub old_value: Value,
    pub new_value: Value,
}

/// A named, typed value cell.
#[derive(Debug, Clone)]
pub struct Attribute {
    key: AttributeKey,
    value: Value,
    value_type: ValueType,
    base_value: Value,
    qualifier: Option<String>,
}

impl Attribute {
    /// New attribute whose type is inferred from `initial`.
    pub fn new(key: AttributeKey, initial: Value) -> Self {
        Self {
            key,
            value_type: initial.value_type(),
            base_value: initial.clone(),
            value: initial,
            qualifier: None,
        }
    }

    /// New attribute with a declared type, coercing `initial` onto it.
    pub fn typed(key: AttributeKey, value_type: ValueType, initial: Value) -> Result<Self, TypeMismatch> {
        let initial = value_type.coerce(initial)?;
        Ok(Self {
            key,
            value_type,
            base_value: initial.clone(),
            value: initial,
            qualifier: None,
        })
    }

    pub(crate) fn with_qualifier(mut self, qualifier: Option<String>) -> Self {
        self.qualifier = qualifier;
        self
    }

    pub fn key(&self) -> &AttributeKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn tag(&self) -> Tag {
        self.key.tag
    }

    /// Current value. Never has side effects.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn base_value(&self) -> &Value {
        &self.base_value
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    pub fn is_modified(&self) -> bool {
        self.value != self.base_value
    }

    /// Store `value`, returning the effective change.
    ///
    /// An `Unknown`-typed attribute adopts the type of the first non-null value;
    /// after that the type never changes.
    pub(crate) fn set(&mut self, value: Value) -> Result<Option<ValueChange>, TypeMismatch> {
        let value = self.value_type.coerce(value)?;
        if value == self.value {
            return Ok(None);
        }
        if self.value_type == ValueType::Unknown && !value.is_null() {
            self.value_type = value.value_type();
        }
        let old_value = std::mem::replace(&mut self.value, value);
        Ok(Some(ValueChange {
            key: self.key.clone(),
            old_value,
            new_value: self.value.clone(),
        }))
    }

    /// Returns true when the qualifier actually changed.
    pub(crate) fn set_qualifier(&mut self, qualifier: Option<String>) -> bool {
        if self.qualifier == qualifier {
            return false;
        }
        self.qualifier = qualifier;
        true
    }

    /// Returns true when the base value actually changed.
    pub(crate) fn set_base_value(&mut self, base_value: Value) -> Result<bool, TypeMismatch> {
        let base_value = self.value_type.coerce(base_value)?;
        if base_value == self.base_value {
            return Ok(false);
        }
        self.base_value = base_value;
        Ok(true)
    }

    pub fn snapshot(&self) -> AttributeSnapshot {
        AttributeSnapshot {
            name: self.key.name.clone(),
            tag: self.key.tag,
            value: self.value.clone(),
            value_type: self.value_type,
            qualifier: self.qualifier.clone(),
        }
    }

    /// Rebuild an attribute received from the remote store.
    pub(crate) fn from_snapshot(model_id: &ModelId, snapshot: AttributeSnapshot) -> Result<Self, TypeMismatch> {
        let key = AttributeKey::with_tag(model_id.clone(), snapshot.name, snapshot.tag);
        Ok(Self::typed(key, snapshot.value_type, snapshot.value)?.with_qualifier(snapshot.qualifier))
    }
}

/// Wire form of an attribute inside creation commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeSnapshot {
    pub name: String,
    #[serde(default)]
    pub tag: Tag,
    pub value: Value,
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
}
