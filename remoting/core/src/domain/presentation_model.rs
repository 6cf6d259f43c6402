// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Model
//!
//! An ordered collection of [`Attribute`]s grouped under a [`ModelId`] and a
//! type tag. Models are the unit of creation and deletion; they are owned by
//! exactly one [`ModelStore`](crate::domain::model_store::ModelStore) and are
//! only mutated through it.

use serde::{Deserialize, Serialize};

use crate::domain::attribute::{Attribute, AttributeSnapshot, Tag};
use crate::domain::session::Side;

/// Identifier of a presentation model, unique across a synchronized pair.
///
/// Generated ids carry a side suffix (`"<n>-C"` on the client, `"<n>-S"` on the
/// server) so that both stores can allocate ids without negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id allocated by a store from its local counter.
    pub fn generated(sequence: u64, side: Side) -> Self {
        Self(format!("{}-{}", sequence, side.id_suffix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A typed group of attributes.
#[derive(Debug, Clone)]
pub struct PresentationModel {
    id: ModelId,
    model_type: String,
    attributes: Vec<Attribute>,
    dirty: bool,
}

impl PresentationModel {
    pub(crate) fn new(id: ModelId, model_type: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self {
            id,
            model_type: model_type.into(),
            attributes,
            dirty: false,
        }
    }

    pub fn id(&self) -> &ModelId {
        &self.id
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    /// Attributes in insertion order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Find the `VALUE`-tagged attribute called `name`.
    pub fn find_attribute(&self, name: &str) -> Option<&Attribute> {
        self.find_attribute_by_tag(name, Tag::Value)
    }

    pub fn find_attribute_by_tag(&self, name: &str, tag: Tag) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name() == name && a.tag() == tag)
    }

    /// True when a local change happened since the last flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// True when any attribute differs from its base value.
    pub fn is_modified(&self) -> bool {
        self.attributes.iter().any(Attribute::is_modified)
    }

    pub fn snapshot_attributes(&self) -> Vec<AttributeSnapshot> {
        self.attributes.iter().map(Attribute::snapshot).collect()
    }

    pub(crate) fn attribute_mut(&mut self, name: &str, tag: Tag) -> Option<&mut Attribute> {
        self.attributes
            .iter_mut()
            .find(|a| a.name() == name && a.tag() == tag)
    }

    pub(crate) fn attributes_mut(&mut self) -> impl Iterator<Item = &mut Attribute> {
        self.attributes.iter_mut()
    }

    pub(crate) fn push_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    pub(crate) fn into_attributes(self) -> Vec<Attribute> {
        self.attributes
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}
