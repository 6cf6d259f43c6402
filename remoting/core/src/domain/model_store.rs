// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Model Store
//!
//! The per-side registry of live presentation models. Every mutation, local or
//! remote, goes through a `&mut ModelStore`; the application layer confines a
//! store to one execution point (see `application::store_executor`), so the
//! store itself carries no locks.
//!
//! ## Notifications
//!
//! Mutations enqueue events and the store delivers them iteratively once the
//! outermost operation finishes. A listener may mutate the store from inside
//! its callback: the nested mutation enqueues further events which the same
//! dispatch loop drains afterwards, so there is no recursion and no deadlock.
//! While a remote batch is applied dispatch is deferred until the whole batch
//! is in place.
//!
//! ## Remote Application
//!
//! | Command | Already applied | Missing target |
//! |---------|-----------------|----------------|
//! | create model | same type: values reconciled; other type: `DuplicateId` | created |
//! | delete model | n/a | ignored |
//! | create attribute | value reconciled | `UnknownModel` |
//! | change value / metadata | equal value is a no-op | `UnknownModel` / `UnknownAttribute` |
//!
//! Rejected commands are logged and dropped; the rest of the batch continues.
//! Remote changes never re-enter the change tracker.
//!
//! ## Conflicts
//!
//! On the server a client change always wins and discards the server's own
//! pending record for that attribute. On the client a pending local change
//! wins over a conflicting server value and is sent on the next exchange.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::domain::attribute::{Attribute, AttributeKey, AttributeSnapshot, Tag, ValueChange};
use crate::domain::change_tracker::ChangeTracker;
use crate::domain::command::{Command, MetadataName};
use crate::domain::listeners::{
    AttributeRemoved, ChangeListener, ListenerRegistry, ModelEvent, ModelListener, Registered, RemovalListener,
};
use crate::domain::presentation_model::{ModelId, PresentationModel};
use crate::domain::session::Side;
use crate::domain::subscription::Subscription;
use crate::domain::value::{TypeMismatch, Value, ValueType};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("A presentation model with id '{0}' already exists")]
    DuplicateId(ModelId),

    #[error("Unknown presentation model '{0}'")]
    UnknownModel(ModelId),

    #[error("Unknown attribute '{0}'")]
    UnknownAttribute(AttributeKey),

    #[error("Attribute '{0}' already exists")]
    DuplicateAttribute(AttributeKey),

    #[error("Attribute '{key}' rejected value: {source}")]
    TypeMismatch {
        key: AttributeKey,
        #[source]
        source: TypeMismatch,
    },
}

/// Outcome of applying one remote batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Commands that changed the store.
    pub applied: usize,
    /// Replays and no-ops.
    pub ignored: usize,
    /// Actions handed to the action callback.
    pub actions: usize,
    pub rejected: Vec<StoreError>,
}

impl ApplyReport {
    pub fn total(&self) -> usize {
        self.applied + self.ignored + self.actions + self.rejected.len()
    }
}

enum StoreEvent {
    ModelAdded { id: ModelId, model_type: String },
    AttributeChanged(ValueChange),
    AttributeRemoved(AttributeRemoved, Vec<Registered<RemovalListener>>),
    ModelRemoved { id: ModelId, model_type: String },
}

/// Registry of the presentation models on one side of a synchronized pair.
pub struct ModelStore {
    side: Side,
    models: HashMap<ModelId, PresentationModel>,
    qualifiers: HashMap<String, Vec<AttributeKey>>,
    next_id: u64,
    tracker: ChangeTracker,
    listeners: ListenerRegistry,
    events: VecDeque<StoreEvent>,
    dispatching: bool,
    deferred: bool,
    /// False while remote commands are applied.
    tracking: bool,
}

impl ModelStore {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            models: HashMap::new(),
            qualifiers: HashMap::new(),
            next_id: 0,
            tracker: ChangeTracker::new(),
            listeners: ListenerRegistry::default(),
            events: VecDeque::new(),
            dispatching: false,
            deferred: false,
            tracking: true,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    // ----- Models -----

    /// Start declaring a model whose attributes are created atomically with it.
    pub fn builder(&mut self, model_type: impl Into<String>) -> PresentationModelBuilder<'_> {
        PresentationModelBuilder {
            store: self,
            id: None,
            model_type: model_type.into(),
            attributes: Vec::new(),
        }
    }

    /// Create an empty model, generating an id when none is given.
    pub fn create_model(&mut self, model_type: impl Into<String>, id: Option<ModelId>) -> Result<ModelId, StoreError> {
        let builder = self.builder(model_type);
        match id {
            Some(id) => builder.with_id(id).create(),
            None => builder.create(),
        }
    }

    /// Add an attribute to an existing model.
    pub fn create_attribute(
        &mut self,
        model_id: &ModelId,
        name: impl Into<String>,
        tag: Tag,
        value: Value,
    ) -> Result<AttributeKey, StoreError> {
        let key = AttributeKey::with_tag(model_id.clone(), name, tag);
        let model = self
            .models
            .get_mut(model_id)
            .ok_or_else(|| StoreError::UnknownModel(model_id.clone()))?;
        if model.find_attribute_by_tag(&key.name, tag).is_some() {
            return Err(StoreError::DuplicateAttribute(key));
        }
        model.push_attribute(Attribute::new(key.clone(), value));
        if self.tracking {
            model.mark_dirty();
            self.tracker.record_attribute_created(key.clone());
        }
        Ok(key)
    }

    /// Delete a model. Attribute removal listeners fire in insertion order,
    /// then model listeners; the model is unreachable before any of them run.
    pub fn delete_model(&mut self, id: &ModelId) -> Result<(), StoreError> {
        if !self.models.contains_key(id) {
            return Err(StoreError::UnknownModel(id.clone()));
        }
        self.remove_model(id);
        self.dispatch();
        Ok(())
    }

    pub fn find_model(&self, id: &ModelId) -> Option<&PresentationModel> {
        self.models.get(id)
    }

    /// Models of the given type, in no particular order.
    pub fn find_models_by_type(&self, model_type: &str) -> Vec<&PresentationModel> {
        self.models.values().filter(|m| m.model_type() == model_type).collect()
    }

    pub fn models(&self) -> impl Iterator<Item = &PresentationModel> {
        self.models.values()
    }

    pub fn contains(&self, id: &ModelId) -> bool {
        self.models.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    // ----- Attributes -----

    pub fn find_attribute(&self, key: &AttributeKey) -> Option<&Attribute> {
        self.models.get(&key.model_id)?.find_attribute_by_tag(&key.name, key.tag)
    }

    /// Current value of an attribute. Never has side effects.
    pub fn get(&self, key: &AttributeKey) -> Option<&Value> {
        self.find_attribute(key).map(Attribute::value)
    }

    /// Set an attribute value. Returns whether the value actually changed.
    ///
    /// # Errors
    ///
    /// `UnknownModel`/`UnknownAttribute` for a missing target and `TypeMismatch`
    /// when the value does not fit the attribute's declared type. A failed set
    /// leaves the store untouched.
    pub fn set(&mut self, key: &AttributeKey, value: impl Into<Value>) -> Result<bool, StoreError> {
        let changed = self.write_value(key, value.into())?;
        self.dispatch();
        Ok(changed)
    }

    /// Attributes sharing a qualifier mirror each other's value.
    pub fn set_qualifier(&mut self, key: &AttributeKey, qualifier: Option<String>) -> Result<bool, StoreError> {
        let changed = self.update_qualifier(key, qualifier.clone())?;
        if changed && self.tracking {
            let value = qualifier.map(Value::String).unwrap_or_default();
            self.tracker.record_metadata_change(key, MetadataName::Qualifier, value);
            self.mark_dirty(&key.model_id);
        }
        Ok(changed)
    }

    /// Make the current values of a model its base values.
    pub fn rebase(&mut self, model_id: &ModelId) -> Result<usize, StoreError> {
        let model = self
            .models
            .get_mut(model_id)
            .ok_or_else(|| StoreError::UnknownModel(model_id.clone()))?;

        let mut rebased = Vec::new();
        for attribute in model.attributes_mut() {
            let value = attribute.value().clone();
            if let Ok(true) = attribute.set_base_value(value.clone()) {
                rebased.push((attribute.key().clone(), value));
            }
        }
        if self.tracking {
            for (key, value) in &rebased {
                self.tracker.record_metadata_change(key, MetadataName::BaseValue, value.clone());
            }
        }
        Ok(rebased.len())
    }

    /// Restore every modified attribute of a model to its base value.
    pub fn reset(&mut self, model_id: &ModelId) -> Result<usize, StoreError> {
        let model = self
            .models
            .get(model_id)
            .ok_or_else(|| StoreError::UnknownModel(model_id.clone()))?;
        let modified: Vec<(AttributeKey, Value)> = model
            .attributes()
            .iter()
            .filter(|a| a.is_modified())
            .map(|a| (a.key().clone(), a.base_value().clone()))
            .collect();

        let mut reset = 0;
        for (key, base_value) in modified {
            if self.write_value(&key, base_value)? {
                reset += 1;
            }
        }
        self.dispatch();
        Ok(reset)
    }

    // ----- Listeners -----

    /// Fires once per effective update of `key`, local or remote.
    pub fn on_changed<F>(&mut self, key: AttributeKey, listener: F) -> Subscription
    where
        F: FnMut(&ValueChange, &mut ModelStore) + Send + 'static,
    {
        let listener: Box<ChangeListener> = Box::new(listener);
        self.listeners.on_changed(key, listener)
    }

    /// Fires once when `key` disappears with its model.
    pub fn on_removed<F>(&mut self, key: AttributeKey, listener: F) -> Subscription
    where
        F: FnMut(&AttributeRemoved, &mut ModelStore) + Send + 'static,
    {
        let listener: Box<RemovalListener> = Box::new(listener);
        self.listeners.on_removed(key, listener)
    }

    /// Model added/removed notifications, optionally only for one model type.
    pub fn on_model_event<F>(&mut self, model_type: Option<&str>, listener: F) -> Subscription
    where
        F: FnMut(&ModelEvent, &mut ModelStore) + Send + 'static,
    {
        let listener: Box<ModelListener> = Box::new(listener);
        self.listeners.on_model_event(model_type.map(str::to_string), listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // ----- Synchronization -----

    pub fn has_pending_changes(&self) -> bool {
        self.tracker.has_pending()
    }

    /// Drain the change tracker into commands for the next outgoing batch.
    pub fn flush_changes(&mut self) -> Vec<Command> {
        let commands = self.tracker.flush(&self.models);
        for model in self.models.values_mut() {
            model.clear_dirty();
        }
        commands
    }

    /// Return the commands of a failed exchange to the tracker.
    pub fn requeue(&mut self, commands: Vec<Command>) {
        self.tracker.requeue(commands);
    }

    /// Drop every model as if the peer had deleted it, together with all
    /// pending changes. Removal listeners fire as for a remote delete.
    pub fn discard_all(&mut self) -> usize {
        let ids: Vec<ModelId> = self.models.keys().cloned().collect();
        self.tracking = false;
        for id in &ids {
            self.remove_model(id);
        }
        self.tracking = true;
        self.tracker = ChangeTracker::new();
        self.dispatch();
        ids.len()
    }

    pub(crate) fn record_action(&mut self, name: &str, ticket: Option<u64>) {
        self.tracker.record_action(name, ticket);
    }

    /// Apply a remote batch. Actions are ignored; see [`Self::apply_remote_with`].
    pub fn apply_remote(&mut self, commands: Vec<Command>) -> ApplyReport {
        self.apply_remote_with(commands, |_, name| {
            debug!(action = name, "Ignoring remote action");
        })
    }

    /// Apply a remote batch in order, handing each `Action` to `on_action`.
    ///
    /// Mutations made by `on_action` are local and tracked. Listeners run once,
    /// after the last command.
    pub fn apply_remote_with<F>(&mut self, commands: Vec<Command>, mut on_action: F) -> ApplyReport
    where
        F: FnMut(&mut ModelStore, &str),
    {
        let was_deferred = std::mem::replace(&mut self.deferred, true);
        let mut report = ApplyReport::default();

        for command in commands {
            if let Command::Action { name, .. } = &command {
                on_action(self, name);
                report.actions += 1;
                continue;
            }

            let kind = command.kind();
            self.tracking = false;
            let result = self.apply_command(command);
            self.tracking = true;

            match result {
                Ok(true) => report.applied += 1,
                Ok(false) => report.ignored += 1,
                Err(error) => {
                    warn!(side = %self.side, command = kind, error = %error, "Dropping remote command");
                    report.rejected.push(error);
                }
            }
        }

        self.deferred = was_deferred;
        self.dispatch();
        report
    }

    // ----- Internals -----

    fn generate_id(&mut self) -> ModelId {
        loop {
            self.next_id += 1;
            let id = ModelId::generated(self.next_id, self.side);
            if !self.models.contains_key(&id) {
                return id;
            }
        }
    }

    fn insert_model(&mut self, mut model: PresentationModel) {
        let id = model.id().clone();
        for attribute in model.attributes() {
            if let Some(qualifier) = attribute.qualifier() {
                self.qualifiers
                    .entry(qualifier.to_string())
                    .or_default()
                    .push(attribute.key().clone());
            }
        }
        if self.tracking {
            model.mark_dirty();
            self.tracker.record_model_created(id.clone());
        }
        self.events.push_back(StoreEvent::ModelAdded {
            id: id.clone(),
            model_type: model.model_type().to_string(),
        });
        self.models.insert(id, model);
    }

    fn remove_model(&mut self, id: &ModelId) {
        let Some(model) = self.models.remove(id) else {
            return;
        };
        let model_type = model.model_type().to_string();

        for attribute in model.into_attributes() {
            if let Some(qualifier) = attribute.qualifier() {
                self.unindex_qualifier(qualifier, attribute.key());
            }
            let targets = self.listeners.detach(attribute.key());
            self.events.push_back(StoreEvent::AttributeRemoved(
                AttributeRemoved {
                    key: attribute.key().clone(),
                    last_value: attribute.value().clone(),
                },
                targets,
            ));
        }
        self.events.push_back(StoreEvent::ModelRemoved {
            id: id.clone(),
            model_type,
        });

        if self.tracking {
            self.tracker.record_model_deleted(id);
        } else {
            self.tracker.forget_model(id);
        }
    }

    fn write_value(&mut self, key: &AttributeKey, value: Value) -> Result<bool, StoreError> {
        let attribute = self.attribute_mut(key)?;
        let change = attribute
            .set(value)
            .map_err(|source| StoreError::TypeMismatch {
                key: key.clone(),
                source,
            })?;
        let Some(change) = change else {
            return Ok(false);
        };
        let qualifier = attribute.qualifier().map(str::to_string);
        let new_value = change.new_value.clone();

        self.note_change(change);
        if let Some(qualifier) = qualifier {
            self.mirror(&qualifier, key, new_value);
        }
        Ok(true)
    }

    fn mirror(&mut self, qualifier: &str, origin: &AttributeKey, value: Value) {
        let Some(keys) = self.qualifiers.get(qualifier) else {
            return;
        };
        let targets: Vec<AttributeKey> = keys.iter().filter(|k| *k != origin).cloned().collect();

        for key in targets {
            let Ok(attribute) = self.attribute_mut(&key) else {
                continue;
            };
            match attribute.set(value.clone()) {
                Ok(Some(change)) => self.note_change(change),
                Ok(None) => {}
                Err(error) => {
                    warn!(attribute = %key, qualifier, error = %error, "Qualified attribute cannot mirror value");
                }
            }
        }
    }

    fn note_change(&mut self, change: ValueChange) {
        if self.tracking {
            self.tracker.record_value_change(&change);
            self.mark_dirty(&change.key.model_id);
        }
        self.events.push_back(StoreEvent::AttributeChanged(change));
    }

    fn mark_dirty(&mut self, model_id: &ModelId) {
        if let Some(model) = self.models.get_mut(model_id) {
            model.mark_dirty();
        }
    }

    fn attribute_mut(&mut self, key: &AttributeKey) -> Result<&mut Attribute, StoreError> {
        self.models
            .get_mut(&key.model_id)
            .ok_or_else(|| StoreError::UnknownModel(key.model_id.clone()))?
            .attribute_mut(&key.name, key.tag)
            .ok_or_else(|| StoreError::UnknownAttribute(key.clone()))
    }

    fn update_qualifier(&mut self, key: &AttributeKey, qualifier: Option<String>) -> Result<bool, StoreError> {
        let attribute = self.attribute_mut(key)?;
        let previous = attribute.qualifier().map(str::to_string);
        if !attribute.set_qualifier(qualifier.clone()) {
            return Ok(false);
        }
        if let Some(previous) = previous {
            self.unindex_qualifier(&previous, key);
        }
        if let Some(qualifier) = qualifier {
            self.qualifiers.entry(qualifier).or_default().push(key.clone());
        }
        Ok(true)
    }

    fn unindex_qualifier(&mut self, qualifier: &str, key: &AttributeKey) {
        if let Some(keys) = self.qualifiers.get_mut(qualifier) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.qualifiers.remove(qualifier);
            }
        }
    }

    fn apply_command(&mut self, command: Command) -> Result<bool, StoreError> {
        match command {
            Command::CreatePresentationModel {
                model_id,
                model_type,
                attributes,
            } => {
                if let Some(existing) = self.models.get(&model_id) {
                    if existing.model_type() != model_type {
                        return Err(StoreError::DuplicateId(model_id));
                    }
                    let mut changed = false;
                    for snapshot in attributes {
                        changed |= self.reconcile_attribute(&model_id, snapshot)?;
                    }
                    return Ok(changed);
                }

                let mut seen = HashSet::new();
                let mut built = Vec::with_capacity(attributes.len());
                for snapshot in attributes {
                    let key = AttributeKey::with_tag(model_id.clone(), snapshot.name.clone(), snapshot.tag);
                    if !seen.insert((snapshot.name.clone(), snapshot.tag)) {
                        return Err(StoreError::DuplicateAttribute(key));
                    }
                    let attribute = Attribute::from_snapshot(&model_id, snapshot)
                        .map_err(|source| StoreError::TypeMismatch { key, source })?;
                    built.push(attribute);
                }
                self.insert_model(PresentationModel::new(model_id, model_type, built));
                Ok(true)
            }
            Command::DeletePresentationModel { model_id } => {
                if !self.models.contains_key(&model_id) {
                    return Ok(false);
                }
                self.remove_model(&model_id);
                Ok(true)
            }
            Command::CreateAttribute { model_id, attribute } => {
                if !self.models.contains_key(&model_id) {
                    return Err(StoreError::UnknownModel(model_id));
                }
                self.reconcile_attribute(&model_id, attribute)
            }
            Command::ChangeAttributeValue {
                model_id,
                attribute_name,
                tag,
                new_value,
                ..
            } => {
                let key = AttributeKey::with_tag(model_id, attribute_name, tag);
                self.remote_set(&key, new_value)
            }
            Command::ChangeAttributeMetadata {
                model_id,
                attribute_name,
                tag,
                metadata,
                value,
            } => {
                let key = AttributeKey::with_tag(model_id, attribute_name, tag);
                match metadata {
                    MetadataName::Qualifier => {
                        let qualifier = value.as_str().map(str::to_string);
                        self.update_qualifier(&key, qualifier)
                    }
                    MetadataName::BaseValue => self
                        .attribute_mut(&key)?
                        .set_base_value(value)
                        .map_err(|source| StoreError::TypeMismatch { key, source }),
                }
            }
            Command::Action { .. } => Ok(false),
        }
    }

    fn reconcile_attribute(&mut self, model_id: &ModelId, snapshot: AttributeSnapshot) -> Result<bool, StoreError> {
        let key = AttributeKey::with_tag(model_id.clone(), snapshot.name.clone(), snapshot.tag);
        if self.find_attribute(&key).is_some() {
            let qualifier_changed = self.update_qualifier(&key, snapshot.qualifier)?;
            let value_changed = self.remote_set(&key, snapshot.value)?;
            return Ok(qualifier_changed || value_changed);
        }

        let attribute = Attribute::from_snapshot(model_id, snapshot).map_err(|source| StoreError::TypeMismatch {
            key: key.clone(),
            source,
        })?;
        if let Some(qualifier) = attribute.qualifier() {
            self.qualifiers
                .entry(qualifier.to_string())
                .or_default()
                .push(key.clone());
        }
        if let Some(model) = self.models.get_mut(model_id) {
            model.push_attribute(attribute);
        }
        Ok(true)
    }

    fn remote_set(&mut self, key: &AttributeKey, value: Value) -> Result<bool, StoreError> {
        let value_type: ValueType = self.attribute_mut(key)?.value_type();
        let value = value_type.coerce(value).map_err(|source| StoreError::TypeMismatch {
            key: key.clone(),
            source,
        })?;

        match self.side {
            Side::Server => {
                if self.tracker.discard_value(key) {
                    debug!(attribute = %key, "Client change supersedes pending server change");
                }
            }
            Side::Client => {
                if self.tracker.pending_value(key).is_some() {
                    debug!(attribute = %key, "Keeping pending local value over server value");
                    self.tracker.acknowledge(key, value);
                    return Ok(false);
                }
            }
        }
        self.write_value(key, value)
    }

    fn dispatch(&mut self) {
        if self.dispatching || self.deferred {
            return;
        }
        self.dispatching = true;

        while let Some(event) = self.events.pop_front() {
            match event {
                StoreEvent::ModelAdded { id, model_type } => {
                    let targets = self.listeners.model_targets(&model_type);
                    let event = ModelEvent::Added { id, model_type };
                    for target in targets.into_iter().filter(Registered::is_active) {
                        target.with(|listener| listener(&event, self));
                    }
                }
                StoreEvent::AttributeChanged(change) => {
                    for target in self.listeners.change_targets(&change.key) {
                        if target.is_active() {
                            target.with(|listener| listener(&change, self));
                        }
                    }
                }
                StoreEvent::AttributeRemoved(removed, targets) => {
                    for target in targets {
                        if target.is_active() {
                            target.with(|listener| listener(&removed, self));
                        }
                    }
                }
                StoreEvent::ModelRemoved { id, model_type } => {
                    let targets = self.listeners.model_targets(&model_type);
                    let event = ModelEvent::Removed { id, model_type };
                    for target in targets.into_iter().filter(Registered::is_active) {
                        target.with(|listener| listener(&event, self));
                    }
                }
            }
        }

        self.dispatching = false;
    }
}

impl std::fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStore")
            .field("side", &self.side)
            .field("models", &self.models.len())
            .field("pending", &self.tracker.len())
            .finish()
    }
}

struct PendingAttribute {
    name: String,
    tag: Tag,
    value: Value,
    value_type: Option<ValueType>,
    qualifier: Option<String>,
}

/// Declares a model and its initial attributes; nothing is created until
/// [`create`](Self::create) validates the whole declaration.
pub struct PresentationModelBuilder<'a> {
    store: &'a mut ModelStore,
    id: Option<ModelId>,
    model_type: String,
    attributes: Vec<PendingAttribute>,
}

impl PresentationModelBuilder<'_> {
    pub fn with_id(mut self, id: impl Into<ModelId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attribute(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_tagged_attribute(name, Tag::Value, value)
    }

    pub fn with_tagged_attribute(mut self, name: impl Into<String>, tag: Tag, value: impl Into<Value>) -> Self {
        self.attributes.push(PendingAttribute {
            name: name.into(),
            tag,
            value: value.into(),
            value_type: None,
            qualifier: None,
        });
        self
    }

    /// Attribute with a declared type; the initial value is coerced onto it.
    pub fn with_typed_attribute(
        mut self,
        name: impl Into<String>,
        value_type: ValueType,
        value: impl Into<Value>,
    ) -> Self {
        self.attributes.push(PendingAttribute {
            name: name.into(),
            tag: Tag::Value,
            value: value.into(),
            value_type: Some(value_type),
            qualifier: None,
        });
        self
    }

    pub fn with_qualified_attribute(
        mut self,
        name: impl Into<String>,
        qualifier: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.attributes.push(PendingAttribute {
            name: name.into(),
            tag: Tag::Value,
            value: value.into(),
            value_type: None,
            qualifier: Some(qualifier.into()),
        });
        self
    }

    pub fn create(self) -> Result<ModelId, StoreError> {
        let store = self.store;
        let id = match self.id {
            Some(id) if store.models.contains_key(&id) => return Err(StoreError::DuplicateId(id)),
            Some(id) => id,
            None => store.generate_id(),
        };

        let mut seen = HashSet::new();
        let mut attributes = Vec::with_capacity(self.attributes.len());
        for pending in self.attributes {
            let key = AttributeKey::with_tag(id.clone(), pending.name, pending.tag);
            if !seen.insert((key.name.clone(), key.tag)) {
                return Err(StoreError::DuplicateAttribute(key));
            }
            let attribute = match pending.value_type {
                Some(value_type) => Attribute::typed(key.clone(), value_type, pending.value)
                    .map_err(|source| StoreError::TypeMismatch { key, source })?,
                None => Attribute::new(key, pending.value),
            };
            attributes.push(attribute.with_qualifier(pending.qualifier));
        }

        debug!(side = %store.side, model_id = %id, model_type = %self.model_type, "Creating presentation model");
        store.insert_model(PresentationModel::new(id.clone(), self.model_type, attributes));
        store.dispatch();
        Ok(id)
    }
}
