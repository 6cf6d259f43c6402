// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Change Tracker
//!
//! Accumulates change records between two synchronization points and turns
//! them into commands on flush.
//!
//! ## Coalescing Rules
//!
//! - Successive value changes of one attribute collapse into a single record
//!   that keeps the *acknowledged* value from the first change and the latest
//!   value from the last one. A record whose latest value equals the
//!   acknowledged value produces no command.
//! - Records keep the position of their first change, so commands leave in
//!   first-changed-first-sent order.
//! - Creation records are snapshotted at flush time. Value changes to a model
//!   (or attribute) whose creation has not been published yet are absorbed.
//! - Creating and deleting a model before it was ever published cancels both.
//!
//! A batch that failed in transport comes back through [`ChangeTracker::requeue`]
//! and is placed in front of everything recorded since.

use std::collections::HashMap;

use crate::domain::attribute::{AttributeKey, AttributeSnapshot, ValueChange};
use crate::domain::command::{Command, MetadataName};
use crate::domain::presentation_model::{ModelId, PresentationModel};
use crate::domain::value::Value;

#[derive(Debug, Clone)]
enum ChangeRecord {
    ModelCreated {
        model_id: ModelId,
        /// Present when the record came back from a failed batch.
        replayed: Option<(String, Vec<AttributeSnapshot>)>,
    },
    AttributeCreated {
        key: AttributeKey,
        replayed: Option<AttributeSnapshot>,
    },
    ValueChanged {
        key: AttributeKey,
        acknowledged: Value,
        latest: Value,
    },
    MetadataChanged {
        key: AttributeKey,
        metadata: MetadataName,
        value: Value,
    },
    ModelDeleted {
        model_id: ModelId,
    },
    Action {
        name: String,
        ticket: Option<u64>,
    },
}

impl ChangeRecord {
    fn model_id(&self) -> Option<&ModelId> {
        match self {
            ChangeRecord::ModelCreated { model_id, .. } | ChangeRecord::ModelDeleted { model_id } => Some(model_id),
            ChangeRecord::AttributeCreated { key, .. }
            | ChangeRecord::ValueChanged { key, .. }
            | ChangeRecord::MetadataChanged { key, .. } => Some(&key.model_id),
            ChangeRecord::Action { .. } => None,
        }
    }

    fn from_command(command: Command) -> Option<Self> {
        Some(match command {
            Command::CreatePresentationModel {
                model_id,
                model_type,
                attributes,
            } => ChangeRecord::ModelCreated {
                model_id,
                replayed: Some((model_type, attributes)),
            },
            Command::DeletePresentationModel { model_id } => ChangeRecord::ModelDeleted { model_id },
            Command::CreateAttribute { model_id, attribute } => ChangeRecord::AttributeCreated {
                key: AttributeKey::with_tag(model_id, attribute.name.clone(), attribute.tag),
                replayed: Some(attribute),
            },
            Command::ChangeAttributeValue {
                model_id,
                attribute_name,
                tag,
                old_value,
                new_value,
            } => ChangeRecord::ValueChanged {
                key: AttributeKey::with_tag(model_id, attribute_name, tag),
                acknowledged: old_value,
                latest: new_value,
            },
            Command::ChangeAttributeMetadata {
                model_id,
                attribute_name,
                tag,
                metadata,
                value,
            } => ChangeRecord::MetadataChanged {
                key: AttributeKey::with_tag(model_id, attribute_name, tag),
                metadata,
                value,
            },
            command @ Command::Action { .. } if command.is_control_action() => return None,
            Command::Action { name, ticket } => ChangeRecord::Action { name, ticket },
        })
    }
}

/// Pending local changes of one store.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    records: Vec<Option<ChangeRecord>>,
    live: usize,
    values: HashMap<AttributeKey, usize>,
    metadata: HashMap<(AttributeKey, MetadataName), usize>,
    /// Unpublished local creations, which absorb later value changes.
    created_models: HashMap<ModelId, usize>,
    created_attributes: HashMap<AttributeKey, usize>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when at least one record is waiting, even if it may flush to
    /// nothing after coalescing.
    pub fn has_pending(&self) -> bool {
        self.live > 0
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn record_model_created(&mut self, model_id: ModelId) {
        let index = self.push(ChangeRecord::ModelCreated {
            model_id: model_id.clone(),
            replayed: None,
        });
        self.created_models.insert(model_id, index);
    }

    pub fn record_attribute_created(&mut self, key: AttributeKey) {
        if self.created_models.contains_key(&key.model_id) {
            return;
        }
        let index = self.push(ChangeRecord::AttributeCreated {
            key: key.clone(),
            replayed: None,
        });
        self.created_attributes.insert(key, index);
    }

    pub fn record_value_change(&mut self, change: &ValueChange) {
        if self.is_unpublished(&change.key) {
            return;
        }
        if let Some(&index) = self.values.get(&change.key) {
            if let Some(ChangeRecord::ValueChanged { latest, .. }) = self.records[index].as_mut() {
                *latest = change.new_value.clone();
                return;
            }
        }
        let index = self.push(ChangeRecord::ValueChanged {
            key: change.key.clone(),
            acknowledged: change.old_value.clone(),
            latest: change.new_value.clone(),
        });
        self.values.insert(change.key.clone(), index);
    }

    pub fn record_metadata_change(&mut self, key: &AttributeKey, metadata: MetadataName, value: Value) {
        if self.is_unpublished(key) {
            return;
        }
        let slot = (key.clone(), metadata);
        if let Some(&index) = self.metadata.get(&slot) {
            if let Some(ChangeRecord::MetadataChanged { value: pending, .. }) = self.records[index].as_mut() {
                *pending = value;
                return;
            }
        }
        let index = self.push(ChangeRecord::MetadataChanged {
            key: key.clone(),
            metadata,
            value,
        });
        self.metadata.insert(slot, index);
    }

    /// Record a local deletion. Returns false when the deletion cancelled an
    /// unpublished creation and nothing will be sent.
    pub fn record_model_deleted(&mut self, model_id: &ModelId) -> bool {
        let cancelled = self.created_models.contains_key(model_id);
        self.forget_model(model_id);
        if cancelled {
            return false;
        }
        self.push(ChangeRecord::ModelDeleted {
            model_id: model_id.clone(),
        });
        true
    }

    pub fn record_action(&mut self, name: impl Into<String>, ticket: Option<u64>) {
        self.push(ChangeRecord::Action {
            name: name.into(),
            ticket,
        });
    }

    /// Latest local value of `key` if a change is pending that the remote side
    /// has not acknowledged.
    pub fn pending_value(&self, key: &AttributeKey) -> Option<&Value> {
        let index = *self.values.get(key)?;
        match self.records[index].as_ref()? {
            ChangeRecord::ValueChanged {
                acknowledged, latest, ..
            } if acknowledged != latest => Some(latest),
            _ => None,
        }
    }

    /// The remote side now holds `value` for `key`; a pending record keeps its
    /// latest value but is diffed against this one.
    pub fn acknowledge(&mut self, key: &AttributeKey, value: Value) {
        if let Some(&index) = self.values.get(key) {
            if let Some(ChangeRecord::ValueChanged { acknowledged, .. }) = self.records[index].as_mut() {
                *acknowledged = value;
            }
        }
    }

    /// Drop the pending value record for `key`.
    pub fn discard_value(&mut self, key: &AttributeKey) -> bool {
        match self.values.remove(key) {
            Some(index) => {
                self.clear_slot(index);
                true
            }
            None => false,
        }
    }

    /// Drop every record targeting `model_id` apart from a pending deletion.
    pub fn forget_model(&mut self, model_id: &ModelId) {
        let indices: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| match record {
                Some(ChangeRecord::ModelDeleted { .. }) => None,
                Some(record) if record.model_id() == Some(model_id) => Some(index),
                _ => None,
            })
            .collect();
        for index in indices {
            self.clear_slot(index);
        }
        self.values.retain(|key, _| &key.model_id != model_id);
        self.metadata.retain(|(key, _), _| &key.model_id != model_id);
        self.created_attributes.retain(|key, _| &key.model_id != model_id);
        self.created_models.remove(model_id);
    }

    /// Turn every pending record into commands and reset.
    ///
    /// Creation records are snapshotted from `models` now, so they carry every
    /// absorbed change.
    pub fn flush(&mut self, models: &HashMap<ModelId, PresentationModel>) -> Vec<Command> {
        let records = std::mem::take(&mut self.records);
        self.reset_indexes();

        records
            .into_iter()
            .flatten()
            .filter_map(|record| match record {
                ChangeRecord::ModelCreated {
                    replayed: Some((model_type, attributes)),
                    model_id,
                } => Some(Command::CreatePresentationModel {
                    model_id,
                    model_type,
                    attributes,
                }),
                ChangeRecord::ModelCreated { model_id, replayed: None } => {
                    let model = models.get(&model_id)?;
                    Some(Command::CreatePresentationModel {
                        model_type: model.model_type().to_string(),
                        attributes: model.snapshot_attributes(),
                        model_id,
                    })
                }
                ChangeRecord::AttributeCreated {
                    key,
                    replayed: Some(attribute),
                } => Some(Command::CreateAttribute {
                    model_id: key.model_id,
                    attribute,
                }),
                ChangeRecord::AttributeCreated { key, replayed: None } => {
                    let attribute = models.get(&key.model_id)?.find_attribute_by_tag(&key.name, key.tag)?;
                    Some(Command::CreateAttribute {
                        attribute: attribute.snapshot(),
                        model_id: key.model_id,
                    })
                }
                ChangeRecord::ValueChanged {
                    key,
                    acknowledged,
                    latest,
                } => (acknowledged != latest).then(|| Command::change_value(&key, acknowledged, latest)),
                ChangeRecord::MetadataChanged { key, metadata, value } => Some(Command::ChangeAttributeMetadata {
                    model_id: key.model_id,
                    attribute_name: key.name,
                    tag: key.tag,
                    metadata,
                    value,
                }),
                ChangeRecord::ModelDeleted { model_id } => Some(Command::DeletePresentationModel { model_id }),
                ChangeRecord::Action { name, ticket } => Some(Command::Action { name, ticket }),
            })
            .collect()
    }

    /// Put the commands of a failed batch back in front of newer records.
    ///
    /// Value and metadata records recorded since are merged into the replayed
    /// ones, so the retry carries the newest value with the acknowledged value
    /// of the original send. Control actions are not retried.
    pub fn requeue(&mut self, commands: Vec<Command>) {
        let newer = std::mem::take(&mut self.records);
        self.reset_indexes();

        for record in commands.into_iter().filter_map(ChangeRecord::from_command) {
            self.push_indexed(record);
        }
        for record in newer.into_iter().flatten() {
            match record {
                ChangeRecord::ValueChanged { key, latest, acknowledged } => match self.values.get(&key) {
                    Some(&index) => {
                        if let Some(ChangeRecord::ValueChanged { latest: replayed, .. }) = self.records[index].as_mut() {
                            *replayed = latest;
                        }
                    }
                    None => self.push_indexed(ChangeRecord::ValueChanged {
                        key,
                        acknowledged,
                        latest,
                    }),
                },
                ChangeRecord::MetadataChanged { key, metadata, value } => {
                    match self.metadata.get(&(key.clone(), metadata)) {
                        Some(&index) => {
                            if let Some(ChangeRecord::MetadataChanged { value: replayed, .. }) = self.records[index].as_mut() {
                                *replayed = value;
                            }
                        }
                        None => self.push_indexed(ChangeRecord::MetadataChanged { key, metadata, value }),
                    }
                }
                record => self.push_indexed(record),
            }
        }
    }

    fn is_unpublished(&self, key: &AttributeKey) -> bool {
        self.created_models.contains_key(&key.model_id) || self.created_attributes.contains_key(key)
    }

    fn push(&mut self, record: ChangeRecord) -> usize {
        self.records.push(Some(record));
        self.live += 1;
        self.records.len() - 1
    }

    fn push_indexed(&mut self, record: ChangeRecord) {
        let index = self.records.len();
        match &record {
            ChangeRecord::ModelCreated { model_id, replayed: None } => {
                self.created_models.insert(model_id.clone(), index);
            }
            ChangeRecord::AttributeCreated { key, replayed: None } => {
                self.created_attributes.insert(key.clone(), index);
            }
            ChangeRecord::ValueChanged { key, .. } => {
                self.values.insert(key.clone(), index);
            }
            ChangeRecord::MetadataChanged { key, metadata, .. } => {
                self.metadata.insert((key.clone(), *metadata), index);
            }
            _ => {}
        }
        self.push(record);
    }

    fn clear_slot(&mut self, index: usize) {
        if self.records[index].take().is_some() {
            self.live -= 1;
        }
    }

    fn reset_indexes(&mut self) {
        self.live = 0;
        self.values.clear();
        self.metadata.clear();
        self.created_models.clear();
        self.created_attributes.clear();
    }
}
