// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Listener bookkeeping for a model store.
//!
//! The registry never invokes callbacks itself. The store asks it for the
//! current targets of an event, receives owned handles, and calls them with
//! `&mut ModelStore` so a listener may mutate the store it observes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::attribute::{AttributeKey, ValueChange};
use crate::domain::model_store::ModelStore;
use crate::domain::presentation_model::ModelId;
use crate::domain::subscription::Subscription;
use crate::domain::value::Value;

/// Callback for effective attribute updates.
pub type ChangeListener = dyn FnMut(&ValueChange, &mut ModelStore) + Send;

/// Callback fired when an attribute disappears with its model.
pub type RemovalListener = dyn FnMut(&AttributeRemoved, &mut ModelStore) + Send;

/// Callback for model lifecycle events.
pub type ModelListener = dyn FnMut(&ModelEvent, &mut ModelStore) + Send;

/// An attribute removed together with its model.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRemoved {
    pub key: AttributeKey,
    pub last_value: Value,
}

/// Model lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    Added { id: ModelId, model_type: String },
    Removed { id: ModelId, model_type: String },
}

impl ModelEvent {
    pub fn id(&self) -> &ModelId {
        match self {
            ModelEvent::Added { id, .. } | ModelEvent::Removed { id, .. } => id,
        }
    }

    pub fn model_type(&self) -> &str {
        match self {
            ModelEvent::Added { model_type, .. } | ModelEvent::Removed { model_type, .. } => model_type,
        }
    }
}

/// A registered callback plus the handle that can cancel it.
pub(crate) struct Registered<L: ?Sized> {
    subscription: Subscription,
    callback: Arc<Mutex<Box<L>>>,
}

impl<L: ?Sized> Clone for Registered<L> {
    fn clone(&self) -> Self {
        Self {
            subscription: self.subscription.clone(),
            callback: self.callback.clone(),
        }
    }
}

impl<L: ?Sized> Registered<L> {
    fn new(callback: Box<L>) -> (Self, Subscription) {
        let subscription = Subscription::new();
        let registered = Self {
            subscription: subscription.clone(),
            callback: Arc::new(Mutex::new(callback)),
        };
        (registered, subscription)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.subscription.is_active()
    }

    /// Run `f` against the callback. Dispatch is never re-entrant, so the lock
    /// is always free here.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        let mut callback = self.callback.lock();
        f(&mut **callback)
    }
}

struct ModelRegistration {
    model_type: Option<String>,
    registered: Registered<ModelListener>,
}

/// Per-store listener tables.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    changed: HashMap<AttributeKey, Vec<Registered<ChangeListener>>>,
    removed: HashMap<AttributeKey, Vec<Registered<RemovalListener>>>,
    models: Vec<ModelRegistration>,
}

impl ListenerRegistry {
    pub(crate) fn on_changed(&mut self, key: AttributeKey, listener: Box<ChangeListener>) -> Subscription {
        prune(&mut self.changed);
        let (registered, subscription) = Registered::new(listener);
        self.changed.entry(key).or_default().push(registered);
        subscription
    }

    pub(crate) fn on_removed(&mut self, key: AttributeKey, listener: Box<RemovalListener>) -> Subscription {
        prune(&mut self.removed);
        let (registered, subscription) = Registered::new(listener);
        self.removed.entry(key).or_default().push(registered);
        subscription
    }

    pub(crate) fn on_model_event(&mut self, model_type: Option<String>, listener: Box<ModelListener>) -> Subscription {
        self.models.retain(|m| m.registered.is_active());
        let (registered, subscription) = Registered::new(listener);
        self.models.push(ModelRegistration {
            model_type,
            registered,
        });
        subscription
    }

    pub(crate) fn change_targets(&mut self, key: &AttributeKey) -> Vec<Registered<ChangeListener>> {
        let Some(entries) = self.changed.get_mut(key) else {
            return Vec::new();
        };
        entries.retain(Registered::is_active);
        let targets = entries.clone();
        if entries.is_empty() {
            self.changed.remove(key);
        }
        targets
    }

    /// Remove every listener bound to `key`, returning the removal listeners
    /// that still have to be told.
    pub(crate) fn detach(&mut self, key: &AttributeKey) -> Vec<Registered<RemovalListener>> {
        self.changed.remove(key);
        let mut removed = self.removed.remove(key).unwrap_or_default();
        removed.retain(Registered::is_active);
        removed
    }

    pub(crate) fn model_targets(&mut self, model_type: &str) -> Vec<Registered<ModelListener>> {
        self.models.retain(|m| m.registered.is_active());
        self.models
            .iter()
            .filter(|m| m.model_type.as_deref().is_none_or(|t| t == model_type))
            .map(|m| m.registered.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.changed.values().map(Vec::len).sum::<usize>()
            + self.removed.values().map(Vec::len).sum::<usize>()
            + self.models.len()
    }
}

/// Drop cancelled entries of keys that never fire again.
fn prune<L: ?Sized>(table: &mut HashMap<AttributeKey, Vec<Registered<L>>>) {
    table.retain(|_, entries| {
        entries.retain(Registered::is_active);
        !entries.is_empty()
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_listeners_are_pruned() {
        let mut registry = ListenerRegistry::default();
        let key = AttributeKey::new("1-C", "count");

        let first = registry.on_changed(key.clone(), Box::new(|_, _| {}));
        let _second = registry.on_changed(key.clone(), Box::new(|_, _| {}));
        assert_eq!(registry.change_targets(&key).len(), 2);

        first.unsubscribe();
        assert_eq!(registry.change_targets(&key).len(), 1);
    }

    #[test]
    fn test_registration_sweeps_listeners_of_quiet_keys() {
        let mut registry = ListenerRegistry::default();
        let quiet = AttributeKey::new("1-C", "count");
        let other = AttributeKey::new("2-C", "name");

        let changed = registry.on_changed(quiet.clone(), Box::new(|_, _| {}));
        let removed = registry.on_removed(quiet.clone(), Box::new(|_, _| {}));
        assert_eq!(registry.len(), 2);

        changed.unsubscribe();
        removed.unsubscribe();
        let _changed = registry.on_changed(other.clone(), Box::new(|_, _| {}));
        let _removed = registry.on_removed(other, Box::new(|_, _| {}));
        assert_eq!(registry.len(), 2);
        assert!(!registry.changed.contains_key(&quiet));
        assert!(!registry.removed.contains_key(&quiet));
    }

    #[test]
    fn test_model_listeners_filter_by_type() {
        let mut registry = ListenerRegistry::default();
        let _all = registry.on_model_event(None, Box::new(|_, _| {}));
        let _people = registry.on_model_event(Some("Person".to_string()), Box::new(|_, _| {}));

        assert_eq!(registry.model_targets("Person").len(), 2);
        assert_eq!(registry.model_targets("Order").len(), 1);
    }

    #[test]
    fn test_detach_drops_change_listeners() {
        let mut registry = ListenerRegistry::default();
        let key = AttributeKey::new("1-C", "count");
        let _changed = registry.on_changed(key.clone(), Box::new(|_, _| {}));
        let _removed = registry.on_removed(key.clone(), Box::new(|_, _| {}));

        assert_eq!(registry.detach(&key).len(), 1);
        assert!(registry.change_targets(&key).is_empty());
        assert_eq!(registry.len(), 0);
    }
}
