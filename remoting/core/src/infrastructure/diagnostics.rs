// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Diagnostics Registry - Injected registry of live diagnostic sources
//!
//! Constructed once at process startup and handed to the components that
//! report through it. Registration returns a [`Subscription`]; cancelling it
//! withdraws the source. A disabled registry hands out detached subscriptions
//! and reports nothing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::application::store_executor::StoreHandle;
use crate::domain::subscription::Subscription;

/// Something that can describe its current state.
pub trait DiagnosticsSource: Send + Sync {
    fn report(&self) -> serde_json::Value;
}

impl DiagnosticsSource for StoreHandle {
    fn report(&self) -> serde_json::Value {
        serde_json::to_value(self.stats()).unwrap_or(serde_json::Value::Null)
    }
}

struct Registration {
    description: String,
    source: Arc<dyn DiagnosticsSource>,
}

/// One entry of a diagnostics report.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsEntry {
    pub id: u64,
    pub description: String,
    pub details: serde_json::Value,
}

struct RegistryInner {
    enabled: AtomicBool,
    next_id: AtomicU64,
    sources: RwLock<BTreeMap<u64, Registration>>,
}

#[derive(Clone)]
pub struct DiagnosticsRegistry {
    inner: Arc<RegistryInner>,
}

impl DiagnosticsRegistry {
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                enabled: AtomicBool::new(enabled),
                next_id: AtomicU64::new(1),
                sources: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Sources registered while disabled are ignored; existing ones stay.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    pub fn register(&self, source: Arc<dyn DiagnosticsSource>, description: impl Into<String>) -> Subscription {
        if !self.is_enabled() {
            return Subscription::detached();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.sources.write().insert(
            id,
            Registration {
                description: description.into(),
                source,
            },
        );

        let inner = Arc::downgrade(&self.inner);
        Subscription::with_cancel(move || {
            if let Some(inner) = inner.upgrade() {
                inner.sources.write().remove(&id);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state of every registered source, in registration order.
    pub fn report(&self) -> Vec<DiagnosticsEntry> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let sources: Vec<(u64, String, Arc<dyn DiagnosticsSource>)> = self
            .inner
            .sources
            .read()
            .iter()
            .map(|(id, r)| (*id, r.description.clone(), r.source.clone()))
            .collect();

        sources
            .into_iter()
            .map(|(id, description, source)| DiagnosticsEntry {
                id,
                description,
                details: source.report(),
            })
            .collect()
    }
}

impl Default for DiagnosticsRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}
