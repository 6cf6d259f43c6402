// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Subscription handles returned by listener and diagnostics registration.
//!
//! Cancelling is idempotent, thread-safe and allowed from inside the callback
//! being cancelled: the handle only flips a flag (and runs an optional cancel
//! hook once); registries drop inactive entries lazily.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type CancelHook = Box<dyn FnOnce() + Send>;

struct SubscriptionState {
    active: AtomicBool,
    on_cancel: Mutex<Option<CancelHook>>,
}

/// Handle for one registration. Clones share the same registration.
#[derive(Clone)]
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

impl Subscription {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(SubscriptionState {
                active: AtomicBool::new(true),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    /// Registration whose cancellation runs `hook` exactly once.
    pub fn with_cancel(hook: impl FnOnce() + Send + 'static) -> Self {
        let subscription = Self::new();
        *subscription.state.on_cancel.lock() = Some(Box::new(hook));
        subscription
    }

    /// A handle that was never attached to anything.
    pub fn detached() -> Self {
        let subscription = Self::new();
        subscription.state.active.store(false, Ordering::Release);
        subscription
    }

    /// Stop further notifications. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if self.state.active.swap(false, Ordering::AcqRel) {
            let hook = self.state.on_cancel.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
