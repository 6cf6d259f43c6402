// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Store Executor
//!
//! Confines a [`ModelStore`] to a single tokio task. Local application logic
//! and remote batch application both marshal onto that task as jobs, so every
//! mutation of one store is serialized without a lock around the store and
//! listeners may freely mutate the store they observe.
//!
//! The executor publishes whether the store has pending local changes on a
//! `watch` channel. The value is current by the time [`StoreHandle::run`]
//! returns.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::domain::model_store::ModelStore;
use crate::domain::session::Side;

type Job = Box<dyn FnOnce(&mut ModelStore, &watch::Sender<bool>) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("Model store executor has stopped")]
    Stopped,
}

#[derive(Debug, Default)]
struct StoreStats {
    jobs: AtomicU64,
    models: AtomicUsize,
    listeners: AtomicUsize,
}

/// Point-in-time statistics of one executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatsSnapshot {
    pub side: Side,
    pub jobs_executed: u64,
    pub models: usize,
    pub listeners: usize,
    pub pending_changes: bool,
}

/// Cloneable handle to a store running on its own task.
///
/// The task ends once every handle is dropped.
#[derive(Clone)]
pub struct StoreHandle {
    side: Side,
    jobs: mpsc::UnboundedSender<Job>,
    pending: watch::Receiver<bool>,
    stats: Arc<StoreStats>,
}

impl StoreHandle {
    /// Move `store` onto a new task. Must be called inside a tokio runtime.
    pub fn spawn(store: ModelStore) -> Self {
        let side = store.side();
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        let (pending_tx, pending) = watch::channel(store.has_pending_changes());
        let stats = Arc::new(StoreStats::default());

        let task_stats = stats.clone();
        tokio::spawn(async move {
            let mut store = store;
            while let Some(job) = queue.recv().await {
                job(&mut store, &pending_tx);
                publish_pending(&pending_tx, &store);
                task_stats.jobs.fetch_add(1, Ordering::Relaxed);
                task_stats.models.store(store.len(), Ordering::Relaxed);
                task_stats.listeners.store(store.listener_count(), Ordering::Relaxed);
            }
            debug!(side = %side, "Model store executor stopped");
        });

        Self {
            side,
            jobs,
            pending,
            stats,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Run `f` on the store's task and return its result.
    pub async fn run<F, R>(&self, f: F) -> Result<R, ExecutorError>
    where
        F: FnOnce(&mut ModelStore) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |store, pending| {
            let result = f(store);
            publish_pending(pending, store);
            let _ = tx.send(result);
        });
        self.jobs.send(job).map_err(|_| ExecutorError::Stopped)?;
        rx.await.map_err(|_| ExecutorError::Stopped)
    }

    /// Queue `f` without waiting for it.
    pub fn submit<F>(&self, f: F) -> Result<(), ExecutorError>
    where
        F: FnOnce(&mut ModelStore) + Send + 'static,
    {
        let job: Job = Box::new(move |store, _| f(store));
        self.jobs.send(job).map_err(|_| ExecutorError::Stopped)
    }

    pub fn has_pending_changes(&self) -> bool {
        *self.pending.borrow()
    }

    /// Receiver following the pending-changes flag.
    pub fn pending_changes(&self) -> watch::Receiver<bool> {
        self.pending.clone()
    }

    /// Resolve once the store has pending changes. Returns false if the
    /// executor stopped first.
    pub async fn changes_pending(&self) -> bool {
        let mut pending = self.pending.clone();
        // The `watch::Ref` returned by `wait_for` has to drop before `pending`.
        let ready = pending.wait_for(|p| *p).await.is_ok();
        ready
    }

    pub fn is_running(&self) -> bool {
        !self.jobs.is_closed()
    }

    pub fn stats(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            side: self.side,
            jobs_executed: self.stats.jobs.load(Ordering::Relaxed),
            models: self.stats.models.load(Ordering::Relaxed),
            listeners: self.stats.listeners.load(Ordering::Relaxed),
            pending_changes: self.has_pending_changes(),
        }
    }
}

fn publish_pending(pending: &watch::Sender<bool>, store: &ModelStore) {
    let has_pending = store.has_pending_changes();
    pending.send_if_modified(|current| {
        if *current == has_pending {
            return false;
        }
        *current = has_pending;
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attribute::AttributeKey;
    use crate::domain::value::Value;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_job_result() {
        let handle = StoreHandle::spawn(ModelStore::new(Side::Client));
        let id = handle
            .run(|store| store.builder("Counter").with_attribute("count", 1).create())
            .await
            .unwrap()
            .unwrap();

        let value = handle
            .run(move |store| store.get(&AttributeKey::new(id, "count")).cloned())
            .await
            .unwrap();
        assert_eq!(value, Some(Value::Integer(1)));
    }

    #[tokio::test]
    async fn test_pending_flag_is_current_after_run() {
        let handle = StoreHandle::spawn(ModelStore::new(Side::Client));
        assert!(!handle.has_pending_changes());

        handle.run(|store| store.create_model("A", None)).await.unwrap().unwrap();
        assert!(handle.has_pending_changes());

        handle.run(ModelStore::flush_changes).await.unwrap();
        assert!(!handle.has_pending_changes());
    }

    #[tokio::test]
    async fn test_changes_pending_wakes_on_submit() {
        let handle = StoreHandle::spawn(ModelStore::new(Side::Server));
        let waiter = handle.clone();
        let wait = tokio::spawn(async move { waiter.changes_pending().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle
            .submit(|store| {
                store.create_model("A", None).unwrap();
            })
            .unwrap();

        let woke = tokio::time::timeout(Duration::from_secs(1), wait).await.unwrap().unwrap();
        assert!(woke);

        handle.run(|_| ()).await.unwrap();
        assert_eq!(handle.stats().models, 1);
    }
}
