// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Long Poll Registry - Pending-response slots keyed by session
//!
//! A held long poll is a parked future waiting on a oneshot, not a blocked
//! thread. Releasing a session completes its slot; a release that arrives
//! before the poll registered is remembered and completes the next poll
//! immediately.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::domain::session::SessionId;

struct Slot {
    generation: u64,
    release: oneshot::Sender<()>,
}

#[derive(Default)]
struct Slots {
    active: HashMap<SessionId, Slot>,
    early_release: HashSet<SessionId>,
    next_generation: u64,
}

/// Handle held by the request parked on a slot.
pub struct LongPollTicket {
    generation: u64,
    released: oneshot::Receiver<()>,
}

impl LongPollTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolves when the slot is released or superseded by a newer poll.
    pub async fn released(self) {
        let _ = self.released.await;
    }
}

#[derive(Default)]
pub struct LongPollRegistry {
    slots: Mutex<Slots>,
}

impl LongPollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a poll for `session`. A previous poll of the same session is
    /// completed as released.
    pub fn register(&self, session: SessionId) -> LongPollTicket {
        let (release, released) = oneshot::channel();
        let mut slots = self.slots.lock();
        slots.next_generation += 1;
        let generation = slots.next_generation;

        if slots.early_release.remove(&session) {
            debug!(session_id = %session, "Long poll released before it was registered");
            let _ = release.send(());
            return LongPollTicket { generation, released };
        }

        if let Some(previous) = slots.active.insert(session, Slot { generation, release }) {
            debug!(session_id = %session, "Superseding outstanding long poll");
            let _ = previous.release.send(());
        }
        LongPollTicket { generation, released }
    }

    /// Complete the session's outstanding poll. Returns false when none was
    /// held, in which case the next poll is released on arrival.
    pub fn release(&self, session: SessionId) -> bool {
        let mut slots = self.slots.lock();
        match slots.active.remove(&session) {
            Some(slot) => {
                let _ = slot.release.send(());
                true
            }
            None => {
                slots.early_release.insert(session);
                false
            }
        }
    }

    /// Release every held poll. Used on shutdown.
    pub fn release_all(&self) -> usize {
        let mut slots = self.slots.lock();
        let released = slots.active.len();
        for (_, slot) in slots.active.drain() {
            let _ = slot.release.send(());
        }
        slots.early_release.clear();
        released
    }

    /// Drop a slot after its poll finished, unless a newer poll replaced it.
    pub fn complete(&self, session: SessionId, generation: u64) {
        let mut slots = self.slots.lock();
        if slots.active.get(&session).is_some_and(|s| s.generation == generation) {
            slots.active.remove(&session);
        }
    }

    /// Forget everything about a closed session.
    pub fn forget(&self, session: SessionId) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.active.remove(&session) {
            let _ = slot.release.send(());
        }
        slots.early_release.remove(&session);
    }

    pub fn pending(&self) -> usize {
        self.slots.lock().active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_release_completes_held_poll() {
        let registry = LongPollRegistry::new();
        let session = SessionId::new();
        let ticket = registry.register(session);
        assert_eq!(registry.pending(), 1);

        assert!(registry.release(session));
        timeout(Duration::from_secs(1), ticket.released()).await.unwrap();
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn test_early_release_completes_next_poll() {
        let registry = LongPollRegistry::new();
        let session = SessionId::new();

        assert!(!registry.release(session));
        let ticket = registry.register(session);
        timeout(Duration::from_secs(1), ticket.released()).await.unwrap();
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn test_new_poll_supersedes_previous() {
        let registry = LongPollRegistry::new();
        let session = SessionId::new();
        let first = registry.register(session);
        let second = registry.register(session);

        timeout(Duration::from_secs(1), first.released()).await.unwrap();
        registry.complete(session, 1);
        assert_eq!(registry.pending(), 1);

        registry.complete(session, second.generation());
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn test_release_all() {
        let registry = LongPollRegistry::new();
        let tickets: Vec<_> = (0..3).map(|_| registry.register(SessionId::new())).collect();

        assert_eq!(registry.release_all(), 3);
        for ticket in tickets {
            timeout(Duration::from_secs(1), ticket.released()).await.unwrap();
        }
    }
}
