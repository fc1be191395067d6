//! Shared signal state for the PLC endpoint.
//!
//! [`SignalStore`] owns the full mapping of signal name to current value and
//! is the single synchronization point shared by all protocol adapters.
//! Writes commit as one atomic batch; a batch that actually changed at least
//! one value produces a [`ChangeEvent`] on the store's change feed, in
//! commit order, for the notifier thread to consume.
//!
//! Values are opaque JSON scalars (string, number, boolean, or null); the
//! store never interprets them.

use crate::clock::MonotonicClock;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Bound on undelivered change events. Writers never block on the feed;
/// events past this bound are dropped with a logged error.
pub const EVENT_FEED_CAPACITY: usize = 1024;

/// Record of one committed write batch: which signals changed and when.
///
/// Timestamps are assigned inside the commit critical section and strictly
/// increase in commit order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub changed: HashMap<String, Value>,
    pub timestamp: u64,
}

/// In-memory signal mapping with atomic bulk get/set and a change feed.
pub struct SignalStore {
    entries: RwLock<HashMap<String, Value>>,
    clock: MonotonicClock,
    feed: Sender<ChangeEvent>,
}

impl SignalStore {
    /// Create a store together with the receiving end of its change feed.
    ///
    /// The receiver is handed to the notifier thread; the store keeps the
    /// sending side for the lifetime of the process.
    pub fn new() -> (Self, Receiver<ChangeEvent>) {
        let (feed, events) = bounded(EVENT_FEED_CAPACITY);
        let store = Self {
            entries: RwLock::new(HashMap::new()),
            clock: MonotonicClock::new(),
            feed,
        };
        (store, events)
    }

    /// Current value for every requested name present in the store.
    ///
    /// Names with no entry are omitted from the result, never an error.
    pub fn get(&self, names: &[String]) -> HashMap<String, Value> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        names
            .iter()
            .filter_map(|name| entries.get(name).map(|value| (name.clone(), value.clone())))
            .collect()
    }

    /// Full copy of the current signal mapping.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Atomically merge a write batch into the store.
    ///
    /// Keys whose value differs from the prior value, or that are newly
    /// introduced, make up the returned [`ChangeEvent`]; the same event is
    /// pushed onto the change feed before the commit lock is released, so
    /// feed order always equals commit order. A batch that changed nothing
    /// returns `None` and emits no event.
    pub fn apply(&self, writes: HashMap<String, Value>) -> Option<ChangeEvent> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        let mut changed = HashMap::new();
        for (key, value) in writes {
            if entries.get(&key) == Some(&value) {
                continue;
            }
            entries.insert(key.clone(), value.clone());
            changed.insert(key, value);
        }

        if changed.is_empty() {
            return None;
        }

        let event = ChangeEvent {
            changed,
            timestamp: self.clock.now(),
        };
        match self.feed.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::error!("change feed full, dropping event for {} signals", event.changed.len());
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("change feed disconnected, dropping event");
            }
        }
        Some(event)
    }
}
