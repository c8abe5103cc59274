//! Coalesce concurrent work for the same key into one execution.
//!
//! The first caller for a key becomes the leader and runs the work. Callers
//! arriving while it runs block until it finishes. On success they share the
//! leader's value. On failure they do not inherit the leader's error; they
//! start over, and at most one of them becomes the next leader.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Completion state of one in-flight execution.
struct Slot<V> {
    /// `None` while running, `Some(outcome)` once finished.
    outcome: Mutex<Option<Option<V>>>,
    ready: Condvar,
}

impl<V: Clone> Slot<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn finish(&self, value: Option<V>) {
        let mut outcome = self.outcome.lock();
        *outcome = Some(value);
        self.ready.notify_all();
    }

    fn wait(&self) -> Option<V> {
        let mut outcome = self.outcome.lock();
        while outcome.is_none() {
            self.ready.wait(&mut outcome);
        }
        outcome.clone().flatten()
    }
}

/// Per-key single-flight coordinator.
pub struct SingleFlight<K, V> {
    in_flight: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key` unless another caller is already running it.
    pub fn execute<E, F>(&self, key: K, work: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = loop {
            let (slot, leader) = {
                let mut map = self.in_flight.lock();
                match map.get(&key) {
                    Some(slot) => (Arc::clone(slot), false),
                    None => {
                        let slot = Arc::new(Slot::new());
                        map.insert(key.clone(), Arc::clone(&slot));
                        (slot, true)
                    }
                }
            };

            if leader {
                break slot;
            }
            if let Some(value) = slot.wait() {
                return Ok(value);
            }
        };

        let mut guard = LeaderGuard {
            flight: self,
            key: Some(key),
            slot,
        };
        let result = work();
        guard.complete(result.as_ref().ok().cloned());
        result
    }

    /// Number of keys currently being worked on.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Releases waiters even if the leader's work panics.
struct LeaderGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    flight: &'a SingleFlight<K, V>,
    key: Option<K>,
    slot: Arc<Slot<V>>,
}

impl<K, V> LeaderGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn complete(&mut self, value: Option<V>) {
        if let Some(key) = self.key.take() {
            self.flight.in_flight.lock().remove(&key);
            self.slot.finish(value);
        }
    }
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        self.complete(None);
    }
}
