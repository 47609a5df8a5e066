//! Held conversations.
//!
//! When a hook's result carries a hold request, the dispatcher stores a
//! [`HoldRecord`] under the sender's [`ActorKey`]. The sender's next event is
//! routed straight to that hook, and the record is consumed by that turn
//! whether or not the hook processes it.
//!
//! [`HoldStore`] keeps at most one record per key. Every operation takes the
//! lock once and releases it before returning; the lock is never held while
//! a hook runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::envelope::ActorKey;

/// A pending continuation for one sender.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldRecord {
    /// Hook that claimed the sender's next event.
    pub hook_name: String,
    /// Whatever the hook chose to save.
    pub context: Value,
    /// Dispatch turn that wrote the record; `None` when written from outside.
    origin: Option<u64>,
}

impl HoldRecord {
    pub fn new(hook_name: impl Into<String>, context: Value) -> Self {
        Self {
            hook_name: hook_name.into(),
            context,
            origin: None,
        }
    }

    pub(crate) fn from_turn(hook_name: &str, context: Value, turn: u64) -> Self {
        Self {
            hook_name: hook_name.to_string(),
            context,
            origin: Some(turn),
        }
    }
}

/// Concurrent map from actor key to its held conversation.
#[derive(Debug, Default)]
pub struct HoldStore {
    records: Mutex<HashMap<ActorKey, HoldRecord>>,
    turns: AtomicU64,
}

impl HoldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the record for `key`.
    pub fn get(&self, key: &ActorKey) -> Option<HoldRecord> {
        self.records.lock().get(key).cloned()
    }

    /// Stores `record`, replacing and returning any previous one.
    pub fn put(&self, key: ActorKey, record: HoldRecord) -> Option<HoldRecord> {
        self.records.lock().insert(key, record)
    }

    /// Removes and returns the record for `key`.
    pub fn remove(&self, key: &ActorKey) -> Option<HoldRecord> {
        self.records.lock().remove(key)
    }

    /// Allocates the id of a new dispatch turn, unique within this store.
    pub(crate) fn next_turn(&self) -> u64 {
        self.turns.fetch_add(1, Ordering::Relaxed)
    }

    /// Atomically removes the record for `key` unless it was written during
    /// dispatch turn `turn`.
    ///
    /// A hook that holds during the listen-all phase must not have its record
    /// consumed by the held phase of the very same event.
    pub(crate) fn take_before(&self, key: &ActorKey, turn: u64) -> Option<HoldRecord> {
        let mut records = self.records.lock();
        match records.get(key) {
            Some(record) if record.origin == Some(turn) => None,
            Some(_) => records.remove(key),
            None => None,
        }
    }

    pub fn contains(&self, key: &ActorKey) -> bool {
        self.records.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drops every record.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn member(actor: &str) -> ActorKey {
        ActorKey::Member {
            conversation: "g1".into(),
            actor: actor.into(),
        }
    }

    #[test]
    fn test_put_overwrites() {
        let store = HoldStore::new();
        assert!(
            store
                .put(member("u1"), HoldRecord::new("quiz", json!(1)))
                .is_none()
        );
        let previous = store.put(member("u1"), HoldRecord::new("survey", json!(2)));

        assert_eq!(previous.unwrap().hook_name, "quiz");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&member("u1")).unwrap().hook_name, "survey");
    }

    #[test]
    fn test_remove() {
        let store = HoldStore::new();
        store.put(member("u1"), HoldRecord::new("quiz", json!(null)));
        assert!(store.remove(&member("u1")).is_some());
        assert!(store.remove(&member("u1")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_take_before_skips_records_from_same_turn() {
        let store = HoldStore::new();
        store.put(member("u1"), HoldRecord::from_turn("quiz", json!(1), 7));

        assert!(store.take_before(&member("u1"), 7).is_none());
        assert!(store.contains(&member("u1")));

        let taken = store.take_before(&member("u1"), 8).unwrap();
        assert_eq!(taken.context, json!(1));
        assert!(!store.contains(&member("u1")));
    }

    #[test]
    fn test_turn_ids_are_unique_per_store() {
        let store = Arc::new(HoldStore::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || (0..100).map(|_| store.next_turn()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 400);
    }

    #[test]
    fn test_external_records_always_taken() {
        let store = HoldStore::new();
        store.put(member("u1"), HoldRecord::new("quiz", json!(1)));
        assert!(store.take_before(&member("u1"), 0).is_some());
    }

    #[test]
    fn test_concurrent_distinct_keys() {
        let store = Arc::new(HoldStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let key = member(&format!("{t}-{i}"));
                        store.put(key.clone(), HoldRecord::new("quiz", json!(i)));
                        assert!(store.get(&key).is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 8 * 250);
    }
}
