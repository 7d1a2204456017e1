//! Bounded in-process tier keyed by string.
//!
//! Eviction is insertion-ordered (oldest first), which keeps it deterministic
//! without per-read bookkeeping. Re-inserting an existing key counts as a
//! fresh insertion.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct TierState<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
}

/// Bounded map guarded by a single mutex.
#[derive(Debug)]
pub struct MemoryTier<V> {
    state: Mutex<TierState<V>>,
    capacity: usize,
}

impl<V: Clone> MemoryTier<V> {
    /// A tier holding at most `capacity` entries. Zero disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(TierState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TierState<V>> {
        // The state is consistent after every statement, so a panic in
        // another holder does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().entries.get(key).cloned()
    }

    /// Insert `value`, evicting the oldest entries while at capacity.
    pub fn put(&self, key: impl Into<String>, value: V) {
        if self.capacity == 0 {
            return;
        }
        let key = key.into();
        let mut state = self.lock();

        if state.entries.remove(&key).is_some() {
            state.order.retain(|k| k != &key);
        }
        while state.entries.len() >= self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
        state.order.push_back(key.clone());
        state.entries.insert(key, value);
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut state = self.lock();
        let value = state.entries.remove(key)?;
        state.order.retain(|k| k != key);
        Some(value)
    }

    /// Drop every entry whose key starts with `prefix`; returns how many.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|k, _| !k.starts_with(prefix));
        state.order.retain(|k| !k.starts_with(prefix));
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn evicts_oldest_inserted_first() {
        let tier = MemoryTier::new(2);
        tier.put("a", 1);
        tier.put("b", 2);
        assert_eq!(tier.get("a"), Some(1));

        tier.put("c", 3);
        assert_eq!(tier.get("a"), None);
        assert_eq!(tier.get("b"), Some(2));
        assert_eq!(tier.get("c"), Some(3));
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn reinsert_refreshes_position() {
        let tier = MemoryTier::new(2);
        tier.put("a", 1);
        tier.put("b", 2);
        tier.put("a", 10);
        tier.put("c", 3);

        assert_eq!(tier.get("a"), Some(10));
        assert_eq!(tier.get("b"), None);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let tier = MemoryTier::new(0);
        tier.put("a", 1);
        assert!(tier.is_empty());
    }

    #[test]
    fn remove_prefix_only_touches_matching_keys() {
        let tier = MemoryTier::new(10);
        tier.put("u1::row_group::0", 0);
        tier.put("u1::row_group::1", 1);
        tier.put("u10::row_group::0", 2);

        assert_eq!(tier.remove_prefix("u1::"), 2);
        assert_eq!(tier.get("u10::row_group::0"), Some(2));
        assert_eq!(tier.remove("u10::row_group::0"), Some(2));
        assert!(tier.is_empty());
    }

    #[test]
    fn concurrent_puts_respect_capacity() {
        let tier = Arc::new(MemoryTier::new(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tier = Arc::clone(&tier);
                thread::spawn(move || {
                    for i in 0..200 {
                        tier.put(format!("{t}-{i}"), i);
                        let _ = tier.get(&format!("{t}-{}", i / 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tier.len(), 16);
        let state = tier.lock();
        assert_eq!(state.order.len(), state.entries.len());
    }
}
