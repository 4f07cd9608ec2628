//! Keyed async lock table.
//!
//! One logical mutex per key, created on demand. Used to serialize the
//! multi-gateway next-counter call per device and to coalesce registry
//! cache fills per radio address (holders re-check the cache after
//! acquiring, so only the first of N concurrent misses hits the backend).
//!
//! The table itself is guarded by a synchronous `parking_lot` mutex; the
//! per-key locks are `tokio` mutexes because they are held across awaits.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of per-key async mutexes.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    entries: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for `key`, creating it on first use. The table
    /// mutex is released before awaiting, so contention on one key never
    /// blocks other keys.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = self.entries.lock();
            Arc::clone(
                entries
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        entry.lock_owned().await
    }

    /// Drop lock entries nobody currently holds or awaits.
    pub fn prune(&self) {
        self.entries
            .lock()
            .retain(|_, entry| Arc::strong_count(entry) > 1);
    }

    /// Number of live entries (for tests and diagnostics).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
