//! Per-resource exclusive sections
//!
//! Sweeps and manual requests may target the same monitor record at the same time. Every
//! probe → compare → persist → notify sequence runs while holding the lock of its resource,
//! so two writers never interleave on one record while different records proceed in
//! parallel.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed set of async mutexes
#[derive(Debug)]
pub struct ResourceLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for ResourceLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

/// Held while a resource is being processed
#[derive(Debug)]
pub struct ResourceGuard {
    _guard: OwnedMutexGuard<()>,
}

impl<K> ResourceLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // forget locks nobody holds or waits for
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait until the resource is free
    pub async fn acquire(&self, key: &K) -> ResourceGuard {
        let lock = self.entry(key);
        ResourceGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Take the resource if nobody else is processing it
    pub fn try_acquire(&self, key: &K) -> Option<ResourceGuard> {
        let lock = self.entry(key);
        lock.try_lock_owned()
            .ok()
            .map(|guard| ResourceGuard { _guard: guard })
    }
}
