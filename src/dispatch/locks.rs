//! In-process keyed async locks.
//!
//! Campaign locks keep two dispatch runs off the same campaign; enrollment
//! locks serialize a delivery's exit from `pending` against suppression.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// A table of async mutexes keyed by id. Entries nobody holds are pruned.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: Uuid) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
        Arc::clone(map.entry(key).or_default())
    }

    /// Wait for the lock on `key`.
    pub async fn lock(&self, key: Uuid) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// Take the lock on `key` only if it is free.
    pub fn try_lock(&self, key: Uuid) -> Option<OwnedMutexGuard<()>> {
        self.entry(key).try_lock_owned().ok()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock tables shared by the dispatcher, the reply listener and the manager.
#[derive(Debug, Default)]
pub struct EngineLocks {
    pub campaigns: KeyedLocks,
    pub enrollments: KeyedLocks,
}
