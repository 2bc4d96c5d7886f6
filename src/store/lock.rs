//! Keyed async locks.
//!
//! One `tokio::sync::Mutex` per string key, created on first use. Multi-key
//! acquisition always locks in sorted key order, so two callers asking for
//! overlapping sets cannot deadlock.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Entries beyond this count trigger a sweep of idle keys.
const PRUNE_THRESHOLD: usize = 1024;

/// Held keys. Released on drop.
pub struct KeyGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<String>,
}

impl KeyGuard {
    /// Keys held, in acquisition order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// Lazily populated map of per-key async mutexes.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() > PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire every key in `keys`. Duplicates are collapsed.
    pub async fn acquire<I>(&self, keys: I) -> KeyGuard
    where
        I: IntoIterator<Item = String>,
    {
        let ordered: BTreeSet<String> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for key in &ordered {
            guards.push(self.handle(key).lock_owned().await);
        }
        KeyGuard { _guards: guards, keys: ordered.into_iter().collect() }
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
