//! In-process row-lock manager layered on top of sled's own transactions.
//!
//! `sled`'s multi-tree `transaction()` API gives atomicity but not the
//! deterministic, externally-observable lock ordering SPEC_FULL.md §5
//! demands. `RowLockManager` closes that gap: callers declare the
//! `(equivalent, debtor, creditor)` keys they are about to touch, the
//! manager sorts and deduplicates them, and acquires each key's
//! `tokio::sync::Mutex` in that fixed order — `equivalent` ascending,
//! then the pair ascending — before the sled transaction opens.

use hub_core::types::{EquivalentCode, Pid};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockKey {
    pub equivalent: EquivalentCode,
    pub a: Pid,
    pub b: Pid,
}

impl LockKey {
    pub fn edge(equivalent: &EquivalentCode, from: Pid, to: Pid) -> Self {
        LockKey { equivalent: equivalent.clone(), a: from, b: to }
    }
}

/// Holds the acquired mutexes for the lifetime of one logical transaction.
/// Dropping it releases every lock in reverse acquisition order.
pub struct LockGuardSet {
    _guards: Vec<OwnedMutexGuard<()>>,
}

#[derive(Default)]
pub struct RowLockManager {
    locks: StdMutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl RowLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, key: &LockKey) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().expect("lock table poisoned");
        table.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquire every key in `keys` in deterministic order. Duplicate keys
    /// (the same edge appearing twice in one request) are deduplicated so
    /// the same logical operation never deadlocks itself.
    pub async fn lock_many(&self, mut keys: Vec<LockKey>) -> LockGuardSet {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let mutex = self.get_or_create(key);
            guards.push(mutex.lock_owned().await);
        }
        LockGuardSet { _guards: guards }
    }
}
