//! Per-key async locks
//!
//! Each record id and ACL id gets its own `tokio::sync::RwLock`. Tokio locks
//! are fair: waiters are served in the order they queued, so writers on one
//! key apply in receipt order. Entries are held weakly and pruned once the
//! table grows, so idle keys cost nothing.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Table size that triggers a sweep of dead entries
const PRUNE_THRESHOLD: usize = 1024;

pub type KeyReadGuard = OwnedRwLockReadGuard<()>;
pub type KeyWriteGuard = OwnedRwLockWriteGuard<()>;

pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Weak<RwLock<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &K) -> Arc<RwLock<()>> {
        // Poisoning only means another thread panicked while holding the map;
        // the map itself is still consistent.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(lock) = locks.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        if locks.len() >= PRUNE_THRESHOLD {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        let lock = Arc::new(RwLock::new(()));
        locks.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    /// Exclusive access to `key`
    pub async fn write(&self, key: &K) -> KeyWriteGuard {
        self.lock_for(key).write_owned().await
    }

    /// Shared access to `key`
    pub async fn read(&self, key: &K) -> KeyReadGuard {
        self.lock_for(key).read_owned().await
    }

    /// Number of keys currently tracked, live or not
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let guard = locks.write(&"a".to_string()).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.write(&"a".to_string()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        let _ = tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::<String>::new();
        let _a = locks.write(&"a".to_string()).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.write(&"b".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_readers_share() {
        let locks = KeyedLocks::<String>::new();
        let _r1 = locks.read(&"a".to_string()).await;
        let _r2 = tokio::time::timeout(Duration::from_secs(1), locks.read(&"a".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dead_entries_are_pruned() {
        let locks = KeyedLocks::<usize>::new();
        for i in 0..PRUNE_THRESHOLD + 10 {
            drop(locks.write(&i).await);
        }
        assert!(locks.len() < PRUNE_THRESHOLD);
    }
}
