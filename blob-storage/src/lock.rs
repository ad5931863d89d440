use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Debug)]
struct Entry {
    lock: Arc<AsyncMutex<()>>,
    /// Callers currently holding or waiting for `lock`.
    refs: usize,
}

/// Per-digest exclusive locks, created on first use and dropped once no caller references them.
///
/// The map itself sits behind a single guard which is only held for the lookup/insert
/// and the release bookkeeping, never while a digest lock is awaited or held.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the exclusive lock for `digest`, waiting for any other holder first.
    pub async fn lock(&self, digest: &str) -> KeyGuard {
        let lock = {
            let mut entries = self.entries();
            let entry = entries.entry(digest.to_string()).or_insert_with(|| Entry {
                lock: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            Arc::clone(&entry.lock)
        };

        // Build the guard before awaiting so a dropped future still releases its reference.
        let mut guard = KeyGuard {
            registry: Arc::clone(&self.entries),
            digest: digest.to_string(),
            held: None,
        };
        guard.held = Some(lock.lock_owned().await);
        trace!(digest, "acquired digest lock");
        guard
    }

    /// Number of digests with a live lock entry.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds a digest lock; releases it and drops the registry reference on drop.
#[derive(Debug)]
pub struct KeyGuard {
    registry: Arc<Mutex<HashMap<String, Entry>>>,
    digest: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Unlock first: the entry must outlive the held lock or a newcomer could
        // insert a fresh lock for the same digest while we still hold the old one.
        drop(self.held.take());

        let mut entries = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&self.digest) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(&self.digest);
                trace!(digest = %self.digest, "removed digest lock entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = LockRegistry::new();
        {
            let guard = locks.lock("abcdef").await;
            assert_eq!(guard.digest(), "abcdef");
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_digests_do_not_block() {
        let locks = LockRegistry::new();
        let _a = locks.lock("aaaa").await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock("bbbb")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_same_digest_blocks() {
        let locks = LockRegistry::new();
        let _held = locks.lock("aaaa").await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock("aaaa")).await;
        assert!(second.is_err());
        // the timed out waiter must not leak its reference
        assert_eq!(locks.len(), 1);
        drop(_held);
        assert!(locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_under_contention() {
        let locks = LockRegistry::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("samekey").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }
}
