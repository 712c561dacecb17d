//! Per-trigger mutual exclusion.
//!
//! Checks of one trigger never overlap; checks of different triggers run
//! concurrently. Lock entries are dropped once nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Registry of per-trigger locks.
#[derive(Debug, Default)]
pub struct TriggerLocks {
    locks: Arc<LockMap>,
}

impl TriggerLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to a trigger.
    pub async fn acquire(&self, trigger_id: &str) -> TriggerGuard {
        let lock = Arc::clone(
            self.locks
                .lock()
                .entry(trigger_id.to_string())
                .or_default(),
        );

        TriggerGuard {
            guard: Some(lock.lock_owned().await),
            trigger_id: trigger_id.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Returns the number of triggers with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Returns true if no trigger is locked or awaited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

/// Exclusive access to one trigger, released on drop.
#[derive(Debug)]
pub struct TriggerGuard {
    guard: Option<OwnedMutexGuard<()>>,
    trigger_id: String,
    locks: Arc<LockMap>,
}

impl Drop for TriggerGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = self.locks.lock();
        // Only the map still references the lock: nobody holds or awaits it.
        if locks
            .get(&self.trigger_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.trigger_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn entry_removed_after_release() {
        let locks = TriggerLocks::new();

        let guard = locks.acquire("t1").await;
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_triggers_do_not_block() {
        let locks = TriggerLocks::new();

        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b")).await;

        assert!(b.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn same_trigger_waits_for_release() {
        let locks = Arc::new(TriggerLocks::new());
        let first = locks.acquire("t1").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("t1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());
        // A waiter keeps the entry alive past the first release.
        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
