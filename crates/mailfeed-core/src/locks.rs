//! Per-inbox write serialization

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hands out one async mutex per inbox token, so a fetch-merge-persist cycle
/// on one inbox never interleaves with another on the same inbox. Entries
/// are dropped once no guard or waiter holds them.
#[derive(Debug, Default)]
pub struct InboxLocks {
    locks: StdMutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl InboxLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `token`
    pub async fn lock(&self, token: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(token).and_then(Weak::upgrade) {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(Mutex::new(()));
                    locks.insert(token.to_string(), Arc::downgrade(&mutex));
                    mutex
                }
            }
        };
        mutex.lock_owned().await
    }

    /// Number of inboxes currently locked or awaited
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
