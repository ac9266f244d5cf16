//! Per-Recipient Locks
//!
//! Admission reads the ledger, decides, then writes. Holding the recipient's
//! lock across that sequence keeps two concurrent requests for the same
//! recipient from both seeing a free slot. Different recipients never share
//! a lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::recipient::Recipient;

/// Table of async mutexes keyed by recipient
#[derive(Debug, Clone, Default)]
pub struct RecipientLocks {
    locks: Arc<Mutex<HashMap<Recipient, Arc<AsyncMutex<()>>>>>,
}

/// Held while a recipient's admission is in progress
#[derive(Debug)]
pub struct RecipientGuard {
    _guard: OwnedMutexGuard<()>,
}

impl RecipientLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `recipient`
    pub async fn acquire(&self, recipient: &Recipient) -> RecipientGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

            // Drop entries nobody holds or waits on
            if locks.len() > 1024 {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }

            locks
                .entry(recipient.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        RecipientGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of recipients currently tracked
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn recipient(s: &str) -> Recipient {
        Recipient::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_same_recipient_is_serialized() {
        let locks = RecipientLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&recipient("a@x.com")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_recipients_do_not_block() {
        let locks = RecipientLocks::new();
        let _a = locks.acquire(&recipient("a@x.com")).await;

        let acquired = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&recipient("b@x.com")),
        )
        .await;
        assert!(acquired.is_ok());
        assert_eq!(locks.tracked(), 2);
    }
}
