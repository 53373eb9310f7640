//! Distributed Lock (spec §4.4).
//!
//! Named mutex with TTL, implemented as set-if-absent on the external
//! store. Used for concurrent mutation of `ConversationState.uploadedDatasets`.
//! Retries up to 10 times with linear backoff starting at 100ms; on
//! exhaustion the caller fails the write explicitly rather than proceeding
//! unlocked.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::types::{ConversationStateId, LockError};

const MAX_ACQUIRE_ATTEMPTS: u32 = 10;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Handle proving ownership of an acquired lock; release it by handle, not
/// by name, so a caller can't accidentally release someone else's lock.
#[derive(Debug, Clone, Copy)]
pub struct LockHandle {
    pub token: Uuid,
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<LockHandle, LockError>;
    async fn release(&self, name: &str, handle: LockHandle) -> Result<(), LockError>;
}

pub fn conversation_state_lock_name(id: ConversationStateId) -> String {
    format!("lock:conversation_state:{id}")
}

struct Held {
    token: Uuid,
    expires_at: SystemTime,
}

/// In-memory set-if-absent lock store (the real backend is an external
/// collaborator per §1 non-goals).
pub struct InMemoryLock {
    held: DashMap<String, Held>,
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self { held: DashMap::new() }
    }

    fn try_set(&self, name: &str, ttl: Duration) -> Option<LockHandle> {
        let now = SystemTime::now();
        let mut expired = false;
        if let Some(existing) = self.held.get(name) {
            if existing.expires_at > now {
                return None;
            }
            expired = true;
        }
        if expired {
            self.held.remove(name);
        }
        let token = Uuid::new_v4();
        self.held.insert(
            name.to_string(),
            Held {
                token,
                expires_at: now + ttl,
            },
        );
        Some(LockHandle { token })
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<LockHandle, LockError> {
        for attempt in 0..MAX_ACQUIRE_ATTEMPTS {
            if let Some(handle) = self.try_set(name, ttl) {
                return Ok(handle);
            }
            tokio::time::sleep(RETRY_BASE_DELAY * (attempt + 1)).await;
        }
        tracing::warn!(lock = name, "failed to acquire lock within retry budget");
        Err(LockError::AcquireFailed {
            name: name.to_string(),
            attempts: MAX_ACQUIRE_ATTEMPTS,
        })
    }

    async fn release(&self, name: &str, handle: LockHandle) -> Result<(), LockError> {
        if let Some(held) = self.held.get(name) {
            if held.token == handle.token {
                drop(held);
                self.held.remove(name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn second_acquire_blocks_until_release() {
        let lock = Arc::new(InMemoryLock::new());
        let name = "lock:conversation_state:test";

        let handle = lock.acquire(name, Duration::from_secs(30)).await.unwrap();

        let lock2 = lock.clone();
        let waiter = tokio::spawn(async move { lock2.acquire(name, Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        lock.release(name, handle).await.unwrap();

        let second = waiter.await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn concurrent_acquires_serialize_no_lost_update() {
        let lock = Arc::new(InMemoryLock::new());
        let name = "lock:conversation_state:concurrency";
        let counter = Arc::new(tokio::sync::Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let lock = lock.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let h = lock.acquire(name, Duration::from_secs(5)).await.unwrap();
                {
                    let mut c = counter.lock().await;
                    let seen = *c;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    *c = seen + 1;
                }
                lock.release(name, h).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*counter.lock().await, 5);
    }
}
