//! Bounded executor pool.
//!
//! At most N plans execute concurrently; excess requests queue FIFO up to
//! a limit, beyond which the server answers 503 with a Retry-After hint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default concurrent plan executions.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default queued waiters before rejecting.
pub const DEFAULT_QUEUE_LIMIT: usize = 16;

/// FIFO slot pool for plan executions.
#[derive(Debug)]
pub struct ExecutorPool {
    slots: Arc<Semaphore>,
    queue_limit: usize,
    waiting: AtomicUsize,
}

impl Default for ExecutorPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_QUEUE_LIMIT)
    }
}

impl ExecutorPool {
    /// Create a pool with `size` concurrent slots and `queue_limit`
    /// queued waiters.
    #[must_use]
    pub fn new(size: usize, queue_limit: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(size)),
            queue_limit,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Acquire a slot, waiting in FIFO order. Returns `None` when the
    /// queue is already full.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        if self.slots.available_permits() == 0
            && self.waiting.load(Ordering::Acquire) >= self.queue_limit
        {
            return None;
        }

        self.waiting.fetch_add(1, Ordering::AcqRel);
        let permit = Arc::clone(&self.slots).acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::AcqRel);
        permit.ok()
    }

    /// Free slots right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_are_reusable() {
        let pool = ExecutorPool::new(1, 1);
        let permit = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(permit);
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire().await.is_some());
    }

    #[tokio::test]
    async fn test_queue_overflow_rejects() {
        let pool = Arc::new(ExecutorPool::new(1, 0));
        let _held = pool.acquire().await.unwrap();
        // No free slot, queue limit zero: immediate rejection.
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_waiter_gets_slot_on_release() {
        let pool = Arc::new(ExecutorPool::new(1, 4));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        assert!(waiter.await.unwrap());
    }
}
