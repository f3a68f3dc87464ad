use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::SourceError;

/// Bounded set of connection slots for one source.
///
/// The pool caps concurrent calls to a provider regardless of how many
/// analysis calls are in flight. Slots are released when the returned
/// [`PooledConnection`] is dropped, so every exit path (including
/// cancellation) gives the slot back.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    slots: Arc<Semaphore>,
    size: usize,
}

/// A held pool slot.
#[derive(Debug)]
pub struct PooledConnection {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Wait for a free slot until `deadline`.
    pub async fn acquire_until(&self, deadline: Instant) -> Result<PooledConnection, SourceError> {
        let acquire = Arc::clone(&self.slots).acquire_owned();
        match tokio::time::timeout_at(deadline, acquire).await {
            Ok(Ok(permit)) => Ok(PooledConnection { _permit: permit }),
            Ok(Err(_)) => Err(SourceError::fatal("connection pool is closed")),
            Err(_) => Err(SourceError::timeout(
                "timed out waiting for a pooled connection",
            )),
        }
    }

    /// Refuse new acquisitions. Held slots stay valid until dropped.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slots_are_released_on_drop() {
        let pool = ConnectionPool::new(2);
        let deadline = Instant::now() + Duration::from_secs(1);

        let first = pool.acquire_until(deadline).await.expect("slot");
        let _second = pool.acquire_until(deadline).await.expect("slot");
        assert_eq!(pool.available(), 0);

        let err = pool.acquire_until(deadline).await.expect_err("pool exhausted");
        assert!(err.is_timeout());

        drop(first);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_holder_releases_slot() {
        let pool = ConnectionPool::new(1);
        let holder = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _slot = pool
                    .acquire_until(Instant::now() + Duration::from_secs(60))
                    .await;
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(pool.available(), 0);

        holder.abort();
        let _ = holder.await;
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn closed_pool_is_fatal() {
        let pool = ConnectionPool::new(1);
        pool.close();

        let err = pool
            .acquire_until(Instant::now() + Duration::from_secs(1))
            .await
            .expect_err("closed");
        assert_eq!(err.kind(), crate::SourceErrorKind::Fatal);
        assert!(pool.is_closed());
    }
}
