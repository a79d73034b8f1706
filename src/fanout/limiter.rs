//! Counting admission gate for remote calls.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{HuginnError, Result};

/// Default number of calls allowed in flight at once.
pub const DEFAULT_CAPACITY: usize = 6;

/// Bounds how many calls may be in flight across all concurrent fan-outs.
///
/// Clones share the same slots. Waiting for a slot is FIFO.
///
/// ```rust
/// # use huginn::RateLimiter;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> huginn::Result<()> {
/// let limiter = RateLimiter::new(2);
/// let slot = limiter.acquire().await?;
/// assert_eq!(limiter.in_flight(), 1);
/// drop(slot);
/// assert_eq!(limiter.in_flight(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// An occupied limiter slot, returned when dropped.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    /// Create a limiter with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<Slot> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| HuginnError::Shutdown("rate limiter"))?;
        Ok(Slot { _permit: permit })
    }

    /// Run `fut` while holding a slot.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _slot = self.acquire().await?;
        fut.await
    }

    /// Stop handing out slots. Pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(RateLimiter::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn slot_returned_on_error() {
        let limiter = RateLimiter::new(1);
        let result: Result<()> = limiter
            .run(async { Err(HuginnError::InvalidInput("boom".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn slot_returned_on_panic() {
        let limiter = RateLimiter::new(1);
        let task = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _slot = limiter.acquire().await;
                panic!("branch panicked");
            })
        };
        assert!(task.await.is_err());
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_capacity() {
        let limiter = RateLimiter::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let limiter = limiter.clone();
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    limiter
                        .run(async {
                            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            current.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn closed_limiter_refuses() {
        let limiter = RateLimiter::new(1);
        limiter.close();
        assert!(matches!(
            limiter.acquire().await,
            Err(HuginnError::Shutdown(_))
        ));
    }
}
