//! Join barrier: "wait until N events have happened".
//!
//! Used by the fan-out join (wait for every branch) and by identity checks
//! (wait for the directory's terminal reply). A barrier is a counter plus a
//! `watch` flag; arrivals past the expected count are ignored, and
//! [`JoinBarrier::release`] opens it early for teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug)]
pub struct JoinBarrier {
    expected: usize,
    arrived: AtomicUsize,
    open: watch::Sender<bool>,
}

impl JoinBarrier {
    /// A barrier that opens after `expected` arrivals. Zero opens at once.
    pub fn new(expected: usize) -> Self {
        let (open, _) = watch::channel(expected == 0);
        Self {
            expected,
            arrived: AtomicUsize::new(0),
            open,
        }
    }

    /// Record one arrival. Returns `true` for the arrival that opened the
    /// barrier.
    pub fn arrive(&self) -> bool {
        let prev = self
            .arrived
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.expected).then_some(n + 1)
            });
        match prev {
            Ok(n) if n + 1 == self.expected => {
                self.open.send_replace(true);
                true
            }
            _ => false,
        }
    }

    /// Open the barrier regardless of the arrival count.
    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::Acquire)
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Wait until the barrier opens.
    pub async fn wait(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Wait at most `timeout`. Returns whether the barrier opened.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn zero_is_open() {
        assert!(JoinBarrier::new(0).is_open());
    }

    #[test]
    fn opens_on_last_arrival_only() {
        let barrier = JoinBarrier::new(3);
        assert!(!barrier.arrive());
        assert!(!barrier.arrive());
        assert!(!barrier.is_open());
        assert!(barrier.arrive());
        assert!(barrier.is_open());
        // extra arrivals are ignored
        assert!(!barrier.arrive());
        assert_eq!(barrier.arrived(), 3);
    }

    #[tokio::test]
    async fn wait_returns_after_all_arrivals() {
        let barrier = Arc::new(JoinBarrier::new(2));
        let waiter = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move { barrier.wait().await })
        };
        barrier.arrive();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        barrier.arrive();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_expires() {
        let barrier = JoinBarrier::new(1);
        assert!(!barrier.wait_timeout(Duration::from_secs(1)).await);
        barrier.release();
        assert!(barrier.wait_timeout(Duration::from_secs(1)).await);
    }
}
