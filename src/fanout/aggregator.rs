//! N-of-N concurrent join.
//!
//! Every branch runs as its own task and reports into a shared
//! `PendingFanOut`. The join resolves once all branches have reported, in
//! whatever order they finish. A branch that fails or panics still reports,
//! so one bad branch can neither abort the others nor hang the join.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::sync::JoinBarrier;
use crate::{HuginnError, Result};

struct PendingFanOut<B> {
    outcomes: Mutex<Vec<Option<Result<B>>>>,
    done: JoinBarrier,
}

impl<B> PendingFanOut<B> {
    fn new(expected: usize) -> Self {
        Self {
            outcomes: Mutex::new((0..expected).map(|_| None).collect()),
            done: JoinBarrier::new(expected),
        }
    }

    fn report(&self, index: usize, outcome: Result<B>) {
        {
            let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = outcomes.get_mut(index) {
                *slot = Some(outcome);
            }
        }
        self.done.arrive();
    }

    fn take(&self) -> Vec<Result<B>> {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *outcomes)
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.unwrap_or_else(|| Err(HuginnError::Aborted(format!("fan-out branch {index}"))))
            })
            .collect()
    }
}

/// Reports the branch outcome on drop, so a panicking branch still arrives.
struct BranchReport<B> {
    pending: Arc<PendingFanOut<B>>,
    index: usize,
    outcome: Option<Result<B>>,
}

impl<B> Drop for BranchReport<B> {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err(HuginnError::Aborted(format!("fan-out branch {}", self.index))));
        self.pending.report(self.index, outcome);
    }
}

/// A set of independent calls issued concurrently and joined together.
///
/// ```rust
/// # use huginn::FanOutAggregator;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let outcomes = FanOutAggregator::new()
///     .branch(async { Ok(1) })
///     .branch(async { Err(huginn::HuginnError::InvalidInput("nope".into())) })
///     .branch(async { Ok(3) })
///     .join()
///     .await;
/// assert_eq!(outcomes.len(), 3);
/// assert!(outcomes[1].is_err());
/// # }
/// ```
pub struct FanOutAggregator<B> {
    branches: Vec<BoxFuture<'static, Result<B>>>,
}

impl<B: Send + 'static> FanOutAggregator<B> {
    pub fn new() -> Self {
        Self {
            branches: Vec::new(),
        }
    }

    /// Add a branch. Branches start when [`join`](Self::join) is called.
    pub fn branch<F>(mut self, fut: F) -> Self
    where
        F: Future<Output = Result<B>> + Send + 'static,
    {
        self.branches.push(Box::pin(fut));
        self
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Start every branch and wait for all of them.
    ///
    /// Outcomes are returned in the order the branches were added. Branches
    /// are detached tasks: dropping the join does not cancel them.
    pub async fn join(self) -> Vec<Result<B>> {
        let expected = self.branches.len();
        let pending = Arc::new(PendingFanOut::new(expected));

        for (index, fut) in self.branches.into_iter().enumerate() {
            let mut report = BranchReport {
                pending: Arc::clone(&pending),
                index,
                outcome: None,
            };
            tokio::spawn(async move {
                report.outcome = Some(fut.await);
            });
        }

        pending.done.wait().await;
        debug!(branches = expected, "fan-out complete");
        pending.take()
    }
}

impl<B: Send + 'static> Default for FanOutAggregator<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn empty_join_resolves_immediately() {
        let outcomes: Vec<Result<()>> = FanOutAggregator::new().join().await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn panicking_branch_reports_aborted() {
        let outcomes = FanOutAggregator::new()
            .branch(async { Ok(1) })
            .branch(async {
                if true {
                    panic!("branch exploded");
                }
                Ok(2)
            })
            .join()
            .await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(*outcomes[0].as_ref().unwrap(), 1);
        assert!(matches!(outcomes[1], Err(HuginnError::Aborted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn outcomes_keep_branch_order() {
        let outcomes = FanOutAggregator::new()
            .branch(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok("slow")
            })
            .branch(async { Ok("fast") })
            .join()
            .await;
        let values: Vec<_> = outcomes.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(values, vec!["slow", "fast"]);
    }
}
