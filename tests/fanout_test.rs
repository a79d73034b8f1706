//! Tests for [`FanOutAggregator`] and [`RateLimiter`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use huginn::{FanOutAggregator, HuginnError, RateLimiter};

// =========================================================================
// FanOutAggregator
// =========================================================================

#[tokio::test]
async fn failing_branch_does_not_sink_the_others() {
    let outcomes = FanOutAggregator::new()
        .branch(async { Ok("info") })
        .branch(async { Err(HuginnError::Transport("connection reset".into())) })
        .branch(async { Ok("artist tags") })
        .join()
        .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].as_ref().ok(), Some(&"info"));
    assert!(matches!(outcomes[1], Err(HuginnError::Transport(_))));
    assert_eq!(outcomes[2].as_ref().ok(), Some(&"artist tags"));
}

#[tokio::test(start_paused = true)]
async fn join_waits_for_the_slowest_branch() {
    let started = tokio::time::Instant::now();
    let outcomes = FanOutAggregator::new()
        .branch(async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(3)
        })
        .branch(async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(1)
        })
        .join()
        .await;

    // concurrent, so the total is the slowest branch rather than the sum
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    let values: Vec<i32> = outcomes.into_iter().map(|o| o.unwrap()).collect();
    assert_eq!(values, vec![3, 1]);
}

#[tokio::test]
async fn every_branch_reports_exactly_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut fanout = FanOutAggregator::new();
    for i in 0..20 {
        let runs = Arc::clone(&runs);
        fanout = fanout.branch(async move {
            runs.fetch_add(1, Ordering::SeqCst);
            if i % 3 == 0 {
                Err(HuginnError::InvalidInput(format!("branch {i}")))
            } else {
                Ok(i)
            }
        });
    }
    assert_eq!(fanout.len(), 20);

    let outcomes = fanout.join().await;
    assert_eq!(runs.load(Ordering::SeqCst), 20);
    assert_eq!(outcomes.len(), 20);
    assert_eq!(outcomes.iter().filter(|o| o.is_err()).count(), 7);
}

// =========================================================================
// RateLimiter
// =========================================================================

#[tokio::test(start_paused = true)]
async fn limiter_bounds_concurrent_branches() {
    let limiter = RateLimiter::new(2);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut fanout = FanOutAggregator::new();
    for _ in 0..6 {
        let (limiter, active, peak) = (limiter.clone(), Arc::clone(&active), Arc::clone(&peak));
        fanout = fanout.branch(async move {
            limiter
                .run(async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        });
    }

    let outcomes = fanout.join().await;
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(limiter.available(), 2);
}

#[tokio::test]
async fn closed_limiter_fails_waiters() {
    let limiter = RateLimiter::new(1);
    let held = limiter.acquire().await.unwrap();
    assert_eq!(limiter.in_flight(), 1);

    let waiter = {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
    };
    tokio::task::yield_now().await;
    limiter.close();

    assert!(matches!(waiter.await.unwrap(), Err(HuginnError::Shutdown(_))));
    drop(held);
}

#[test]
fn zero_capacity_is_clamped() {
    assert_eq!(RateLimiter::new(0).capacity(), 1);
    assert_eq!(RateLimiter::default().capacity(), huginn::fanout::DEFAULT_CAPACITY);
}
