//! Bounded-concurrency fan-out.
//!
//! - [`FanOutAggregator`] runs a fixed set of independent calls
//!   concurrently and waits for every one of them.
//! - [`RateLimiter`] bounds how many remote calls are in flight across all
//!   fan-outs at once.

mod aggregator;
mod limiter;

pub use aggregator::FanOutAggregator;
pub use limiter::{DEFAULT_CAPACITY, RateLimiter, Slot};
