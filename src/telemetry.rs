//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn. The binary may install its own
//! `metrics` recorder; without a recorder installed, all metric calls are
//! no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `method`: remote API method (e.g. "track.getInfo")
//! - `status`: outcome: "ok", "remote_error" or "error"
//! - `result`: identity check result: "verified", "unverified", "timed_out"

/// Response cache hits.
///
/// Labels: `method`.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Response cache misses (no entry at all).
///
/// Labels: `method`.
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Lookups that found an expired entry and evicted it.
///
/// Labels: `method`.
pub const CACHE_STALE_TOTAL: &str = "huginn_cache_stale_total";

/// Entries removed by periodic sweeps.
pub const CACHE_SWEPT_TOTAL: &str = "huginn_cache_swept_total";

/// Remote API calls actually sent (cache misses only).
///
/// Labels: `method`, `status`.
pub const REMOTE_REQUESTS_TOTAL: &str = "huginn_remote_requests_total";

/// Fan-out branches that failed and were dropped from the merge.
pub const FANOUT_BRANCH_FAILURES_TOTAL: &str = "huginn_fanout_branch_failures_total";

/// Identity checks resolved.
///
/// Labels: `result`.
pub const IDENTITY_CHECKS_TOTAL: &str = "huginn_identity_checks_total";

/// Reconnection attempts (successful or not).
pub const RECONNECT_ATTEMPTS_TOTAL: &str = "huginn_reconnect_attempts_total";
