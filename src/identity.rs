//! Nick identity verification against a directory service (NickServ).
//!
//! A check issues a directory query for a nick and waits for the reply:
//! zero or more positive signals (`307`/`330`) followed by exactly one
//! terminal signal (`318`). The wait is bounded by a timeout.
//!
//! # States
//!
//! ```text
//! Unknown ──query──▶ Pending ──positive + end──▶ Verified (cached)
//!                       │──────end only────────▶ Unverified
//!                       └──────timeout─────────▶ TimedOut
//! ```
//!
//! Only positive results are cached; a user can always identify later, so
//! negatives are never remembered. Verified nicks stay cached until they
//! are dropped by a quit, a rename, or a reset after a disconnect. There is
//! no timer-based expiry.
//!
//! Concurrent checks for the same nick share one outstanding query. Each
//! caller still waits under its own timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use tracing::{debug, info, warn};

use crate::Result;
use crate::sync::JoinBarrier;
use crate::telemetry;

/// The directory service that answers identity queries.
///
/// Replies are delivered out of band, through
/// [`IdentityCheck::on_positive`] and [`IdentityCheck::on_end`].
#[async_trait]
pub trait Directory: Send + Sync {
    /// Send the query for `nick` (a WHOIS on IRC).
    async fn query_identity(&self, nick: &str) -> Result<()>;
}

/// Result of an identity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    Unverified,
    TimedOut,
}

impl Verification {
    pub fn is_verified(self) -> bool {
        self == Verification::Verified
    }

    fn as_label(self) -> &'static str {
        match self {
            Verification::Verified => "verified",
            Verification::Unverified => "unverified",
            Verification::TimedOut => "timed_out",
        }
    }
}

/// Configuration for [`IdentityCheck`].
///
/// ```rust
/// # use huginn::IdentityConfig;
/// # use std::time::Duration;
/// // networks without NickServ (e.g. EFNet)
/// let config = IdentityConfig::new().required(false);
/// assert_eq!(config.timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Whether verification is enforced. When false every check passes.
    /// Default: true.
    pub required: bool,
    /// How long to wait for the terminal signal. Default: 10s.
    pub timeout: Duration,
    /// Maximum verified nicks remembered. Default: 10,000.
    pub max_cached: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            required: true,
            timeout: Duration::from_secs(10),
            max_cached: 10_000,
        }
    }
}

impl IdentityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_cached(mut self, n: u64) -> Self {
        self.max_cached = n;
        self
    }
}

struct PendingCheck {
    positive: AtomicBool,
    abandoned: AtomicBool,
    /// Callers still waiting. Only changed under the pending-map lock.
    waiters: AtomicUsize,
    done: JoinBarrier,
}

impl PendingCheck {
    fn new() -> Self {
        Self {
            positive: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            waiters: AtomicUsize::new(1),
            done: JoinBarrier::new(1),
        }
    }

    fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
        self.done.release();
    }
}

/// Identity verification state for all nicks.
pub struct IdentityCheck {
    config: IdentityConfig,
    verified: Cache<String, ()>,
    pending: Mutex<HashMap<String, Arc<PendingCheck>>>,
    /// Bumped by every [`IdentityCheck::reset`], under the pending-map lock.
    generation: AtomicU64,
}

fn nick_key(nick: &str) -> String {
    nick.to_lowercase()
}

impl IdentityCheck {
    pub fn new(config: IdentityConfig) -> Self {
        let verified = Cache::builder().max_capacity(config.max_cached).build();
        Self {
            config,
            verified,
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, Arc<PendingCheck>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Verify `nick`, querying `directory` unless a result is cached or a
    /// query is already outstanding.
    pub async fn check(&self, directory: &dyn Directory, nick: &str) -> Verification {
        if !self.config.required {
            return Verification::Verified;
        }
        let key = nick_key(nick);
        if self.verified.contains_key(&key) {
            return Verification::Verified;
        }

        let (pending, owner, generation) = {
            let mut map = self.lock_pending();
            let generation = self.generation.load(Ordering::Acquire);
            match map.get(&key) {
                Some(existing) => {
                    existing.waiters.fetch_add(1, Ordering::AcqRel);
                    (Arc::clone(existing), false, generation)
                }
                None => {
                    let fresh = Arc::new(PendingCheck::new());
                    map.insert(key.clone(), Arc::clone(&fresh));
                    (fresh, true, generation)
                }
            }
        };

        if owner {
            debug!(nick, "checking whether nick is identified");
            if let Err(e) = directory.query_identity(nick).await {
                warn!(nick, error = %e, "identity query failed");
                self.remove_pending(&key, &pending);
                pending.abandon();
                return self.finish(nick, Verification::Unverified);
            }
        } else {
            debug!(nick, "joining outstanding identity check");
        }

        let result = if pending.done.wait_timeout(self.config.timeout).await {
            if pending.positive.load(Ordering::Acquire) && !pending.abandoned.load(Ordering::Acquire) {
                self.remember(key, generation)
            } else {
                Verification::Unverified
            }
        } else {
            info!(nick, timeout = ?self.config.timeout, "timed out checking whether nick is identified");
            self.leave_pending(&key, &pending);
            Verification::TimedOut
        };
        self.finish(nick, result)
    }

    /// Cache a positive result unless a reset happened since the check
    /// started.
    fn remember(&self, key: String, generation: u64) -> Verification {
        let _map = self.lock_pending();
        if self.generation.load(Ordering::Acquire) != generation {
            return Verification::Unverified;
        }
        self.verified.insert(key, ());
        Verification::Verified
    }

    fn finish(&self, nick: &str, result: Verification) -> Verification {
        debug!(nick, result = result.as_label(), "identity check resolved");
        metrics::counter!(telemetry::IDENTITY_CHECKS_TOTAL, "result" => result.as_label())
            .increment(1);
        result
    }

    fn remove_pending(&self, key: &str, pending: &Arc<PendingCheck>) {
        let mut map = self.lock_pending();
        if map.get(key).is_some_and(|current| Arc::ptr_eq(current, pending)) {
            map.remove(key);
        }
    }

    /// A waiter gave up; the query stays outstanding for the others.
    fn leave_pending(&self, key: &str, pending: &Arc<PendingCheck>) {
        let mut map = self.lock_pending();
        let left = pending.waiters.fetch_sub(1, Ordering::AcqRel) - 1;
        if left == 0 && map.get(key).is_some_and(|current| Arc::ptr_eq(current, pending)) {
            map.remove(key);
        }
    }

    /// A positive signal for `nick` arrived (`307` / `330`).
    pub fn on_positive(&self, nick: &str) {
        match self.lock_pending().get(&nick_key(nick)) {
            Some(pending) => pending.positive.store(true, Ordering::Release),
            None => debug!(nick, "identity signal with no check outstanding"),
        }
    }

    /// The terminal signal for `nick` arrived (`318`).
    pub fn on_end(&self, nick: &str) {
        let pending = self.lock_pending().remove(&nick_key(nick));
        if let Some(pending) = pending {
            pending.done.arrive();
        }
    }

    /// Whether `nick` is currently cached as verified.
    pub fn is_verified(&self, nick: &str) -> bool {
        !self.config.required || self.verified.contains_key(&nick_key(nick))
    }

    /// Drop the cached result for `nick` (quit, part of the network).
    pub fn forget(&self, nick: &str) {
        self.verified.invalidate(&nick_key(nick));
    }

    /// A nick changed; neither name keeps its verification.
    pub fn on_identity_changed(&self, old: &str, new: &str) {
        self.forget(old);
        self.forget(new);
    }

    /// Drop every cached result and release every waiting check as
    /// unverified. Called after a disconnect.
    pub fn reset(&self) {
        let drained: Vec<_> = {
            let mut map = self.lock_pending();
            self.generation.fetch_add(1, Ordering::AcqRel);
            map.drain().map(|(_, p)| p).collect()
        };
        self.verified.invalidate_all();
        for pending in drained {
            pending.abandon();
        }
    }

    /// Number of checks currently waiting on the directory.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }
}

impl Default for IdentityCheck {
    fn default() -> Self {
        Self::new(IdentityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct Silent {
        queries: AtomicUsize,
    }

    #[async_trait]
    impl Directory for Silent {
        async fn query_identity(&self, _nick: &str) -> Result<()> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn disabled_verification_always_passes() {
        let check = IdentityCheck::new(IdentityConfig::new().required(false));
        let dir = Silent::default();
        assert_eq!(check.check(&dir, "anyone").await, Verification::Verified);
        assert_eq!(dir.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_pending_state() {
        let check = IdentityCheck::new(IdentityConfig::new().timeout(Duration::from_secs(10)));
        let dir = Silent::default();
        assert_eq!(check.check(&dir, "Ghost").await, Verification::TimedOut);
        assert_eq!(check.pending_count(), 0);
        assert!(!check.is_verified("ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_releases_waiters_unverified() {
        let check = Arc::new(IdentityCheck::default());
        let dir = Arc::new(Silent::default());
        let task = {
            let check = Arc::clone(&check);
            let dir = Arc::clone(&dir);
            tokio::spawn(async move { check.check(dir.as_ref(), "alice").await })
        };
        while check.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        check.on_positive("alice");
        check.reset();
        assert_eq!(task.await.unwrap(), Verification::Unverified);
        assert!(!check.is_verified("alice"));
    }

    #[test]
    fn stray_signals_are_ignored() {
        let check = IdentityCheck::default();
        check.on_positive("nobody");
        check.on_end("nobody");
        assert_eq!(check.pending_count(), 0);
    }
}
