//! Reconnection with bounded exponential backoff.
//!
//! After an unexpected transport loss the supervisor waits a fixed initial
//! delay, then tries to reconnect. Each failure lengthens the next wait to
//! `base + unit * 2^n`, where `n` is the number of failures so far, capped
//! at `max_exponent`. With the defaults the waits are
//! 10s, 12s, 14s, 18s, 26s, 42s, 74s, 74s, …
//!
//! The supervisor stops once connected or once [`ReconnectSupervisor::shutdown`]
//! is called; shutdown abandons an in-progress wait immediately.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Result;
use crate::telemetry;

/// Something that can (re-)establish the transport connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<()>;
}

/// Backoff configuration.
///
/// ```rust
/// # use huginn::ReconnectConfig;
/// # use std::time::Duration;
/// let config = ReconnectConfig::default();
/// let waits: Vec<u64> = (0..6).map(|n| config.delay_for_attempt(n).as_secs()).collect();
/// assert_eq!(waits, vec![10, 12, 14, 18, 26, 42]);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Wait before the first attempt, and the fixed part of every later
    /// wait. Default: 10s.
    pub base_delay: Duration,
    /// Unit of the exponential part. Default: 1s.
    pub backoff_unit: Duration,
    /// Cap on the failure count used as exponent. Default: 6.
    pub max_exponent: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(10),
            backoff_unit: Duration::from_secs(1),
            max_exponent: 6,
        }
    }
}

impl ReconnectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn max_exponent(mut self, n: u32) -> Self {
        self.max_exponent = n;
        self
    }

    /// Wait before the next attempt after `failures` failed attempts.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.base_delay;
        }
        let exp = failures.min(self.max_exponent).min(31);
        self.base_delay + self.backoff_unit.saturating_mul(1u32 << exp)
    }
}

/// Failure counter for one reconnection episode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectState {
    attempt_count: u32,
}

impl ReconnectState {
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Wait before the next attempt.
    pub fn delay(&self, config: &ReconnectConfig) -> Duration {
        config.delay_for_attempt(self.attempt_count)
    }

    pub fn record_failure(&mut self, config: &ReconnectConfig) {
        if self.attempt_count < config.max_exponent {
            self.attempt_count += 1;
        }
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }
}

/// How a reconnection episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Connected after this many attempts.
    Connected { attempts: u32 },
    /// Shutdown was requested first.
    ShutDown,
}

#[derive(Debug, Default)]
struct Episode {
    running: bool,
    /// A disconnect was reported while the running episode was connecting.
    missed: bool,
}

/// Drives reconnection after transport loss.
pub struct ReconnectSupervisor {
    config: ReconnectConfig,
    shutdown: watch::Sender<bool>,
    episode: Mutex<Episode>,
}

impl ReconnectSupervisor {
    pub fn new(config: ReconnectConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            shutdown,
            episode: Mutex::new(Episode::default()),
        }
    }

    fn episode(&self) -> MutexGuard<'_, Episode> {
        self.episode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Reconnect until connected or shut down.
    pub async fn reconnect(&self, connector: &dyn Connector) -> ReconnectOutcome {
        let mut shutdown = self.shutdown.subscribe();
        let mut state = ReconnectState::default();
        let mut attempts = 0u32;

        loop {
            if *shutdown.borrow() {
                return ReconnectOutcome::ShutDown;
            }
            let wait = state.delay(&self.config);
            info!(wait = ?wait, failures = state.attempt_count(), "waiting before reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    info!("reconnect abandoned on shutdown");
                    return ReconnectOutcome::ShutDown;
                }
            }

            attempts += 1;
            // disconnects seen while waiting are covered by this attempt
            self.episode().missed = false;
            metrics::counter!(telemetry::RECONNECT_ATTEMPTS_TOTAL).increment(1);
            info!(attempt = attempts, "reconnecting");
            match connector.connect().await {
                Ok(()) => {
                    info!(attempts, "reconnected");
                    return ReconnectOutcome::Connected { attempts };
                }
                Err(e) => {
                    state.record_failure(&self.config);
                    warn!(
                        attempt = attempts,
                        error = %e,
                        retry_in = ?state.delay(&self.config),
                        "reconnect failed"
                    );
                }
            }
        }
    }

    /// Start a reconnection episode in the background.
    ///
    /// Returns `None` if one is already running or shutdown was requested.
    /// A disconnect reported while the running episode is connecting is
    /// not lost: once that attempt succeeds the episode starts over.
    pub fn on_disconnect(
        self: &Arc<Self>,
        connector: Arc<dyn Connector>,
    ) -> Option<JoinHandle<ReconnectOutcome>> {
        if self.is_shut_down() {
            return None;
        }
        {
            let mut episode = self.episode();
            if episode.running {
                episode.missed = true;
                return None;
            }
            episode.running = true;
        }
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                let outcome = this.reconnect(connector.as_ref()).await;
                let again = {
                    let mut episode = this.episode();
                    let again = matches!(outcome, ReconnectOutcome::Connected { .. })
                        && episode.missed
                        && !this.is_shut_down();
                    episode.missed = false;
                    episode.running = again;
                    again
                };
                if !again {
                    return outcome;
                }
                debug!("connection lost while reconnecting; starting over");
            }
        }))
    }

    /// Whether a reconnection episode is in progress.
    pub fn is_reconnecting(&self) -> bool {
        self.episode().running
    }

    /// Stop reconnecting, abandoning any wait in progress.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Default for ReconnectSupervisor {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}
