//! Huginn - IRC bot reporting what people are listening to on Last.fm
//!
//! The crate is layered so that the concurrency pieces can be used (and
//! tested) without a network:
//!
//! - [`cache`]: TTL response cache for remote outcomes, with on-disk
//!   snapshots.
//! - [`fanout`]: concurrent independent calls joined together, and a
//!   shared bound on calls in flight.
//! - [`identity`]: NickServ identity checks with coalescing and timeouts.
//! - [`reconnect`]: reconnection with bounded exponential backoff.
//! - [`lastfm`], [`nowplaying`], [`nickmap`], [`commands`], [`irc`] and
//!   [`bot`]: the bot itself.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use huginn::lastfm::{LastFm, LastFmClient};
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let lastfm = LastFm::new(Arc::new(LastFmClient::new("your-api-key")?));
//!
//!     let report = huginn::nowplaying::report(&lastfm, "rj", "rj").await;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod cache;
pub mod commands;
#[cfg(feature = "bot")]
pub mod config;
pub mod error;
pub mod fanout;
pub mod identity;
pub mod irc;
pub mod lastfm;
pub mod nickmap;
pub mod nowplaying;
pub mod reconnect;
pub mod sync;
pub mod telemetry;

/// Crate version.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types at crate root
pub use cache::{CacheDirectives, CachePersister, CachedOutcome, PersistConfig, ResponseCache};
pub use error::{HuginnError, RemoteError, Result};
pub use fanout::{FanOutAggregator, RateLimiter};
pub use identity::{Directory, IdentityCheck, IdentityConfig, Verification};
pub use reconnect::{
    Connector, ReconnectConfig, ReconnectOutcome, ReconnectState, ReconnectSupervisor,
};
