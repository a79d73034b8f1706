//! Last.fm API access.
//!
//! [`RemoteCall`] is the raw transport seam (implemented over HTTP by
//! [`LastFmClient`]). [`LastFm`] is the typed facade the bot uses: every
//! method resolves through the shared [`ResponseCache`] first, and only on a
//! miss calls the remote service. Successes and typed Last.fm errors are
//! both written back to the cache by a detached task, so the caller never
//! waits on the cache update.
//!
//! Enrichment lookups (track info, track tags, artist tags) are the calls a
//! now-playing report fans out to; on a cache miss they wait for a
//! [`RateLimiter`] slot. Primary lookups (recent tracks, charts, compare)
//! are issued directly.

mod client;
mod types;

pub use client::{DEFAULT_BASE_URL, LastFmClient};
pub use types::{
    ApiResource, ApiValue, Artist, Period, RecentTracks, Tag, Tasteometer, TopArtist, TopArtists,
    TopTags, Track, TrackInfo,
};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::{CacheDirectives, CachedOutcome, Params, ResponseCache};
use crate::error::RemoteError;
use crate::fanout::RateLimiter;
use crate::telemetry;
use crate::{HuginnError, Result};

/// Raw result of a remote method call.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    /// Caching directives from the response headers.
    pub directives: CacheDirectives,
    /// Response body, or the error the service reported.
    pub outcome: std::result::Result<Vec<u8>, RemoteError>,
}

/// A remote method call. Transport failures are `Err`; errors reported by
/// the service itself are `Ok` with a failed outcome.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    async fn call(&self, method: &str, params: &Params) -> Result<RemoteResponse>;
}

/// Whether a lookup waits for a rate limiter slot on a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Direct,
    Limited,
}

/// Typed, cached Last.fm API.
///
/// Cheap to clone; clones share the transport, cache and limiter.
#[derive(Clone)]
pub struct LastFm {
    remote: Arc<dyn RemoteCall>,
    cache: Arc<ResponseCache<ApiValue>>,
    enrichment: RateLimiter,
}

fn params<const N: usize>(pairs: [(&str, &str); N]) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl LastFm {
    pub fn new(remote: Arc<dyn RemoteCall>) -> Self {
        Self {
            remote,
            cache: Arc::new(ResponseCache::new()),
            enrichment: RateLimiter::default(),
        }
    }

    /// Share an existing cache (e.g. one restored from disk).
    pub fn with_cache(mut self, cache: Arc<ResponseCache<ApiValue>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.enrichment = limiter;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache<ApiValue>> {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.enrichment
    }

    /// `user.getRecentTracks`: the currently playing track (if any) and up
    /// to `limit` scrobbles.
    pub async fn recent_tracks(&self, user: &str, limit: u32) -> Result<RecentTracks> {
        let limit = limit.to_string();
        self.fetch(
            "user.getRecentTracks",
            params([("user", user), ("extended", "1"), ("limit", limit.as_str())]),
            Admission::Direct,
        )
        .await
    }

    /// `track.getInfo`, with the user's play count and loved flag when
    /// `user` is given.
    pub async fn track_info(&self, track: &Track, user: Option<&str>) -> Result<TrackInfo> {
        let mut query = track_params(track);
        if let Some(user) = user {
            query.insert("username".into(), user.into());
        }
        self.fetch("track.getInfo", query, Admission::Limited).await
    }

    /// `track.getTopTags`.
    pub async fn track_top_tags(&self, track: &Track) -> Result<TopTags> {
        self.fetch("track.getTopTags", track_params(track), Admission::Limited)
            .await
    }

    /// `artist.getTopTags`.
    pub async fn artist_top_tags(&self, artist: &Artist) -> Result<TopTags> {
        let mut query = params([("autocorrect", "1")]);
        match &artist.mbid {
            Some(mbid) => query.insert("mbid".into(), mbid.clone()),
            None => query.insert("artist".into(), artist.name.clone()),
        };
        self.fetch("artist.getTopTags", query, Admission::Limited).await
    }

    /// `user.getTopArtists`.
    pub async fn user_top_artists(&self, user: &str, period: Period, limit: u32) -> Result<TopArtists> {
        let limit = limit.to_string();
        self.fetch(
            "user.getTopArtists",
            params([("user", user), ("period", period.as_str()), ("limit", limit.as_str())]),
            Admission::Direct,
        )
        .await
    }

    /// `tasteometer.compare` between two users.
    pub async fn compare_taste(&self, user1: &str, user2: &str) -> Result<Tasteometer> {
        self.fetch(
            "tasteometer.compare",
            params([
                ("type1", "user"),
                ("type2", "user"),
                ("value1", user1),
                ("value2", user2),
            ]),
            Admission::Direct,
        )
        .await
    }

    async fn fetch<R: ApiResource>(
        &self,
        method: &'static str,
        query: Params,
        admission: Admission,
    ) -> Result<R> {
        match self.cache.get(method, &query) {
            Some(CachedOutcome::Success(value)) => match cached_resource::<R>(method, value) {
                Ok(hit) => return Ok(hit),
                Err(e) => warn!(error = %e, "ignoring cached value, refetching"),
            },
            Some(CachedOutcome::Failure(error)) => return Err(HuginnError::Remote(error)),
            None => {}
        }

        let call = self.remote.call(method, &query);
        let response = match admission {
            Admission::Direct => call.await,
            Admission::Limited => self.enrichment.run(call).await,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                record_request(method, "error");
                return Err(e);
            }
        };

        match response.outcome {
            Ok(body) => {
                record_request(method, "ok");
                // Undecodable bodies are not cached.
                let value = R::decode(&body)?;
                self.spawn_fill(
                    method,
                    query,
                    CachedOutcome::Success(value.clone().into_value()),
                    response.directives,
                );
                Ok(value)
            }
            Err(error) => {
                record_request(method, "remote_error");
                self.spawn_fill(
                    method,
                    query,
                    CachedOutcome::Failure(error.clone()),
                    response.directives,
                );
                Err(HuginnError::Remote(error))
            }
        }
    }

    fn spawn_fill(
        &self,
        method: &'static str,
        query: Params,
        outcome: CachedOutcome<ApiValue>,
        directives: CacheDirectives,
    ) {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            if cache.set(method, &query, outcome, &directives) {
                debug!(method, "cached response");
            }
        });
    }
}

fn cached_resource<R: ApiResource>(method: &str, value: ApiValue) -> Result<R> {
    R::from_value(value).ok_or_else(|| HuginnError::UnexpectedPayload {
        method: method.to_string(),
    })
}

/// Address a track by MBID when known, by artist and title otherwise.
fn track_params(track: &Track) -> Params {
    let mut query = params([("autocorrect", "1")]);
    match &track.mbid {
        Some(mbid) => {
            query.insert("mbid".into(), mbid.clone());
        }
        None => {
            query.insert("artist".into(), track.artist.name.clone());
            query.insert("track".into(), track.name.clone());
        }
    }
    query
}

fn record_request(method: &'static str, status: &'static str) {
    metrics::counter!(telemetry::REMOTE_REQUESTS_TOTAL, "method" => method, "status" => status)
        .increment(1);
}
