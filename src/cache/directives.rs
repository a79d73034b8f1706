//! Cache directives carried by remote responses.
//!
//! Directives come from the HTTP `Cache-Control` and `Expires` headers of a
//! Last.fm response. They decide whether, and for how long, a response may be
//! served from the [`ResponseCache`](super::ResponseCache).

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

/// Whether and how long a remote response may be reused.
///
/// ```rust
/// # use huginn::CacheDirectives;
/// # use std::time::{Duration, SystemTime};
/// let d = CacheDirectives::new().max_age(Duration::from_secs(60));
/// let now = SystemTime::now();
/// assert_eq!(d.expiry(now), Some(now + Duration::from_secs(60)));
///
/// // no-cache always wins
/// assert_eq!(d.no_cache().expiry(now), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    /// `Cache-Control: no-cache` / `no-store`. Overrides everything else.
    pub no_cache: bool,
    /// `Cache-Control: max-age=N`, relative to the time of storage.
    pub max_age: Option<Duration>,
    /// Absolute `Expires` timestamp. Ignored when `max_age` is present.
    pub expires: Option<SystemTime>,
}

impl CacheDirectives {
    /// Directives that allow no caching at all (no expiry given).
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the response as not cacheable.
    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    /// Set a relative lifetime.
    pub fn max_age(mut self, age: Duration) -> Self {
        self.max_age = Some(age);
        self
    }

    /// Set an absolute expiry.
    pub fn expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }

    /// Parse directives from header `(name, value)` pairs.
    ///
    /// Header names are matched case-insensitively; unknown headers and
    /// unparseable values are ignored.
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut directives = Self::default();
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("cache-control") {
                directives.apply_cache_control(value);
            } else if name.eq_ignore_ascii_case("expires") {
                if let Some(at) = parse_http_date(value) {
                    directives.expires = Some(at);
                }
            }
        }
        directives
    }

    /// Parse directives from a header-like multimap
    /// (e.g. `{"Cache-Control": ["max-age=60"]}`).
    pub fn from_header_map(headers: &HashMap<String, Vec<String>>) -> Self {
        Self::from_headers(
            headers
                .iter()
                .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str()))),
        )
    }

    fn apply_cache_control(&mut self, value: &str) {
        for part in value.split(',') {
            let part = part.trim();
            let (name, arg) = match part.split_once('=') {
                Some((n, a)) => (n.trim(), Some(a.trim().trim_matches('"'))),
                None => (part, None),
            };
            if name.eq_ignore_ascii_case("no-cache") || name.eq_ignore_ascii_case("no-store") {
                self.no_cache = true;
            } else if name.eq_ignore_ascii_case("max-age") {
                if let Some(secs) = arg.and_then(|a| a.parse::<u64>().ok()) {
                    self.max_age = Some(Duration::from_secs(secs));
                }
            }
        }
    }

    /// The instant a response stored at `now` stops being servable.
    ///
    /// `None` means "do not store": either `no-cache` was given, or no
    /// directive yields an expiry strictly after `now`.
    pub fn expiry(&self, now: SystemTime) -> Option<SystemTime> {
        if self.no_cache {
            return None;
        }
        let at = match self.max_age {
            Some(age) => now.checked_add(age)?,
            None => self.expires?,
        };
        (at > now).then_some(at)
    }
}

/// Parse an RFC 1123 HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| SystemTime::from(dt.with_timezone(&Utc)))
}
