//! Caching subsystem.
//!
//! - [`ResponseCache`]: TTL cache of remote API outcomes keyed on
//!   `(method, parameters)`. Successes and typed remote errors are stored
//!   alike; expiry comes from the response's [`CacheDirectives`].
//!
//! - [`persist`]: zlib-compressed snapshots of a [`ResponseCache`] on
//!   disk, plus the background [`CachePersister`] that writes them.

pub mod directives;
pub mod persist;
pub mod response;

pub use directives::CacheDirectives;
pub use persist::{CachePersister, PersistConfig, PersistHandle};
pub use response::{CacheStats, CachedOutcome, ResponseCache};

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Request parameters for a remote method call.
pub type Params = HashMap<String, String>;

/// Canonical key for a `(method, parameters)` pair.
///
/// Parameter names are sorted before concatenation, so two maps holding the
/// same pairs always produce the same key regardless of insertion order.
/// Keys are plain strings (`method&k1=v1&k2=v2`) and therefore stable across
/// process restarts, which snapshots rely on. `&`, `=` and `\` inside names
/// and values are backslash-escaped so distinct parameter sets cannot
/// collapse onto one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(method: &str, params: &Params) -> Self {
        let mut names: Vec<&String> = params.keys().collect();
        names.sort();

        let mut key = String::with_capacity(method.len() + params.len() * 16);
        push_escaped(&mut key, method);
        for name in names {
            key.push('&');
            push_escaped(&mut key, name);
            key.push('=');
            push_escaped(&mut key, &params[name]);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        if matches!(c, '&' | '=' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn key_is_order_independent() {
        let mut p1 = Params::new();
        p1.insert("artist".into(), "Boards of Canada".into());
        p1.insert("track".into(), "Roygbiv".into());
        p1.insert("autocorrect".into(), "1".into());

        let mut p2 = Params::new();
        p2.insert("autocorrect".into(), "1".into());
        p2.insert("track".into(), "Roygbiv".into());
        p2.insert("artist".into(), "Boards of Canada".into());

        assert_eq!(
            CacheKey::new("track.getInfo", &p1),
            CacheKey::new("track.getInfo", &p2)
        );
    }

    #[test]
    fn key_layout() {
        let key = CacheKey::new("track.getInfo", &params(&[("mbid", "X"), ("autocorrect", "1")]));
        assert_eq!(key.as_str(), "track.getInfo&autocorrect=1&mbid=X");
    }

    #[test]
    fn key_differs_on_method() {
        let p = params(&[("artist", "Autechre")]);
        assert_ne!(
            CacheKey::new("artist.getTopTags", &p),
            CacheKey::new("artist.getInfo", &p)
        );
    }

    #[test]
    fn key_differs_on_value() {
        assert_ne!(
            CacheKey::new("m", &params(&[("user", "a")])),
            CacheKey::new("m", &params(&[("user", "b")]))
        );
    }

    #[test]
    fn escaping_prevents_collisions() {
        let smuggled = params(&[("a", "1&b=2")]);
        let split = params(&[("a", "1"), ("b", "2")]);
        assert_ne!(CacheKey::new("m", &smuggled), CacheKey::new("m", &split));
    }

    #[test]
    fn empty_params_is_just_the_method() {
        assert_eq!(CacheKey::new("chart.getTopTracks", &Params::new()).as_str(), "chart.getTopTracks");
    }
}
