//! Last.fm domain types and their JSON decoding.
//!
//! The public types are what the rest of the crate works with, and what
//! ends up in the response cache. The `Wire*` types mirror the API's JSON
//! (`format=json`), which has a few quirks:
//!
//! - numbers and booleans are often encoded as strings (`"playcount": "12"`)
//! - a list with one element is sent as a bare object, an empty one as `""`
//! - text nodes are keyed `#text`, attributes live under `@attr`

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::{HuginnError, Result};

// ============================================================================
// Domain types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Artist {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbid: Option<String>,
}

impl Artist {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mbid: None,
        }
    }
}

/// A track from a user's listening history.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Track {
    pub artist: Artist,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default)]
    pub loved: bool,
    #[serde(default)]
    pub now_playing: bool,
    /// Scrobble time, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub played_at: Option<u64>,
}

impl Track {
    pub fn new(artist: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            artist: Artist::named(artist),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn played_at_time(&self) -> Option<SystemTime> {
        self.played_at
            .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// `user.getRecentTracks`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecentTracks {
    pub user: String,
    pub total: u64,
    /// Most recent first; includes the currently playing track, if any.
    pub tracks: Vec<Track>,
}

impl RecentTracks {
    pub fn now_playing(&self) -> Option<&Track> {
        self.tracks.iter().find(|t| t.now_playing)
    }

    pub fn most_recent(&self) -> Option<&Track> {
        self.tracks.first()
    }
}

/// `track.getInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbid: Option<String>,
    pub artist: Artist,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub listeners: u64,
    #[serde(default)]
    pub playcount: u64,
    /// Only present when the request named a user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_playcount: Option<u64>,
    #[serde(default)]
    pub user_loved: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TrackInfo {
    /// Stand-in built from a listening-history entry when the info lookup
    /// failed. Duration and play count are unknown.
    pub fn placeholder(track: &Track) -> Self {
        Self {
            name: track.name.clone(),
            mbid: track.mbid.clone(),
            artist: track.artist.clone(),
            user_loved: track.loved,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub count: u64,
}

/// `track.getTopTags` / `artist.getTopTags`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopTags {
    pub artist: String,
    /// Set for track tags, absent for artist tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    pub tags: Vec<Tag>,
}

impl TopTags {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn names(&self, limit: usize) -> Vec<&str> {
        self.tags.iter().take(limit).map(|t| t.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopArtist {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbid: Option<String>,
    #[serde(default)]
    pub playcount: u64,
}

/// `user.getTopArtists`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopArtists {
    pub user: String,
    pub period: Period,
    pub artists: Vec<TopArtist>,
}

/// `tasteometer.compare`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Tasteometer {
    pub users: Vec<String>,
    /// 0.0 to 1.0.
    pub score: f64,
    /// Up to five shared artists with the most affinity.
    pub artists: Vec<String>,
}

/// Time range for chart queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Period {
    #[default]
    #[serde(rename = "overall")]
    Overall,
    #[serde(rename = "7day")]
    Week,
    #[serde(rename = "1month")]
    Month,
    #[serde(rename = "3month")]
    ThreeMonths,
    #[serde(rename = "6month")]
    SixMonths,
    #[serde(rename = "12month")]
    Year,
}

impl Period {
    /// The API's name for this period.
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Overall => "overall",
            Period::Week => "7day",
            Period::Month => "1month",
            Period::ThreeMonths => "3month",
            Period::SixMonths => "6month",
            Period::Year => "12month",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = HuginnError;

    /// Accepts the chat spelling (`week`, `month`, `year`) and the API's.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "overall" => Ok(Period::Overall),
            "week" | "7day" => Ok(Period::Week),
            "month" | "1month" => Ok(Period::Month),
            "3month" => Ok(Period::ThreeMonths),
            "6month" => Ok(Period::SixMonths),
            "year" | "12month" => Ok(Period::Year),
            other => Err(HuginnError::InvalidInput(format!("unknown period: {other}"))),
        }
    }
}

// ============================================================================
// Cached values
// ============================================================================

/// Any decoded API response, as stored in the response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ApiValue {
    RecentTracks(RecentTracks),
    TrackInfo(TrackInfo),
    TopTags(TopTags),
    TopArtists(TopArtists),
    Tasteometer(Tasteometer),
}

/// A domain type that can be decoded from an API body and stored in the
/// cache as an [`ApiValue`].
pub trait ApiResource: Sized + Clone + Send + 'static {
    fn decode(body: &[u8]) -> Result<Self>;
    fn into_value(self) -> ApiValue;
    fn from_value(value: ApiValue) -> Option<Self>;
}

fn decode_json<'a, T: Deserialize<'a>>(what: &str, body: &'a [u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| HuginnError::Serialization(format!("failed to decode {what}: {e}")))
}

macro_rules! api_resource {
    ($ty:ident, $envelope:ident) => {
        impl ApiResource for $ty {
            fn decode(body: &[u8]) -> Result<Self> {
                let envelope: $envelope = decode_json(stringify!($ty), body)?;
                Ok(envelope.into())
            }

            fn into_value(self) -> ApiValue {
                ApiValue::$ty(self)
            }

            fn from_value(value: ApiValue) -> Option<Self> {
                match value {
                    ApiValue::$ty(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

api_resource!(RecentTracks, RecentTracksEnvelope);
api_resource!(TrackInfo, TrackInfoEnvelope);
api_resource!(TopTags, TopTagsEnvelope);
api_resource!(TopArtists, TopArtistsEnvelope);
api_resource!(Tasteometer, ComparisonEnvelope);

// ============================================================================
// Wire format
// ============================================================================

mod lenient {
    use serde::de::IgnoredAny;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(u64),
        Float(f64),
        Str(String),
        Other(IgnoredAny),
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        Ok(optional_number(d)?.unwrap_or(0))
    }

    pub fn optional_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(match Scalar::deserialize(d)? {
            Scalar::Int(n) => Some(n),
            Scalar::Float(f) if f >= 0.0 => Some(f as u64),
            Scalar::Str(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn float<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(match Scalar::deserialize(d)? {
            Scalar::Int(n) => n as f64,
            Scalar::Float(f) => f,
            Scalar::Str(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        })
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(match Scalar::deserialize(d)? {
            Scalar::Bool(b) => b,
            Scalar::Int(n) => n != 0,
            Scalar::Str(s) => matches!(s.trim(), "1" | "true"),
            _ => false,
        })
    }

    /// A list that may arrive as an array, a single object, or junk.
    pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany<T> {
            Many(Vec<T>),
            One(T),
            Other(IgnoredAny),
        }
        Ok(match OneOrMany::<T>::deserialize(d)? {
            OneOrMany::Many(v) => v,
            OneOrMany::One(t) => vec![t],
            OneOrMany::Other(_) => Vec::new(),
        })
    }

    /// An object that may be replaced by an empty string.
    pub fn maybe<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Maybe<T> {
            Value(T),
            Other(IgnoredAny),
        }
        Ok(match Maybe::<T>::deserialize(d)? {
            Maybe::Value(v) => Some(v),
            Maybe::Other(_) => None,
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

#[derive(Debug, Default, Deserialize)]
struct WireArtist {
    #[serde(default, alias = "#text")]
    name: String,
    #[serde(default)]
    mbid: String,
}

impl From<WireArtist> for Artist {
    fn from(w: WireArtist) -> Self {
        Artist {
            name: w.name,
            mbid: non_empty(w.mbid),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireText {
    #[serde(rename = "#text", default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireListAttr {
    #[serde(default)]
    user: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    track: String,
    #[serde(default, deserialize_with = "lenient::number")]
    total: u64,
}

#[derive(Debug, Default, Deserialize)]
struct WireTrackAttr {
    #[serde(default, deserialize_with = "lenient::flag")]
    nowplaying: bool,
}

#[derive(Debug, Default, Deserialize)]
struct WireDate {
    #[serde(default, deserialize_with = "lenient::optional_number")]
    uts: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireRecentTrack {
    #[serde(default)]
    artist: WireArtist,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mbid: String,
    #[serde(default, deserialize_with = "lenient::maybe")]
    album: Option<WireText>,
    #[serde(default, deserialize_with = "lenient::flag")]
    loved: bool,
    #[serde(rename = "@attr", default, deserialize_with = "lenient::maybe")]
    attr: Option<WireTrackAttr>,
    #[serde(default, deserialize_with = "lenient::maybe")]
    date: Option<WireDate>,
}

impl From<WireRecentTrack> for Track {
    fn from(w: WireRecentTrack) -> Self {
        Track {
            artist: w.artist.into(),
            name: w.name,
            mbid: non_empty(w.mbid),
            album: w.album.and_then(|a| non_empty(a.text)),
            loved: w.loved,
            now_playing: w.attr.is_some_and(|a| a.nowplaying),
            played_at: w.date.and_then(|d| d.uts),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireRecentTracks {
    #[serde(default, deserialize_with = "lenient::list")]
    track: Vec<WireRecentTrack>,
    #[serde(rename = "@attr", default, deserialize_with = "lenient::maybe")]
    attr: Option<WireListAttr>,
}

#[derive(Debug, Deserialize)]
struct RecentTracksEnvelope {
    recenttracks: WireRecentTracks,
}

impl From<RecentTracksEnvelope> for RecentTracks {
    fn from(e: RecentTracksEnvelope) -> Self {
        let attr = e.recenttracks.attr.unwrap_or_default();
        RecentTracks {
            user: attr.user,
            total: attr.total,
            tracks: e.recenttracks.track.into_iter().map(Track::from).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireTag {
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "lenient::number")]
    count: u64,
}

#[derive(Debug, Default, Deserialize)]
struct WireTagList {
    #[serde(default, deserialize_with = "lenient::list")]
    tag: Vec<WireTag>,
    #[serde(rename = "@attr", default, deserialize_with = "lenient::maybe")]
    attr: Option<WireListAttr>,
}

#[derive(Debug, Default, Deserialize)]
struct WireTrackInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    mbid: String,
    #[serde(default)]
    artist: WireArtist,
    /// Milliseconds.
    #[serde(default, deserialize_with = "lenient::optional_number")]
    duration: Option<u64>,
    #[serde(default, deserialize_with = "lenient::number")]
    listeners: u64,
    #[serde(default, deserialize_with = "lenient::number")]
    playcount: u64,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    userplaycount: Option<u64>,
    #[serde(default, deserialize_with = "lenient::flag")]
    userloved: bool,
    #[serde(default, deserialize_with = "lenient::maybe")]
    toptags: Option<WireTagList>,
}

#[derive(Debug, Deserialize)]
struct TrackInfoEnvelope {
    track: WireTrackInfo,
}

impl From<TrackInfoEnvelope> for TrackInfo {
    fn from(e: TrackInfoEnvelope) -> Self {
        let w = e.track;
        TrackInfo {
            name: w.name,
            mbid: non_empty(w.mbid),
            artist: w.artist.into(),
            duration: w.duration.filter(|ms| *ms > 0).map(Duration::from_millis),
            listeners: w.listeners,
            playcount: w.playcount,
            user_playcount: w.userplaycount,
            user_loved: w.userloved,
            tags: w
                .toptags
                .map(|t| t.tag.into_iter().map(|tag| tag.name).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TopTagsEnvelope {
    toptags: WireTagList,
}

impl From<TopTagsEnvelope> for TopTags {
    fn from(e: TopTagsEnvelope) -> Self {
        let attr = e.toptags.attr.unwrap_or_default();
        TopTags {
            artist: attr.artist,
            track: non_empty(attr.track),
            tags: e
                .toptags
                .tag
                .into_iter()
                .map(|t| Tag {
                    name: t.name,
                    count: t.count,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireTopArtist {
    #[serde(default)]
    name: String,
    #[serde(default)]
    mbid: String,
    #[serde(default, deserialize_with = "lenient::number")]
    playcount: u64,
}

#[derive(Debug, Default, Deserialize)]
struct WireTopArtistAttr {
    #[serde(default)]
    user: String,
    #[serde(default, deserialize_with = "lenient::maybe")]
    period: Option<Period>,
}

#[derive(Debug, Default, Deserialize)]
struct WireTopArtists {
    #[serde(default, deserialize_with = "lenient::list")]
    artist: Vec<WireTopArtist>,
    #[serde(rename = "@attr", default, deserialize_with = "lenient::maybe")]
    attr: Option<WireTopArtistAttr>,
}

#[derive(Debug, Deserialize)]
struct TopArtistsEnvelope {
    topartists: WireTopArtists,
}

impl From<TopArtistsEnvelope> for TopArtists {
    fn from(e: TopArtistsEnvelope) -> Self {
        let attr = e.topartists.attr.unwrap_or_default();
        TopArtists {
            user: attr.user,
            period: attr.period.unwrap_or_default(),
            artists: e
                .topartists
                .artist
                .into_iter()
                .map(|a| TopArtist {
                    name: a.name,
                    mbid: non_empty(a.mbid),
                    playcount: a.playcount,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireArtistList {
    #[serde(default, deserialize_with = "lenient::list")]
    artist: Vec<WireArtist>,
}

#[derive(Debug, Default, Deserialize)]
struct WireTasteResult {
    #[serde(default, deserialize_with = "lenient::float")]
    score: f64,
    #[serde(default, deserialize_with = "lenient::maybe")]
    artists: Option<WireArtistList>,
}

#[derive(Debug, Default, Deserialize)]
struct WireTasteInput {
    #[serde(default, deserialize_with = "lenient::list")]
    user: Vec<WireArtist>,
}

#[derive(Debug, Default, Deserialize)]
struct WireComparison {
    #[serde(default)]
    result: WireTasteResult,
    #[serde(default)]
    input: WireTasteInput,
}

#[derive(Debug, Deserialize)]
struct ComparisonEnvelope {
    comparison: WireComparison,
}

impl From<ComparisonEnvelope> for Tasteometer {
    fn from(e: ComparisonEnvelope) -> Self {
        let c = e.comparison;
        Tasteometer {
            users: c.input.user.into_iter().map(|u| u.name).collect(),
            score: c.result.score,
            artists: c
                .result
                .artists
                .map(|a| a.artist.into_iter().map(|a| a.name).collect())
                .unwrap_or_default(),
        }
    }
}
