//! "Now playing" reports.
//!
//! A report starts from the user's recent tracks. If something is playing,
//! three enrichment lookups fan out concurrently (track info, track tags,
//! artist tags) and are merged into one line:
//!
//! ```text
//! [who] np: Artist - Title [<3 - playcount 12x] (idm, electronic) [5m12s]
//! ```
//!
//! Otherwise the report names the last scrobble and how long ago it was.

use std::fmt;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::HuginnError;
use crate::Result;
use crate::fanout::FanOutAggregator;
use crate::lastfm::{LastFm, TopTags, Track, TrackInfo};
use crate::telemetry;

/// Maximum number of tags shown in a report.
pub const MAX_TAGS: usize = 5;

/// Result of one enrichment branch.
#[derive(Debug, Clone)]
pub enum Enrichment {
    Info(TrackInfo),
    TrackTags(TopTags),
    ArtistTags(TopTags),
}

/// Merged enrichment for the playing track.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub info: TrackInfo,
    pub tags: Vec<String>,
}

/// Merge enrichment outcomes for `anchor`.
///
/// Track tags win when present and non-empty, otherwise artist tags are
/// used. Failed branches are logged and contribute nothing; if the info
/// branch failed, a placeholder is built from `anchor`.
pub fn merge(anchor: &Track, outcomes: Vec<Result<Enrichment>>) -> NowPlaying {
    let mut info = None;
    let mut track_tags: Option<TopTags> = None;
    let mut artist_tags: Option<TopTags> = None;

    for outcome in outcomes {
        match outcome {
            Ok(Enrichment::Info(i)) => info = Some(i),
            Ok(Enrichment::TrackTags(t)) => track_tags = Some(t),
            Ok(Enrichment::ArtistTags(t)) => artist_tags = Some(t),
            Err(e) => {
                warn!(track = %anchor.name, artist = %anchor.artist.name, error = %e, "enrichment lookup failed");
                metrics::counter!(telemetry::FANOUT_BRANCH_FAILURES_TOTAL).increment(1);
            }
        }
    }

    let tags = track_tags
        .filter(|t| !t.is_empty())
        .or(artist_tags)
        .map(|t| t.names(MAX_TAGS).into_iter().map(str::to_string).collect())
        .unwrap_or_default();

    NowPlaying {
        info: info.unwrap_or_else(|| TrackInfo::placeholder(anchor)),
        tags,
    }
}

/// Look up info and tags for `anchor` concurrently and merge them.
pub async fn enrich(lastfm: &LastFm, anchor: &Track, user: &str) -> NowPlaying {
    let info = {
        let (lastfm, track, user) = (lastfm.clone(), anchor.clone(), user.to_string());
        async move { lastfm.track_info(&track, Some(&user)).await.map(Enrichment::Info) }
    };
    let track_tags = {
        let (lastfm, track) = (lastfm.clone(), anchor.clone());
        async move { lastfm.track_top_tags(&track).await.map(Enrichment::TrackTags) }
    };
    let artist_tags = {
        let (lastfm, artist) = (lastfm.clone(), anchor.artist.clone());
        async move { lastfm.artist_top_tags(&artist).await.map(Enrichment::ArtistTags) }
    };

    let outcomes = FanOutAggregator::new()
        .branch(info)
        .branch(track_tags)
        .branch(artist_tags)
        .join()
        .await;
    merge(anchor, outcomes)
}

/// Outcome of a now-playing request for one user.
#[derive(Debug)]
pub enum Report {
    NowPlaying {
        who: String,
        playing: NowPlaying,
    },
    LastListened {
        who: String,
        track: Track,
        ago: Option<Duration>,
    },
    NeverScrobbled {
        who: String,
    },
    Failed {
        who: String,
        error: HuginnError,
    },
}

impl Report {
    pub fn is_now_playing(&self) -> bool {
        matches!(self, Report::NowPlaying { .. })
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::NowPlaying { who, playing } => {
                let info = &playing.info;
                write!(f, "[{who}] np: {} - {}", info.artist.name, info.name)?;

                let mut flags = Vec::new();
                if info.user_loved {
                    flags.push("<3".to_string());
                }
                match info.user_playcount {
                    Some(n) if n > 0 => flags.push(format!("playcount {n}x")),
                    _ => flags.push("first listen".to_string()),
                }
                write!(f, " [{}]", flags.join(" - "))?;

                if !playing.tags.is_empty() {
                    write!(f, " ({})", playing.tags.join(", "))?;
                }
                if let Some(d) = info.duration.filter(|d| !d.is_zero()) {
                    write!(f, " [{}]", format_duration(d))?;
                }
                Ok(())
            }
            Report::LastListened { who, track, ago } => {
                write!(f, "[{who}] last listened to {} - {},", track.artist.name, track.name)?;
                match ago {
                    Some(ago) => write!(f, " {} ago", format_age(*ago)),
                    None => write!(f, " not even last.fm knows when"),
                }
            }
            Report::NeverScrobbled { who } => write!(f, "[{who}] never scrobbled anything"),
            Report::Failed { who, error } => {
                write!(f, "[{who}] {error}")?;
                if error.remote().is_some_and(|e| e.is_user_not_found()) {
                    write!(f, ", or user never scrobbled anything")?;
                }
                Ok(())
            }
        }
    }
}

/// Build the now-playing report for Last.fm `user`, shown as `who`.
pub async fn report(lastfm: &LastFm, who: &str, user: &str) -> Report {
    debug!(who, user, "reporting now playing");
    let recent = match lastfm.recent_tracks(user, 1).await {
        Ok(recent) => recent,
        Err(error) => {
            return Report::Failed {
                who: who.to_string(),
                error,
            };
        }
    };

    if let Some(anchor) = recent.now_playing() {
        let playing = enrich(lastfm, anchor, user).await;
        return Report::NowPlaying {
            who: who.to_string(),
            playing,
        };
    }

    match recent.most_recent() {
        Some(track) => Report::LastListened {
            who: who.to_string(),
            track: track.clone(),
            ago: track
                .played_at_time()
                .map(|at| SystemTime::now().duration_since(at).unwrap_or_default()),
        },
        None => Report::NeverScrobbled {
            who: who.to_string(),
        },
    }
}

/// `1h2m3s` / `4m5s` / `6s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

/// Age rounded to the second, with whole years (365 days) and days split
/// off: `1y12d3h0m5s`.
pub fn format_age(age: Duration) -> String {
    const DAY: u64 = 24 * 3600;
    const YEAR: u64 = 365 * DAY;

    let mut secs = (age + Duration::from_millis(500)).as_secs();
    let mut prefix = String::new();

    let years = secs / YEAR;
    secs %= YEAR;
    if years > 0 {
        prefix.push_str(&format!("{years}y"));
    }
    let days = secs / DAY;
    secs %= DAY;
    if days > 0 {
        prefix.push_str(&format!("{days}d"));
    }
    prefix + &format_duration(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::lastfm::Tag;

    fn tags(names: &[&str], track: Option<&str>) -> TopTags {
        TopTags {
            artist: "Autechre".into(),
            track: track.map(str::to_string),
            tags: names
                .iter()
                .map(|n| Tag {
                    name: n.to_string(),
                    count: 0,
                })
                .collect(),
        }
    }

    fn anchor() -> Track {
        Track::new("Autechre", "Gantz Graf")
    }

    #[test]
    fn track_tags_win_when_present() {
        let np = merge(
            &anchor(),
            vec![
                Ok(Enrichment::ArtistTags(tags(&["idm"], None))),
                Ok(Enrichment::TrackTags(tags(&["glitch"], Some("Gantz Graf")))),
            ],
        );
        assert_eq!(np.tags, vec!["glitch"]);
    }

    #[test]
    fn empty_track_tags_fall_back_to_artist() {
        let np = merge(
            &anchor(),
            vec![
                Ok(Enrichment::TrackTags(tags(&[], Some("Gantz Graf")))),
                Ok(Enrichment::ArtistTags(tags(&["idm", "electronic"], None))),
            ],
        );
        assert_eq!(np.tags, vec!["idm", "electronic"]);
    }

    #[test]
    fn tags_are_capped() {
        let np = merge(
            &anchor(),
            vec![Ok(Enrichment::ArtistTags(tags(&["a", "b", "c", "d", "e", "f", "g"], None)))],
        );
        assert_eq!(np.tags.len(), MAX_TAGS);
    }

    #[test]
    fn failed_info_gives_placeholder() {
        let np = merge(
            &anchor(),
            vec![Err(HuginnError::Transport("connection reset".into()))],
        );
        assert_eq!(np.info.name, "Gantz Graf");
        assert_eq!(np.info.artist.name, "Autechre");
        assert_eq!(np.info.duration, None);
        assert!(np.tags.is_empty());
    }

    #[test]
    fn now_playing_line() {
        let report = Report::NowPlaying {
            who: "rj".into(),
            playing: NowPlaying {
                info: TrackInfo {
                    name: "Gantz Graf".into(),
                    artist: crate::lastfm::Artist::named("Autechre"),
                    duration: Some(Duration::from_secs(235)),
                    user_playcount: Some(12),
                    user_loved: true,
                    ..TrackInfo::default()
                },
                tags: vec!["idm".into(), "glitch".into()],
            },
        };
        assert_eq!(
            report.to_string(),
            "[rj] np: Autechre - Gantz Graf [<3 - playcount 12x] (idm, glitch) [3m55s]"
        );
    }

    #[test]
    fn first_listen_without_duration() {
        let report = Report::NowPlaying {
            who: "rj".into(),
            playing: NowPlaying {
                info: TrackInfo::placeholder(&anchor()),
                tags: vec![],
            },
        };
        assert_eq!(report.to_string(), "[rj] np: Autechre - Gantz Graf [first listen]");
    }

    #[test]
    fn last_listened_lines() {
        let with_age = Report::LastListened {
            who: "rj".into(),
            track: anchor(),
            ago: Some(Duration::from_secs(2 * 86_400 + 3 * 3600 + 4 * 60 + 5)),
        };
        assert_eq!(
            with_age.to_string(),
            "[rj] last listened to Autechre - Gantz Graf, 2d3h4m5s ago"
        );

        let unknown = Report::LastListened {
            who: "rj".into(),
            track: anchor(),
            ago: None,
        };
        assert_eq!(
            unknown.to_string(),
            "[rj] last listened to Autechre - Gantz Graf, not even last.fm knows when"
        );
    }

    #[test]
    fn user_not_found_gets_hint() {
        let report = Report::Failed {
            who: "ghost".into(),
            error: HuginnError::Remote(RemoteError::new(6, "No user with that name was found")),
        };
        assert_eq!(
            report.to_string(),
            "[ghost] No user with that name was found, or user never scrobbled anything"
        );
    }

    #[test]
    fn age_formatting() {
        assert_eq!(format_age(Duration::from_millis(4_600)), "5s");
        assert_eq!(format_age(Duration::from_secs(366 * 86_400)), "1y1d0s");
        assert_eq!(format_age(Duration::from_secs(3600)), "1h0m0s");
    }
}
