//! Tests for the Last.fm client and the cached facade, against a wiremock
//! server standing in for the web service.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use huginn::HuginnError;
use huginn::lastfm::{LastFm, LastFmClient, Period, Track};
use huginn::nowplaying::{self, Report};

const RECENT_PLAYING: &str = r##"{"recenttracks":{"track":[
    {"artist":{"name":"Autechre","mbid":""},"name":"Gantz Graf","mbid":"",
     "album":{"#text":"Gantz Graf"},"@attr":{"nowplaying":"true"}},
    {"artist":{"name":"Autechre","mbid":""},"name":"Cap.IV","mbid":"",
     "date":{"uts":"1400000000"}}
],"@attr":{"user":"rj","total":"2"}}}"##;

const TRACK_INFO: &str = r#"{"track":{"name":"Gantz Graf","mbid":"",
    "artist":{"name":"Autechre","mbid":""},"duration":"236000",
    "listeners":"1000","playcount":"5000","userplaycount":"12","userloved":"1"}}"#;

const TRACK_TAGS: &str = r#"{"toptags":{"tag":[
    {"name":"idm","count":100},{"name":"electronic","count":80}
],"@attr":{"artist":"Autechre","track":"Gantz Graf"}}}"#;

const ARTIST_TAGS: &str = r#"{"toptags":{"tag":[
    {"name":"experimental","count":100}
],"@attr":{"artist":"Autechre"}}}"#;

fn facade(server: &MockServer) -> LastFm {
    let client = LastFmClient::new("test-key")
        .unwrap()
        .with_base_url(format!("{}/2.0/", server.uri()));
    LastFm::new(Arc::new(client))
}

fn json(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/json")
        .insert_header("cache-control", "max-age=60")
        .set_body_string(body)
}

async fn until_cached(lastfm: &LastFm, entries: usize) {
    while lastfm.cache().len() < entries {
        tokio::task::yield_now().await;
    }
}

// =========================================================================
// Transport
// =========================================================================

#[tokio::test]
async fn request_carries_method_key_and_format() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2.0/"))
        .and(query_param("method", "user.getRecentTracks"))
        .and(query_param("api_key", "test-key"))
        .and(query_param("format", "json"))
        .and(query_param("user", "rj"))
        .respond_with(json(RECENT_PLAYING))
        .expect(1)
        .mount(&server)
        .await;

    let recent = facade(&server).recent_tracks("rj", 1).await.unwrap();
    assert_eq!(recent.user, "rj");
    assert_eq!(recent.now_playing().unwrap().name, "Gantz Graf");
}

#[tokio::test]
async fn error_body_becomes_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"error":6,"message":"No user with that name was found"}"#,
        ))
        .mount(&server)
        .await;

    let err = facade(&server).recent_tracks("ghost", 1).await.unwrap_err();
    let remote = err.remote().expect("typed remote error");
    assert_eq!(remote.code, 6);
    assert!(remote.is_user_not_found());
}

#[tokio::test]
async fn server_failure_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = facade(&server).recent_tracks("rj", 1).await.unwrap_err();
    assert!(matches!(err, HuginnError::Api { status: 503, .. }));
    assert!(err.is_transient());
}

// =========================================================================
// Caching
// =========================================================================

#[tokio::test]
async fn second_lookup_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("method", "user.getTopArtists"))
        .respond_with(json(
            r#"{"topartists":{"artist":[{"name":"Autechre","playcount":"300"}],
                "@attr":{"user":"rj","period":"7day"}}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let lastfm = facade(&server);
    let first = lastfm.user_top_artists("rj", Period::Week, 5).await.unwrap();
    until_cached(&lastfm, 1).await;
    let second = lastfm.user_top_artists("rj", Period::Week, 5).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.artists[0].name, "Autechre");
    assert_eq!(lastfm.cache().stats().hits, 1);
}

#[tokio::test]
async fn remote_errors_are_cached_too() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "max-age=60")
                .set_body_string(r#"{"error":6,"message":"User not found"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let lastfm = facade(&server);
    assert!(lastfm.recent_tracks("ghost", 1).await.is_err());
    until_cached(&lastfm, 1).await;
    let err = lastfm.recent_tracks("ghost", 1).await.unwrap_err();
    assert!(err.remote().is_some_and(|e| e.is_user_not_found()));
}

#[tokio::test]
async fn no_cache_responses_are_refetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "no-cache")
                .set_body_string(TRACK_TAGS),
        )
        .expect(2)
        .mount(&server)
        .await;

    let lastfm = facade(&server);
    let track = Track::new("Autechre", "Gantz Graf");
    lastfm.track_top_tags(&track).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    lastfm.track_top_tags(&track).await.unwrap();
    assert!(lastfm.cache().is_empty());
}

// =========================================================================
// Now playing, end to end
// =========================================================================

async fn mount_method(server: &MockServer, name: &str, body: &str) {
    Mock::given(method("GET"))
        .and(query_param("method", name))
        .respond_with(json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn now_playing_report_merges_all_lookups() {
    let server = MockServer::start().await;
    mount_method(&server, "user.getRecentTracks", RECENT_PLAYING).await;
    mount_method(&server, "track.getInfo", TRACK_INFO).await;
    mount_method(&server, "track.getTopTags", TRACK_TAGS).await;
    mount_method(&server, "artist.getTopTags", ARTIST_TAGS).await;

    let report = nowplaying::report(&facade(&server), "rj_irc", "rj").await;
    assert!(report.is_now_playing());
    assert_eq!(
        report.to_string(),
        "[rj_irc] np: Autechre - Gantz Graf [<3 - playcount 12x] (idm, electronic) [3m56s]"
    );
}

#[tokio::test]
async fn failed_enrichment_still_reports() {
    let server = MockServer::start().await;
    mount_method(&server, "user.getRecentTracks", RECENT_PLAYING).await;
    mount_method(&server, "artist.getTopTags", ARTIST_TAGS).await;
    Mock::given(method("GET"))
        .and(query_param("method", "track.getInfo"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("method", "track.getTopTags"))
        .respond_with(json(r#"{"toptags":{"tag":[],"@attr":{"artist":"Autechre"}}}"#))
        .mount(&server)
        .await;

    let report = nowplaying::report(&facade(&server), "rj", "rj").await;
    // placeholder info, artist tags as fallback
    assert_eq!(
        report.to_string(),
        "[rj] np: Autechre - Gantz Graf [first listen] (experimental)"
    );
}

#[tokio::test]
async fn nothing_playing_reports_last_scrobble() {
    let server = MockServer::start().await;
    mount_method(
        &server,
        "user.getRecentTracks",
        r#"{"recenttracks":{"track":{"artist":{"name":"Autechre"},"name":"Cap.IV",
            "date":{"uts":"1400000000"}},"@attr":{"user":"rj","total":"1"}}}"#,
    )
    .await;

    let report = nowplaying::report(&facade(&server), "rj", "rj").await;
    match &report {
        Report::LastListened { track, ago, .. } => {
            assert_eq!(track.name, "Cap.IV");
            assert!(ago.is_some());
        }
        other => panic!("expected last listened, got {other:?}"),
    }
    assert!(report.to_string().starts_with("[rj] last listened to Autechre - Cap.IV, "));
}

#[tokio::test]
async fn unknown_user_report_mentions_empty_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"error":6,"message":"No user with that name was found"}"#,
        ))
        .mount(&server)
        .await;

    let report = nowplaying::report(&facade(&server), "ghost", "ghost").await;
    assert_eq!(
        report.to_string(),
        "[ghost] No user with that name was found, or user never scrobbled anything"
    );
}
