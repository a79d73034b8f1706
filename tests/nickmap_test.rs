//! Tests for [`NickMap`] backed by a file.

use std::sync::Arc;
use std::time::{Duration, Instant};

use huginn::nickmap::{Association, NickMap};

#[test]
fn missing_file_opens_empty() {
    let dir = tempfile::tempdir().unwrap();
    let map = NickMap::open(dir.path().join("irc.example.net.nicks.json")).unwrap();
    assert!(map.is_empty());
    assert_eq!(map.resolve("rj").as_deref(), Some("rj"));
}

#[test]
fn changes_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nicks.json");

    let map = NickMap::open(&path).unwrap();
    map.set_user("rj", "RJ").unwrap();
    map.set_user("rj|work", "RJ").unwrap();
    map.ignore("Shy").unwrap();
    drop(map);

    let reopened = NickMap::open(&path).unwrap();
    assert_eq!(reopened.len(), 3);
    assert_eq!(reopened.lookup("RJ|WORK"), Association::User("RJ".into()));
    assert_eq!(reopened.lookup("shy"), Association::Ignored);
    assert_eq!(reopened.nicks_for("rj"), vec!["rj", "rj|work"]);
}

#[test]
fn file_is_keyed_by_username() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nicks.json");

    let map = NickMap::open(&path).unwrap();
    map.set_user("kov", "kovacs").unwrap();
    map.ignore("shy").unwrap();

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(doc, serde_json::json!({ "kovacs": ["kov"], "": ["shy"] }));
    assert!(!dir.path().join("nicks.json.tmp").exists());
}

#[test]
fn removal_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nicks.json");

    let map = NickMap::open(&path).unwrap();
    map.set_user("rj", "rj_fm").unwrap();
    assert_eq!(map.remove("RJ").unwrap(), Some(Association::User("rj_fm".into())));
    assert_eq!(map.remove("rj").unwrap(), None);

    let reopened = NickMap::open(&path).unwrap();
    assert_eq!(reopened.lookup("rj"), Association::Unassociated);
}

#[test]
fn reassigning_a_nick_moves_it() {
    let map = NickMap::new();
    map.set_user("rj", "first").unwrap();
    map.set_user("RJ", "second").unwrap();

    assert_eq!(map.len(), 1);
    assert!(map.nicks_for("first").is_empty());
    assert_eq!(map.nicks_for("second"), vec!["RJ"]);
}

#[test]
fn reload_picks_up_external_edits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nicks.json");
    let map = NickMap::open(&path).unwrap();

    std::fs::write(&path, r#"{ "kovacs": ["kov", "kov_"] }"#).unwrap();
    map.reload().unwrap();
    assert_eq!(map.resolve("kov_").as_deref(), Some("kovacs"));
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nicks.json");
    std::fs::write(&path, "[1, 2, 3]").unwrap();
    assert!(NickMap::open(&path).is_err());
}

#[test]
fn own_saves_are_not_reported_as_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nicks.json");
    let map = NickMap::open(&path).unwrap();

    map.set_user("rj", "rj_fm").unwrap();
    assert!(!map.reload().unwrap());

    std::fs::write(&path, r#"{ "kovacs": ["kov"] }"#).unwrap();
    assert!(map.reload().unwrap());
    assert_eq!(map.lookup("rj"), Association::Unassociated);
}

#[test]
fn watcher_reloads_after_external_edit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nicks.json");
    let map = Arc::new(NickMap::open(&path).unwrap());
    map.set_user("rj", "rj_fm").unwrap();
    let _watcher = map.watch(Duration::from_millis(50)).unwrap();

    std::fs::write(&path, r#"{ "kovacs": ["kov", "kov_"] }"#).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while map.resolve("kov_").as_deref() != Some("kovacs") {
        assert!(Instant::now() < deadline, "nick map was never reloaded");
        std::thread::sleep(Duration::from_millis(25));
    }
    assert_eq!(map.lookup("rj"), Association::Unassociated);
}

#[test]
fn in_memory_map_cannot_be_watched() {
    let map = Arc::new(NickMap::new());
    assert!(map.watch(Duration::from_millis(50)).is_err());
}
