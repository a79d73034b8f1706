//! Tests for cache snapshots on disk and the background persister.

use std::sync::Arc;
use std::time::Duration;

use huginn::cache::{
    CacheDirectives, CachePersister, CachedOutcome, Params, PersistConfig, ResponseCache, persist,
};
use huginn::error::RemoteError;

fn fresh() -> CacheDirectives {
    CacheDirectives::new().max_age(Duration::from_secs(600))
}

fn user(name: &str) -> Params {
    [("user".to_string(), name.to_string())].into_iter().collect()
}

fn filled() -> ResponseCache<String> {
    let cache = ResponseCache::new();
    cache.set("user.getRecentTracks", &user("rj"), CachedOutcome::Success("Autechre".into()), &fresh());
    cache.set(
        "user.getRecentTracks",
        &user("ghost"),
        CachedOutcome::Failure(RemoteError::new(6, "User not found")),
        &fresh(),
    );
    cache
}

async fn wait_for_file(path: &std::path::Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("{} was never written", path.display());
}

// =========================================================================
// Snapshot files
// =========================================================================

#[test]
fn saved_file_restores_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.z");

    assert_eq!(persist::save_snapshot(&filled(), &path).unwrap(), 2);
    assert!(!dir.path().join("cache.z.tmp").exists());

    let restored: ResponseCache<String> = ResponseCache::new();
    assert_eq!(persist::load_snapshot(&restored, &path).unwrap(), 2);
    assert_eq!(
        restored.get("user.getRecentTracks", &user("rj")),
        Some(CachedOutcome::Success("Autechre".to_string()))
    );
    assert!(restored.get("user.getRecentTracks", &user("ghost")).unwrap().is_failure());
}

#[test]
fn save_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("huginn").join("cache.z");
    persist::save_snapshot(&filled(), &path).unwrap();
    assert!(path.exists());
}

#[test]
fn missing_file_is_an_error_and_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cache = filled();
    assert!(persist::load_snapshot(&cache, &dir.path().join("absent.z")).is_err());
    assert_eq!(cache.len(), 2);
}

#[test]
fn corrupt_file_leaves_cache_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.z");
    std::fs::write(&path, b"definitely not zlib").unwrap();

    let cache = filled();
    assert!(persist::load_snapshot(&cache, &path).is_err());
    assert_eq!(cache.len(), 2);
}

#[test]
fn truncated_file_leaves_cache_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.z");
    persist::save_snapshot(&filled(), &path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let cache: ResponseCache<String> = ResponseCache::new();
    assert!(persist::load_snapshot(&cache, &path).is_err());
    assert!(cache.is_empty());
}

// =========================================================================
// Background persister
// =========================================================================

#[tokio::test]
async fn touch_saves_after_debounce() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.z");
    let config = PersistConfig::new(&path)
        .interval(Duration::from_secs(3600))
        .debounce(Duration::from_millis(50));
    let handle = CachePersister::spawn(Arc::new(filled()), config);

    handle.touch();
    wait_for_file(&path).await;

    let restored: ResponseCache<String> = ResponseCache::new();
    assert_eq!(persist::load_snapshot(&restored, &path).unwrap(), 2);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn interval_saves_without_activity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.z");
    let config = PersistConfig::new(&path).interval(Duration::from_millis(50));
    let handle = CachePersister::spawn(Arc::new(filled()), config);

    wait_for_file(&path).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_writes_a_final_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.z");
    let cache = Arc::new(filled());
    let handle = CachePersister::spawn(Arc::clone(&cache), PersistConfig::new(&path));

    cache.set("track.getInfo", &Params::new(), CachedOutcome::Success("late".into()), &fresh());
    let clone = handle.clone();
    assert_eq!(clone.shutdown().await.unwrap(), 3);
    assert!(handle.is_shut_down());
    assert_eq!(handle.path(), path.as_path());

    let restored: ResponseCache<String> = ResponseCache::new();
    assert_eq!(persist::load_snapshot(&restored, &path).unwrap(), 3);
}

#[tokio::test]
async fn concurrent_saves_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.z");
    let handle = CachePersister::spawn(Arc::new(filled()), PersistConfig::new(&path));

    let (a, b) = tokio::join!(handle.save_now(), handle.save_now());
    assert_eq!(a.unwrap(), 2);
    assert_eq!(b.unwrap(), 2);
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn persister_runs_on_a_multi_thread_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.z");
    let config = PersistConfig::new(&path).debounce(Duration::from_millis(20));
    let handle = CachePersister::spawn(Arc::new(filled()), config);

    handle.touch();
    wait_for_file(&path).await;
    assert_eq!(handle.shutdown().await.unwrap(), 2);
}
