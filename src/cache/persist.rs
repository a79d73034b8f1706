//! On-disk persistence for the response cache.
//!
//! Snapshots produced by [`ResponseCache::snapshot`] are zlib-compressed
//! and written atomically (tmp file + rename). The file is single-process:
//! two bots sharing one cache file will overwrite each other.
//!
//! # Save schedule
//!
//! [`CachePersister`] runs a background task that saves on a fixed
//! interval (default 120s). Activity calls [`PersistHandle::touch`], which
//! pulls the next save in to a short debounce delay (default 10s) so that
//! fresh API results reach disk soon after a burst of commands, without
//! writing once per command.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ResponseCache;
use crate::{HuginnError, Result};

/// Upper bound on the decompressed snapshot size.
const MAX_SNAPSHOT_BYTES: u64 = 64 * 1024 * 1024;

/// Save the cache to `path`. Returns the number of entries written.
pub fn save_snapshot<V>(cache: &ResponseCache<V>, path: &Path) -> Result<usize>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let count = cache.len();
    let raw = cache.snapshot()?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path);
    std::fs::write(&tmp_path, &compressed)?;
    std::fs::rename(&tmp_path, path)?;

    Ok(count)
}

/// Replace the cache contents with the snapshot stored at `path`.
///
/// A missing, truncated or corrupt file leaves the cache untouched.
pub fn load_snapshot<V>(cache: &ResponseCache<V>, path: &Path) -> Result<usize>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let compressed = std::fs::read(path)?;

    let mut raw = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .take(MAX_SNAPSHOT_BYTES + 1)
        .read_to_end(&mut raw)
        .map_err(|e| HuginnError::Serialization(format!("corrupt cache file {}: {e}", path.display())))?;
    if raw.len() as u64 > MAX_SNAPSHOT_BYTES {
        return Err(HuginnError::Serialization(format!(
            "cache file {} exceeds {MAX_SNAPSHOT_BYTES} bytes when decompressed",
            path.display()
        )));
    }

    cache.restore(&raw)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Configuration for background cache persistence.
///
/// ```rust
/// # use huginn::cache::PersistConfig;
/// # use std::time::Duration;
/// let config = PersistConfig::new("/var/lib/huginn/cache.z")
///     .interval(Duration::from_secs(300))
///     .debounce(Duration::from_secs(5));
/// assert_eq!(config.interval, Duration::from_secs(300));
/// ```
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Snapshot file.
    pub path: PathBuf,
    /// Regular save interval. Default: 120s.
    pub interval: Duration,
    /// Delay before saving after [`PersistHandle::touch`]. Default: 10s.
    pub debounce: Duration,
}

impl PersistConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: Duration::from_secs(120),
            debounce: Duration::from_secs(10),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

struct Shared<V> {
    cache: Arc<ResponseCache<V>>,
    config: PersistConfig,
    nudge: Notify,
    shutdown: watch::Sender<bool>,
    /// Held for the duration of a save so writers never share the tmp file.
    save_lock: Mutex<()>,
}

/// Background writer of cache snapshots.
pub struct CachePersister;

impl CachePersister {
    /// Spawn the save loop for `cache`.
    pub fn spawn<V>(cache: Arc<ResponseCache<V>>, config: PersistConfig) -> PersistHandle<V>
    where
        V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            cache,
            config,
            nudge: Notify::new(),
            shutdown,
            save_lock: Mutex::new(()),
        });
        tokio::spawn(save_loop(Arc::clone(&shared)));
        PersistHandle { shared }
    }
}

async fn save_loop<V>(shared: Arc<Shared<V>>)
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut shutdown = shared.shutdown.subscribe();
    let mut deadline = Instant::now() + shared.config.interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                if let Err(e) = save_blocking(&shared).await {
                    warn!(path = %shared.config.path.display(), error = %e, "failed to save cache");
                }
                deadline = Instant::now() + shared.config.interval;
            }
            _ = shared.nudge.notified() => {
                deadline = Instant::now() + shared.config.debounce;
            }
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
        }
    }
    debug!("cache persister stopped");
}

async fn save_blocking<V>(shared: &Arc<Shared<V>>) -> Result<usize>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let _guard = shared.save_lock.lock().await;
    let cache = Arc::clone(&shared.cache);
    let path = shared.config.path.clone();
    let count = tokio::task::spawn_blocking(move || save_snapshot(&cache, &path))
        .await
        .map_err(|e| HuginnError::Io(std::io::Error::other(e)))??;
    info!(entries = count, path = %shared.config.path.display(), "cache saved");
    Ok(count)
}

/// Handle to a running [`CachePersister`]. Clones share the same task.
pub struct PersistHandle<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for PersistHandle<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> PersistHandle<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Schedule a save after the debounce delay.
    pub fn touch(&self) {
        self.shared.nudge.notify_one();
    }

    /// Save immediately.
    pub async fn save_now(&self) -> Result<usize> {
        save_blocking(&self.shared).await
    }

    /// Stop the save loop and write a final snapshot.
    pub async fn shutdown(&self) -> Result<usize> {
        self.shared.shutdown.send_replace(true);
        save_blocking(&self.shared).await
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shared.shutdown.borrow()
    }

    pub fn path(&self) -> &Path {
        &self.shared.config.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_path_keeps_extension() {
        let tmp = tmp_path_for(Path::new("/var/lib/huginn/cache.z"));
        assert_eq!(tmp, PathBuf::from("/var/lib/huginn/cache.z.tmp"));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn save_loop_can_move_between_threads() {
        let shared = Arc::new(Shared {
            cache: Arc::new(ResponseCache::<String>::new()),
            config: PersistConfig::new("cache.z"),
            nudge: Notify::new(),
            shutdown: watch::channel(false).0,
            save_lock: Mutex::new(()),
        });
        assert_send(&save_loop(shared));
    }

    #[test]
    fn config_defaults() {
        let config = PersistConfig::new("cache.z");
        assert_eq!(config.interval, Duration::from_secs(120));
        assert_eq!(config.debounce, Duration::from_secs(10));
    }
}
