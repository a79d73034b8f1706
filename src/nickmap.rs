//! IRC nick to Last.fm username associations.
//!
//! Nicks are matched case-insensitively. A nick associated with the empty
//! username is "ignored": the bot refuses to report for it. A nick with no
//! entry at all is used as a Last.fm username directly.
//!
//! On disk the map is a JSON object keyed by username, each holding the
//! nicks associated with it:
//!
//! ```json
//! { "rj": ["rj", "rj|work"], "": ["shy"] }
//! ```
//!
//! [`NickMap::watch`] reloads the map when the file is edited by hand.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tracing::{debug, info, warn};

use crate::{HuginnError, Result};

/// What a nick resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    User(String),
    Ignored,
    Unassociated,
}

#[derive(Debug, Clone)]
struct Entry {
    /// Nick as it was first given.
    nick: String,
    /// Empty when ignored.
    user: String,
}

#[derive(Debug, Default)]
struct Inner {
    /// Lowercased nick to entry.
    nicks: HashMap<String, Entry>,
    /// Lowercased user to nicks.
    reverse: HashMap<String, Vec<String>>,
}

impl Inner {
    fn insert(&mut self, nick: &str, user: &str) {
        self.remove(nick);
        self.nicks.insert(
            nick.to_lowercase(),
            Entry {
                nick: nick.to_string(),
                user: user.to_string(),
            },
        );
        self.reverse
            .entry(user.to_lowercase())
            .or_default()
            .push(nick.to_string());
    }

    fn remove(&mut self, nick: &str) -> Option<Entry> {
        let lower = nick.to_lowercase();
        let entry = self.nicks.remove(&lower)?;
        let key = entry.user.to_lowercase();
        if let Some(nicks) = self.reverse.get_mut(&key) {
            nicks.retain(|n| n.to_lowercase() != lower);
            if nicks.is_empty() {
                self.reverse.remove(&key);
            }
        }
        Some(entry)
    }

    fn to_document(&self) -> BTreeMap<String, Vec<String>> {
        let mut doc: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in self.nicks.values() {
            doc.entry(entry.user.clone())
                .or_default()
                .push(entry.nick.clone());
        }
        for nicks in doc.values_mut() {
            nicks.sort();
        }
        doc
    }

    fn from_document(doc: BTreeMap<String, Vec<String>>) -> Self {
        let mut inner = Inner::default();
        for (user, nicks) in doc {
            for nick in nicks {
                inner.insert(&nick, &user);
            }
        }
        inner
    }
}

/// Thread-safe nick map, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct NickMap {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
    /// Serializes changes, saves and reloads. Holds the file contents as
    /// last written or read.
    file: Mutex<Option<String>>,
}

/// Keeps a [`NickMap`] in sync with its file until dropped.
pub struct NickMapWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl NickMap {
    /// In-memory map that is never written to disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map backed by `path`. A missing file gives an empty map.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let map = Self {
            path: Some(path.into()),
            ..Self::default()
        };
        map.reload()?;
        Ok(map)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_file(&self) -> MutexGuard<'_, Option<String>> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` and save, with no reload in between.
    fn update<T>(&self, change: impl FnOnce(&mut Inner) -> T) -> Result<T> {
        let mut file = self.lock_file();
        let out = change(&mut self.lock());
        self.save_locked(&mut file)?;
        Ok(out)
    }

    pub fn lookup(&self, nick: &str) -> Association {
        match self.lock().nicks.get(&nick.to_lowercase()) {
            Some(entry) if entry.user.is_empty() => Association::Ignored,
            Some(entry) => Association::User(entry.user.clone()),
            None => Association::Unassociated,
        }
    }

    /// Last.fm username to query for `nick`, or `None` if it is ignored.
    pub fn resolve(&self, nick: &str) -> Option<String> {
        match self.lookup(nick) {
            Association::User(user) => Some(user),
            Association::Ignored => None,
            Association::Unassociated => Some(nick.to_string()),
        }
    }

    /// Associate `nick` with `user`, replacing any previous entry.
    pub fn set_user(&self, nick: &str, user: &str) -> Result<()> {
        self.update(|inner| inner.insert(nick, user))?;
        info!(nick, user, "nick associated");
        Ok(())
    }

    pub fn ignore(&self, nick: &str) -> Result<()> {
        self.update(|inner| inner.insert(nick, ""))?;
        info!(nick, "nick ignored");
        Ok(())
    }

    /// Drop the entry for `nick`, returning what it was.
    pub fn remove(&self, nick: &str) -> Result<Option<Association>> {
        let mut file = self.lock_file();
        let Some(entry) = self.lock().remove(nick) else {
            return Ok(None);
        };
        info!(nick, user = %entry.user, "nick dissociated");
        self.save_locked(&mut file)?;
        Ok(Some(if entry.user.is_empty() {
            Association::Ignored
        } else {
            Association::User(entry.user)
        }))
    }

    /// Nicks associated with `user`, sorted.
    pub fn nicks_for(&self, user: &str) -> Vec<String> {
        let mut nicks = self
            .lock()
            .reverse
            .get(&user.to_lowercase())
            .cloned()
            .unwrap_or_default();
        nicks.sort();
        nicks
    }

    pub fn len(&self) -> usize {
        self.lock().nicks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.lock().to_document())?)
    }

    /// Replace the contents with the JSON document `json`.
    pub fn load_json(&self, json: &str) -> Result<()> {
        let doc: BTreeMap<String, Vec<String>> = serde_json::from_str(json)?;
        *self.lock() = Inner::from_document(doc);
        Ok(())
    }

    /// Re-read the backing file. Missing files leave the map empty.
    ///
    /// Returns whether the contents changed since the file was last read or
    /// written by this map.
    pub fn reload(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let mut file = self.lock_file();
        match std::fs::read_to_string(path) {
            Ok(json) => {
                if file.as_deref() == Some(json.as_str()) {
                    return Ok(false);
                }
                self.load_json(&json)?;
                *file = Some(json);
                info!(path = %path.display(), nicks = self.len(), "loaded nick map");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no nick map on disk yet");
                *self.lock() = Inner::default();
                Ok(file.take().is_some())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the map to its backing file, atomically. No-op when in-memory.
    pub fn save(&self) -> Result<()> {
        let mut file = self.lock_file();
        self.save_locked(&mut file)
    }

    fn save_locked(&self, file: &mut Option<String>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = self.to_json()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;
        *file = Some(json);
        debug!(path = %path.display(), "saved nick map");
        Ok(())
    }

    /// Reload whenever the backing file changes on disk, once writes have
    /// been quiet for `debounce`. Our own saves do not trigger a reload.
    ///
    /// The directory holding the file is watched, since saving replaces
    /// the file. Watching stops when the returned guard is dropped.
    pub fn watch(self: &Arc<Self>, debounce: Duration) -> Result<NickMapWatcher> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| HuginnError::InvalidInput("nick map has no backing file".into()))?;
        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let map: Weak<NickMap> = Arc::downgrade(self);
        let name = path.file_name().map(|n| n.to_os_string());
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            let events = match result {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = ?e, "nick map watch error");
                    return;
                }
            };
            if !events.iter().any(|e| e.path.file_name() == name.as_deref()) {
                return;
            }
            let Some(map) = map.upgrade() else {
                return;
            };
            match map.reload() {
                Ok(true) => info!("nick map file changed, reloaded"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "failed to reload nick map"),
            }
        })
        .map_err(|e| HuginnError::Io(std::io::Error::other(e)))?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| HuginnError::Io(std::io::Error::other(e)))?;
        info!(path = %path.display(), "watching nick map");
        Ok(NickMapWatcher {
            _debouncer: debouncer,
        })
    }
}
