use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;

// ---------------------------------------------------------------------------
// LocalStore
// ---------------------------------------------------------------------------

/// Key/value mirror persisted as a single JSON file.
///
/// Holds the cached copies of data whose source of truth lives elsewhere
/// (holiday list, quotes, settings snapshot, earnings totals). Readers fall
/// back to it when the remote source or the database is unavailable.
/// An empty path keeps everything in memory.
///
/// Writes go to memory first, then the whole map is rewritten through a temp
/// file. `write_lock` serializes those rewrites so concurrent writers never
/// share the temp file and the last rename always carries the newest map.
pub struct LocalStore {
    path: Option<PathBuf>,
    entries: DashMap<String, serde_json::Value>,
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Open the store, loading any existing file. A corrupt file is logged and
    /// treated as empty.
    pub fn open(path: &str) -> Arc<Self> {
        let path = (!path.is_empty()).then(|| PathBuf::from(path));
        let entries = DashMap::new();

        if let Some(p) = &path {
            match std::fs::read_to_string(p) {
                Ok(text) => match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&text) {
                    Ok(map) => {
                        debug!("Loaded {} local cache entries from {}", map.len(), p.display());
                        for (k, v) in map {
                            entries.insert(k, v);
                        }
                    }
                    Err(e) => warn!("Local cache {} is corrupt, starting empty: {e}", p.display()),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Local cache {} unreadable, starting empty: {e}", p.display()),
            }
        }

        Arc::new(Self { path, entries, write_lock: Mutex::new(()) })
    }

    pub fn in_memory() -> Arc<Self> {
        Self::open("")
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, "Local cache entry has unexpected shape: {e}");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.entries.insert(key.to_string(), serde_json::to_value(value)?);
        self.flush()
    }

    /// Insert several entries with a single flush.
    pub fn set_many<T: Serialize>(&self, entries: impl IntoIterator<Item = (String, T)>) -> Result<()> {
        for (key, value) in entries {
            self.entries.insert(key, serde_json::to_value(&value)?);
        }
        self.flush()
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        // Blocking file IO; on a multi-thread runtime let tokio move other
        // tasks off this worker while it runs.
        match tokio::runtime::Handle::try_current() {
            Ok(h) if h.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.write_file(path))
            }
            _ => self.write_file(path),
        }
    }

    fn write_file(&self, path: &Path) -> Result<()> {
        // A poisoned lock only means another writer panicked mid-write; the
        // next full rewrite repairs the file.
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot: BTreeMap<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let path_str = path.to_str().unwrap();

        let store = LocalStore::open(path_str);
        store.set("holidays", &vec!["2025-03-14".to_string()]).unwrap();
        store.set("earnings_total:Ayaan", &42i64).unwrap();
        drop(store);

        let reopened = LocalStore::open(path_str);
        assert_eq!(reopened.get::<i64>("earnings_total:Ayaan"), Some(42));
        assert_eq!(
            reopened.get::<Vec<String>>("holidays"),
            Some(vec!["2025-03-14".to_string()])
        );
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = LocalStore::open(path.to_str().unwrap());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn concurrent_writers_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let path_str = path.to_str().unwrap().to_string();
        let store = LocalStore::open(&path_str);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.set(&format!("quote:{t}:{i}"), &(t * 100 + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        drop(store);

        let reopened = LocalStore::open(&path_str);
        assert_eq!(reopened.len(), 400);
        assert_eq!(reopened.get::<i32>("quote:7:49"), Some(749));
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn writes_from_runtime_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = LocalStore::open(path.to_str().unwrap());

        let tasks: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.set(&format!("settings:{t}"), &t) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(LocalStore::open(path.to_str().unwrap()).len(), 4);
    }

    #[test]
    fn wrong_shape_reads_as_none() {
        let store = LocalStore::in_memory();
        store.set("k", &"text").unwrap();
        assert!(store.get::<i64>("k").is_none());
    }
}
