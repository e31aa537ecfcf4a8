//! Persistent string key-value store.
//!
//! Playtime and scheduler bookkeeping live here as decimal strings. The file
//! store keeps a JSON object on disk and rewrites it atomically (temp file +
//! rename) on every `set`, so a crash never leaves a half-written cache.

use fs_err as fs;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::error::{ItchError, Result};

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;
}

pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Loads the store from `path`. A missing file is an empty store; an
    /// unreadable or corrupt file is an error so it is never overwritten
    /// blindly.
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = load_entries(&path)?;
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock_entries(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = lock_entries(&self.entries);

        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(details) = save_entries(&self.path, &entries) {
            // Keep memory consistent with disk.
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            warn!(key, error = %details, "Failed to persist cache entry");
            return Err(ItchError::PersistenceWriteFailure {
                key: key.to_string(),
                details,
            });
        }

        Ok(())
    }
}

fn lock_entries(
    entries: &Mutex<BTreeMap<String, String>>,
) -> MutexGuard<'_, BTreeMap<String, String>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, String>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(ItchError::PersistenceReadFailure {
                path: path.to_path_buf(),
                details: err.to_string(),
            })
        }
    };

    serde_json::from_slice(&data).map_err(|err| ItchError::PersistenceReadFailure {
        path: path.to_path_buf(),
        details: format!("Failed to parse persistent cache: {}", err),
    })
}

fn save_entries(path: &Path, entries: &BTreeMap<String, String>) -> std::result::Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create cache dir: {}", err))?;
    }

    let payload = serde_json::to_vec_pretty(entries)
        .map_err(|err| format!("Failed to serialize persistent cache: {}", err))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload)
        .map_err(|err| format!("Failed to write persistent cache: {}", err))?;
    fs::rename(&tmp_path, path)
        .map_err(|err| format!("Failed to commit persistent cache: {}", err))?;
    Ok(())
}

/// In-memory store for tests and for hosts that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set` fail with `PersistenceWriteFailure`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock_entries(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ItchError::PersistenceWriteFailure {
                key: key.to_string(),
                details: "writes disabled".to_string(),
            });
        }
        let mut entries = lock_entries(&self.entries);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
