//! Key-value persistence port used for identity state.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use campaign_core::error::{MessagingError, MessagingResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Durable string storage. Reads that fail behave like missing keys.
pub trait KeyValueStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set_string(&self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.remove(key);
    }
}

/// JSON object on disk, replaced atomically on every change. A crash mid-write leaves
/// the previous file in place.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Loads `path` if it exists. Unreadable or malformed files start empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match Self::load(&path) {
            Ok(values) => values,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read state file, starting empty");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), keys = values.len(), "State store opened");
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn load(path: &Path) -> MessagingResult<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_set_string(&self, key: &str, value: &str) -> MessagingResult<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value.to_string());
        self.flush(&values)
    }

    pub fn try_remove(&self, key: &str) -> MessagingResult<()> {
        let mut values = self.values.lock();
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.flush(&values)
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> MessagingResult<()> {
        let json = serde_json::to_string_pretty(values)?;
        atomic_write(&self.path, json.as_bytes()).map_err(|e| {
            MessagingError::Persistence(format!("{}: {e}", self.path.display()))
        })
    }
}

/// Writes `data` to a temp file next to `path`, then renames it over `path`.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl KeyValueStore for JsonFileStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set_string(&self, key: &str, value: &str) {
        if let Err(e) = self.try_set_string(key, value) {
            warn!(key, error = %e, "Failed to persist state");
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.try_remove(key) {
            warn!(key, error = %e, "Failed to persist state");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("campaign-store-{}-{name}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.get_string("k").is_none());
        store.set_string("k", "v");
        assert_eq!(store.get_string("k").as_deref(), Some("v"));
        store.remove("k");
        assert!(store.is_empty());
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let path = temp_path("reopen");
        {
            let store = JsonFileStore::open(&path);
            store.set_string("login_state", "anonymous");
            store.set_string("other", "x");
            store.remove("other");
        }
        let store = JsonFileStore::open(&path);
        assert_eq!(store.get_string("login_state").as_deref(), Some("anonymous"));
        assert!(store.get_string("other").is_none());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_malformed_file_degrades_to_empty() {
        let path = temp_path("malformed");
        fs::write(&path, "not json").unwrap();
        let store = JsonFileStore::open(&path);
        assert!(store.get_string("login_state").is_none());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = JsonFileStore::open(&path);
        store.try_set_string("k", "v").unwrap();
        assert_eq!(JsonFileStore::open(&path).get_string("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_unwritable_path_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "a file, not a directory").unwrap();

        let store = JsonFileStore::open(blocker.join("state.json"));
        assert!(store.try_set_string("k", "v").is_err());
        // The infallible port still keeps the value in memory.
        store.set_string("k", "v");
        assert_eq!(store.get_string("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_failed_write_leaves_existing_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileStore::open(&path);
        store.try_set_string("login_state", "identified").unwrap();
        let before = fs::read_to_string(&path).unwrap();

        // A directory squatting on the rename target makes the final step fail after the
        // temp file was fully written.
        let target = dir.path().join("moved.json");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupied"), "x").unwrap();
        let blocked = JsonFileStore::open(&target);
        assert!(blocked.try_set_string("login_state", "anonymous").is_err());

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name != "state.json" && name != "moved.json")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn test_interrupted_write_leaves_state_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = JsonFileStore::open(&path);
            store.set_string("login_state", "identified");
            store.set_string("merge", "6ccb21214f");
        }

        // What a crash halfway through a write leaves behind: a partial temp sibling
        // that never got renamed over the state file.
        let full = fs::read_to_string(&path).unwrap();
        let mut partial = NamedTempFile::new_in(dir.path()).unwrap();
        partial.write_all(&full.as_bytes()[..full.len() / 2]).unwrap();
        partial.into_temp_path().keep().unwrap();

        let store = JsonFileStore::open(&path);
        assert_eq!(store.get_string("login_state").as_deref(), Some("identified"));
        assert_eq!(store.get_string("merge").as_deref(), Some("6ccb21214f"));
    }
}
