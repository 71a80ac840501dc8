// Named state stores
//
// Each core store (grace pool, integrity log, progress, partner record) is
// persisted as one named blob, all-or-nothing. There is no transaction
// across stores. Load failures fall back to the store's default state so a
// corrupt file never blocks enforcement; save failures leave the in-memory
// state authoritative until the next attempt.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

pub trait StateStore: Send + Sync {
    fn load_raw(&self, key: &str) -> Result<Option<String>>;
    fn save_raw(&self, key: &str, payload: &str) -> Result<()>;
}

/// Load a typed state, falling back to its default on any failure.
pub fn load_or_default<T: DeserializeOwned + Default>(store: &dyn StateStore, key: &str) -> T {
    match store.load_raw(key) {
        Ok(Some(payload)) => match serde_json::from_str(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Corrupt state for store '{}', using default: {}", key, e);
                T::default()
            }
        },
        Ok(None) => {
            debug!("No persisted state for store '{}', using default", key);
            T::default()
        }
        Err(e) => {
            warn!("Failed to load store '{}', using default: {}", key, e);
            T::default()
        }
    }
}

/// Persist a typed state. Failure is logged and swallowed: the caller's
/// in-memory copy stays authoritative.
pub fn save_state<T: Serialize>(store: &dyn StateStore, key: &str, value: &T) {
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to serialize store '{}': {}", key, e);
            return;
        }
    };
    if let Err(e) = store.save_raw(key, &payload) {
        warn!("Failed to save store '{}': {}", key, e);
    }
}

/// One JSON file per store key under a data directory. Writes go through a
/// temp file and rename so a crash mid-write never truncates the store.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl StateStore for JsonFileStore {
    fn load_raw(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn save_raw(&self, key: &str, payload: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().expect("store lock poisoned").contains_key(key)
    }
}

impl StateStore for MemoryStore {
    fn load_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().expect("store lock poisoned").get(key).cloned())
    }

    fn save_raw(&self, key: &str, payload: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), payload.to_string());
        Ok(())
    }
}

/// A store whose saves always fail, for exercising degraded-persistence
/// paths in tests.
pub struct FailingStore;

impl StateStore for FailingStore {
    fn load_raw(&self, _key: &str) -> Result<Option<String>> {
        Err(StoreError::Io(std::io::Error::other("store offline")))
    }

    fn save_raw(&self, _key: &str, _payload: &str) -> Result<()> {
        Err(StoreError::Io(std::io::Error::other("store offline")))
    }
}
