use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tracing::{debug, warn};

mod storage;

pub use storage::{FileStorage, MemoryStorage, StorageBackend};

/// Slots the client persists blobs under.
pub mod storage_keys {
    /// Free-form configuration bag (feature toggles such as the font).
    pub const CONFIGURATION: &str = "configuration";
    /// Local client state such as search history.
    pub const LOCAL: &str = "tuer";
}

/// Preference names used inside the blobs.
pub mod keys {
    pub const LAST_SEARCHES: &str = "lastSearches";
    pub const DYSLEXIC_FONT: &str = "dyslexicFont";
}

#[derive(Clone, Debug, Default)]
pub struct PrefsConfig {
    /// Directory for file-backed storage; `None` picks the platform default.
    pub data_dir: Option<PathBuf>,

    /// true: keep everything in memory for the lifetime of the process.
    pub ephemeral: bool, // false
}

impl PrefsConfig {
    /// - TUER_DATA_DIR (optional)
    /// - TUER_PREFS_EPHEMERAL (bool, default false)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        cfg.data_dir = std::env::var("TUER_DATA_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        cfg.ephemeral = parse_env_bool("TUER_PREFS_EPHEMERAL", cfg.ephemeral);

        cfg
    }

    /// Resolved storage directory: TUER_DATA_DIR, else `<data dir>/tuer`,
    /// else `./.tuer`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .map(|d| d.join("tuer"))
            .unwrap_or_else(|| PathBuf::from(".tuer"))
    }

    pub fn open_backend(&self) -> Arc<dyn StorageBackend> {
        if self.ephemeral {
            debug!(target: "tuer_prefs", "using in-memory preference storage");
            return Arc::new(MemoryStorage::new());
        }
        let dir = self.resolved_data_dir();
        debug!(target: "tuer_prefs", "using preference storage at {}", dir.display());
        Arc::new(FileStorage::new(dir))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("failed to encode preferences for {key:?}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },

    #[error("failed to persist preferences for {key:?}: {source}")]
    Io { key: String, source: std::io::Error },
}

/// Key-value preferences persisted as one JSON object under a storage key.
///
/// The blob is loaded once in [`PreferenceStore::open`] and rewritten in full
/// on every mutation. Share it by `Arc`; all methods take `&self`.
pub struct PreferenceStore {
    backend: Arc<dyn StorageBackend>,
    storage_key: String,
    entries: Mutex<Map<String, Value>>,
}

impl PreferenceStore {
    /// Never fails: a missing, unreadable or corrupt blob yields an empty store.
    pub fn open(backend: Arc<dyn StorageBackend>, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let entries = load_entries(backend.as_ref(), &storage_key);
        Self {
            backend,
            storage_key,
            entries: Mutex::new(entries),
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock_entries().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock_entries().keys().cloned().collect()
    }

    /// The in-memory value is updated even if persisting fails.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), PrefsError> {
        let mut entries = self.lock_entries();
        entries.insert(key.into(), value);
        self.persist(&entries)
    }

    /// Absent keys become `true`; present ones are replaced by the negation of
    /// their truthiness. Returns the new value.
    pub fn toggle(&self, key: &str) -> Result<bool, PrefsError> {
        let mut entries = self.lock_entries();
        let next = match entries.get(key) {
            None => true,
            Some(v) => !is_truthy(v),
        };
        entries.insert(key.to_string(), Value::Bool(next));
        self.persist(&entries)?;
        Ok(next)
    }

    fn persist(&self, entries: &Map<String, Value>) -> Result<(), PrefsError> {
        let blob = serde_json::to_string(entries).map_err(|source| PrefsError::Encode {
            key: self.storage_key.clone(),
            source,
        })?;
        self.backend
            .write(&self.storage_key, &blob)
            .map_err(|source| PrefsError::Io {
                key: self.storage_key.clone(),
                source,
            })
    }

    fn lock_entries(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceStore")
            .field("storage_key", &self.storage_key)
            .field("entries", &*self.lock_entries())
            .finish()
    }
}

/// `false`, `null`, `0`, `""` are falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn load_entries(backend: &dyn StorageBackend, storage_key: &str) -> Map<String, Value> {
    let raw = match backend.read(storage_key) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!(target: "tuer_prefs", "no stored preferences under {storage_key:?}");
            return Map::new();
        }
        Err(e) => {
            warn!(target: "tuer_prefs", "reading preferences under {storage_key:?} failed: {e} ; starting empty");
            return Map::new();
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!(target: "tuer_prefs", "stored preferences under {storage_key:?} are not a JSON object ; starting empty");
            Map::new()
        }
        Err(e) => {
            warn!(target: "tuer_prefs", "stored preferences under {storage_key:?} are corrupt: {e} ; starting empty");
            Map::new()
        }
    }
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| {
            let s = s.trim().to_ascii_lowercase();
            matches!(s.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(default)
}
