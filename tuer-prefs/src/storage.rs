use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Named slots holding one string each. Every slot stores a whole preference
/// blob; there are no partial writes.
pub trait StorageBackend: Send + Sync {
    /// `Ok(None)` when nothing was ever stored under `key`.
    fn read(&self, key: &str) -> io::Result<Option<String>>;

    /// Replace the slot contents entirely.
    fn write(&self, key: &str, contents: &str) -> io::Result<()>;
}

/// One `<key>.json` file per slot inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, contents: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(key);
        // write-then-rename: readers never observe a half-written blob
        let tmp = self.dir.join(format!(".{}.json.tmp", file_stem(key)));
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &target)
    }
}

/// Characters kept verbatim in file names; everything else, `%` included, is
/// percent-escaped so distinct keys never share a file.
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

fn file_stem(key: &str) -> String {
    utf8_percent_encode(key, FILE_NAME).to_string()
}

/// In-process slots. Clones share the same underlying map, so a store
/// reopened on a clone sees what an earlier store persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(key).cloned())
    }

    fn write(&self, key: &str, contents: &str) -> io::Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(key.to_string(), contents.to_string());
        Ok(())
    }
}
