//! Bounded, persistent memo of analyzer responses.
//!
//! Entries are keyed by [`hash_key`] of the exact request text, so any change to
//! the diff or the prompt produces a different key. The whole entry list is
//! rewritten to a single JSON file after every mutation. A missing or unreadable
//! file yields an empty cache; persistence failures are logged and otherwise
//! ignored.
//!
//! The store has no locking of its own. Callers sharing one file across
//! processes must serialize access themselves.

use chrono::{DateTime, Utc};
use error_set::error_set;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Default byte budget (5 MiB)
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Number of digest bytes kept in a key
const KEY_BYTES: usize = 16;

error_set! {
    /// Errors from reading or writing the persisted cache file
    CacheError := {
        #[display("Failed to read cache file {path}: {message}")]
        Read { path: String, message: String },
        #[display("Failed to write cache file {path}: {message}")]
        Write { path: String, message: String },
        #[display("Failed to serialize cache: {message}")]
        Serialize { message: String },
    }
}

/// Hex key for a request payload: the first 16 bytes of its SHA-256
pub fn hash_key(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest[..KEY_BYTES]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// A memoized response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    #[serde(rename = "size")]
    pub size_bytes: usize,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(key: String, value: String, created_at: DateTime<Utc>) -> Self {
        Self {
            size_bytes: key.len() + value.len(),
            key,
            value,
            created_at,
        }
    }
}

/// On-disk layout
#[derive(Default, Serialize, Deserialize)]
struct Store {
    entries: Vec<CacheEntry>,
}

/// Key/value cache bounded by total entry size, evicting oldest first
#[derive(Debug)]
pub struct ResultCache {
    entries: Vec<CacheEntry>,
    path: Option<PathBuf>,
    max_bytes: usize,
}

impl ResultCache {
    /// Open the cache persisted at `path`, creating nothing until the first write.
    ///
    /// A `max_bytes` of zero selects [`DEFAULT_MAX_BYTES`].
    pub fn open(path: impl Into<PathBuf>, max_bytes: usize) -> Self {
        let path = path.into();
        let mut cache = Self {
            entries: load(&path).unwrap_or_else(|err| {
                log::warn!("{err}");
                Vec::new()
            }),
            path: Some(path),
            max_bytes: budget(max_bytes),
        };
        cache.evict();
        cache
    }

    /// A cache that is never persisted
    pub fn in_memory(max_bytes: usize) -> Self {
        Self {
            entries: Vec::new(),
            path: None,
            max_bytes: budget(max_bytes),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    /// Store `value` under `key`, replacing any existing entry, then evict and persist
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(CacheEntry::new(key.into(), value.into(), Utc::now()));
        self.persist();
    }

    /// Drop every entry and persist the empty store
    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of `size_bytes` over all entries
    pub fn total_size(&self) -> usize {
        self.entries.iter().map(|entry| entry.size_bytes).sum()
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.entries.retain(|existing| existing.key != entry.key);
        self.entries.push(entry);
        self.evict();
    }

    /// Sort oldest first and drop from the front until the budget holds
    fn evict(&mut self) {
        self.entries.sort_by_key(|entry| entry.created_at);

        let mut total = self.total_size();
        let mut drop = 0;
        while total > self.max_bytes && drop < self.entries.len() {
            total -= self.entries[drop].size_bytes;
            drop += 1;
        }
        if drop > 0 {
            log::debug!("cache evicting {drop} entries");
            self.entries.drain(..drop);
        }
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = save(path, &self.entries) {
            log::warn!("{err}");
        }
    }
}

fn budget(max_bytes: usize) -> usize {
    if max_bytes == 0 {
        DEFAULT_MAX_BYTES
    } else {
        max_bytes
    }
}

/// Read the persisted entries. A missing file is an empty cache.
fn load(path: &Path) -> Result<Vec<CacheEntry>, CacheError> {
    let read_error = |message: String| CacheError::Read {
        path: path.display().to_string(),
        message,
    };

    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_error(e.to_string())),
    };

    serde_json::from_str::<Store>(&data)
        .map(|store| store.entries)
        .map_err(|e| read_error(e.to_string()))
}

/// Write the store next to `path` and rename it into place
fn save(path: &Path, entries: &[CacheEntry]) -> Result<(), CacheError> {
    let write_error = |message: String| CacheError::Write {
        path: path.display().to_string(),
        message,
    };

    let data = serde_json::to_vec(&Store {
        entries: entries.to_vec(),
    })
    .map_err(|e| CacheError::Serialize {
        message: e.to_string(),
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cache.json".to_string());
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = File::create(&temp_path).map_err(|e| write_error(e.to_string()))?;
    file.write_all(&data)
        .and_then(|()| file.sync_all())
        .map_err(|e| write_error(e.to_string()))?;
    fs::rename(&temp_path, path).map_err(|e| write_error(e.to_string()))?;

    Ok(())
}
