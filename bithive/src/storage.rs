//! Durable key-value storage for registry, settings and history.
//!
//! The monitor only needs get/set/remove/clear on string blobs, so anything
//! offering those can back it. Two implementations ship: an in-memory map
//! for tests and short-lived runs, and a directory with a file per key.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::Result;
use crate::tracing::prelude::*;

/// Keys used by the library.
pub mod keys {
    /// JSON array of device addresses, in display order.
    pub const DEVICES: &str = "devices";
    /// Refresh interval in milliseconds, as decimal text.
    pub const REFRESH_INTERVAL: &str = "refresh_interval_ms";
    /// JSON array of visible table column names.
    pub const VISIBLE_COLUMNS: &str = "visible_columns";
    /// Theme name for presentation layers.
    pub const THEME: &str = "theme";
    /// Prefix of per-device history keys; the device hostname follows.
    pub const DEVICE_HISTORY_PREFIX: &str = "history/";
    /// History of the fleet-wide summary.
    pub const FLEET_HISTORY: &str = "history-fleet";
}

/// A string blob store.
///
/// Reads are infallible: a missing or unreadable value is `None`. Writes
/// report errors so callers can decide whether to log or propagate.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn keys(&self) -> Vec<String>;
}

/// Remove every key except the listed ones. Kept keys are never rewritten.
pub fn clear_except(store: &dyn KeyValueStore, keep: &[&str]) -> Result<()> {
    for key in store.keys() {
        if !keep.contains(&key.as_str()) {
            store.remove(&key)?;
        }
    }
    Ok(())
}

/// Drop all recorded history, keeping devices and settings.
pub fn reset_charts(store: &dyn KeyValueStore) -> Result<()> {
    info!("Clearing recorded history");
    clear_except(
        store,
        &[
            keys::DEVICES,
            keys::THEME,
            keys::REFRESH_INTERVAL,
            keys::VISIBLE_COLUMNS,
        ],
    )
}

/// Drop everything except the theme.
pub fn reset_everything(store: &dyn KeyValueStore) -> Result<()> {
    info!("Clearing all stored state");
    clear_except(store, &[keys::THEME])
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

/// Store backed by a directory holding one file per key.
///
/// Every read goes to disk, so several processes can share a directory:
/// writing one key never touches the others. A write lands in a temp file
/// that is then renamed over the key's file, so readers see either the old
/// or the new value.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open the store in `dir`, creating it as needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Opened store");
        Ok(Self { dir })
    }

    fn file(&self, key: &str) -> PathBuf {
        self.dir.join(encode_key(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.file(key);
        match fs::read_to_string(&path) {
            Ok(value) => Some(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable store entry");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

        let path = self.file(key);
        let tmp = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            encode_key(key),
            std::process::id(),
            NEXT_TMP.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.file(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn clear(&self) -> Result<()> {
        for key in self.keys() {
            self.remove(&key)?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cannot list store");
                return Vec::new();
            }
        };
        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().and_then(decode_key))
            .collect();
        keys.sort();
        keys
    }
}

/// File name for a key. Everything outside `[A-Za-z0-9_-]` is written as
/// `%XX`, so names never contain a dot and temp files cannot collide.
fn encode_key(key: &str) -> String {
    let mut name = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name
}

/// Inverse of [`encode_key`]; `None` for names it would never produce.
fn decode_key(name: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(name.len());
    let mut rest = name.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'%' {
            let hex = std::str::from_utf8(tail.get(..2)?).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            bytes.push(byte);
            rest = tail;
        } else {
            return None;
        }
    }
    String::from_utf8(bytes).ok()
}
