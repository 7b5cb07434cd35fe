//! Atomic JSON document storage.
//!
//! Writes go to a temporary file in the target's directory and are renamed
//! over the target, so readers see either the old or the new document and
//! never a partial one. Read-modify-write sequences hold the target's
//! [`DirLock`] for the whole sequence and read *inside* the lock.

use crate::error::{Result, StoreError};
use crate::lock::{DirLock, LockOptions};
use camino::Utf8Path;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use tracing::warn;

/// Result of reading a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Document<T> {
    Found(T),
    Missing,
    /// Unparsable JSON or a shape that does not match `T`.
    Malformed { reason: String },
}

impl<T> Document<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        self.found().unwrap_or(default)
    }

    pub fn unwrap_or_else(self, f: impl FnOnce() -> T) -> T {
        self.found().unwrap_or_else(f)
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }

    /// Strict view: malformed content becomes an error.
    pub fn into_result(self, path: &Utf8Path) -> Result<Option<T>> {
        match self {
            Self::Found(value) => Ok(Some(value)),
            Self::Missing => Ok(None),
            Self::Malformed { reason } => Err(StoreError::Malformed {
                path: path.to_path_buf(),
                reason,
            }),
        }
    }
}

impl<T: Default> Document<T> {
    pub fn unwrap_or_default(self) -> T {
        self.found().unwrap_or_default()
    }
}

/// Reads and writes JSON documents; owns the lock parameters used for
/// read-modify-write.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    lock: LockOptions,
}

impl DocumentStore {
    pub fn new(lock: LockOptions) -> Self {
        Self { lock }
    }

    pub fn lock_options(&self) -> &LockOptions {
        &self.lock
    }

    /// Read a document. Never fails.
    pub fn read<T: DeserializeOwned>(&self, path: &Utf8Path) -> Document<T> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Document::Missing,
            Err(e) => {
                warn!(%path, error = %e, "unreadable document treated as missing");
                return Document::Malformed {
                    reason: e.to_string(),
                };
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Document::Found(value),
            Err(e) => {
                warn!(%path, error = %e, "malformed document treated as missing");
                Document::Malformed {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn read_or_default<T: DeserializeOwned + Default>(&self, path: &Utf8Path) -> T {
        self.read(path).unwrap_or_default()
    }

    /// Replace `path` atomically. Does not lock.
    pub fn write<T: Serialize + ?Sized>(&self, path: &Utf8Path, value: &T) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_str().is_empty() => p,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

        let file_name = path.file_name().unwrap_or("document");
        // Dropping the handle on any early return deletes the temp file.
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(|e| StoreError::io(parent, e))?;

        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, value).map_err(|source| {
                StoreError::Serialize {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            writer.write_all(b"\n").map_err(|e| StoreError::io(path, e))?;
            writer.flush().map_err(|e| StoreError::io(path, e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(path, e))?;

        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
        Ok(())
    }

    /// Replace `path` atomically while holding its lock.
    pub fn write_locked<T: Serialize + ?Sized>(&self, path: &Utf8Path, value: &T) -> Result<()> {
        self.locked(path, |lock| {
            lock.verify()?;
            self.write(path, value)
        })
    }

    /// Run `f` while holding the lock on `path`.
    pub fn locked<R>(&self, path: &Utf8Path, f: impl FnOnce(&DirLock) -> Result<R>) -> Result<R> {
        crate::lock::with_lock(path, &self.lock, f)
    }

    /// Locked read-modify-write. Missing or malformed content starts from
    /// `T::default()`.
    pub fn update<T, F>(&self, path: &Utf8Path, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<()>,
    {
        self.locked(path, |lock| {
            let mut value: T = self.read_or_default(path);
            f(&mut value)?;
            lock.verify()?;
            self.write(path, &value)?;
            Ok(value)
        })
    }
}

/// Fill keys missing from the top level of `value` with those of `defaults`.
/// Non-object values are replaced by `defaults` wholesale.
pub fn merge_defaults(value: Value, defaults: &Value) -> Value {
    match (value, defaults) {
        (Value::Object(mut map), Value::Object(defaults)) => {
            for (key, default) in defaults {
                map.entry(key.clone()).or_insert_with(|| default.clone());
            }
            Value::Object(map)
        }
        (_, defaults) => defaults.clone(),
    }
}
