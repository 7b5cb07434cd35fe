//! Error taxonomy for the storage layer.

use camino::Utf8PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The lock marker could not be created before the deadline.
    #[error("timed out after {waited:?} waiting for lock on {path}")]
    LockTimeout { path: Utf8PathBuf, waited: Duration },

    /// Another process reclaimed our marker as stale while we held it.
    #[error("lock on {path} was taken over by another process")]
    LockLost { path: Utf8PathBuf },

    /// Only produced by strict readers; ordinary reads treat this as absent.
    #[error("malformed document {path}: {reason}")]
    Malformed { path: Utf8PathBuf, reason: String },

    #[error("I/O failure on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {path}: {source}")]
    Serialize {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures a caller may reasonably retry later.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::LockLost { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Reject identifiers that would escape their directory when used as file names.
pub fn validate_identifier(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0');
    if bad {
        return Err(StoreError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}
