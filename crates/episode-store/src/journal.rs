//! Debug journal for lock activity.
//!
//! Appends one JSON line per lock event to `<root>/logs/lock-journal.jsonl`
//! so contention between hook processes can be reconstructed after the fact.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::time::Duration;

/// Environment variable that turns the journal on.
pub const DEBUG_ENV: &str = "AGENT_MEMORY_DEBUG";

/// What happened to a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEvent {
    Acquired,
    ReclaimedStale,
    TimedOut,
    Released,
    Lost,
}

/// One journal line.
#[derive(Debug, Serialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub event: LockEvent,
    pub resource: String,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waited_ms: Option<u64>,
}

impl JournalEntry {
    pub fn new(event: LockEvent, resource: &Utf8Path) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            resource: resource.to_string(),
            pid: std::process::id(),
            token: None,
            waited_ms: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_waited(mut self, waited: Duration) -> Self {
        self.waited_ms = Some(waited.as_millis() as u64);
        self
    }
}

/// Append-only JSONL sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockJournal {
    path: Utf8PathBuf,
}

impl LockJournal {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Journal location for a storage root.
    pub fn for_root(root: &Utf8Path) -> Self {
        Self::new(root.join("logs").join("lock-journal.jsonl"))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Best-effort: a failing journal must never fail the operation it observes.
    pub fn record(&self, entry: &JournalEntry) {
        if let Err(e) = self.try_record(entry) {
            tracing::debug!(path = %self.path, error = %e, "lock journal write failed");
        }
    }

    fn try_record(&self, entry: &JournalEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let json = serde_json::to_string(entry).unwrap_or_default();
        writeln!(file, "{}", json)
    }
}

/// Journal is on when the env var is set or `<root>/.debug` exists.
pub fn is_debug_enabled(root: &Utf8Path) -> bool {
    std::env::var_os(DEBUG_ENV).is_some() || root.join(".debug").exists()
}
