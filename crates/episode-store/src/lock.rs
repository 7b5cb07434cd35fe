//! Cross-process mutex built on atomic directory creation.
//!
//! A lock on `path` is the directory `path.lock`. `mkdir` either creates it or
//! fails with `AlreadyExists` on every filesystem we target, so no two
//! processes can both observe a successful create.
//!
//! Staleness recovery: a marker older than `stale_after` is presumed abandoned
//! (its holder crashed) and is removed by the next acquirer. Nothing stops a
//! live holder that was paused past the threshold from continuing, so two
//! processes can briefly both believe they hold the lock. The marker carries
//! an ownership token; holders call [`DirLock::verify`] right before their
//! protected write, which turns that overlap into a `LockLost` error for the
//! paused holder. The window between `verify` and the write itself remains.

use crate::error::{Result, StoreError};
use crate::journal::{JournalEntry, LockEvent, LockJournal};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::ErrorKind;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5);

/// File inside the marker directory holding the owner's token.
const OWNER_FILE: &str = "owner";

/// Acquisition parameters.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Give up after waiting this long.
    pub timeout: Duration,
    /// Sleep between attempts.
    pub poll_interval: Duration,
    /// Markers older than this are reclaimed.
    pub stale_after: Duration,
    /// Optional debug journal.
    pub journal: Option<LockJournal>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            journal: None,
        }
    }
}

impl LockOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_journal(mut self, journal: LockJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    fn note(&self, entry: JournalEntry) {
        if let Some(journal) = &self.journal {
            journal.record(&entry);
        }
    }
}

/// A held lock. Released on drop.
#[derive(Debug)]
pub struct DirLock {
    target: Utf8PathBuf,
    marker: Utf8PathBuf,
    token: String,
    options: LockOptions,
    released: bool,
}

impl DirLock {
    /// Marker directory guarding `target`.
    pub fn marker_path(target: &Utf8Path) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.lock", target))
    }

    /// Block until the lock on `target` is ours or the timeout elapses.
    pub fn acquire(target: &Utf8Path, options: &LockOptions) -> Result<Self> {
        let marker = Self::marker_path(target);
        let start = Instant::now();

        loop {
            match fs::create_dir(&marker) {
                Ok(()) => {
                    let token = format!("{}-{}", std::process::id(), Uuid::new_v4().simple());
                    if let Err(e) = fs::write(marker.join(OWNER_FILE), &token) {
                        let _ = fs::remove_dir_all(&marker);
                        return Err(StoreError::io(&marker, e));
                    }
                    let waited = start.elapsed();
                    debug!(resource = %target, ?waited, "lock acquired");
                    options.note(
                        JournalEntry::new(LockEvent::Acquired, target)
                            .with_token(&token)
                            .with_waited(waited),
                    );
                    return Ok(Self {
                        target: target.to_path_buf(),
                        marker,
                        token,
                        options: options.clone(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match marker_age(&marker) {
                        // Holder released between our mkdir and stat.
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Ok(age) if age > options.stale_after => {
                            warn!(resource = %target, ?age, "reclaiming stale lock");
                            options.note(JournalEntry::new(LockEvent::ReclaimedStale, target));
                            if fs::remove_dir_all(&marker).is_ok() {
                                continue;
                            }
                        }
                        _ => {}
                    }

                    let waited = start.elapsed();
                    if waited >= options.timeout {
                        options.note(
                            JournalEntry::new(LockEvent::TimedOut, target).with_waited(waited),
                        );
                        return Err(StoreError::LockTimeout {
                            path: target.to_path_buf(),
                            waited,
                        });
                    }
                    thread::sleep(options.poll_interval);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // Parent directory does not exist yet.
                    let parent = marker.parent().unwrap_or(Utf8Path::new("."));
                    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
                }
                Err(e) => return Err(StoreError::io(&marker, e)),
            }
        }
    }

    pub fn target(&self) -> &Utf8Path {
        &self.target
    }

    pub fn marker(&self) -> &Utf8Path {
        &self.marker
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Confirm the marker still carries our token.
    pub fn verify(&self) -> Result<()> {
        if self.still_owned() {
            return Ok(());
        }
        warn!(resource = %self.target, "lock was reclaimed by another process");
        self.options
            .note(JournalEntry::new(LockEvent::Lost, &self.target).with_token(&self.token));
        Err(StoreError::LockLost {
            path: self.target.clone(),
        })
    }

    /// Remove the marker. Never fails; a missing marker is fine.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn still_owned(&self) -> bool {
        fs::read_to_string(self.marker.join(OWNER_FILE))
            .map(|owner| owner == self.token)
            .unwrap_or(false)
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Never delete a marker someone else now holds.
        if self.still_owned() {
            let _ = fs::remove_dir_all(&self.marker);
        }
        self.options
            .note(JournalEntry::new(LockEvent::Released, &self.target).with_token(&self.token));
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Run `f` while holding the lock on `target`.
pub fn with_lock<T>(
    target: &Utf8Path,
    options: &LockOptions,
    f: impl FnOnce(&DirLock) -> Result<T>,
) -> Result<T> {
    let lock = DirLock::acquire(target, options)?;
    let out = f(&lock);
    lock.release();
    out
}

fn marker_age(marker: &Utf8Path) -> std::io::Result<Duration> {
    let modified = fs::metadata(marker)?.modified()?;
    // A marker stamped in the future (clock skew) counts as fresh.
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}
