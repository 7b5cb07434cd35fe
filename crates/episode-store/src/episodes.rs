//! The episode log: write-once episode documents plus a capped, newest-first
//! index that archives its overflow by calendar year.
//!
//! Every index mutation runs under the index lock, including the eviction
//! into the archive shard, so no reader ever sees an over-capacity index.
//! Episode documents are written without a lock; each has a unique path.

use crate::error::{Result, StoreError};
use crate::layout::MemoryRoot;
use crate::lock::DirLock;
use crate::schema::{Episode, EpisodeIndex, IndexEntry};
use camino::Utf8Path;
use chrono::{Datelike, Local, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use tracing::{debug, warn};

/// What an append did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Live entries after the append.
    pub total_entries: usize,
    /// Entries moved to the archive shard by this append.
    pub archived: usize,
    /// False when the id was already indexed.
    pub inserted: bool,
}

/// Episode operations bound to one storage root.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeLog<'a> {
    root: &'a MemoryRoot,
}

impl<'a> EpisodeLog<'a> {
    pub fn new(root: &'a MemoryRoot) -> Self {
        Self { root }
    }

    fn capacity(&self) -> usize {
        self.root.config().max_index_entries.max(1)
    }

    /// Live index; empty when missing or malformed.
    pub fn read_index(&self) -> EpisodeIndex {
        self.root.documents().read_or_default(&self.root.index_path())
    }

    /// Insert `entry` at the head of the index, archiving overflow.
    pub fn append(&self, entry: IndexEntry) -> Result<AppendOutcome> {
        self.append_with_capacity(entry, self.capacity())
    }

    pub fn append_with_capacity(&self, entry: IndexEntry, capacity: usize) -> Result<AppendOutcome> {
        let capacity = capacity.max(1);
        let index_path = self.root.index_path();
        let docs = self.root.documents();

        docs.locked(&index_path, |lock| {
            let mut index = self.load_index_for_write(&index_path);

            if index.contains(&entry.id) {
                debug!(id = %entry.id, "episode already indexed");
                return Ok(AppendOutcome {
                    total_entries: index.entries.len(),
                    archived: 0,
                    inserted: false,
                });
            }

            index.entries.insert(0, entry);
            let mut archived = 0;
            if index.entries.len() > capacity {
                let evicted = index.entries.split_off(capacity);
                archived = evicted.len();
                self.archive(lock, evicted)?;
            }
            index.total_entries = index.entries.len();
            index.last_updated = Utc::now();

            lock.verify()?;
            docs.write(&index_path, &index)?;

            Ok(AppendOutcome {
                total_entries: index.total_entries,
                archived,
                inserted: true,
            })
        })
    }

    /// Write the episode document, then index it.
    pub fn record(&self, episode: &Episode) -> Result<AppendOutcome> {
        let path = self.root.episode_path(&episode.id)?;
        self.root.documents().write(&path, episode)?;
        self.append(IndexEntry::from_episode(episode))
    }

    /// Newest `n` entries.
    pub fn list_recent(&self, n: usize) -> Vec<IndexEntry> {
        let mut entries = self.read_index().entries;
        entries.truncate(n);
        entries
    }

    /// Full episode, or `None` when absent, malformed or the id is invalid.
    pub fn get(&self, id: &str) -> Option<Episode> {
        let path = self.root.episode_path(id).ok()?;
        self.root.documents().read(&path).found()
    }

    /// Up to `limit` episodes not yet consolidated, newest first. Trivial
    /// entries and entries whose document is missing are skipped.
    pub fn list_unconsolidated(&self, limit: usize) -> Vec<Episode> {
        let mut out = Vec::new();
        for entry in self.read_index().entries {
            if out.len() >= limit {
                break;
            }
            if entry.consolidated || entry.trivial {
                continue;
            }
            if let Some(episode) = self.get(&entry.id) {
                out.push(episode);
            }
        }
        out
    }

    /// Episodes for a reflection pass: the given ids, or the `recent` newest.
    pub fn episodes_for_reflection(&self, ids: &[String], recent: usize) -> Vec<Episode> {
        if ids.is_empty() {
            return self
                .list_recent(recent)
                .iter()
                .filter_map(|entry| self.get(&entry.id))
                .collect();
        }
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Flip `consolidated` on episode documents and live index entries.
    /// Returns how many index entries changed.
    pub fn mark_consolidated(&self, ids: &[String]) -> Result<usize> {
        for id in ids {
            let path = self.root.episode_path(id)?;
            if !path.exists() {
                continue;
            }
            self.root.documents().locked(&path, |lock| {
                if let Some(mut episode) = self.root.documents().read::<Episode>(&path).found() {
                    if !episode.consolidated {
                        episode.consolidated = true;
                        lock.verify()?;
                        self.root.documents().write(&path, &episode)?;
                    }
                }
                Ok(())
            })?;
        }

        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let index_path = self.root.index_path();
        let docs = self.root.documents();
        docs.locked(&index_path, |lock| {
            let mut index = self.load_index_for_write(&index_path);
            let mut changed = 0;
            for entry in index.entries.iter_mut() {
                if wanted.contains(entry.id.as_str()) && !entry.consolidated {
                    entry.consolidated = true;
                    changed += 1;
                }
            }
            if changed > 0 {
                index.last_updated = Utc::now();
                lock.verify()?;
                docs.write(&index_path, &index)?;
            }
            Ok(changed)
        })
    }

    /// Archived entries for `year`, oldest eviction first.
    pub fn read_archive(&self, year: i32) -> Vec<IndexEntry> {
        let raw: Vec<Value> = self.root.documents().read_or_default(&self.root.archive_path(year));
        raw.into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect()
    }

    /// Years that have an archive shard, ascending.
    pub fn archive_years(&self) -> Vec<i32> {
        let Ok(dir) = fs::read_dir(self.root.episodes_dir()) else {
            return Vec::new();
        };
        let mut years: Vec<i32> = dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_prefix("index_archive_")?
                    .strip_suffix(".json")?
                    .parse()
                    .ok()
            })
            .collect();
        years.sort_unstable();
        years
    }

    /// Append evicted entries to this year's shard. Caller holds the index lock.
    ///
    /// The shard is written before the index, so a failure in between leaves
    /// the evicted entries in both. Ids already in the shard are skipped.
    fn archive(&self, lock: &DirLock, evicted: Vec<IndexEntry>) -> Result<()> {
        let path = self.root.archive_path(current_year());
        // Raw values so entries written by other versions survive untouched.
        let mut shard: Vec<Value> = self.load_for_write(&path);
        let archived: HashSet<String> = shard
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_str))
            .map(str::to_owned)
            .collect();
        for entry in evicted {
            if archived.contains(&entry.id) {
                debug!(id = %entry.id, "entry already archived");
                continue;
            }
            let value = serde_json::to_value(&entry).map_err(|source| StoreError::Serialize {
                path: path.clone(),
                source,
            })?;
            shard.push(value);
        }
        lock.verify()?;
        self.root.documents().write(&path, &shard)?;
        debug!(%path, size = shard.len(), "archived index overflow");
        Ok(())
    }

    /// Load the index for mutation.
    fn load_index_for_write(&self, path: &Utf8Path) -> EpisodeIndex {
        self.load_for_write(path)
    }

    /// Load a document for mutation. A corrupt file is copied aside before
    /// we start over, so its contents are never silently dropped.
    fn load_for_write<T: DeserializeOwned + Default>(&self, path: &Utf8Path) -> T {
        let doc = self.root.documents().read::<T>(path);
        if doc.is_malformed() {
            let stem = path.file_stem().unwrap_or("document");
            let backup = path.with_file_name(format!(
                "{}.corrupt-{}.json",
                stem,
                Utc::now().format("%Y%m%dT%H%M%S%.3f")
            ));
            match fs::copy(path, &backup) {
                Ok(_) => warn!(%backup, "corrupt document preserved; starting fresh"),
                Err(e) => warn!(%path, error = %e, "corrupt document could not be preserved"),
            }
        }
        doc.unwrap_or_default()
    }
}

/// Calendar year used to key archive shards.
pub fn current_year() -> i32 {
    Local::now().year()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockOptions;
    use crate::schema::Outcome;
    use camino::Utf8PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    fn root_in(dir: &tempfile::TempDir) -> MemoryRoot {
        let root = MemoryRoot::open(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap())
            .with_lock_options(
                LockOptions::default()
                    .with_timeout(Duration::from_secs(30))
                    .with_poll_interval(Duration::from_millis(1)),
            );
        root.init().unwrap();
        root
    }

    fn entry(id: &str) -> IndexEntry {
        IndexEntry::new(id)
    }

    #[test]
    fn test_append_is_newest_first() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let log = root.episodes();

        log.append(entry("ep_1")).unwrap();
        log.append(entry("ep_2")).unwrap();
        let outcome = log.append(entry("ep_3")).unwrap();

        assert_eq!(outcome.total_entries, 3);
        let ids: Vec<_> = log.list_recent(10).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["ep_3", "ep_2", "ep_1"]);
        assert_eq!(log.list_recent(2).len(), 2);
        assert_eq!(log.read_index().total_entries, 3);
    }

    #[test]
    fn test_duplicate_id_is_not_reinserted() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let log = root.episodes();

        log.append(entry("ep_1")).unwrap();
        let outcome = log.append(entry("ep_1")).unwrap();
        assert!(!outcome.inserted);
        assert_eq!(log.read_index().entries.len(), 1);
    }

    #[test]
    fn test_capacity_archives_oldest() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let log = root.episodes();
        let capacity = 5;

        let mut archived = 0;
        for i in 0..8 {
            archived += log
                .append_with_capacity(entry(&format!("ep_{}", i)), capacity)
                .unwrap()
                .archived;
        }

        let live: Vec<_> = log.read_index().entries.into_iter().map(|e| e.id).collect();
        assert_eq!(live, vec!["ep_7", "ep_6", "ep_5", "ep_4", "ep_3"]);
        assert_eq!(archived, 3);

        let shard: Vec<_> = log
            .read_archive(current_year())
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(shard, vec!["ep_0", "ep_1", "ep_2"]);
        assert_eq!(log.archive_years(), vec![current_year()]);
    }

    #[test]
    fn test_archive_appends_to_existing_shard() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let shard_path = root.archive_path(current_year());
        root.documents()
            .write(&shard_path, &vec![serde_json::json!({"id": "ep_old", "legacy": true})])
            .unwrap();

        let log = root.episodes();
        for i in 0..3 {
            log.append_with_capacity(entry(&format!("ep_{}", i)), 2).unwrap();
        }

        let raw: Vec<Value> = root.documents().read_or_default(&shard_path);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0]["legacy"], serde_json::json!(true));
        assert_eq!(raw[1]["id"], serde_json::json!("ep_0"));
    }

    #[test]
    fn test_capacity_from_config() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        root.update_config(|c| {
            c.max_index_entries = 2;
            Ok(())
        })
        .unwrap();

        let log = root.episodes();
        for i in 0..4 {
            log.append(entry(&format!("ep_{}", i))).unwrap();
        }
        assert_eq!(log.read_index().entries.len(), 2);
        assert_eq!(log.read_archive(current_year()).len(), 2);
    }

    #[test]
    fn test_concurrent_appends_keep_every_entry() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);

        std::thread::scope(|s| {
            for t in 0..8 {
                let root = &root;
                s.spawn(move || {
                    for i in 0..5 {
                        root.episodes().append(entry(&format!("ep_{}_{}", t, i))).unwrap();
                    }
                });
            }
        });

        let index = root.episodes().read_index();
        assert_eq!(index.entries.len(), 40);
        assert_eq!(index.total_entries, 40);
        let unique: HashSet<_> = index.entries.iter().map(|e| e.id.clone()).collect();
        assert_eq!(unique.len(), 40);
    }

    #[test]
    fn test_concurrent_appends_respect_capacity() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);

        std::thread::scope(|s| {
            for t in 0..4 {
                let root = &root;
                s.spawn(move || {
                    for i in 0..6 {
                        root.episodes()
                            .append_with_capacity(entry(&format!("ep_{}_{}", t, i)), 10)
                            .unwrap();
                    }
                });
            }
        });

        let log = root.episodes();
        assert_eq!(log.read_index().entries.len(), 10);
        assert_eq!(log.read_archive(current_year()).len(), 14);
    }

    #[test]
    fn test_record_and_get() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let log = root.episodes();

        let episode = Episode::new("s1")
            .with_goal_summary("restart docker daemon")
            .with_outcome(Outcome::Success);
        log.record(&episode).unwrap();

        assert_eq!(log.get(&episode.id), Some(episode.clone()));
        assert_eq!(log.list_recent(1)[0].goal_summary, "restart docker daemon");
        assert_eq!(log.get("ep_missing"), None);
        assert_eq!(log.get("../escape"), None);
    }

    #[test]
    fn test_missing_episode_document_is_tolerated() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let log = root.episodes();

        let kept = Episode::new("s").with_goal_summary("kept");
        log.record(&kept).unwrap();
        log.append(entry("ep_dangling")).unwrap();

        let pending = log.list_unconsolidated(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, kept.id);
    }

    #[test]
    fn test_unconsolidated_skips_trivial_and_consolidated() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let log = root.episodes();

        let mut trivial = Episode::new("s");
        trivial.trivial = true;
        log.record(&trivial).unwrap();

        let a = Episode::new("s").with_goal_summary("a");
        let b = Episode::new("s").with_goal_summary("b");
        let c = Episode::new("s").with_goal_summary("c");
        for ep in [&a, &b, &c] {
            log.record(ep).unwrap();
        }

        assert_eq!(log.list_unconsolidated(2).len(), 2);

        let changed = log.mark_consolidated(&[b.id.clone()]).unwrap();
        assert_eq!(changed, 1);
        assert!(log.get(&b.id).unwrap().consolidated);

        let ids: Vec<_> = log.list_unconsolidated(10).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![c.id.clone(), a.id.clone()]);

        // Already consolidated: nothing changes.
        assert_eq!(log.mark_consolidated(&[b.id.clone()]).unwrap(), 0);
    }

    #[test]
    fn test_episodes_for_reflection() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let log = root.episodes();
        let a = Episode::new("s").with_goal_summary("a");
        let b = Episode::new("s").with_goal_summary("b");
        log.record(&a).unwrap();
        log.record(&b).unwrap();

        let recent = log.episodes_for_reflection(&[], 1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, b.id);

        let picked = log.episodes_for_reflection(&[a.id.clone(), "ep_gone".into()], 5);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, a.id);
    }

    #[test]
    fn test_corrupt_index_is_preserved_then_replaced() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        fs::write(root.index_path(), "{\"entries\": [oops").unwrap();

        let log = root.episodes();
        assert!(log.read_index().entries.is_empty());
        log.append(entry("ep_new")).unwrap();

        assert_eq!(log.read_index().entries.len(), 1);
        let backups: Vec<_> = fs::read_dir(root.episodes_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("index.corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_append_fails_when_index_lock_is_held() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir).with_lock_options(
            LockOptions::default()
                .with_timeout(Duration::from_millis(100))
                .with_poll_interval(Duration::from_millis(10)),
        );
        let _held = DirLock::acquire(&root.index_path(), root.documents().lock_options()).unwrap();

        let err = root.episodes().append(entry("ep_x")).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
        assert!(root.episodes().read_index().entries.is_empty());
    }

    #[test]
    fn test_corrupt_shard_is_preserved_then_replaced() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let shard_path = root.archive_path(current_year());
        fs::write(&shard_path, r#"[{"id":"ep_old_1"},{"id":"ep_old_2"}"#).unwrap();

        let log = root.episodes();
        for i in 0..3 {
            log.append_with_capacity(entry(&format!("ep_{}", i)), 2).unwrap();
        }

        let shard: Vec<_> = log.read_archive(current_year()).into_iter().map(|e| e.id).collect();
        assert_eq!(shard, vec!["ep_0"]);

        let prefix = format!("index_archive_{}.corrupt-", current_year());
        let backups: Vec<_> = fs::read_dir(root.episodes_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .collect();
        assert_eq!(backups.len(), 1);
        let saved = fs::read_to_string(backups[0].path()).unwrap();
        assert!(saved.contains("ep_old_1") && saved.contains("ep_old_2"));
        assert_eq!(log.archive_years(), vec![current_year()]);
    }

    #[test]
    fn test_archive_skips_already_archived_ids() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let log = root.episodes();
        let lock = DirLock::acquire(&root.index_path(), root.documents().lock_options()).unwrap();

        log.archive(&lock, vec![entry("ep_a")]).unwrap();
        log.archive(&lock, vec![entry("ep_a"), entry("ep_b")]).unwrap();

        let shard: Vec<_> = log.read_archive(current_year()).into_iter().map(|e| e.id).collect();
        assert_eq!(shard, vec!["ep_a", "ep_b"]);
    }

    #[test]
    fn test_index_without_offset_timestamps_keeps_entries() {
        let dir = tempdir().unwrap();
        let root = root_in(&dir);
        let log = root.episodes();

        fs::write(
            root.index_path(),
            r#"{"total_entries": 1, "entries": [{"id": "ep_1", "timestamp": "2025-06-14T12:00:00.123456"}]}"#,
        )
        .unwrap();
        assert_eq!(log.read_index().entries.len(), 1);

        fs::write(
            root.index_path(),
            r#"{"last_updated": "2025-06-14T12:00:00.123456", "total_entries": 1, "entries": [{"id": "ep_1"}]}"#,
        )
        .unwrap();
        assert_eq!(log.read_index().entries.len(), 1);

        log.append(entry("ep_2")).unwrap();
        let ids: Vec<_> = log.read_index().entries.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["ep_2", "ep_1"]);
    }
}
