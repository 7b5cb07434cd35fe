//! Storage root and on-disk layout.
//!
//! ```text
//! <root>/
//! ├── config.json
//! ├── self_model.json
//! ├── semantic_rules.json
//! ├── user_models/<user>.json
//! ├── episodes/
//! │   ├── index.json
//! │   ├── index_archive_<year>.json
//! │   └── <episode id>.json
//! ├── agent_results/<task>.json
//! └── logs/
//! ```

use crate::document::DocumentStore;
use crate::episodes::EpisodeLog;
use crate::error::{Result, StoreError, validate_identifier};
use crate::journal::{LockJournal, is_debug_enabled};
use crate::lock::LockOptions;
use crate::schema::{EpisodeIndex, SemanticRule};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Overrides the default root.
pub const ROOT_ENV: &str = "AGENT_MEMORY_HOME";

const SUBDIRS: &[&str] = &["user_models", "episodes", "agent_results", "logs"];

/// Handle on a storage root directory.
#[derive(Debug, Clone)]
pub struct MemoryRoot {
    root: Utf8PathBuf,
    store: DocumentStore,
}

impl MemoryRoot {
    /// Open `root` with default lock parameters. Nothing is created.
    pub fn open(root: impl Into<Utf8PathBuf>) -> Self {
        let root = root.into();
        let mut lock = LockOptions::default();
        if is_debug_enabled(&root) {
            lock = lock.with_journal(LockJournal::for_root(&root));
        }
        Self {
            store: DocumentStore::new(lock),
            root,
        }
    }

    pub fn with_lock_options(mut self, lock: LockOptions) -> Self {
        self.store = DocumentStore::new(lock);
        self
    }

    /// Root from `AGENT_MEMORY_HOME`, falling back to `~/.agent-memory`.
    pub fn from_env() -> Self {
        Self::open(default_root())
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.store
    }

    pub fn episodes(&self) -> EpisodeLog<'_> {
        EpisodeLog::new(self)
    }

    /// Create the directory structure and seed empty documents. Idempotent:
    /// existing documents are never touched.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        for sub in SUBDIRS {
            let dir = self.root.join(sub);
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }

        let index = self.index_path();
        self.store.locked(&index, |_| {
            if !index.exists() {
                self.store.write(&index, &EpisodeIndex::default())?;
            }
            Ok(())
        })?;

        let rules = self.rules_path();
        self.store.locked(&rules, |_| {
            if !rules.exists() {
                self.store.write(&rules, &Vec::<SemanticRule>::new())?;
            }
            Ok(())
        })
    }

    /// True once a self model has been written.
    pub fn is_initialized(&self) -> bool {
        self.self_model_path().exists()
    }

    pub fn config_path(&self) -> Utf8PathBuf {
        self.root.join("config.json")
    }

    pub fn self_model_path(&self) -> Utf8PathBuf {
        self.root.join("self_model.json")
    }

    pub fn rules_path(&self) -> Utf8PathBuf {
        self.root.join("semantic_rules.json")
    }

    pub fn episodes_dir(&self) -> Utf8PathBuf {
        self.root.join("episodes")
    }

    pub fn index_path(&self) -> Utf8PathBuf {
        self.episodes_dir().join("index.json")
    }

    pub fn archive_path(&self, year: i32) -> Utf8PathBuf {
        self.episodes_dir().join(format!("index_archive_{}.json", year))
    }

    pub fn episode_path(&self, id: &str) -> Result<Utf8PathBuf> {
        validate_identifier(id)?;
        Ok(self.episodes_dir().join(format!("{}.json", id)))
    }

    pub fn user_model_path(&self, user_id: &str) -> Result<Utf8PathBuf> {
        validate_identifier(user_id)?;
        Ok(self.root.join("user_models").join(format!("{}.json", user_id)))
    }

    pub fn agent_result_path(&self, task_id: &str) -> Result<Utf8PathBuf> {
        validate_identifier(task_id)?;
        Ok(self
            .root
            .join("agent_results")
            .join(format!("{}.json", task_id)))
    }

    pub fn logs_dir(&self) -> Utf8PathBuf {
        self.root.join("logs")
    }
}

/// Default storage root.
///
/// Priority:
/// 1. `AGENT_MEMORY_HOME` environment variable (if set)
/// 2. `~/.agent-memory`
pub fn default_root() -> Utf8PathBuf {
    if let Ok(custom) = std::env::var(ROOT_ENV) {
        return Utf8PathBuf::from(custom);
    }

    dirs::home_dir()
        .and_then(|home| Utf8PathBuf::from_path_buf(home).ok())
        .map(|home| home.join(".agent-memory"))
        .unwrap_or_else(|| Utf8PathBuf::from(".agent-memory"))
}
