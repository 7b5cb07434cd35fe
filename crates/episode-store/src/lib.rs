//! Episodic memory storage for agent hooks.
//!
//! Provides:
//! - A cross-process directory lock with staleness recovery
//! - Atomic JSON documents with locked read-modify-write
//! - A capped episode index that archives its overflow by year
//! - Keyword and embedding-assisted retrieval

pub mod config;
pub mod document;
pub mod draft;
pub mod embedding;
pub mod episodes;
pub mod error;
pub mod journal;
pub mod layout;
pub mod lock;
mod records;
pub mod retrieval;
pub mod schema;

pub use config::{MemoryConfig, ProviderKind};
pub use document::{Document, DocumentStore};
pub use draft::EpisodeDraft;
pub use embedding::{EmbeddingChain, EmbeddingProvider};
pub use episodes::{AppendOutcome, EpisodeLog};
pub use error::{Result, StoreError};
pub use layout::MemoryRoot;
pub use lock::{DirLock, LockOptions};
pub use retrieval::{Retriever, SearchHit};
pub use schema::{Episode, EpisodeIndex, IndexEntry, Outcome, SelfModel, SemanticRule};
