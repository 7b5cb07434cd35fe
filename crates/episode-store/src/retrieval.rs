//! Episode retrieval: keyword scoring over the index, composite relevance
//! ranking, and an optional embedding-similarity pass.

use crate::embedding::EmbeddingChain;
use crate::layout::MemoryRoot;
use crate::schema::{Episode, IndexEntry, Outcome};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::debug;

pub use crate::schema::parse_timestamp;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("static pattern"));

const SUCCESS_MULTIPLIER: f64 = 1.2;
const HEURISTIC_BONUS: f64 = 0.1;
const CONSOLIDATED_MULTIPLIER: f64 = 0.8;
const WEEK_BONUS: f64 = 0.10;
const MONTH_BONUS: f64 = 0.05;

/// Distinct lower-cased word tokens.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Fraction of query tokens contained in the entry's searchable text.
/// Containment is by substring, so "dock" matches "docker".
pub fn keyword_score(tokens: &BTreeSet<String>, entry: &IndexEntry) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let text = entry.searchable_text();
    let matches = tokens.iter().filter(|t| text.contains(t.as_str())).count();
    matches as f64 / tokens.len() as f64
}

/// Entries with a positive keyword score, best first. Ties keep index
/// order, so newer entries win.
pub fn keyword_search(entries: &[IndexEntry], query: &str, k: usize) -> Vec<(IndexEntry, f64)> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(IndexEntry, f64)> = entries
        .iter()
        .filter_map(|entry| {
            let score = keyword_score(&tokens, entry);
            (score > 0.0).then(|| (entry.clone(), score))
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Adjust a base match score by outcome, heuristics, consolidation and
/// recency, clamped to `[0, 1]`.
pub fn composite_score(entry: &IndexEntry, base: f64, now: DateTime<Utc>) -> f64 {
    let mut score = base;
    if entry.outcome == Outcome::Success {
        score *= SUCCESS_MULTIPLIER;
    }
    score += HEURISTIC_BONUS * entry.heuristics_count as f64;
    if entry.consolidated {
        score *= CONSOLIDATED_MULTIPLIER;
    }
    if let Some(ts) = entry.timestamp.as_deref().and_then(parse_timestamp) {
        let days = (now - ts).num_days();
        if days < 7 {
            score += WEEK_BONUS;
        } else if days < 30 {
            score += MONTH_BONUS;
        }
    }
    score.clamp(0.0, 1.0)
}

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub entry: IndexEntry,
    /// Keyword match fraction; 0.0 for similarity-only hits.
    pub match_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    /// Composite score used for ranking.
    pub relevance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<Episode>,
}

/// Search over one storage root.
pub struct Retriever<'a> {
    root: &'a MemoryRoot,
    embeddings: Option<&'a EmbeddingChain>,
    with_episodes: bool,
    now: Option<DateTime<Utc>>,
}

impl<'a> Retriever<'a> {
    pub fn new(root: &'a MemoryRoot) -> Self {
        Self {
            root,
            embeddings: None,
            with_episodes: false,
            now: None,
        }
    }

    pub fn with_embeddings(mut self, chain: &'a EmbeddingChain) -> Self {
        self.embeddings = Some(chain);
        self
    }

    /// Attach the full episode document to each hit.
    pub fn with_episodes(mut self, yes: bool) -> Self {
        self.with_episodes = yes;
        self
    }

    /// Fix the clock used for recency bonuses.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Top `k` entries by plain keyword score.
    pub fn keyword_search(&self, query: &str, k: usize) -> Vec<(IndexEntry, f64)> {
        keyword_search(&self.root.episodes().read_index().entries, query, k)
    }

    /// Top `k` hits by composite relevance.
    ///
    /// Keyword matching picks up to `2k` candidates. When an embedding
    /// provider is available, recent entries with stored embeddings are
    /// compared to the query: candidates take the better of the two scores,
    /// and non-matching entries above the similarity threshold join the pool.
    pub fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        if k == 0 {
            return Vec::new();
        }
        let now = self.now.unwrap_or_else(Utc::now);
        let config = self.root.config();
        let log = self.root.episodes();
        let entries = log.read_index().entries;

        let mut hits: Vec<SearchHit> = keyword_search(&entries, query, k.saturating_mul(2))
            .into_iter()
            .map(|(entry, score)| SearchHit {
                entry,
                match_score: score,
                similarity: None,
                relevance: 0.0,
                episode: None,
            })
            .collect();

        if let Some(query_vector) = self.embeddings.and_then(|chain| chain.embed(query)) {
            let mut compared = 0;
            for entry in entries.iter().take(config.semantic_scan_limit) {
                let Some(vector) = log.get(&entry.id).and_then(|ep| ep.embedding) else {
                    continue;
                };
                compared += 1;
                let similarity = cosine_similarity(&query_vector, &vector);
                if let Some(hit) = hits.iter_mut().find(|h| h.entry.id == entry.id) {
                    hit.similarity = Some(similarity);
                } else if similarity >= config.similarity_threshold {
                    hits.push(SearchHit {
                        entry: entry.clone(),
                        match_score: 0.0,
                        similarity: Some(similarity),
                        relevance: 0.0,
                        episode: None,
                    });
                }
            }
            debug!(compared, "similarity pass complete");
        }

        for hit in &mut hits {
            let base = hit.match_score.max(hit.similarity.unwrap_or(0.0));
            hit.relevance = composite_score(&hit.entry, base, now);
        }
        hits.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(Ordering::Equal));
        hits.truncate(k);

        if self.with_episodes {
            for hit in &mut hits {
                hit.episode = log.get(&hit.entry.id);
            }
        }
        hits
    }
}
