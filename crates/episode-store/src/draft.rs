//! Episode drafts: the caller-supplied shape an episode is built from.

use crate::schema::{EndTrigger, Episode, Outcome, generate_episode_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Episodes with fewer tool calls than this are trivial.
pub const TRIVIAL_TOOL_CALLS: u32 = 2;

const MAX_DERIVED_KEYWORDS: usize = 10;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it", "of", "on", "or",
    "that", "the", "this", "to", "was", "were", "with",
];

/// Everything needed to record an episode except its id and end time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeDraft {
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub end_trigger: EndTrigger,
    pub goal: Option<String>,
    pub goal_summary: String,
    pub chain_of_thought: Vec<String>,
    pub actions: Vec<Value>,
    /// Defaults to the number of actions.
    pub tool_call_count: Option<u32>,
    pub outcome: Outcome,
    pub error_analysis: Option<String>,
    pub heuristics: Vec<String>,
    /// Derived from the goal summary when empty.
    pub keywords: Vec<String>,
}

impl EpisodeDraft {
    pub fn into_episode(self, now: DateTime<Utc>) -> Episode {
        let tool_call_count = self
            .tool_call_count
            .unwrap_or_else(|| u32::try_from(self.actions.len()).unwrap_or(u32::MAX));
        let goal_summary = if self.goal_summary.is_empty() {
            self.goal.as_deref().map(summarize).unwrap_or_default()
        } else {
            self.goal_summary
        };
        let keywords = if self.keywords.is_empty() {
            derive_keywords(&goal_summary)
        } else {
            self.keywords
        };

        Episode {
            id: generate_episode_id(now),
            session_id: self.session_id.unwrap_or_else(|| "unknown".to_string()),
            started_at: self.started_at.unwrap_or(now),
            ended_at: now,
            end_trigger: self.end_trigger,
            goal: self.goal,
            goal_summary,
            chain_of_thought: self.chain_of_thought,
            actions: self.actions,
            tool_call_count,
            outcome: self.outcome,
            error_analysis: self.error_analysis,
            heuristics: self.heuristics,
            keywords,
            embedding: None,
            trivial: tool_call_count < TRIVIAL_TOOL_CALLS,
            consolidated: false,
        }
    }
}

/// Distinct content words of `text`, in order of first appearance.
pub fn derive_keywords(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let lower = text.to_lowercase();
    for word in lower.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if word.chars().count() < 3 || STOP_WORDS.contains(&word) {
            continue;
        }
        if !seen.iter().any(|w: &String| w == word) {
            seen.push(word.to_string());
        }
        if seen.len() == MAX_DERIVED_KEYWORDS {
            break;
        }
    }
    seen
}

/// First line of `goal`, cut to 100 characters.
fn summarize(goal: &str) -> String {
    let line = goal.lines().next().unwrap_or_default().trim();
    line.chars().take(100).collect()
}
