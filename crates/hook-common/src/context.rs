//! Markdown blocks injected into the agent's context.

use episode_store::{IndexEntry, Outcome, SearchHit};

const SUMMARY_CHARS: usize = 150;

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "SUCCESS",
        Outcome::Failure => "FAILURE",
        Outcome::Partial => "PARTIAL",
        Outcome::Unknown => "UNKNOWN",
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() > SUMMARY_CHARS {
        let head: String = text.chars().take(SUMMARY_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn summary(entry: &IndexEntry) -> String {
    if entry.goal_summary.is_empty() {
        entry.id.clone()
    } else {
        truncate(&entry.goal_summary)
    }
}

/// Newest episodes, one line each. Empty input gives an empty string.
pub fn format_recent(entries: &[IndexEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }

    let mut lines = vec!["# Recent episodes\n".to_string()];
    for (i, entry) in entries.iter().enumerate() {
        let date = entry
            .timestamp
            .as_deref()
            .and_then(|ts| ts.get(..10))
            .unwrap_or("unknown date");
        lines.push(format!(
            "{}. [{}] {} ({})",
            i + 1,
            outcome_label(entry.outcome),
            summary(entry),
            date
        ));
    }
    lines.push("\n---\n".to_string());
    lines.join("\n")
}

/// Ranked search hits with any heuristics learned from them.
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut lines = vec!["# Related past episodes\n".to_string()];
    for (i, hit) in hits.iter().enumerate() {
        lines.push(format!(
            "{}. [{}] {} (relevance: {:.2})",
            i + 1,
            outcome_label(hit.entry.outcome),
            summary(&hit.entry),
            hit.relevance
        ));
        if let Some(episode) = &hit.episode {
            for heuristic in &episode.heuristics {
                lines.push(format!("   - {}", truncate(heuristic)));
            }
        }
    }
    lines.push("\n---\n".to_string());
    lines.join("\n")
}
