//! Stop hook: record the finished interaction as an episode.
//!
//! The payload is either an episode draft itself or a hook payload carrying
//! one under `episode`. The episode document is written, its summary is
//! appended to the index, and the self model's episode counter is bumped.

use anyhow::Result;
use chrono::Utc;
use episode_store::{EmbeddingChain, Episode, EpisodeDraft, MemoryRoot, StoreError};
use hook_common::input::read_stdin;
use hook_common::prelude::*;
use serde_json::Value;
use tracing::{debug, info, warn};

fn main() {
    hook_common::logging::init();
    // Memory problems must never block the session.
    if let Err(e) = run() {
        if is_contention(&e) {
            info!(error = %format!("{:#}", e), "memory busy; episode not recorded");
        } else {
            warn!(error = %format!("{:#}", e), "record-episode failed");
        }
    }
}

/// Lock timeouts and takeovers from concurrent sessions.
fn is_contention(e: &anyhow::Error) -> bool {
    e.chain()
        .filter_map(|cause| cause.downcast_ref::<StoreError>())
        .any(StoreError::is_contention)
}

fn run() -> Result<()> {
    let raw = read_stdin()?;
    let input = HookInput::parse(&raw)?;
    let Some(draft) = draft_from_payload(&raw, &input)? else {
        debug!("nothing to record");
        return Ok(());
    };

    let root = MemoryRoot::from_env();
    root.init().context("initialize memory root")?;
    let episode = record(&root, draft)?;
    info!(id = %episode.id, trivial = episode.trivial, "episode recorded");
    Ok(())
}

/// The draft in `raw`, or `None` when it describes no work at all.
fn draft_from_payload(raw: &str, input: &HookInput) -> Result<Option<EpisodeDraft>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(raw)?;
    let body = value.get("episode").cloned().unwrap_or(value);
    let mut draft: EpisodeDraft = serde_json::from_value(body).context("parse episode draft")?;

    if draft.goal_summary.is_empty() && draft.goal.is_none() && draft.actions.is_empty() {
        return Ok(None);
    }
    if draft.session_id.is_none() {
        draft.session_id = input.session_id.clone();
    }
    Ok(Some(draft))
}

fn record(root: &MemoryRoot, draft: EpisodeDraft) -> Result<Episode> {
    let mut episode = draft.into_episode(Utc::now());

    if !episode.trivial {
        let chain = EmbeddingChain::from_config(&root.config());
        episode.embedding = chain.embed(&episode.searchable_text());
    }

    let outcome = root.episodes().record(&episode).context("record episode")?;
    if !outcome.inserted {
        return Ok(episode);
    }
    root.update_self_model(|model| {
        model.total_episodes += 1;
        Ok(())
    })
    .context("update self model")?;
    Ok(episode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn test_draft_from_wrapped_payload() {
        let raw = r#"{"hook_event_name": "Stop", "session_id": "s-42",
                      "episode": {"goal_summary": "Fix CI", "tool_call_count": 4}}"#;
        let input = HookInput::parse(raw).unwrap();
        let draft = draft_from_payload(raw, &input).unwrap().unwrap();
        assert_eq!(draft.session_id.as_deref(), Some("s-42"));
        assert_eq!(draft.goal_summary, "Fix CI");
    }

    #[test]
    fn test_bare_stop_payload_is_skipped() {
        let raw = r#"{"hook_event_name": "Stop", "session_id": "s-42", "stop_hook_active": false}"#;
        let input = HookInput::parse(raw).unwrap();
        assert!(draft_from_payload(raw, &input).unwrap().is_none());
        assert!(draft_from_payload("", &HookInput::default()).unwrap().is_none());
    }

    #[test]
    fn test_contention_is_recognized_through_context() {
        let busy = anyhow::Error::new(StoreError::LockTimeout {
            path: "episodes/index.json".into(),
            waited: std::time::Duration::from_secs(5),
        })
        .context("record episode");
        assert!(is_contention(&busy));

        let other = anyhow::Error::new(StoreError::InvalidIdentifier("../x".into())).context("record episode");
        assert!(!is_contention(&other));
        assert!(!is_contention(&anyhow::anyhow!("parse episode draft")));
    }

    #[test]
    fn test_record_counts_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let root = MemoryRoot::open(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        root.init().unwrap();

        let draft = EpisodeDraft {
            goal_summary: "Restart docker daemon".into(),
            tool_call_count: Some(3),
            ..Default::default()
        };
        let episode = record(&root, draft).unwrap();

        assert_eq!(root.episodes().get(&episode.id).unwrap().keywords, vec!["restart", "docker", "daemon"]);
        assert_eq!(root.episodes().read_index().entries[0].id, episode.id);
        assert_eq!(root.self_model().total_episodes, 1);
    }
}
