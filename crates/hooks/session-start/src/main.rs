//! SessionStart hook: prepare the memory root and surface recent work.
//!
//! Creates the storage layout on first use, counts the session in the self
//! model, and injects the newest non-trivial episodes as context.

use anyhow::Result;
use chrono::Utc;
use episode_store::{IndexEntry, MemoryRoot};
use hook_common::prelude::*;
use tracing::{debug, warn};

// Episodes shown at session start
const RECENT_EPISODES: usize = 3;

fn main() {
    hook_common::logging::init();
    // Memory problems must never block the session.
    if let Err(e) = run() {
        warn!(error = %format!("{:#}", e), "session-start failed");
    }
}

fn run() -> Result<()> {
    let input = HookInput::from_stdin()?;
    let root = MemoryRoot::from_env();

    root.init().context("initialize memory root")?;
    let model = root
        .update_self_model(|model| {
            model.total_sessions += 1;
            model.last_session = Some(Utc::now());
            Ok(())
        })
        .context("update self model")?;
    debug!(
        sessions = model.total_sessions,
        source = input.source.as_deref().unwrap_or("unknown"),
        "session counted"
    );

    let context = format_recent(&recent_episodes(&root));
    if context.is_empty() {
        return Ok(());
    }
    HookOutput::session_start().with_context(context).write_stdout()
}

fn recent_episodes(root: &MemoryRoot) -> Vec<IndexEntry> {
    root.episodes()
        .read_index()
        .entries
        .into_iter()
        .filter(|entry| !entry.trivial)
        .take(RECENT_EPISODES)
        .collect()
}
