//! UserPromptSubmit hook: recall past episodes related to the prompt.
//!
//! Ranks the index against the prompt (keywords, plus embeddings when a
//! provider is available) and injects the best hits as context.

use anyhow::Result;
use episode_store::{EmbeddingChain, MemoryRoot, Retriever, SearchHit};
use hook_common::prelude::*;
use tracing::{debug, warn};

// Long prompts are cut before tokenizing
const MAX_QUERY_CHARS: usize = 500;

fn main() {
    hook_common::logging::init();
    // Memory problems must never block the session.
    if let Err(e) = run() {
        warn!(error = %format!("{:#}", e), "recall-episodes failed");
    }
}

fn run() -> Result<()> {
    let input = HookInput::from_stdin()?;
    if input.hook_event_name.is_some() && !input.is_event("UserPromptSubmit") {
        debug!(event = ?input.hook_event_name, "not a prompt event");
        return Ok(());
    }
    let Some(prompt) = input.prompt() else {
        return Ok(());
    };

    let root = MemoryRoot::from_env();
    if !root.index_path().exists() {
        debug!(root = %root.root(), "memory root not initialized");
        return Ok(());
    }

    let hits = recall(&root, prompt);
    let context = format_hits(&hits);
    if context.is_empty() {
        return Ok(());
    }
    HookOutput::user_prompt_submit().with_context(context).write_stdout()
}

fn recall(root: &MemoryRoot, prompt: &str) -> Vec<SearchHit> {
    let query: String = prompt.chars().take(MAX_QUERY_CHARS).collect();
    let config = root.config();
    let chain = EmbeddingChain::from_config(&config);

    let hits = Retriever::new(root)
        .with_embeddings(&chain)
        .with_episodes(true)
        .search(&query, config.retrieval_k);
    debug!(hits = hits.len(), "recalled episodes");
    hits
}
