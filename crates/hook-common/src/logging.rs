//! Diagnostics for hook binaries.
//!
//! stdout carries the hook's JSON reply, so everything here goes to stderr.

use tracing_subscriber::EnvFilter;

/// Filter directives, e.g. `episode_store=debug`.
pub const LOG_ENV: &str = "AGENT_MEMORY_LOG";

/// Install a stderr subscriber filtered by `AGENT_MEMORY_LOG` (default
/// `warn`). Safe to call more than once.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
