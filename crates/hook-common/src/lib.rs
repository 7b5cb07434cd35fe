//! Common utilities for the memory hooks.
//!
//! This crate provides shared functionality for all hook binaries:
//! - JSON input/output parsing
//! - Logging setup
//! - Context formatting for recalled episodes

pub mod context;
pub mod input;
pub mod logging;
pub mod output;

pub use input::HookInput;
pub use output::HookOutput;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::context::{format_hits, format_recent};
    pub use crate::input::HookInput;
    pub use crate::output::HookOutput;
    pub use anyhow::{Context, Result};
    pub use serde::{Deserialize, Serialize};
}
