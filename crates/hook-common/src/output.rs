//! Hook output generation for stdout.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Hook-specific output structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    /// Hook event name
    pub hook_event_name: String,

    /// Text injected into the agent's context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

/// Main hook output structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    /// Hook-specific output
    pub hook_specific_output: HookSpecificOutput,
}

impl HookOutput {
    fn for_event(name: &str) -> Self {
        Self {
            hook_specific_output: HookSpecificOutput {
                hook_event_name: name.to_string(),
                additional_context: None,
            },
        }
    }

    /// Create a new hook output for SessionStart.
    pub fn session_start() -> Self {
        Self::for_event("SessionStart")
    }

    /// Create a new hook output for UserPromptSubmit.
    pub fn user_prompt_submit() -> Self {
        Self::for_event("UserPromptSubmit")
    }

    /// Add additional context message.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.hook_specific_output.additional_context = Some(context.into());
        self
    }

    /// Write the output to stdout.
    pub fn write_stdout(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string(self)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}
