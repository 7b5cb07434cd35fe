//! Hook input parsing from stdin.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Read};

/// Hook payload received on stdin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookInput {
    /// Hook event name (e.g., "SessionStart", "UserPromptSubmit", "Stop")
    #[serde(default)]
    pub hook_event_name: Option<String>,

    /// Session ID
    #[serde(default)]
    pub session_id: Option<String>,

    /// User prompt (for UserPromptSubmit hooks)
    #[serde(default, alias = "user_prompt")]
    pub prompt: Option<String>,

    /// Why the session started: "startup", "resume", "clear" (SessionStart)
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub transcript_path: Option<String>,

    #[serde(default)]
    pub cwd: Option<String>,

    /// Additional fields
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl HookInput {
    /// Read and parse hook input from stdin.
    pub fn from_stdin() -> anyhow::Result<Self> {
        let raw = read_stdin()?;
        Self::parse(&raw)
    }

    /// Parse a payload; blank input yields an empty payload.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }

    pub fn is_event(&self, name: &str) -> bool {
        self.hook_event_name.as_deref() == Some(name)
    }

    /// Non-blank prompt text.
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    pub fn session_id_or_unknown(&self) -> &str {
        self.session_id.as_deref().unwrap_or("unknown")
    }
}

/// Whole of stdin as a string.
pub fn read_stdin() -> anyhow::Result<String> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_prompt() {
        let json = r#"{"hook_event_name": "UserPromptSubmit", "session_id": "abc", "prompt": "Fix the docker build"}"#;
        let input = HookInput::parse(json).unwrap();
        assert!(input.is_event("UserPromptSubmit"));
        assert_eq!(input.prompt(), Some("Fix the docker build"));
        assert_eq!(input.session_id_or_unknown(), "abc");
    }

    #[test]
    fn test_legacy_prompt_field() {
        let input = HookInput::parse(r#"{"user_prompt": "Hello"}"#).unwrap();
        assert_eq!(input.prompt(), Some("Hello"));
    }

    #[test]
    fn test_blank_prompt_and_unknown_fields() {
        let input = HookInput::parse(r#"{"prompt": "   ", "stop_hook_active": true}"#).unwrap();
        assert_eq!(input.prompt(), None);
        assert_eq!(input.extra.get("stop_hook_active"), Some(&Value::Bool(true)));
        assert_eq!(input.session_id_or_unknown(), "unknown");
    }

    #[test]
    fn test_empty_stdin() {
        let input = HookInput::parse("\n").unwrap();
        assert!(input.hook_event_name.is_none());
        assert!(HookInput::parse("{not json").is_err());
    }
}
