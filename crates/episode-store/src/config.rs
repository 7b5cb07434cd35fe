//! `config.json`: typed settings with per-field defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which embedding provider to try first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Local,
    #[default]
    None,
}

/// Storage configuration. Keys this crate does not know are preserved in
/// `extra` so a save never drops another tool's settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub schema_version: String,
    pub embedding_provider: ProviderKind,
    pub embedding_model: String,
    pub reflection_trigger: String,
    pub guardian_tier3_enabled: bool,
    pub consolidation_min_episodes: usize,
    pub user_mode: String,
    pub current_user: String,
    /// Live index capacity; older entries are archived.
    pub max_index_entries: usize,
    pub retrieval_k: usize,
    pub similarity_threshold: f64,
    /// How many recent entries the similarity pass looks at.
    pub semantic_scan_limit: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            schema_version: "1.0.0".to_string(),
            embedding_provider: ProviderKind::None,
            embedding_model: "text-embedding-3-small".to_string(),
            reflection_trigger: "manual".to_string(),
            guardian_tier3_enabled: true,
            consolidation_min_episodes: 5,
            user_mode: "single".to_string(),
            current_user: "default".to_string(),
            max_index_entries: 1000,
            retrieval_k: 5,
            similarity_threshold: 0.75,
            semantic_scan_limit: 200,
            extra: Map::new(),
        }
    }
}

impl MemoryConfig {
    /// Set one key from its string form. Known keys are type-checked by
    /// round-tripping through JSON; unknown keys land in `extra`.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), serde_json::Error> {
        let parsed = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.into()));
        let mut doc = serde_json::to_value(&*self)?;
        if let Value::Object(map) = &mut doc {
            map.insert(key.to_string(), parsed);
        }
        *self = serde_json::from_value(doc)?;
        Ok(())
    }
}
