//! Accessors for the non-episode documents: config, self model, user
//! models, semantic rules and agent results.
//!
//! Every read-modify-write here reads inside the document's lock.

use crate::config::MemoryConfig;
use crate::document::merge_defaults;
use crate::error::{Result, StoreError};
use crate::layout::MemoryRoot;
use crate::schema::{SelfModel, SemanticRule};
use chrono::Utc;
use serde_json::Value;
use tracing::warn;

impl MemoryRoot {
    /// Current configuration; missing or malformed files yield defaults.
    pub fn config(&self) -> MemoryConfig {
        self.documents().read_or_default(&self.config_path())
    }

    pub fn save_config(&self, config: &MemoryConfig) -> Result<()> {
        self.documents().write_locked(&self.config_path(), config)
    }

    pub fn update_config(&self, f: impl FnOnce(&mut MemoryConfig) -> Result<()>) -> Result<MemoryConfig> {
        self.documents().update(&self.config_path(), f)
    }

    pub fn self_model(&self) -> SelfModel {
        self.documents().read_or_default(&self.self_model_path())
    }

    /// Whole replacement; refreshes `updated_at`.
    pub fn save_self_model(&self, model: &SelfModel) -> Result<()> {
        let mut model = model.clone();
        model.updated_at = Utc::now();
        self.documents().write_locked(&self.self_model_path(), &model)
    }

    pub fn update_self_model(&self, f: impl FnOnce(&mut SelfModel) -> Result<()>) -> Result<SelfModel> {
        self.documents().update(&self.self_model_path(), |model: &mut SelfModel| {
            f(model)?;
            model.updated_at = Utc::now();
            Ok(())
        })
    }

    pub fn user_model(&self, user_id: &str) -> Result<Option<Value>> {
        let path = self.user_model_path(user_id)?;
        Ok(self.documents().read(&path).found())
    }

    /// Whole replacement without a prior read, so no lock.
    pub fn save_user_model(&self, user_id: &str, model: &Value) -> Result<()> {
        let path = self.user_model_path(user_id)?;
        self.documents().write(&path, model)
    }

    /// Locked read-modify-write; starts from `{}` when absent.
    pub fn update_user_model(&self, user_id: &str, f: impl FnOnce(&mut Value) -> Result<()>) -> Result<Value> {
        let path = self.user_model_path(user_id)?;
        self.documents().update(&path, |model: &mut Value| {
            *model = merge_defaults(model.take(), &Value::Object(Default::default()));
            f(model)
        })
    }

    /// All rules that deserialize; invalid items are skipped with a warning.
    pub fn semantic_rules(&self) -> Vec<SemanticRule> {
        let raw: Vec<Value> = self.documents().read_or_default(&self.rules_path());
        raw.into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(error = %e, "skipping invalid semantic rule");
                    None
                }
            })
            .collect()
    }

    /// Append one rule. Existing items are kept verbatim, valid or not.
    pub fn add_rule(&self, rule: &SemanticRule) -> Result<()> {
        let path = self.rules_path();
        let item = serde_json::to_value(rule).map_err(|source| StoreError::Serialize {
            path: path.clone(),
            source,
        })?;
        self.documents()
            .update(&path, |rules: &mut Vec<Value>| {
                rules.push(item);
                Ok(())
            })
            .map(|_| ())
    }

    pub fn save_rules(&self, rules: &[SemanticRule]) -> Result<()> {
        self.documents().write_locked(&self.rules_path(), rules)
    }

    pub fn agent_result(&self, task_id: &str) -> Result<Option<Value>> {
        let path = self.agent_result_path(task_id)?;
        Ok(self.documents().read(&path).found())
    }

    /// Each task has its own path, so no lock.
    pub fn save_agent_result(&self, task_id: &str, result: &Value) -> Result<()> {
        let path = self.agent_result_path(task_id)?;
        self.documents().write(&path, result)
    }
}
