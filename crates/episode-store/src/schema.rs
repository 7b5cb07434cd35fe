//! Typed records persisted by the store.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// How an episode ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
    #[default]
    Unknown,
}

/// What closed the episode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndTrigger {
    #[default]
    StopHook,
    ReflectCommand,
    IdleTimeout,
}

/// Full record of one interaction session. Write-once apart from `consolidated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub started_at: DateTime<Utc>,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub end_trigger: EndTrigger,

    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub goal_summary: String,
    #[serde(default)]
    pub chain_of_thought: Vec<String>,
    /// Opaque action records produced by the caller.
    #[serde(default)]
    pub actions: Vec<Value>,
    #[serde(default)]
    pub tool_call_count: u32,

    #[serde(default)]
    pub outcome: Outcome,
    #[serde(default)]
    pub error_analysis: Option<String>,

    #[serde(default)]
    pub heuristics: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub trivial: bool,
    #[serde(default)]
    pub consolidated: bool,
}

impl Episode {
    /// New episode with a generated id; both timestamps set to now.
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_episode_id(now),
            session_id: session_id.into(),
            started_at: now,
            ended_at: now,
            end_trigger: EndTrigger::StopHook,
            goal: None,
            goal_summary: String::new(),
            chain_of_thought: Vec::new(),
            actions: Vec::new(),
            tool_call_count: 0,
            outcome: Outcome::Unknown,
            error_analysis: None,
            heuristics: Vec::new(),
            keywords: Vec::new(),
            embedding: None,
            trivial: false,
            consolidated: false,
        }
    }

    pub fn with_goal_summary(mut self, summary: impl Into<String>) -> Self {
        self.goal_summary = summary.into();
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    pub fn with_heuristic(mut self, heuristic: impl Into<String>) -> Self {
        self.heuristics.push(heuristic.into());
        self
    }

    /// Text used for keyword matching and embeddings.
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.goal_summary.clone()];
        parts.extend(self.keywords.iter().cloned());
        parts.join(" ")
    }
}

/// Denormalised summary of an [`Episode`] kept in the live index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    /// ISO 8601; kept as text so a bad value only costs the recency bonus.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub outcome: Outcome,
    #[serde(default)]
    pub goal_summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub heuristics_count: u32,
    #[serde(default)]
    pub tool_call_count: u32,
    #[serde(default)]
    pub consolidated: bool,
    #[serde(default)]
    pub trivial: bool,
}

impl IndexEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Some(Utc::now().to_rfc3339()),
            outcome: Outcome::Unknown,
            goal_summary: String::new(),
            keywords: Vec::new(),
            heuristics_count: 0,
            tool_call_count: 0,
            consolidated: false,
            trivial: false,
        }
    }

    pub fn from_episode(episode: &Episode) -> Self {
        Self {
            id: episode.id.clone(),
            timestamp: Some(episode.ended_at.to_rfc3339()),
            outcome: episode.outcome,
            goal_summary: episode.goal_summary.clone(),
            keywords: episode.keywords.clone(),
            heuristics_count: episode.heuristics.len() as u32,
            tool_call_count: episode.tool_call_count,
            consolidated: episode.consolidated,
            trivial: episode.trivial,
        }
    }

    /// Lower-cased goal summary and keywords.
    pub fn searchable_text(&self) -> String {
        let mut parts = Vec::with_capacity(self.keywords.len() + 1);
        if !self.goal_summary.is_empty() {
            parts.push(self.goal_summary.to_lowercase());
        }
        parts.extend(self.keywords.iter().map(|k| k.to_lowercase()));
        parts.join(" ")
    }
}

/// The live index document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeIndex {
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub total_entries: usize,
    /// Newest first.
    #[serde(default)]
    pub entries: Vec<IndexEntry>,
}

impl Default for EpisodeIndex {
    fn default() -> Self {
        Self {
            last_updated: Utc::now(),
            total_entries: 0,
            entries: Vec::new(),
        }
    }
}

impl EpisodeIndex {
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }
}

/// Origin of a semantic rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    #[default]
    Reflection,
    Manual,
    Consolidation,
}

/// Consolidated heuristic distilled from episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRule {
    #[serde(default = "generate_rule_id")]
    pub id: String,
    pub trigger_concept: String,
    pub rule_content: String,
    #[serde(default)]
    pub source: RuleSource,
    #[serde(default)]
    pub source_episodes: Vec<String>,
    #[serde(default = "default_rule_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub last_validated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub validation_count: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_rule_confidence() -> f64 {
    0.8
}

impl SemanticRule {
    pub fn new(trigger_concept: impl Into<String>, rule_content: impl Into<String>) -> Self {
        Self {
            id: generate_rule_id(),
            trigger_concept: trigger_concept.into(),
            rule_content: rule_content.into(),
            source: RuleSource::Reflection,
            source_episodes: Vec::new(),
            confidence: default_rule_confidence(),
            last_validated: None,
            validation_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: RuleSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_source_episode(mut self, episode_id: impl Into<String>) -> Self {
        self.source_episodes.push(episode_id.into());
        self
    }
}

/// The agent's persistent identity. Fields this crate does not use are kept
/// verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfModel {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default = "default_identity_goal")]
    pub identity_goal: String,
    #[serde(default = "default_terminal_creed")]
    pub terminal_creed: Vec<String>,
    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default)]
    pub total_episodes: u64,
    #[serde(default)]
    pub last_session: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_reflection: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SelfModel {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            agent_id: default_agent_id(),
            identity_goal: default_identity_goal(),
            terminal_creed: default_terminal_creed(),
            total_sessions: 0,
            total_episodes: 0,
            last_session: None,
            last_reflection: None,
            created_at: now,
            updated_at: now,
            extra: Map::new(),
        }
    }
}

fn default_agent_id() -> String {
    "episodic-agent".to_string()
}

fn default_identity_goal() -> String {
    "Assist users effectively while learning and improving".to_string()
}

fn default_terminal_creed() -> Vec<String> {
    [
        "Prioritize user data safety above task completion.",
        "Do not fake tool outputs; execute them or fail.",
        "Admit ignorance rather than hallucinating.",
        "Maintain transparent capability tracking.",
        "Respect user privacy boundaries.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// `ep_<yyyymmddHHMMSS>_<8 hex>`; sorts by creation time.
/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.f]` read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Metadata timestamps never make a whole document malformed: unparseable
/// or null values fall back to now.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now))
}

fn default_session_id() -> String {
    "unknown".to_string()
}

pub fn generate_episode_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("ep_{}_{}", now.format("%Y%m%d%H%M%S"), &suffix[..8])
}

fn generate_rule_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("rule_{}", &suffix[..8])
}
