//! memory-cli
//!
//! Operator interface to an episodic memory root. Every command prints JSON
//! on stdout unless `--context` asks for the markdown the hooks inject.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use clap::{Parser, Subcommand};
use episode_store::document::Document;
use episode_store::episodes::current_year;
use episode_store::schema::RuleSource;
use episode_store::{
    EmbeddingChain, Episode, EpisodeDraft, EpisodeIndex, MemoryConfig, MemoryRoot, Retriever, SelfModel,
    SemanticRule, StoreError,
};
use hook_common::context::{format_hits, format_recent};
use hook_common::input::read_stdin;
use serde::Serialize;
use serde_json::{Value, json};
use std::process::ExitCode;
use tracing::debug;

#[derive(Parser)]
#[command(name = "memory-cli")]
#[command(about = "Inspect and maintain an episodic memory root", long_about = None)]
struct Cli {
    /// Storage root (defaults to $AGENT_MEMORY_HOME or ~/.agent-memory)
    #[arg(long, global = true)]
    root: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage layout (idempotent)
    Init,

    /// Record an episode draft read from stdin
    Append {
        /// Session ID when the draft has none
        #[arg(long)]
        session_id: Option<String>,

        /// Skip the embedding provider
        #[arg(long)]
        no_embed: bool,
    },

    /// Rank episodes against a query
    Search {
        query: String,

        /// Number of results (defaults to retrieval_k)
        #[arg(short)]
        k: Option<usize>,

        /// Plain keyword scores, no ranking adjustments
        #[arg(long)]
        keyword_only: bool,

        /// Include full episode documents
        #[arg(long)]
        episodes: bool,

        /// Print the markdown block the recall hook injects
        #[arg(long)]
        context: bool,
    },

    /// Newest index entries
    Recent {
        #[arg(short, default_value = "10")]
        n: usize,

        /// Print the markdown block the session hook injects
        #[arg(long)]
        context: bool,
    },

    /// Print one episode document
    Show { id: String },

    /// Episodes awaiting consolidation, newest first
    Unconsolidated {
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Mark episodes as consolidated
    Consolidate {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Print an archive shard
    Archive {
        /// Calendar year (defaults to the current one)
        #[arg(long)]
        year: Option<i32>,

        /// List the years that have shards
        #[arg(long)]
        list: bool,
    },

    /// Read or change config.json
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Read or extend semantic_rules.json
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Report missing or malformed documents; exits 1 if any are malformed
    Check,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Set one key; the value is parsed as JSON, falling back to a string
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum RulesAction {
    /// Print all valid rules
    List,

    /// Append a manual rule
    Add {
        /// Concept that triggers the rule
        #[arg(long)]
        trigger: String,

        /// Rule text
        #[arg(long)]
        content: String,

        #[arg(long, default_value = "0.8")]
        confidence: f64,

        /// Episode the rule was learned from (repeatable)
        #[arg(long = "episode")]
        episodes: Vec<String>,
    },
}

fn main() -> ExitCode {
    hook_common::logging::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let root = match cli.root {
        Some(path) => MemoryRoot::open(path),
        None => MemoryRoot::from_env(),
    };
    debug!(root = %root.root(), "memory root");

    match cli.command {
        Commands::Init => {
            root.init().context("initialize memory root")?;
            print_json(&json!({ "root": root.root(), "initialized": true }))?;
        }

        Commands::Append { session_id, no_embed } => {
            let raw = read_stdin()?;
            let mut draft: EpisodeDraft = serde_json::from_str(&raw).context("parse episode draft from stdin")?;
            if draft.session_id.is_none() {
                draft.session_id = session_id;
            }
            root.init().context("initialize memory root")?;

            let mut episode = draft.into_episode(Utc::now());
            if !no_embed && !episode.trivial {
                episode.embedding = EmbeddingChain::from_config(&root.config()).embed(&episode.searchable_text());
            }
            let outcome = root.episodes().record(&episode).context("record episode")?;
            if outcome.inserted {
                root.update_self_model(|model| {
                    model.total_episodes += 1;
                    Ok(())
                })?;
            }
            print_json(&json!({
                "id": episode.id,
                "trivial": episode.trivial,
                "embedded": episode.embedding.is_some(),
                "total_entries": outcome.total_entries,
                "archived": outcome.archived,
            }))?;
        }

        Commands::Search {
            query,
            k,
            keyword_only,
            episodes,
            context,
        } => {
            let config = root.config();
            let k = k.unwrap_or(config.retrieval_k);
            if keyword_only {
                let results: Vec<Value> = Retriever::new(&root)
                    .keyword_search(&query, k)
                    .into_iter()
                    .map(|(entry, score)| json!({ "entry": entry, "match_score": score }))
                    .collect();
                print_json(&results)?;
            } else {
                let chain = EmbeddingChain::from_config(&config);
                let hits = Retriever::new(&root)
                    .with_embeddings(&chain)
                    .with_episodes(episodes || context)
                    .search(&query, k);
                if context {
                    print!("{}", format_hits(&hits));
                } else {
                    print_json(&hits)?;
                }
            }
        }

        Commands::Recent { n, context } => {
            let entries = root.episodes().list_recent(n);
            if context {
                print!("{}", format_recent(&entries));
            } else {
                print_json(&entries)?;
            }
        }

        Commands::Show { id } => {
            let path = root.episode_path(&id)?;
            let episode: Option<Episode> = root.documents().read(&path).into_result(&path)?;
            match episode {
                Some(episode) => print_json(&episode)?,
                None => bail!("episode {} not found", id),
            }
        }

        Commands::Unconsolidated { limit } => {
            print_json(&root.episodes().list_unconsolidated(limit))?;
        }

        Commands::Consolidate { ids } => {
            let changed = root.episodes().mark_consolidated(&ids).context("mark consolidated")?;
            print_json(&json!({ "requested": ids.len(), "changed": changed }))?;
        }

        Commands::Archive { year, list } => {
            if list {
                print_json(&root.episodes().archive_years())?;
            } else {
                print_json(&root.episodes().read_archive(year.unwrap_or_else(current_year)))?;
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => print_json(&root.config())?,
            ConfigAction::Set { key, value } => {
                root.config()
                    .set(&key, &value)
                    .with_context(|| format!("invalid value for config key {}", key))?;
                let config = root.update_config(|config| {
                    config.set(&key, &value).map_err(|source| StoreError::Serialize {
                        path: root.config_path(),
                        source,
                    })
                })?;
                print_json(&config)?;
            }
        },

        Commands::Rules { action } => match action {
            RulesAction::List => print_json(&root.semantic_rules())?,
            RulesAction::Add {
                trigger,
                content,
                confidence,
                episodes,
            } => {
                let mut rule = SemanticRule::new(trigger, content)
                    .with_source(RuleSource::Manual)
                    .with_confidence(confidence);
                for id in episodes {
                    rule = rule.with_source_episode(id);
                }
                root.init().context("initialize memory root")?;
                root.add_rule(&rule).context("append rule")?;
                print_json(&rule)?;
            }
        },

        Commands::Check => {
            let report = check(&root);
            let malformed = report.iter().any(|item| item.status == "malformed");
            print_json(&report)?;
            if malformed {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct CheckItem {
    path: Utf8PathBuf,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn inspect<T: serde::de::DeserializeOwned>(root: &MemoryRoot, path: &Utf8Path) -> (CheckItem, Option<T>) {
    let (status, reason, value) = match root.documents().read::<T>(path) {
        Document::Found(value) => ("ok", None, Some(value)),
        Document::Missing => ("missing", None, None),
        Document::Malformed { reason } => ("malformed", Some(reason), None),
    };
    let item = CheckItem {
        path: path.to_path_buf(),
        status,
        reason,
    };
    (item, value)
}

/// Strict pass over every document the root should contain.
fn check(root: &MemoryRoot) -> Vec<CheckItem> {
    let mut report = vec![
        inspect::<MemoryConfig>(root, &root.config_path()).0,
        inspect::<SelfModel>(root, &root.self_model_path()).0,
        inspect::<Vec<Value>>(root, &root.rules_path()).0,
    ];

    let (item, index) = inspect::<EpisodeIndex>(root, &root.index_path());
    report.push(item);
    for entry in index.map(|i| i.entries).unwrap_or_default() {
        match root.episode_path(&entry.id) {
            Ok(path) => report.push(inspect::<Episode>(root, &path).0),
            Err(e) => report.push(CheckItem {
                path: root.episodes_dir(),
                status: "malformed",
                reason: Some(e.to_string()),
            }),
        }
    }

    for year in root.episodes().archive_years() {
        report.push(inspect::<Vec<Value>>(root, &root.archive_path(year)).0);
    }
    report
}
