//! Optional embedding providers for similarity search.
//!
//! Providers form an ordered fallback chain: the configured provider, then
//! the local model, then nothing. Every failure (no API key, network error,
//! model missing, feature not compiled in) degrades to `None` and callers
//! fall back to keyword search.

use crate::config::{MemoryConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// A source of text embeddings.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap check; does not load models or touch the network.
    fn available(&self) -> bool;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Option<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

const OPENAI_DEFAULT_BASE: &str = "https://api.openai.com/v1";
const OPENAI_TIMEOUT: Duration = Duration::from_secs(10);

/// OpenAI `/embeddings` over blocking HTTP.
pub struct OpenAiProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: OnceLock<Option<reqwest::blocking::Client>>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    /// Reads `OPENAI_API_KEY` and `OPENAI_BASE_URL` from the environment.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| OPENAI_DEFAULT_BASE.to_string()),
            client: OnceLock::new(),
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn client(&self) -> Option<&reqwest::blocking::Client> {
        self.client
            .get_or_init(|| {
                reqwest::blocking::Client::builder()
                    .timeout(OPENAI_TIMEOUT)
                    .build()
                    .map_err(|e| debug!(error = %e, "failed to build HTTP client"))
                    .ok()
            })
            .as_ref()
    }

    fn request(&self, input: &[&str]) -> Option<Vec<Vec<f32>>> {
        let key = self.api_key.as_deref()?;
        let client = self.client()?;
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        let response = client
            .post(url)
            .bearer_auth(key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input,
            })
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| debug!(provider = "openai", error = %e, "embedding request failed"))
            .ok()?;

        let mut body: EmbeddingResponse = response
            .json()
            .map_err(|e| debug!(provider = "openai", error = %e, "unexpected embedding response"))
            .ok()?;
        if body.data.len() != input.len() {
            return None;
        }
        body.data.sort_by_key(|d| d.index);
        Some(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn available(&self) -> bool {
        self.api_key.is_some()
    }

    fn dimension(&self) -> usize {
        match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }

    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.request(&[text])?.into_iter().next()
    }

    fn embed_batch(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }
        match self.request(texts) {
            Some(vectors) => vectors.into_iter().map(Some).collect(),
            None => vec![None; texts.len()],
        }
    }
}

/// all-MiniLM-L6-v2 through fastembed. Only available when built with the
/// `local-embeddings` feature; the model is loaded on first use.
#[derive(Default)]
pub struct LocalProvider {
    #[cfg(feature = "local-embeddings")]
    model: OnceLock<Option<fastembed::TextEmbedding>>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "local-embeddings")]
    fn embed_texts(&self, texts: &[&str]) -> Option<Vec<Vec<f32>>> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let model = self
            .model
            .get_or_init(|| {
                TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
                    .map_err(|e| debug!(provider = "local", error = %e, "failed to load embedding model"))
                    .ok()
            })
            .as_ref()?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| debug!(provider = "local", error = %e, "local embedding failed"))
            .ok()
    }

    #[cfg(not(feature = "local-embeddings"))]
    fn embed_texts(&self, _texts: &[&str]) -> Option<Vec<Vec<f32>>> {
        None
    }
}

impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn available(&self) -> bool {
        cfg!(feature = "local-embeddings")
    }

    fn dimension(&self) -> usize {
        384
    }

    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.embed_texts(&[text])?.into_iter().next()
    }

    fn embed_batch(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }
        match self.embed_texts(texts) {
            Some(vectors) if vectors.len() == texts.len() => vectors.into_iter().map(Some).collect(),
            _ => vec![None; texts.len()],
        }
    }
}

/// Ordered providers; the first available one is used.
#[derive(Default)]
pub struct EmbeddingChain {
    providers: Vec<Box<dyn EmbeddingProvider>>,
}

impl EmbeddingChain {
    pub fn new(providers: Vec<Box<dyn EmbeddingProvider>>) -> Self {
        Self { providers }
    }

    /// Append a provider at the lowest priority.
    pub fn with_provider(mut self, provider: impl EmbeddingProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Configured provider first, local model as fallback.
    pub fn from_config(config: &MemoryConfig) -> Self {
        let mut providers: Vec<Box<dyn EmbeddingProvider>> = Vec::new();
        match config.embedding_provider {
            ProviderKind::Openai => {
                providers.push(Box::new(OpenAiProvider::new(config.embedding_model.clone())))
            }
            ProviderKind::Local => providers.push(Box::new(LocalProvider::new())),
            ProviderKind::None => {}
        }
        if config.embedding_provider != ProviderKind::Local {
            providers.push(Box::new(LocalProvider::new()));
        }
        Self { providers }
    }

    pub fn provider(&self) -> Option<&dyn EmbeddingProvider> {
        self.providers.iter().find(|p| p.available()).map(|p| p.as_ref())
    }

    pub fn available(&self) -> bool {
        self.provider().is_some()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let provider = self.provider()?;
        let vector = provider.embed(text);
        if vector.is_none() {
            debug!(provider = provider.name(), "embedding unavailable; using keywords");
        }
        vector
    }

    pub fn embed_batch(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        match self.provider() {
            Some(provider) => provider.embed_batch(texts),
            None => vec![None; texts.len()],
        }
    }
}
