use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    /// Documents drained from the queue per indexing pass.
    #[serde(default = "default_indexer_batch_size")]
    pub batch_size: usize,
    /// Keep lexically indexing a document whose embedding failed.
    #[serde(default)]
    pub lexical_on_embedding_failure: bool,
    /// Deadline for one document's embedding, provider retries included.
    /// Unset means the provider's whole retry budget.
    #[serde(default)]
    pub embed_timeout_secs: Option<u64>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_indexer_batch_size(),
            lexical_on_embedding_failure: false,
            embed_timeout_secs: None,
        }
    }
}

fn default_indexer_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Longest an HTTP provider can spend on one text: every attempt
    /// running to `timeout_secs` plus the backoff between them.
    pub fn retry_budget(&self) -> Duration {
        let attempts = Duration::from_secs(self.timeout_secs).saturating_mul(self.max_retries + 1);
        (1..=self.max_retries).fold(attempts, |total, attempt| {
            total.saturating_add(crate::embedding::retry_delay(attempt))
        })
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    Local,
    Remote,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    pub backend: VectorBackendKind,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub dimension: usize,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default)]
    pub remote: Option<RemoteVectorConfig>,
}

fn default_namespace() -> String {
    "default".to_string()
}
fn default_max_batch() -> usize {
    1000
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_health_check_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteVectorConfig {
    /// Index data-plane host, e.g. `https://my-index-abc123.svc.pinecone.io`.
    pub host: String,
    /// Environment variable that holds the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_api_key_env() -> String {
    "PINECONE_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub filesystem: BTreeMap<String, FilesystemSourceConfig>,
}

/// Polling cadence shared by every source type.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_poll_interval_secs() -> u64 {
    300
}
fn default_fetch_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(flatten)]
    pub poll: PollConfig,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.queue.capacity == 0 {
        anyhow::bail!("queue.capacity must be > 0");
    }

    if config.indexer.batch_size == 0 {
        anyhow::bail!("indexer.batch_size must be > 0");
    }
    if config.indexer.embed_timeout_secs == Some(0) {
        anyhow::bail!("indexer.embed_timeout_secs must be > 0");
    }

    // Validate vector
    if config.vector.dimension == 0 {
        anyhow::bail!("vector.dimension must be > 0");
    }
    if config.vector.max_batch == 0 {
        anyhow::bail!("vector.max_batch must be > 0");
    }
    if config.vector.namespace.trim().is_empty() {
        anyhow::bail!("vector.namespace must not be empty");
    }
    if config.vector.backend == VectorBackendKind::Remote && config.vector.remote.is_none() {
        anyhow::bail!("[vector.remote] must be set when vector.backend is 'remote'");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, or ollama.",
            other
        ),
    }
    if let Some(dims) = config.embedding.dims {
        if dims != config.vector.dimension {
            anyhow::bail!(
                "embedding.dims ({}) must match vector.dimension ({})",
                dims,
                config.vector.dimension
            );
        }
    }

    for (name, fs) in &config.sources.filesystem {
        if fs.poll.poll_interval_secs == 0 {
            anyhow::bail!("sources.filesystem.{}.poll_interval_secs must be > 0", name);
        }
    }

    Ok(())
}
