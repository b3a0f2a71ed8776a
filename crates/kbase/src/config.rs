//! Configuration parsing and validation.
//!
//! kbase is configured via a TOML file (default: `config/kb.toml`).
//! Only `[db]` is required; every other section falls back to defaults.
//!
//! # Example Configuration
//!
//! ```toml
//! [db]
//! path = "./data/kb.sqlite"
//!
//! [chunking]
//! max_len = 300
//! overlap = 50
//!
//! [retrieval]
//! top_k = 5
//!
//! [embedding]
//! base_url = "https://api.openai.com/v1"
//! model = "text-embedding-ada-002"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [generation]
//! model = "gpt-4o-mini"
//!
//! [import]
//! include_globs = ["**/*.md", "**/*.txt", "**/*.docx"]
//! ```
//!
//! API keys are resolved once at load time: an explicit `api_key` wins,
//! otherwise the environment variable named by `api_key_env` is read.

use anyhow::Result;
use kbase_core::KbError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk length in characters.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
    /// Characters carried between sentence-split sub-chunks.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_len: default_max_len(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_len() -> usize {
    300
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector size; derived from the model name when omitted.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_embedding_model(),
            dims: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    /// Configured dimension, else the known size for the model, else 1536.
    pub fn dimension(&self) -> usize {
        self.dims.unwrap_or_else(|| known_model_dims(&self.model))
    }
}

/// Output sizes of well-known OpenAI embedding models.
pub fn known_model_dims(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        "text-embedding-ada-002" | "text-embedding-3-small" => 1536,
        _ => 1536,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_chat_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_generation_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.docx".to_string(),
    ]
}

/// A backend credential after resolution.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Key(String),
    /// Nothing configured; names the variable that was consulted.
    Missing { env_var: String },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Key(_) => write!(f, "Key(<redacted>)"),
            Credential::Missing { env_var } => write!(f, "Missing {{ env_var: {:?} }}", env_var),
        }
    }
}

impl Credential {
    fn resolve(explicit: Option<&str>, env_var: &str) -> Self {
        let from_env = || std::env::var(env_var).ok();
        match explicit
            .map(str::to_string)
            .or_else(from_env)
            .filter(|k| !k.trim().is_empty())
        {
            Some(k) => Credential::Key(k),
            None => Credential::Missing {
                env_var: env_var.to_string(),
            },
        }
    }
}

/// A validated configuration with credentials resolved.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: Config,
    pub embedding_key: Credential,
    pub generation_key: Credential,
}

/// Parse and validate configuration text.
pub fn parse_config(text: &str) -> Result<Config> {
    let config: Config = toml::from_str(text)
        .map_err(|e| KbError::InvalidConfig(format!("failed to parse config file: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let invalid = |msg: String| -> anyhow::Error { KbError::InvalidConfig(msg).into() };

    if config.chunking.max_len == 0 {
        return Err(invalid("chunking.max_len must be > 0".into()));
    }
    if config.chunking.overlap >= config.chunking.max_len {
        return Err(invalid(format!(
            "chunking.overlap ({}) must be smaller than chunking.max_len ({})",
            config.chunking.overlap, config.chunking.max_len
        )));
    }
    if config.retrieval.top_k < 1 {
        return Err(invalid("retrieval.top_k must be >= 1".into()));
    }
    if config.embedding.batch_size == 0 {
        return Err(invalid("embedding.batch_size must be > 0".into()));
    }
    if config.embedding.dims == Some(0) {
        return Err(invalid("embedding.dims must be > 0".into()));
    }
    Ok(())
}

/// Read, parse, and validate the config file, then resolve credentials.
pub fn load_config(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        KbError::InvalidConfig(format!(
            "failed to read config file {}: {} (run `kb init` to create one)",
            path.display(),
            e
        ))
    })?;
    let config = parse_config(&content)?;

    let embedding_key =
        Credential::resolve(config.embedding.api_key.as_deref(), &config.embedding.api_key_env);
    let generation_key = Credential::resolve(
        config.generation.api_key.as_deref(),
        &config.generation.api_key_env,
    );

    Ok(Settings {
        config,
        embedding_key,
        generation_key,
    })
}

/// Template written by `kb init` when no config file exists.
pub const DEFAULT_CONFIG: &str = r#"[db]
path = "./data/kb.sqlite"

[chunking]
max_len = 300
overlap = 50

[retrieval]
top_k = 5

[embedding]
base_url = "https://api.openai.com/v1"
model = "text-embedding-ada-002"
api_key_env = "OPENAI_API_KEY"
batch_size = 100

[generation]
base_url = "https://api.openai.com/v1"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"

[import]
include_globs = ["**/*.txt", "**/*.md", "**/*.docx"]
exclude_globs = []
"#;

/// Write [`DEFAULT_CONFIG`] to `path` unless a file is already there.
/// Returns whether a file was created.
pub fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    Ok(true)
}
