//! TOML configuration.
//!
//! Every section is optional. A service started without a config file
//! behaves like the stock deployment: local MiniLM embeddings, the
//! `text_docs` collection, five results per query, listening on port 8000.
//!
//! ```toml
//! [db]
//! path = "./data/docsearch.sqlite"
//! collection = "text_docs"
//!
//! [embedding]
//! provider = "local"          # local | openai | ollama
//! model = "all-minilm-l6-v2"
//!
//! [server]
//! bind = "0.0.0.0:8000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Logical collection every document is filed under.
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            collection: default_collection(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/docsearch.sqlite")
}
fn default_collection() -> String {
    "text_docs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

// MiniLM truncates its input at 256 word pieces; 200 approximate tokens
// keeps each chunk inside the window.
fn default_max_tokens() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of documents returned when a query does not ask for a count.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on `n_results` accepted from clients.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_top_k() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum size of a multipart upload request body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}

/// Load configuration from `path`, or use defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            parse_config(&content)?
        }
        None => Config::default(),
    };

    validate(&config)?;
    Ok(config)
}

/// Parse a TOML document into a [`Config`] without validating it.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

pub fn validate(config: &Config) -> Result<()> {
    if config.db.collection.trim().is_empty() {
        anyhow::bail!("db.collection must not be empty");
    }

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.top_k > config.retrieval.max_top_k {
        anyhow::bail!(
            "retrieval.top_k ({}) must not exceed retrieval.max_top_k ({})",
            config.retrieval.top_k,
            config.retrieval.max_top_k
        );
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let cfg = parse_config("").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.db.collection, "text_docs");
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.embedding.provider, "local");
        assert_eq!(cfg.server.bind, "0.0.0.0:8000");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let cfg = parse_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[retrieval]
top_k = 3
"#,
        )
        .unwrap();
        assert_eq!(cfg.db.path, PathBuf::from("/tmp/x.sqlite"));
        assert_eq!(cfg.db.collection, "text_docs");
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.retrieval.max_top_k, 100);
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        let cfg = parse_config("[embedding]\nprovider = \"openai\"\n").unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let cfg = parse_config(
            "[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\n",
        )
        .unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let cfg = parse_config("[embedding]\nprovider = \"magic\"\n").unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_top_k_bounds_checked() {
        let cfg = parse_config("[retrieval]\ntop_k = 0\n").unwrap();
        assert!(validate(&cfg).is_err());

        let cfg = parse_config("[retrieval]\ntop_k = 20\nmax_top_k = 10\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let cfg = parse_config("[chunking]\nmax_tokens = 0\n").unwrap();
        assert!(validate(&cfg).is_err());
    }
}
