//! Run and service configuration
//!
//! Plain serde structs with defaults for every field, loadable from YAML.

use crate::graph::StandardId;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Supported model-serving providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LLMProvider {
    OpenAI,
    Ollama,
}

impl LLMProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI => "https://api.openai.com/v1",
            LLMProvider::Ollama => "http://localhost:11434",
        }
    }
}

/// Settings for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Embedding model identifier, also the embedding cache version key
    pub embedding_model_version: String,
    /// Parallel requests allowed against the verification service
    pub verification_concurrency: usize,
    /// Parallel requests allowed against the embedding service
    pub embedding_concurrency: usize,
    /// Source controls processed in parallel
    pub control_concurrency: usize,
    /// Minimum judgment confidence for an edge to be written
    pub acceptance_threshold: f64,
    /// Confidence change that counts as a materially different judgment
    pub supersede_tolerance: f64,
    /// Candidates per source control and target standard (k)
    pub candidate_count: usize,
    pub min_similarity: f32,
    pub target_standards: Vec<StandardId>,
    /// Consecutive verification outages before the run aborts
    pub systemic_failure_threshold: usize,
    /// Target standards with at least this many controls are prefiltered with
    /// the HNSW index. Off by default: HNSW graphs differ between builds, so
    /// candidate sets are not reproducible from one process to the next.
    pub ann_threshold: Option<usize>,
    pub verification_retry: RetryPolicy,
    pub embedding_retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            embedding_model_version: "nomic-embed-text".to_string(),
            verification_concurrency: 1,
            embedding_concurrency: 4,
            control_concurrency: 1,
            acceptance_threshold: 0.6,
            supersede_tolerance: 0.05,
            candidate_count: 5,
            min_similarity: 0.3,
            target_standards: Vec::new(),
            systemic_failure_threshold: 3,
            ann_threshold: None,
            verification_retry: RetryPolicy::default(),
            embedding_retry: RetryPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.embedding_model_version.trim().is_empty() {
            return invalid("embedding_model_version must not be empty");
        }
        if self.verification_concurrency == 0
            || self.embedding_concurrency == 0
            || self.control_concurrency == 0
        {
            return invalid("concurrency limits must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return invalid(format!(
                "acceptance_threshold {} is outside [0, 1]",
                self.acceptance_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.supersede_tolerance) {
            return invalid(format!(
                "supersede_tolerance {} is outside [0, 1]",
                self.supersede_tolerance
            ));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return invalid(format!("min_similarity {} is outside [0, 1]", self.min_similarity));
        }
        if self.candidate_count == 0 {
            return invalid("candidate_count must be at least 1");
        }
        if self.target_standards.is_empty() {
            return invalid("at least one target standard is required");
        }
        if self.systemic_failure_threshold == 0 {
            return invalid("systemic_failure_threshold must be at least 1");
        }
        Ok(())
    }
}

/// Connection settings for the embedding service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingServiceConfig {
    pub provider: LLMProvider,
    /// API Base URL (provider default when None)
    pub api_base_url: Option<String>,
    /// API Key (required for OpenAI)
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Texts longer than this many characters are embedded in chunks
    pub max_chunk_chars: usize,
    pub chunk_overlap: usize,
}

impl Default for EmbeddingServiceConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Ollama,
            api_base_url: None,
            api_key: None,
            timeout_secs: 30,
            max_chunk_chars: 2000,
            chunk_overlap: 200,
        }
    }
}

/// Connection settings for the verification language model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub provider: LLMProvider,
    /// Model name (e.g., "mistral", "llama3")
    pub model: String,
    /// Version label recorded on every edge the model produces
    pub model_version: String,
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Ollama,
            model: "mistral".to_string(),
            model_version: "latest".to_string(),
            api_base_url: None,
            api_key: None,
            timeout_secs: 120,
            temperature: 0.0,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// RocksDB directory for the graph and the embedding cache
    pub data_dir: PathBuf,
    pub embedding: EmbeddingServiceConfig,
    pub verifier: VerifierConfig,
    pub run: RunConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./controlmap_data"),
            embedding: EmbeddingServiceConfig::default(),
            verifier: VerifierConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Validate everything except the target list, which a caller may override
    pub fn validate_services(&self) -> ConfigResult<()> {
        if self.embedding.max_chunk_chars == 0 {
            return invalid("embedding.max_chunk_chars must be at least 1");
        }
        if self.embedding.chunk_overlap >= self.embedding.max_chunk_chars {
            return invalid("embedding.chunk_overlap must be smaller than max_chunk_chars");
        }
        if self.verifier.model.trim().is_empty() {
            return invalid("verifier.model must not be empty");
        }
        for (name, provider, key) in [
            ("embedding", self.embedding.provider, &self.embedding.api_key),
            ("verifier", self.verifier.provider, &self.verifier.api_key),
        ] {
            if provider == LLMProvider::OpenAI && key.is_none() {
                return invalid(format!("{} provider OpenAI requires api_key", name));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.validate_services()?;
        self.run.validate()
    }
}

fn invalid<T>(message: impl Into<String>) -> ConfigResult<T> {
    Err(ConfigError::Invalid(message.into()))
}
