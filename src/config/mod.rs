// Configuration management module
// Handles the TOML configuration surface for the pipeline


use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 256;

/// How close two selection weights must be to summing to 1.0.
const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub clustering: ClusteringConfig,
    pub selection: SelectionConfig,
    pub classifier: ClassifierConfig,
    pub pipeline: RunConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Which embedding backend the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    /// Deterministic local feature-hashing backend, no network access.
    #[default]
    Hashing,
    /// Remote embedding server speaking the batch embed API.
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackendKind,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub dimension: u32,
    pub batch_size: u32,
    pub title_weight: f32,
    pub description_weight: f32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::Hashing,
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 32,
            title_weight: 0.7,
            description_weight: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Maximum cosine distance between members of one cluster.
    pub epsilon: f32,
    /// Minimum neighborhood size (including the point itself) for a core point.
    pub min_samples: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.3,
            min_samples: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionConfig {
    pub information_weight: f32,
    pub source_weight: f32,
    /// Combined title+description length at which the information score saturates.
    pub max_reference_length: usize,
    /// Trust score applied to sources outside the trusted set.
    pub default_trust: f32,
    pub trusted_sources: Vec<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            information_weight: 0.5,
            source_weight: 0.5,
            max_reference_length: 500,
            default_trust: 0.3,
            trusted_sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    /// Bound on in-flight classification calls, independent of embedding throughput.
    pub concurrency: usize,
    pub timeout_seconds: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 8090,
            retry_attempts: 3,
            backoff_base_ms: 1000,
            concurrency: 4,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of raw records fetched per run.
    pub fetch_limit: u32,
    /// Wall-clock budget for a whole run in seconds; 0 disables the budget.
    pub run_budget_seconds: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 1000,
            run_budget_seconds: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid embedding dimension: {0} (must be between 16 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Blend weights {0} + {1} must sum to 1.0")]
    InvalidBlendWeights(f32, f32),
    #[error("Selection weights {0} + {1} must sum to 1.0")]
    InvalidSelectionWeights(f32, f32),
    #[error("Invalid epsilon: {0} (must be greater than 0 and less than 1)")]
    InvalidEpsilon(f32),
    #[error("Invalid min samples: {0} (must be at least 1)")]
    InvalidMinSamples(usize),
    #[error("Invalid max reference length: {0} (must be at least 1)")]
    InvalidMaxReferenceLength(usize),
    #[error("Invalid default trust: {0} (must be between 0 and 1)")]
    InvalidDefaultTrust(f32),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid classification concurrency: {0} (must be between 1 and 64)")]
    InvalidConcurrency(usize),
    #[error("Invalid fetch limit: {0} (must be at least 1)")]
    InvalidFetchLimit(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration directory under the platform config root.
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("news-dedup"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Path of the SQLite record store.
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("news.db")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.clustering.validate()?;
        self.selection.validate()?;
        self.classifier.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }

    /// Trusted sources as a lookup set for the selector.
    #[inline]
    pub fn trusted_source_set(&self) -> HashSet<String> {
        self.selection.trusted_sources.iter().cloned().collect()
    }
}

fn validate_endpoint(protocol: &str, host: &str, port: u16) -> Result<Url, ConfigError> {
    if protocol != "http" && protocol != "https" {
        return Err(ConfigError::InvalidProtocol(protocol.to_string()));
    }
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }

    let url_str = format!("{}://{}:{}", protocol, host, port);
    Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(16..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        let sum = self.title_weight + self.description_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::InvalidBlendWeights(
                self.title_weight,
                self.description_weight,
            ));
        }

        Ok(())
    }

    pub fn url(&self) -> Result<Url, ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epsilon <= 0.0 || self.epsilon >= 1.0 {
            return Err(ConfigError::InvalidEpsilon(self.epsilon));
        }
        if self.min_samples == 0 {
            return Err(ConfigError::InvalidMinSamples(self.min_samples));
        }
        Ok(())
    }
}

impl SelectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.information_weight + self.source_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::InvalidSelectionWeights(
                self.information_weight,
                self.source_weight,
            ));
        }
        if self.max_reference_length == 0 {
            return Err(ConfigError::InvalidMaxReferenceLength(
                self.max_reference_length,
            ));
        }
        if !(0.0..=1.0).contains(&self.default_trust) {
            return Err(ConfigError::InvalidDefaultTrust(self.default_trust));
        }
        Ok(())
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)?;

        if self.retry_attempts == 0 || self.retry_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::InvalidConcurrency(self.concurrency));
        }
        Ok(())
    }

    pub fn url(&self) -> Result<Url, ConfigError> {
        validate_endpoint(&self.protocol, &self.host, self.port)
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_limit == 0 {
            return Err(ConfigError::InvalidFetchLimit(self.fetch_limit));
        }
        Ok(())
    }
}
