//! kgeval Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with defaults matching the JacRED experiment setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::dataset::FewShotCriteria;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Dataset location and document selection
    pub data: DataConfig,

    /// Extraction pipeline settings
    pub extraction: ExtractionConfig,

    /// Alignment and scoring settings
    pub evaluation: EvaluationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply every variable `lookup` reports as set, whatever its value
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Data
        if let Some(path) = lookup("KGEVAL_DATASET_PATH") {
            self.data.dataset_path = PathBuf::from(path);
        }
        if let Some(n) = lookup("KGEVAL_NUM_DOCS") {
            self.data.num_docs = parse_var("KGEVAL_NUM_DOCS", n)?;
        }

        // Extraction
        if let Some(model) = lookup("KGEVAL_MODEL") {
            self.extraction.model = model;
        }
        if let Some(t) = lookup("KGEVAL_TEMPERATURE") {
            self.extraction.temperature = parse_var("KGEVAL_TEMPERATURE", t)?;
        }
        if let Some(n) = lookup("KGEVAL_MAX_ATTEMPTS") {
            self.extraction.max_attempts = parse_var("KGEVAL_MAX_ATTEMPTS", n)?;
        }
        if let Some(n) = lookup("KGEVAL_VERIFY_BATCH_SIZE") {
            self.extraction.verify_batch_size = parse_var("KGEVAL_VERIFY_BATCH_SIZE", n)?;
        }

        // Evaluation
        if let Some(n) = lookup("KGEVAL_MIN_SUBSTRING_OVERLAP") {
            self.evaluation.min_substring_overlap = parse_var("KGEVAL_MIN_SUBSTRING_OVERLAP", n)?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("LOG_JSON") {
            self.logging.json_format = parse_var("LOG_JSON", json)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extraction.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "extraction.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        if self.extraction.verify_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "extraction.verify_batch_size".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding `train.json`, `dev.json`, `test.json` and `meta/`
    pub dataset_path: PathBuf,

    /// Number of dev documents to evaluate
    pub num_docs: usize,

    /// Bounds for picking the few-shot demonstration document
    pub few_shot: FewShotCriteria,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("/tmp/JacRED/"),
            num_docs: 10,
            few_shot: FewShotCriteria::default(),
        }
    }
}

/// Extraction pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Model name passed to the generation service
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Total attempts per generation call (first try included)
    pub max_attempts: u32,

    /// Delay before the second attempt, doubled after each failure
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay between attempts
    pub max_backoff_ms: u64,

    /// Candidates per verification call
    pub verify_batch_size: usize,

    /// Entity type tags accepted by the type filter
    pub valid_entity_types: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: "gemini-3-flash-preview".to_string(),
            temperature: 0.2,
            max_attempts: 3,
            initial_backoff_ms: 2000,
            max_backoff_ms: 30_000,
            verify_batch_size: 10,
            valid_entity_types: ["PER", "ORG", "LOC", "ART", "DAT", "TIM", "MON", "%"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Alignment and scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Minimum overlap (in characters) for the substring alignment pass
    pub min_substring_overlap: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            min_substring_overlap: 2,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
