//! YAML configuration for lookalike.
//!
//! Every section is optional and falls back to its defaults.
//!
//! ```yaml
//! version: "1.0"
//!
//! model:
//!   model_name: "mobilenet_v2_feature_vector"
//!   model_path: "./models/mobilenet_v2/feature_vector.onnx"
//!   input_size: 224
//!   intra_threads: 2
//!
//! store:
//!   backend: "redb"
//!   path: "./lookalike_vectors.redb"
//!
//! search:
//!   default_k: 5
//!   image_root: "/photos"
//!
//! retry:
//!   max_retries: 2
//!   initial_backoff: 200   # milliseconds
//!   max_backoff: 2000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ModelConfig;
use crate::retry::RetryConfig;
use crate::search::{DEFAULT_TOP_K, VisualSearchBuilder};
use crate::source::FsImageSource;
use crate::store::BackendConfig;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Configuration format version
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub store: BackendConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            model: ModelConfig::default(),
            store: BackendConfig::default(),
            search: SearchConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl VisionConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: VisionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        validate_model(&self.model)?;
        validate_store(&self.store)?;
        self.search.validate()?;
        validate_retry(&self.retry)?;
        Ok(())
    }

    /// A [`VisualSearchBuilder`] wired from this configuration.
    pub fn builder(&self) -> VisualSearchBuilder {
        let source = match &self.search.image_root {
            Some(root) => FsImageSource::with_root(root),
            None => FsImageSource::new(),
        };
        VisualSearchBuilder::new()
            .model_config(self.model.clone())
            .backend_config(self.store.clone())
            .image_source(source)
            .retry(self.retry)
            .default_k(self.search.default_k)
    }
}

/// Query-side knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Matches returned when the caller does not choose `k`.
    #[serde(default = "default_top_k")]
    pub default_k: usize,
    /// Base directory for relative image references.
    #[serde(default)]
    pub image_root: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_top_k(),
            image_root: None,
        }
    }
}

impl SearchConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.default_k == 0 {
            return Err(ConfigLoadError::Validation(
                "search.default_k must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

fn validate_model(model: &ModelConfig) -> Result<(), ConfigLoadError> {
    if model.input_size == 0 {
        return Err(ConfigLoadError::Validation(
            "model.input_size must be >= 1".into(),
        ));
    }
    if model.model_path.as_os_str().is_empty() {
        return Err(ConfigLoadError::Validation(
            "model.model_path must not be empty".into(),
        ));
    }
    if model.intra_threads == Some(0) {
        return Err(ConfigLoadError::Validation(
            "model.intra_threads must be >= 1 when set".into(),
        ));
    }
    Ok(())
}

fn validate_store(store: &BackendConfig) -> Result<(), ConfigLoadError> {
    if let BackendConfig::Redb { path } = store
        && path.as_os_str().is_empty()
    {
        return Err(ConfigLoadError::Validation(
            "store.path must not be empty".into(),
        ));
    }
    Ok(())
}

fn validate_retry(retry: &RetryConfig) -> Result<(), ConfigLoadError> {
    if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
        return Err(ConfigLoadError::Validation(
            "retry.multiplier must be >= 1.0".into(),
        ));
    }
    if retry.initial_backoff > retry.max_backoff {
        return Err(ConfigLoadError::Validation(
            "retry.initial_backoff must not exceed retry.max_backoff".into(),
        ));
    }
    Ok(())
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}
