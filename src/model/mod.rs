//! Embedding model adapter.
//!
//! A [`ModelLoader`] knows how to build the model; an [`EmbeddingModel`] turns a
//! preprocessed [`ImageTensor`] into the backbone's penultimate feature vector.
//! Loading is expensive and happens once, driven by the orchestrator's
//! [`LazyResource`](crate::LazyResource); both traits are blocking and are
//! always called from `spawn_blocking`.

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbeddingModel;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::preprocess::{DEFAULT_INPUT_SIZE, ImageTensor};
use crate::EmbedError;

/// A loaded inference graph.
pub trait EmbeddingModel: Send + Sync {
    /// Friendly label used in logs.
    fn name(&self) -> &str;
    /// Square input edge the graph expects.
    fn input_size(&self) -> u32;
    /// Runs inference and returns the flattened feature vector.
    fn embed(&self, tensor: &ImageTensor) -> Result<Vec<f32>, EmbedError>;
}

/// Builds an [`EmbeddingModel`]. Called at most once per successful load.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn EmbeddingModel>, EmbedError>;
}

/// Where the bundled graph lives and how to run it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Label surfaced in logs.
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// Local path of the ONNX graph.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    /// Square input edge `S` of the `[1, S, S, 3]` tensor.
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    /// ONNX Runtime intra-op threads; `None` lets the runtime decide.
    #[serde(default)]
    pub intra_threads: Option<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            model_path: default_model_path(),
            input_size: default_input_size(),
            intra_threads: None,
        }
    }
}

fn default_model_name() -> String {
    "mobilenet_v2_feature_vector".to_string()
}

fn default_model_path() -> PathBuf {
    PathBuf::from("./models/mobilenet_v2/feature_vector.onnx")
}

fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

/// Loads the configured ONNX graph.
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    config: ModelConfig,
}

impl OnnxModelLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<Arc<dyn EmbeddingModel>, EmbedError> {
        if !self.config.model_path.exists() {
            return Err(EmbedError::ModelNotFound(
                self.config.model_path.display().to_string(),
            ));
        }

        #[cfg(feature = "onnx")]
        {
            let model = OnnxEmbeddingModel::load(&self.config)?;
            Ok(Arc::new(model))
        }
        #[cfg(not(feature = "onnx"))]
        {
            Err(EmbedError::ModelUnavailable(
                "onnx inference disabled at compile time".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = ModelConfig::default();
        assert_eq!(cfg.input_size, 224);
        assert_eq!(cfg.model_name, "mobilenet_v2_feature_vector");
        assert!(cfg.intra_threads.is_none());
    }

    #[test]
    fn config_partial_yaml_fills_defaults() {
        let cfg: ModelConfig = serde_yaml::from_str("input_size: 160\n").unwrap();
        assert_eq!(cfg.input_size, 160);
        assert_eq!(cfg.model_path, default_model_path());
    }

    #[test]
    fn missing_model_is_not_found() {
        let loader = OnnxModelLoader::new(ModelConfig {
            model_path: PathBuf::from("./missing/feature_vector.onnx"),
            ..Default::default()
        });
        match loader.load() {
            Err(EmbedError::ModelNotFound(path)) => assert!(path.contains("missing")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("load should fail"),
        }
    }

    #[test]
    fn garbage_model_file_fails_to_load() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not an onnx graph").unwrap();

        let loader = OnnxModelLoader::new(ModelConfig {
            model_path: file.path().to_path_buf(),
            ..Default::default()
        });
        let err = loader.load().err().expect("garbage graph must not load");
        assert!(!matches!(err, EmbedError::ModelNotFound(_)));
    }
}
