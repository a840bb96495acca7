use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use std::sync::Mutex;

use super::{EmbeddingModel, ModelConfig};
use crate::preprocess::ImageTensor;
use crate::EmbedError;

fn inference_err(e: impl std::fmt::Display) -> EmbedError {
    EmbedError::Inference(e.to_string())
}

/// ONNX Runtime session wrapping a feature-vector backbone.
///
/// The graph must take a single NHWC float input and emit the pooled
/// penultimate layer as its first output. `Session::run` needs exclusive
/// access, so concurrent callers serialize on the session mutex.
pub struct OnnxEmbeddingModel {
    name: String,
    input_size: u32,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl OnnxEmbeddingModel {
    pub fn load(config: &ModelConfig) -> Result<Self, EmbedError> {
        if config.input_size == 0 {
            return Err(EmbedError::InvalidInput("input size must be >= 1".into()));
        }

        let mut builder = Session::builder()
            .map_err(inference_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(inference_err)?;
        if let Some(threads) = config.intra_threads {
            builder = builder.with_intra_threads(threads).map_err(inference_err)?;
        }
        let session = builder
            .commit_from_file(&config.model_path)
            .map_err(|e| EmbedError::Inference(format!("failed to load model: {e}")))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| EmbedError::Inference("model declares no inputs".into()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| EmbedError::Inference("model declares no outputs".into()))?;

        Ok(Self {
            name: config.model_name.clone(),
            input_size: config.input_size,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }
}

impl EmbeddingModel for OnnxEmbeddingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn embed(&self, tensor: &ImageTensor) -> Result<Vec<f32>, EmbedError> {
        if tensor.size() != self.input_size {
            return Err(EmbedError::InvalidInput(format!(
                "tensor edge {} does not match model input {}",
                tensor.size(),
                self.input_size
            )));
        }

        let input = Tensor::from_array((tensor.shape(), tensor.as_slice().to_vec()))
            .map_err(inference_err)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbedError::Inference("poisoned session lock".into()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(inference_err)?;
        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            EmbedError::Inference(format!("model produced no '{}' output", self.output_name))
        })?;
        let (_shape, data) = output.try_extract_tensor::<f32>().map_err(inference_err)?;

        // [1, L] and [1, 1, 1, L] both flatten to the same feature vector.
        let vector = data.to_vec();
        if vector.is_empty() {
            return Err(EmbedError::Inference("model returned an empty output".into()));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(EmbedError::Inference(
                "embedding contains non-finite values".into(),
            ));
        }
        Ok(vector)
    }
}
