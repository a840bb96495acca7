use std::io;
use thiserror::Error;

/// Errors raised while turning an image into an embedding.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The ONNX graph could not be located on disk.
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    /// Inference support is not compiled in, or the model is in a failed state.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    /// The encoded image bytes could not be decoded.
    #[error("image decode failure: {0}")]
    Decode(String),
    /// ONNX Runtime or output-shape errors.
    #[error("inference failure: {0}")]
    Inference(String),
    /// Low-level IO failures while reading the image reference.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Caller handed in something unusable (empty reference, zero input size).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl EmbedError {
    /// Errors that will not go away by trying again.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            EmbedError::ModelNotFound(_) | EmbedError::ModelUnavailable(_)
        )
    }
}

impl Clone for EmbedError {
    fn clone(&self) -> Self {
        match self {
            EmbedError::ModelNotFound(s) => EmbedError::ModelNotFound(s.clone()),
            EmbedError::ModelUnavailable(s) => EmbedError::ModelUnavailable(s.clone()),
            EmbedError::Decode(s) => EmbedError::Decode(s.clone()),
            EmbedError::Inference(s) => EmbedError::Inference(s.clone()),
            EmbedError::Io(e) => EmbedError::Io(io::Error::new(e.kind(), e.to_string())),
            EmbedError::InvalidInput(s) => EmbedError::InvalidInput(s.clone()),
        }
    }
}

/// Errors raised by a [`VectorBackend`](crate::VectorBackend).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn backend(msg: impl ToString) -> Self {
        StoreError::Backend(msg.to_string())
    }

    /// The backend cannot exist in this build; retrying is pointless.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Terminal initialization failure of a lazily created resource.
#[derive(Debug, Clone, Error)]
#[error("{resource} failed to initialize: {reason}")]
pub struct InitError {
    pub resource: &'static str,
    pub reason: String,
}

/// Umbrella error for the internal pipeline. The public facade never returns it;
/// it is logged and collapsed into an empty result instead.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for VisionError {
    fn from(e: tokio::task::JoinError) -> Self {
        VisionError::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_model_not_found() {
        let err = EmbedError::ModelNotFound("/path/to/model.onnx".into());
        assert!(err.to_string().contains("model file not found"));
        assert!(err.to_string().contains("/path/to/model.onnx"));
    }

    #[test]
    fn error_decode() {
        let err = EmbedError::Decode("bad jpeg marker".into());
        assert!(err.to_string().contains("image decode failure"));
    }

    #[test]
    fn permanent_errors() {
        assert!(EmbedError::ModelNotFound("m".into()).is_permanent());
        assert!(EmbedError::ModelUnavailable("m".into()).is_permanent());
        assert!(!EmbedError::Inference("e".into()).is_permanent());
        assert!(!EmbedError::Decode("e".into()).is_permanent());
    }

    #[test]
    fn error_clone_keeps_io_kind() {
        let err: EmbedError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        match err.clone() {
            EmbedError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected clone: {other:?}"),
        }
    }

    #[test]
    fn store_unavailable_is_permanent() {
        assert!(StoreError::Unavailable("off".into()).is_permanent());
        assert!(!StoreError::backend("locked").is_permanent());
    }

    #[test]
    fn init_error_display() {
        let err = InitError {
            resource: "model",
            reason: "missing".into(),
        };
        assert_eq!(err.to_string(), "model failed to initialize: missing");
    }

    #[test]
    fn vision_error_from_layers() {
        let err: VisionError = StoreError::backend("disk full").into();
        assert!(err.to_string().contains("disk full"));
        let err: VisionError = EmbedError::Decode("x".into()).into();
        assert!(matches!(err, VisionError::Embed(EmbedError::Decode(_))));
    }
}
