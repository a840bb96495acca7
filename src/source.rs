//! Resolution of opaque image references to encoded bytes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::EmbedError;

const FILE_SCHEME: &str = "file://";

/// Turns an `image_ref` supplied by the host into encoded image bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn read(&self, image_ref: &str) -> Result<Vec<u8>, EmbedError>;
}

/// Reads plain paths and `file://` URIs from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsImageSource {
    root: Option<PathBuf>,
}

impl FsImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative references against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn resolve(&self, image_ref: &str) -> Result<PathBuf, EmbedError> {
        let trimmed = image_ref.trim();
        let stripped = trimmed.strip_prefix(FILE_SCHEME).unwrap_or(trimmed);
        if stripped.is_empty() {
            return Err(EmbedError::InvalidInput("empty image reference".into()));
        }
        let path = PathBuf::from(stripped);
        Ok(match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        })
    }
}

#[async_trait]
impl ImageSource for FsImageSource {
    async fn read(&self, image_ref: &str) -> Result<Vec<u8>, EmbedError> {
        let path = self.resolve(image_ref)?;
        Ok(tokio::fs::read(&path).await?)
    }
}

/// Keeps encoded images in memory, keyed by reference. Handy for hosts that
/// already hold photo bytes and for tests.
#[derive(Debug, Default)]
pub struct MemoryImageSource {
    images: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, image_ref: impl Into<String>, bytes: Vec<u8>) {
        self.images
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(image_ref.into(), bytes);
    }
}

#[async_trait]
impl ImageSource for MemoryImageSource {
    async fn read(&self, image_ref: &str) -> Result<Vec<u8>, EmbedError> {
        let guard = self
            .images
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(image_ref).cloned().ok_or_else(|| {
            EmbedError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no image registered for {image_ref}"),
            ))
        })
    }
}
