//! Lookalike: on-device visual similarity search.
//!
//! Give it a photo, get back a fixed-length feature vector from a pretrained
//! vision backbone. Store those vectors keyed by your item ids, then ask
//! "which items look like this one?" and get a cosine-ranked list back.
//!
//! Everything runs locally. There is no index structure: every query scans
//! every stored vector, which is plenty for collections in the thousands.
//!
//! ## Pieces
//!
//! - [`preprocess`] decodes PNG/JPEG/WebP into an `[S, S, 3]` tensor in `[-1, 1]`.
//! - [`model`] wraps the ONNX backbone (feature `onnx`).
//! - [`store`] keeps `entity_id -> raw f32 blob` in redb (feature `embedded`) or memory.
//! - [`ranker`] scores the scan and keeps the top `k`.
//! - [`VisualSearch`] ties it together and never returns an error. Failures
//!   come back as `None`, `false` or an empty list, with the cause in the logs.
//!
//! The model and the store are opened lazily, once, on first use. If the model
//! file is missing, embedding quietly returns nothing while storage keeps working.
//!
//! ## Quick example
//!
//! ```no_run
//! use lookalike::VisionConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let search = VisionConfig::default().builder().build();
//!
//!     search.index_item("car-1", "/photos/car-1.jpg").await;
//!     search.index_item("car-2", "/photos/car-2.jpg").await;
//!
//!     for hit in search.find_similar_to_image("/photos/query.jpg", 5).await {
//!         println!("{} {:.3}", hit.entity_id, hit.similarity);
//!     }
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod lazy;
pub mod model;
pub mod preprocess;
pub mod ranker;
pub mod retry;
pub mod search;
pub mod source;
pub mod store;

pub use crate::codec::{decode_vector, encode_vector};
pub use crate::config::{ConfigLoadError, SearchConfig, VisionConfig};
pub use crate::error::{EmbedError, InitError, StoreError, VisionError};
pub use crate::lazy::{InitPhase, LazyResource};
pub use crate::model::{EmbeddingModel, ModelConfig, ModelLoader, OnnxModelLoader};
pub use crate::preprocess::{DEFAULT_INPUT_SIZE, ImageTensor, preprocess_image};
pub use crate::ranker::{RankOutcome, SimilarityMatch, cosine_similarity, rank};
pub use crate::retry::{RetryConfig, RetryResult};
pub use crate::search::{DEFAULT_TOP_K, InitReport, VisualSearch, VisualSearchBuilder};
pub use crate::source::{FsImageSource, ImageSource, MemoryImageSource};
pub use crate::store::{BackendConfig, InMemoryBackend, StoreStats, StoredRow, VectorBackend};

#[cfg(feature = "embedded")]
pub use crate::store::RedbBackend;

#[cfg(feature = "onnx")]
pub use crate::model::OnnxEmbeddingModel;
