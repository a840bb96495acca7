//! The visual search facade.
//!
//! [`VisualSearch`] is what the host application talks to. It owns the model
//! and store behind [`LazyResource`] cells, sequences
//! read → preprocess → infer → persist → rank, and is the error boundary:
//! every public method reports failure as `None`, `false` or an empty `Vec`
//! and logs the cause.
//!
//! ```no_run
//! use lookalike::{BackendConfig, VisualSearch};
//!
//! # async fn run() {
//! let search = VisualSearch::builder()
//!     .backend_config(BackendConfig::redb("/data/lookalike_vectors.redb"))
//!     .build();
//!
//! if let Some(vector) = search.generate_embedding("/photos/car-42.jpg").await {
//!     search.store_embedding("car-42", &vector).await;
//!     let hits = search.find_similar(&vector, 5).await;
//!     println!("{hits:?}");
//! }
//! # }
//! ```

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use crate::codec::encode_vector;
use crate::lazy::{InitPhase, LazyResource};
use crate::model::{EmbeddingModel, ModelConfig, ModelLoader, OnnxModelLoader};
use crate::preprocess::preprocess_image;
use crate::ranker::{RankOutcome, Ranker, SimilarityMatch};
use crate::retry::{RetryConfig, execute_with_retry_async};
use crate::source::{FsImageSource, ImageSource};
use crate::store::{BackendConfig, StoreStats, VectorBackend};
use crate::{EmbedError, InitError, StoreError, VisionError};

/// Number of matches returned by [`VisualSearch::find_similar_default`].
pub const DEFAULT_TOP_K: usize = 5;

const MODEL_RESOURCE: &str = "model";
const STORE_RESOURCE: &str = "store";

/// Phases of both lazily created resources after [`VisualSearch::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub model: InitPhase,
    pub store: InitPhase,
}

impl InitReport {
    pub fn is_ready(&self) -> bool {
        self.model == InitPhase::Ready && self.store == InitPhase::Ready
    }
}

#[derive(Clone)]
enum StoreSetup {
    Config(BackendConfig),
    Backend(Arc<dyn VectorBackend>),
}

/// Builder for [`VisualSearch`]. Every collaborator has a default: the bundled
/// ONNX graph, a redb file in the working directory and the local filesystem.
pub struct VisualSearchBuilder {
    loader: Option<Arc<dyn ModelLoader>>,
    store: StoreSetup,
    source: Option<Arc<dyn ImageSource>>,
    retry: RetryConfig,
    input_size: Option<u32>,
    default_k: usize,
}

impl Default for VisualSearchBuilder {
    fn default() -> Self {
        Self {
            loader: None,
            store: StoreSetup::Config(BackendConfig::default()),
            source: None,
            retry: RetryConfig::default(),
            input_size: None,
            default_k: DEFAULT_TOP_K,
        }
    }
}

impl VisualSearchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model_loader<L: ModelLoader + 'static>(self, loader: L) -> Self {
        self.shared_model_loader(Arc::new(loader))
    }

    pub fn shared_model_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Shorthand for an [`OnnxModelLoader`] over `config`.
    pub fn model_config(self, config: ModelConfig) -> Self {
        self.model_loader(OnnxModelLoader::new(config))
    }

    pub fn backend_config(mut self, config: BackendConfig) -> Self {
        self.store = StoreSetup::Config(config);
        self
    }

    /// Uses an already constructed backend. `init` is still called on it.
    pub fn backend<B: VectorBackend + 'static>(self, backend: B) -> Self {
        self.shared_backend(Arc::new(backend))
    }

    pub fn shared_backend(mut self, backend: Arc<dyn VectorBackend>) -> Self {
        self.store = StoreSetup::Backend(backend);
        self
    }

    pub fn image_source<S: ImageSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Expected square input edge. A loaded model that disagrees fails
    /// initialization.
    pub fn input_size(mut self, size: u32) -> Self {
        self.input_size = Some(size);
        self
    }

    pub fn default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    pub fn build(self) -> VisualSearch {
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(OnnxModelLoader::new(ModelConfig::default())));
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(FsImageSource::new()));

        VisualSearch {
            loader,
            store_setup: self.store,
            source,
            retry: self.retry,
            input_size: self.input_size,
            default_k: self.default_k,
            model: Arc::new(LazyResource::new(MODEL_RESOURCE)),
            store: Arc::new(LazyResource::new(STORE_RESOURCE)),
        }
    }
}

/// On-device visual similarity search over stored embeddings.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. The model and
/// store are each created at most once, on first use.
pub struct VisualSearch {
    loader: Arc<dyn ModelLoader>,
    store_setup: StoreSetup,
    source: Arc<dyn ImageSource>,
    retry: RetryConfig,
    input_size: Option<u32>,
    default_k: usize,
    model: Arc<LazyResource<dyn EmbeddingModel>>,
    store: Arc<LazyResource<dyn VectorBackend>>,
}

impl fmt::Debug for VisualSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisualSearch")
            .field("model", &self.model.phase())
            .field("store", &self.store.phase())
            .field("default_k", &self.default_k)
            .finish()
    }
}

impl VisualSearch {
    pub fn builder() -> VisualSearchBuilder {
        VisualSearchBuilder::new()
    }

    pub fn model_phase(&self) -> InitPhase {
        self.model.phase()
    }

    pub fn store_phase(&self) -> InitPhase {
        self.store.phase()
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Brings up model and store concurrently. Idempotent; a resource that
    /// already failed stays failed.
    pub async fn init(&self) -> InitReport {
        let start = Instant::now();
        let (model, store) = tokio::join!(self.model(), self.store());
        let report = InitReport {
            model: self.model.phase(),
            store: self.store.phase(),
        };
        let elapsed_micros = start.elapsed().as_micros();
        if let (Ok(_), Ok(_)) = (&model, &store) {
            info!(elapsed_micros, "visual_search_ready");
        } else {
            warn!(
                model = %report.model,
                store = %report.store,
                elapsed_micros,
                "visual_search_degraded"
            );
        }
        report
    }

    /// Reads `image_ref` through the image source and embeds it.
    pub async fn generate_embedding(&self, image_ref: &str) -> Option<Vec<f32>> {
        let start = Instant::now();
        match self.try_generate(image_ref).await {
            Ok(vector) => {
                let elapsed_micros = start.elapsed().as_micros();
                info!(image_ref, dims = vector.len(), elapsed_micros, "embedding_generated");
                Some(vector)
            }
            Err(err) => {
                let elapsed_micros = start.elapsed().as_micros();
                warn!(image_ref, error = %err, elapsed_micros, "embedding_failed");
                None
            }
        }
    }

    /// Embeds already loaded encoded image bytes.
    pub async fn generate_embedding_from_bytes(&self, bytes: &[u8]) -> Option<Vec<f32>> {
        let start = Instant::now();
        match self.try_embed_bytes(bytes.to_vec()).await {
            Ok(vector) => {
                let elapsed_micros = start.elapsed().as_micros();
                info!(
                    byte_len = bytes.len(),
                    dims = vector.len(),
                    elapsed_micros,
                    "embedding_generated"
                );
                Some(vector)
            }
            Err(err) => {
                let elapsed_micros = start.elapsed().as_micros();
                warn!(byte_len = bytes.len(), error = %err, elapsed_micros, "embedding_failed");
                None
            }
        }
    }

    /// Upserts `vector` under `entity_id`. Empty vectors are rejected.
    pub async fn store_embedding(&self, entity_id: &str, vector: &[f32]) -> bool {
        let start = Instant::now();
        match self.try_store(entity_id, vector).await {
            Ok(()) => {
                let elapsed_micros = start.elapsed().as_micros();
                info!(entity_id, dims = vector.len(), elapsed_micros, "embedding_stored");
                true
            }
            Err(err) => {
                let elapsed_micros = start.elapsed().as_micros();
                warn!(entity_id, error = %err, elapsed_micros, "embedding_store_failed");
                false
            }
        }
    }

    /// Deletes the embedding for `entity_id`. Removing an absent id succeeds.
    pub async fn remove_embedding(&self, entity_id: &str) -> bool {
        let start = Instant::now();
        let result = async {
            let store = self.store().await?;
            let id = entity_id.to_string();
            spawn_blocking(move || store.delete(&id)).await??;
            Ok::<_, VisionError>(())
        }
        .await;

        let elapsed_micros = start.elapsed().as_micros();
        match result {
            Ok(()) => {
                info!(entity_id, elapsed_micros, "embedding_removed");
                true
            }
            Err(err) => {
                warn!(entity_id, error = %err, elapsed_micros, "embedding_remove_failed");
                false
            }
        }
    }

    /// Top `k` stored embeddings by cosine similarity to `vector`, best first.
    pub async fn find_similar(&self, vector: &[f32], k: usize) -> Vec<SimilarityMatch> {
        let start = Instant::now();
        if k == 0 {
            return Vec::new();
        }
        match self.try_rank(vector, k).await {
            Ok(outcome) => {
                let elapsed_micros = start.elapsed().as_micros();
                if outcome.skipped() > 0 {
                    debug!(
                        skipped_invalid = outcome.skipped_invalid,
                        skipped_mismatched = outcome.skipped_mismatched,
                        skipped_nan = outcome.skipped_nan,
                        query_dims = vector.len(),
                        "rows_skipped"
                    );
                }
                info!(k, hits = outcome.matches.len(), elapsed_micros, "similar_found");
                outcome.matches
            }
            Err(err) => {
                let elapsed_micros = start.elapsed().as_micros();
                warn!(k, error = %err, elapsed_micros, "similar_search_failed");
                Vec::new()
            }
        }
    }

    /// [`find_similar`](Self::find_similar) with the configured default `k`.
    pub async fn find_similar_default(&self, vector: &[f32]) -> Vec<SimilarityMatch> {
        self.find_similar(vector, self.default_k).await
    }

    /// Embeds `image_ref` and stores the result under `entity_id`. Nothing is
    /// written when embedding fails.
    pub async fn index_item(&self, entity_id: &str, image_ref: &str) -> bool {
        match self.generate_embedding(image_ref).await {
            Some(vector) => self.store_embedding(entity_id, &vector).await,
            None => false,
        }
    }

    /// Embeds `image_ref` and ranks the store against it.
    pub async fn find_similar_to_image(&self, image_ref: &str, k: usize) -> Vec<SimilarityMatch> {
        match self.generate_embedding(image_ref).await {
            Some(vector) => self.find_similar(&vector, k).await,
            None => Vec::new(),
        }
    }

    /// Row count and total stored bytes.
    pub async fn stats(&self) -> Option<StoreStats> {
        let result = async {
            let store = self.store().await?;
            Ok::<_, VisionError>(spawn_blocking(move || store.stats()).await??)
        }
        .await;
        match result {
            Ok(stats) => {
                debug!(count = stats.count, total_bytes = stats.total_bytes, "store_stats");
                Some(stats)
            }
            Err(err) => {
                warn!(error = %err, "store_stats_failed");
                None
            }
        }
    }

    async fn try_generate(&self, image_ref: &str) -> Result<Vec<f32>, VisionError> {
        let model = self.model().await?;
        let bytes = self.source.read(image_ref).await?;
        embed_on_blocking_pool(model, bytes).await
    }

    async fn try_embed_bytes(&self, bytes: Vec<u8>) -> Result<Vec<f32>, VisionError> {
        let model = self.model().await?;
        embed_on_blocking_pool(model, bytes).await
    }

    async fn try_store(&self, entity_id: &str, vector: &[f32]) -> Result<(), VisionError> {
        if vector.is_empty() {
            return Err(EmbedError::InvalidInput("refusing to store an empty vector".into()).into());
        }
        let store = self.store().await?;
        let id = entity_id.to_string();
        let raw = encode_vector(vector);
        spawn_blocking(move || store.put(&id, &raw)).await??;
        Ok(())
    }

    async fn try_rank(&self, vector: &[f32], k: usize) -> Result<RankOutcome, VisionError> {
        let store = self.store().await?;
        let query = vector.to_vec();
        let outcome = spawn_blocking(move || -> Result<RankOutcome, StoreError> {
            let mut ranker = Ranker::new(&query, k);
            store.scan(&mut |row| {
                ranker.push(row);
                Ok(())
            })?;
            Ok(ranker.finish())
        })
        .await??;
        Ok(outcome)
    }

    async fn model(&self) -> Result<Arc<dyn EmbeddingModel>, InitError> {
        let loader = Arc::clone(&self.loader);
        let retry = self.retry;
        let expected = self.input_size;
        self.model
            .get_or_init(move || load_model(loader, retry, expected))
            .await
    }

    async fn store(&self) -> Result<Arc<dyn VectorBackend>, InitError> {
        let setup = self.store_setup.clone();
        let retry = self.retry;
        self.store.get_or_init(move || open_store(setup, retry)).await
    }
}

async fn embed_on_blocking_pool(
    model: Arc<dyn EmbeddingModel>,
    bytes: Vec<u8>,
) -> Result<Vec<f32>, VisionError> {
    let vector = spawn_blocking(move || {
        let tensor = preprocess_image(&bytes, model.input_size())?;
        model.embed(&tensor)
    })
    .await??;
    Ok(vector)
}

async fn load_model(
    loader: Arc<dyn ModelLoader>,
    retry: RetryConfig,
    expected_input: Option<u32>,
) -> Result<Arc<dyn EmbeddingModel>, InitError> {
    let start = Instant::now();
    let outcome = execute_with_retry_async(
        &retry,
        |attempt| {
            let loader = Arc::clone(&loader);
            async move {
                if attempt > 0 {
                    debug!(attempt, "model_load_retry");
                }
                match spawn_blocking(move || loader.load()).await {
                    Ok(result) => result,
                    Err(join) => Err(EmbedError::Inference(format!(
                        "model loader task failed: {join}"
                    ))),
                }
            }
        },
        |err: &EmbedError| !err.is_permanent(),
    )
    .await;

    let attempts = outcome.attempts;
    let elapsed_micros = start.elapsed().as_micros();
    let model = match outcome.into_result() {
        Ok(model) => model,
        Err(err) => {
            warn!(error = %err, attempts, elapsed_micros, "model_load_failed");
            return Err(InitError {
                resource: MODEL_RESOURCE,
                reason: err.to_string(),
            });
        }
    };

    if let Some(expected) = expected_input.filter(|&size| size != model.input_size()) {
        warn!(
            model = model.name(),
            expected,
            actual = model.input_size(),
            "model_input_size_mismatch"
        );
        return Err(InitError {
            resource: MODEL_RESOURCE,
            reason: format!(
                "model expects {}px input, configured for {expected}px",
                model.input_size()
            ),
        });
    }

    info!(
        model = model.name(),
        input_size = model.input_size(),
        attempts,
        elapsed_micros,
        "model_loaded"
    );
    Ok(model)
}

async fn open_store(
    setup: StoreSetup,
    retry: RetryConfig,
) -> Result<Arc<dyn VectorBackend>, InitError> {
    let start = Instant::now();
    let outcome = execute_with_retry_async(
        &retry,
        |_attempt| {
            let setup = setup.clone();
            async move {
                let opened = spawn_blocking(move || open_store_blocking(setup)).await;
                match opened {
                    Ok(result) => result,
                    Err(join) => Err(StoreError::backend(format!("store task failed: {join}"))),
                }
            }
        },
        |err: &StoreError| !err.is_permanent(),
    )
    .await;

    let attempts = outcome.attempts;
    let elapsed_micros = start.elapsed().as_micros();
    match outcome.into_result() {
        Ok(store) => {
            info!(attempts, elapsed_micros, "store_opened");
            Ok(store)
        }
        Err(err) => {
            warn!(error = %err, attempts, elapsed_micros, "store_open_failed");
            Err(InitError {
                resource: STORE_RESOURCE,
                reason: err.to_string(),
            })
        }
    }
}

fn open_store_blocking(setup: StoreSetup) -> Result<Arc<dyn VectorBackend>, StoreError> {
    match setup {
        StoreSetup::Config(config) => Ok(Arc::from(config.build()?)),
        StoreSetup::Backend(backend) => {
            backend.init()?;
            Ok(backend)
        }
    }
}
