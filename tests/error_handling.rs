//! Degradation paths: every failure surfaces as `None`, `false` or empty.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{CountingLoader, fast_retry, solid_png};
use lookalike::{
    EmbedError, InMemoryBackend, InitPhase, MemoryImageSource, ModelConfig, StoreError,
    StoredRow, VectorBackend, VisualSearch,
};

#[tokio::test]
async fn missing_model_degrades_but_store_keeps_working() {
    let search = VisualSearch::builder()
        .model_config(ModelConfig {
            model_path: PathBuf::from("./no/such/feature_vector.onnx"),
            ..Default::default()
        })
        .backend(InMemoryBackend::new())
        .retry(fast_retry(2))
        .build();

    assert!(search.generate_embedding_from_bytes(&solid_png(4, 4, [1, 2, 3])).await.is_none());
    assert_eq!(search.model_phase(), InitPhase::Failed);
    assert!(!search.index_item("x", "whatever.png").await);

    assert!(search.store_embedding("carA", &[1.0, 0.0]).await);
    assert_eq!(search.find_similar(&[1.0, 0.0], 5).await.len(), 1);
    assert!(search.find_similar_to_image("query.png", 5).await.is_empty());

    let report = search.init().await;
    assert_eq!(report.model, InitPhase::Failed);
    assert_eq!(report.store, InitPhase::Ready);
}

#[tokio::test]
async fn undecodable_bytes_yield_none() {
    let search = VisualSearch::builder()
        .model_loader(CountingLoader::ok())
        .backend(InMemoryBackend::new())
        .build();
    assert!(search.generate_embedding_from_bytes(b"\x89PNG garbage").await.is_none());
    assert!(search.generate_embedding_from_bytes(&[]).await.is_none());
    // The model itself is fine.
    assert_eq!(search.model_phase(), InitPhase::Ready);
    assert!(search.generate_embedding_from_bytes(&solid_png(4, 4, [5, 5, 5])).await.is_some());
}

#[tokio::test]
async fn unknown_image_ref_yields_none_and_stores_nothing() {
    let images = MemoryImageSource::new();
    images.insert("known", solid_png(4, 4, [200, 10, 10]));
    let search = VisualSearch::builder()
        .model_loader(CountingLoader::ok())
        .backend(InMemoryBackend::new())
        .image_source(images)
        .build();

    assert!(search.generate_embedding("unknown").await.is_none());
    assert!(!search.index_item("item", "unknown").await);
    assert!(search.index_item("item", "known").await);
    assert_eq!(search.stats().await.unwrap().count, 1);
}

#[tokio::test]
async fn corrupt_and_mismatched_rows_are_skipped() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.put("ragged", &[0, 0, 128]).unwrap();
    backend.put("short", &lookalike::encode_vector(&[1.0])).unwrap();
    backend.put("good", &lookalike::encode_vector(&[1.0, 0.0])).unwrap();

    let search = VisualSearch::builder()
        .model_loader(CountingLoader::ok())
        .shared_backend(backend)
        .build();

    let hits = search.find_similar(&[1.0, 0.0], 5).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity_id, "good");
}

/// Backend whose `init` always fails, counting attempts.
struct BrokenBackend {
    inits: Arc<AtomicUsize>,
    permanent: bool,
}

impl VectorBackend for BrokenBackend {
    fn init(&self) -> Result<(), StoreError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.permanent {
            Err(StoreError::Unavailable("read-only media".into()))
        } else {
            Err(StoreError::backend("database locked"))
        }
    }

    fn put(&self, _: &str, _: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::backend("unreachable"))
    }

    fn delete(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::backend("unreachable"))
    }

    fn scan(
        &self,
        _: &mut dyn FnMut(StoredRow<'_>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        Err(StoreError::backend("unreachable"))
    }
}

#[tokio::test]
async fn broken_store_fails_closed_after_bounded_retries() {
    let inits = Arc::new(AtomicUsize::new(0));
    let search = VisualSearch::builder()
        .model_loader(CountingLoader::ok())
        .backend(BrokenBackend {
            inits: Arc::clone(&inits),
            permanent: false,
        })
        .retry(fast_retry(2))
        .build();

    assert!(!search.store_embedding("a", &[1.0]).await);
    assert!(!search.remove_embedding("a").await);
    assert!(search.find_similar(&[1.0], 5).await.is_empty());
    assert!(search.stats().await.is_none());
    assert_eq!(search.store_phase(), InitPhase::Failed);
    assert_eq!(inits.load(Ordering::SeqCst), 3);

    // Embedding does not depend on the store.
    assert!(search.generate_embedding_from_bytes(&solid_png(4, 4, [1, 1, 1])).await.is_some());
}

#[tokio::test]
async fn unavailable_store_is_not_retried() {
    let inits = Arc::new(AtomicUsize::new(0));
    let search = VisualSearch::builder()
        .model_loader(CountingLoader::ok())
        .backend(BrokenBackend {
            inits: Arc::clone(&inits),
            permanent: true,
        })
        .retry(fast_retry(5))
        .build();

    assert!(!search.store_embedding("a", &[1.0]).await);
    assert_eq!(inits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn permanent_model_errors_skip_retry() {
    let loader = CountingLoader::failing(EmbedError::ModelUnavailable("disabled".into()));
    let calls = loader.counter();
    let search = VisualSearch::builder()
        .model_loader(loader)
        .backend(InMemoryBackend::new())
        .retry(fast_retry(4))
        .build();

    assert!(search.generate_embedding_from_bytes(&solid_png(2, 2, [0, 0, 0])).await.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
