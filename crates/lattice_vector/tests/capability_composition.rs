//! Capability wiring through the public API: a backend registered with
//! an empty handle set only serves the required contract, and the
//! fully-wired in-process store serves everything.

use async_trait::async_trait;
use std::sync::Arc;

use lattice_core::{ErrorKind, Result};
use lattice_vector::{
    BackendHandles, Capability, Condition, DeleteOptions, FetchOptions, Filter, IndexKind,
    MemoryBackendConfig, MemoryVectorBackend, Metric, QueryMatch, QueryRequest, SparseVector,
    UpsertOptions, Vector, VectorBackend, VectorStore,
};

/// A backend that implements only the required operations, delegating
/// storage to the in-process map.
struct MinimalBackend {
    inner: MemoryVectorBackend,
}

impl MinimalBackend {
    fn new(dimension: usize) -> Self {
        Self {
            inner: MemoryVectorBackend::new(MemoryBackendConfig::new(dimension)),
        }
    }
}

#[async_trait]
impl VectorBackend for MinimalBackend {
    async fn upsert(&self, vectors: Vec<Vector>, opts: &UpsertOptions) -> Result<()> {
        self.inner.upsert(vectors, opts).await
    }

    async fn query(&self, req: &QueryRequest) -> Result<Vec<QueryMatch>> {
        self.inner.query(req).await
    }

    async fn delete(&self, ids: &[String], opts: &DeleteOptions) -> Result<()> {
        self.inner.delete(ids, opts).await
    }

    async fn fetch(&self, ids: &[String], opts: &FetchOptions) -> Result<Vec<Vector>> {
        self.inner.fetch(ids, opts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn metric(&self) -> Metric {
        self.inner.metric()
    }
}

fn minimal_store() -> VectorStore {
    VectorStore::new(Arc::new(MinimalBackend::new(2)), BackendHandles::default())
}

#[tokio::test]
async fn minimal_backend_serves_required_operations() {
    let store = minimal_store();
    store
        .upsert(
            vec![Vector::new("a", vec![1.0, 0.0]).with_metadata("k", serde_json::json!("v"))],
            &UpsertOptions::default(),
        )
        .await
        .unwrap();

    let hits = store.query(&QueryRequest::new(vec![1.0, 0.0])).await.unwrap();
    assert_eq!(hits.len(), 1);

    let fetched = store
        .fetch(&["a".to_string()], &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(fetched[0].values, vec![1.0, 0.0]);

    store
        .delete(&["a".to_string()], &DeleteOptions::default())
        .await
        .unwrap();
    assert!(store
        .query(&QueryRequest::new(vec![1.0, 0.0]))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unwired_capabilities_surface_as_feature_not_supported() {
    let store = minimal_store();
    assert!(store.capabilities().is_empty());

    let err = store.stats().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.detail("capability"), Some("stats"));

    let err = store.list_namespaces().await.unwrap_err();
    assert_eq!(err.detail("capability"), Some("namespaces"));

    let err = store
        .upsert_batch(vec![], &UpsertOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.detail("capability"), Some("batch_upsert"));

    let err = store
        .hybrid_query(&lattice_vector::HybridRequest::new(
            vec![1.0, 0.0],
            SparseVector {
                indices: vec![0],
                values: vec![1.0],
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(err.detail("capability"), Some("hybrid_search"));

    let err = store
        .create_index(&IndexKind::Hnsw {
            m: 16,
            ef_construction: 64,
        })
        .await
        .unwrap_err();
    assert_eq!(err.detail("capability"), Some("index_lifecycle"));

    // Filtered queries need the filtered_query flag.
    let err = store
        .query(
            &QueryRequest::new(vec![1.0, 0.0])
                .filter(Filter::new().must(Condition::eq("k", "v"))),
        )
        .await
        .unwrap_err();
    assert_eq!(err.detail("capability"), Some("filtered_query"));

    // An empty filter is not a filter.
    store
        .query(&QueryRequest::new(vec![1.0, 0.0]).filter(Filter::new()))
        .await
        .unwrap();
}

#[tokio::test]
async fn fully_wired_store_serves_optional_capabilities() {
    let store = VectorStore::in_memory(MemoryBackendConfig::new(2));
    for capability in [
        Capability::FilteredQuery,
        Capability::BatchUpsert,
        Capability::Namespaces,
        Capability::HybridSearch,
        Capability::Stats,
    ] {
        assert!(store.supports(capability), "missing {capability}");
    }

    store
        .upsert(
            vec![Vector::new("a", vec![1.0, 0.0])],
            &UpsertOptions::namespace("workspace-1"),
        )
        .await
        .unwrap();
    store.create_namespace("workspace-2").await.unwrap();

    let namespaces = store.list_namespaces().await.unwrap();
    assert_eq!(namespaces, vec!["workspace-1".to_string(), "workspace-2".to_string()]);

    let report = store
        .upsert_batch(
            vec![
                Vector::new("b", vec![0.0, 1.0]),
                Vector::new("short", vec![1.0]),
            ],
            &UpsertOptions::namespace("workspace-1"),
        )
        .await
        .unwrap();
    assert_eq!(report.upserted, 1);
    assert_eq!(report.failures.len(), 1);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.vector_count, 2);
    assert_eq!(stats.namespaces.get("workspace-1"), Some(&2));

    store.delete_namespace("workspace-1").await.unwrap();
    assert_eq!(store.stats().await.unwrap().vector_count, 0);
}
