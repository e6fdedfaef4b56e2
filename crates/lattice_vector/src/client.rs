//! Vector store client.
//!
//! Validates inputs, fills defaults, and routes each operation either
//! to the required backend contract or through the capability handles
//! wired at construction. Score-floor filtering happens here, after the
//! backend's distance→score conversion, so every backend behaves the
//! same.

use std::sync::Arc;

use lattice_core::{Error, Result};

use crate::backend::{BackendHandles, Capability, VectorBackend};
use crate::memory::{MemoryBackendConfig, MemoryVectorBackend};
use crate::score::Metric;
use crate::types::{
    BatchUpsertReport, DeleteOptions, FetchOptions, HybridRequest, IndexKind, QueryMatch,
    QueryRequest, StoreStats, UpsertOptions, Vector, DEFAULT_TOP_K,
};

pub struct VectorStore {
    backend: Arc<dyn VectorBackend>,
    handles: BackendHandles,
}

fn feature_not_supported(capability: Capability) -> Error {
    Error::validation("backend does not support this capability")
        .with_detail("capability", capability)
}

impl VectorStore {
    /// Wire a client from a backend plus the capability handles it
    /// advertises.
    pub fn new(backend: Arc<dyn VectorBackend>, handles: BackendHandles) -> Self {
        Self { backend, handles }
    }

    /// In-process store with the full capability set except index
    /// lifecycle (a map has no physical index to manage).
    pub fn in_memory(config: MemoryBackendConfig) -> Self {
        let backend = Arc::new(MemoryVectorBackend::new(config));
        let handles = BackendHandles {
            filtered_query: true,
            batch: Some(backend.clone()),
            namespaces: Some(backend.clone()),
            index: None,
            hybrid: Some(backend.clone()),
            stats: Some(backend.clone()),
        };
        Self::new(backend, handles)
    }

    /// Postgres/pgvector store: everything except hybrid search.
    #[cfg(feature = "postgres")]
    pub fn postgres(backend: Arc<crate::postgres::PgVectorBackend>) -> Self {
        let handles = BackendHandles {
            filtered_query: true,
            batch: Some(backend.clone()),
            namespaces: Some(backend.clone()),
            index: Some(backend.clone()),
            hybrid: None,
            stats: Some(backend.clone()),
        };
        Self::new(backend, handles)
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn metric(&self) -> Metric {
        self.backend.metric()
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.handles.advertised()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn check_dimension(&self, id: &str, values: &[f32]) -> Result<()> {
        if values.len() != self.backend.dimension() {
            return Err(Error::validation("vector dimension mismatch")
                .with_detail("id", id)
                .with_detail("expected_dim", self.backend.dimension())
                .with_detail("got_dim", values.len()));
        }
        Ok(())
    }

    pub async fn upsert(&self, vectors: Vec<Vector>, opts: &UpsertOptions) -> Result<()> {
        for vector in &vectors {
            self.check_dimension(&vector.id, &vector.values)?;
        }
        self.backend.upsert(vectors, opts).await
    }

    pub async fn query(&self, req: &QueryRequest) -> Result<Vec<QueryMatch>> {
        self.check_dimension("query", &req.vector)?;
        let has_filter = req.filter.as_ref().map(|f| !f.is_empty()).unwrap_or(false);
        if has_filter && !self.handles.filtered_query {
            return Err(feature_not_supported(Capability::FilteredQuery));
        }
        let mut req = req.clone();
        if req.top_k == 0 {
            req.top_k = DEFAULT_TOP_K;
        }
        let matches = self.backend.query(&req).await?;
        Ok(apply_min_score(matches, req.min_score))
    }

    pub async fn delete(&self, ids: &[String], opts: &DeleteOptions) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.backend.delete(ids, opts).await
    }

    pub async fn fetch(&self, ids: &[String], opts: &FetchOptions) -> Result<Vec<Vector>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.backend.fetch(ids, opts).await
    }

    pub async fn upsert_batch(
        &self,
        vectors: Vec<Vector>,
        opts: &UpsertOptions,
    ) -> Result<BatchUpsertReport> {
        let handle = self
            .handles
            .batch
            .as_ref()
            .ok_or_else(|| feature_not_supported(Capability::BatchUpsert))?;
        handle.upsert_batch(vectors, opts).await
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        let handle = self
            .handles
            .namespaces
            .as_ref()
            .ok_or_else(|| feature_not_supported(Capability::Namespaces))?;
        handle.list_namespaces().await
    }

    pub async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let handle = self
            .handles
            .namespaces
            .as_ref()
            .ok_or_else(|| feature_not_supported(Capability::Namespaces))?;
        handle.create_namespace(namespace).await
    }

    pub async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let handle = self
            .handles
            .namespaces
            .as_ref()
            .ok_or_else(|| feature_not_supported(Capability::Namespaces))?;
        handle.delete_namespace(namespace).await
    }

    pub async fn create_index(&self, kind: &IndexKind) -> Result<()> {
        let handle = self
            .handles
            .index
            .as_ref()
            .ok_or_else(|| feature_not_supported(Capability::IndexLifecycle))?;
        handle.create_index(kind).await
    }

    pub async fn drop_index(&self) -> Result<()> {
        let handle = self
            .handles
            .index
            .as_ref()
            .ok_or_else(|| feature_not_supported(Capability::IndexLifecycle))?;
        handle.drop_index().await
    }

    pub async fn hybrid_query(&self, req: &HybridRequest) -> Result<Vec<QueryMatch>> {
        let handle = self
            .handles
            .hybrid
            .as_ref()
            .ok_or_else(|| feature_not_supported(Capability::HybridSearch))?;
        self.check_dimension("query", &req.vector)?;
        let mut req = req.clone();
        if req.top_k == 0 {
            req.top_k = DEFAULT_TOP_K;
        }
        let matches = handle.hybrid_query(&req).await?;
        Ok(apply_min_score(matches, req.min_score))
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let handle = self
            .handles
            .stats
            .as_ref()
            .ok_or_else(|| feature_not_supported(Capability::Stats))?;
        handle.stats().await
    }
}

/// Drop matches scoring strictly below the floor.
fn apply_min_score(matches: Vec<QueryMatch>, min_score: Option<f32>) -> Vec<QueryMatch> {
    match min_score {
        Some(floor) => matches.into_iter().filter(|m| m.score >= floor).collect(),
        None => matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::ErrorKind;

    fn store() -> VectorStore {
        VectorStore::in_memory(MemoryBackendConfig::new(2))
    }

    #[tokio::test]
    async fn dimension_mismatch_carries_details() {
        let store = store();
        let err = store
            .upsert(vec![Vector::new("a", vec![1.0])], &UpsertOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.detail("expected_dim"), Some("2"));
        assert_eq!(err.detail("got_dim"), Some("1"));
    }

    #[tokio::test]
    async fn missing_capability_is_reported_by_name() {
        let store = store();
        let err = store
            .create_index(&IndexKind::IvfFlat { lists: 100 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.detail("capability"), Some("index_lifecycle"));
    }

    #[tokio::test]
    async fn min_score_excludes_strictly_below() {
        let store = store();
        store
            .upsert(
                vec![
                    Vector::new("exact", vec![1.0, 0.0]),
                    Vector::new("orthogonal", vec![0.0, 1.0]),
                ],
                &UpsertOptions::default(),
            )
            .await
            .unwrap();

        let hits = store
            .query(&QueryRequest::new(vec![1.0, 0.0]).min_score(0.5))
            .await
            .unwrap();
        // Orthogonal scores exactly 0.5 and survives; only strictly
        // lower scores are dropped.
        assert_eq!(hits.len(), 2);

        let hits = store
            .query(&QueryRequest::new(vec![1.0, 0.0]).min_score(0.9))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "exact");
    }

    #[tokio::test]
    async fn zero_top_k_falls_back_to_default() {
        let store = store();
        for i in 0..15 {
            store
                .upsert(
                    vec![Vector::new(format!("v{i}"), vec![1.0, 0.0])],
                    &UpsertOptions::default(),
                )
                .await
                .unwrap();
        }
        let hits = store
            .query(&QueryRequest::new(vec![1.0, 0.0]).top_k(0))
            .await
            .unwrap();
        assert_eq!(hits.len(), DEFAULT_TOP_K);
    }

    #[tokio::test]
    async fn advertised_capabilities_match_wiring() {
        let store = store();
        assert!(store.supports(Capability::FilteredQuery));
        assert!(store.supports(Capability::HybridSearch));
        assert!(!store.supports(Capability::IndexLifecycle));
    }
}
