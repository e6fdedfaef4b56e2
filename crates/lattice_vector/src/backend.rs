//! Backend contract and capability registry.
//!
//! Every backend implements the four required operations. Optional
//! features are separate traits; at wiring time the constructor fills a
//! [`BackendHandles`] registry with one nullable handle per capability,
//! and the client dispatches with a nil-check. This keeps capability
//! detection explicit and compile-time safe instead of relying on
//! runtime type assertions.

use async_trait::async_trait;
use std::sync::Arc;

use lattice_core::Result;

use crate::score::Metric;
use crate::types::{
    BatchUpsertReport, DeleteOptions, FetchOptions, HybridRequest, IndexKind, QueryMatch,
    QueryRequest, StoreStats, UpsertOptions, Vector,
};

/// Optional backend capabilities, named for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    FilteredQuery,
    BatchUpsert,
    Namespaces,
    IndexLifecycle,
    HybridSearch,
    Stats,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::FilteredQuery => "filtered_query",
            Capability::BatchUpsert => "batch_upsert",
            Capability::Namespaces => "namespaces",
            Capability::IndexLifecycle => "index_lifecycle",
            Capability::HybridSearch => "hybrid_search",
            Capability::Stats => "stats",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Required operations every backend provides.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Insert or fully replace vectors by id. An id already present in
    /// another namespace moves to the target namespace. The write must
    /// appear atomic to concurrent readers.
    async fn upsert(&self, vectors: Vec<Vector>, opts: &UpsertOptions) -> Result<()>;

    /// Top-K retrieval ordered by descending score. Backends may ignore
    /// `min_score`; the client applies it after score conversion.
    async fn query(&self, req: &QueryRequest) -> Result<Vec<QueryMatch>>;

    /// Delete by id; missing ids are silently skipped.
    async fn delete(&self, ids: &[String], opts: &DeleteOptions) -> Result<()>;

    /// Load vectors by id within one namespace. Unknown ids are a
    /// NotFound error.
    async fn fetch(&self, ids: &[String], opts: &FetchOptions) -> Result<Vec<Vector>>;

    fn dimension(&self) -> usize;

    fn metric(&self) -> Metric;
}

/// Batch upsert with per-id failure reporting.
#[async_trait]
pub trait BatchUpserter: Send + Sync {
    async fn upsert_batch(
        &self,
        vectors: Vec<Vector>,
        opts: &UpsertOptions,
    ) -> Result<BatchUpsertReport>;
}

/// Namespace listing, creation and deletion.
#[async_trait]
pub trait NamespaceOps: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Remove every vector in the namespace; ids become reusable.
    async fn delete_namespace(&self, namespace: &str) -> Result<()>;
}

/// Physical index lifecycle.
#[async_trait]
pub trait IndexOps: Send + Sync {
    /// Create the distance index. Creating one that already exists is a
    /// Conflict error.
    async fn create_index(&self, kind: &IndexKind) -> Result<()>;

    async fn drop_index(&self) -> Result<()>;
}

/// Fused dense + sparse retrieval.
#[async_trait]
pub trait HybridSearcher: Send + Sync {
    async fn hybrid_query(&self, req: &HybridRequest) -> Result<Vec<QueryMatch>>;
}

/// Store statistics.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn stats(&self) -> Result<StoreStats>;
}

/// Nullable capability handles populated at wiring time.
#[derive(Clone, Default)]
pub struct BackendHandles {
    /// Whether `query` honors `QueryRequest::filter`.
    pub filtered_query: bool,
    pub batch: Option<Arc<dyn BatchUpserter>>,
    pub namespaces: Option<Arc<dyn NamespaceOps>>,
    pub index: Option<Arc<dyn IndexOps>>,
    pub hybrid: Option<Arc<dyn HybridSearcher>>,
    pub stats: Option<Arc<dyn StatsProvider>>,
}

impl BackendHandles {
    /// The capabilities this registry advertises.
    pub fn advertised(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.filtered_query {
            caps.push(Capability::FilteredQuery);
        }
        if self.batch.is_some() {
            caps.push(Capability::BatchUpsert);
        }
        if self.namespaces.is_some() {
            caps.push(Capability::Namespaces);
        }
        if self.index.is_some() {
            caps.push(Capability::IndexLifecycle);
        }
        if self.hybrid.is_some() {
            caps.push(Capability::HybridSearch);
        }
        if self.stats.is_some() {
            caps.push(Capability::Stats);
        }
        caps
    }
}
