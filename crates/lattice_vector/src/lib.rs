//! Vector Store Engine
//!
//! A capability-composed vector index: a small required backend contract
//! (upsert/query/delete/fetch) plus optional capabilities (batch upsert,
//! namespaces, index lifecycle, hybrid search, stats) that backends
//! advertise at wiring time. The client dispatches through nullable
//! handles; a missing capability surfaces as a `FeatureNotSupported`
//! validation error rather than a panic or a silent no-op.
//!
//! Two backends ship here: an in-process map guarded by a read-write
//! lock, and a Postgres table using the pgvector extension.

pub mod backend;
pub mod client;
pub mod document;
pub mod filter;
pub mod memory;
pub mod score;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use backend::{
    BackendHandles, BatchUpserter, Capability, HybridSearcher, IndexOps, NamespaceOps,
    StatsProvider, VectorBackend,
};
pub use client::VectorStore;
pub use document::{
    Document, DocumentStore, DocumentStoreConfig, ScoredDocument, SearchRequest,
    CONTENT_METADATA_KEY,
};
pub use filter::{Condition, Filter, FilterOp};
pub use memory::{MemoryBackendConfig, MemoryVectorBackend};
pub use score::Metric;
pub use types::{
    BatchFailure, BatchUpsertReport, DeleteOptions, FetchOptions, HybridRequest, IndexKind,
    QueryMatch, QueryRequest, SparseVector, StoreStats, UpsertOptions, Vector, DEFAULT_TOP_K,
};
