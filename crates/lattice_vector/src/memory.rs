//! In-process vector backend.
//!
//! A concurrent map `id -> record` plus an insertion-ordered
//! `namespace -> [id]` index, guarded by one read-write lock: queries
//! and fetches read-lock, upserts, deletes and namespace ops
//! write-lock. Dimension and metric are fixed at construction.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use lattice_core::{Error, Result};

use crate::backend::{
    BatchUpserter, HybridSearcher, NamespaceOps, StatsProvider, VectorBackend,
};
use crate::score::Metric;
use crate::types::{
    BatchFailure, BatchUpsertReport, DeleteOptions, FetchOptions, HybridRequest, QueryMatch,
    QueryRequest, SparseVector, StoreStats, UpsertOptions, Vector,
};

#[derive(Debug, Clone, Copy)]
pub struct MemoryBackendConfig {
    pub dimension: usize,
    pub metric: Metric,
}

impl MemoryBackendConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            metric: Metric::Cosine,
        }
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }
}

struct StoredVector {
    values: Vec<f32>,
    metadata: Map<String, Value>,
    sparse: Option<SparseVector>,
    namespace: String,
}

#[derive(Default)]
struct State {
    vectors: HashMap<String, StoredVector>,
    /// Ids per namespace in insertion order; ties in query scores break
    /// by this order.
    namespaces: HashMap<String, Vec<String>>,
}

pub struct MemoryVectorBackend {
    dimension: usize,
    metric: Metric,
    state: RwLock<State>,
}

impl MemoryVectorBackend {
    pub fn new(config: MemoryBackendConfig) -> Self {
        Self {
            dimension: config.dimension,
            metric: config.metric,
            state: RwLock::new(State::default()),
        }
    }

    fn check_dimension(&self, id: &str, values: &[f32]) -> Result<()> {
        if values.len() != self.dimension {
            return Err(Error::validation("vector dimension mismatch")
                .with_detail("id", id)
                .with_detail("expected_dim", self.dimension)
                .with_detail("got_dim", values.len()));
        }
        Ok(())
    }

    /// Insert or replace under an already-held write lock. A same-id
    /// upsert into the same namespace keeps its index position; a
    /// cross-namespace upsert moves the id to the end of the target
    /// namespace.
    fn apply_upsert(state: &mut State, vector: Vector, namespace: &str) {
        let Vector {
            id,
            values,
            metadata,
            sparse,
        } = vector;

        let moved = match state.vectors.get(&id) {
            Some(existing) if existing.namespace != namespace => {
                let old = existing.namespace.clone();
                if let Some(ids) = state.namespaces.get_mut(&old) {
                    ids.retain(|other| other != &id);
                }
                true
            }
            Some(_) => false,
            None => true,
        };

        if moved {
            state
                .namespaces
                .entry(namespace.to_string())
                .or_default()
                .push(id.clone());
        }
        state.vectors.insert(
            id,
            StoredVector {
                values,
                metadata,
                sparse,
                namespace: namespace.to_string(),
            },
        );
    }

    fn rank(
        &self,
        state: &State,
        req_namespace: &str,
        filter: Option<&crate::filter::Filter>,
        mut score_of: impl FnMut(&StoredVector) -> f32,
    ) -> Vec<(String, f32)> {
        let Some(ids) = state.namespaces.get(req_namespace) else {
            return Vec::new();
        };
        let mut scored = Vec::new();
        for id in ids {
            let Some(stored) = state.vectors.get(id) else {
                continue;
            };
            if let Some(filter) = filter {
                if !filter.matches(&stored.metadata) {
                    continue;
                }
            }
            scored.push((id.clone(), score_of(stored)));
        }
        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    fn to_matches(
        state: &State,
        scored: Vec<(String, f32)>,
        top_k: usize,
        include_values: bool,
        include_metadata: bool,
    ) -> Vec<QueryMatch> {
        scored
            .into_iter()
            .take(top_k)
            .map(|(id, score)| {
                let stored = &state.vectors[&id];
                QueryMatch {
                    score,
                    values: include_values.then(|| stored.values.clone()),
                    metadata: include_metadata.then(|| stored.metadata.clone()),
                    id,
                }
            })
            .collect()
    }
}

#[async_trait]
impl VectorBackend for MemoryVectorBackend {
    async fn upsert(&self, vectors: Vec<Vector>, opts: &UpsertOptions) -> Result<()> {
        for vector in &vectors {
            self.check_dimension(&vector.id, &vector.values)?;
        }
        let mut state = self.state.write().expect("vector state lock poisoned");
        for vector in vectors {
            Self::apply_upsert(&mut state, vector, &opts.namespace);
        }
        Ok(())
    }

    async fn query(&self, req: &QueryRequest) -> Result<Vec<QueryMatch>> {
        self.check_dimension("query", &req.vector)?;
        let state = self.state.read().expect("vector state lock poisoned");
        let scored = self.rank(&state, &req.namespace, req.filter.as_ref(), |stored| {
            self.metric
                .score(self.metric.distance(&req.vector, &stored.values))
        });
        Ok(Self::to_matches(
            &state,
            scored,
            req.top_k,
            req.include_values,
            req.include_metadata,
        ))
    }

    async fn delete(&self, ids: &[String], opts: &DeleteOptions) -> Result<()> {
        let mut state = self.state.write().expect("vector state lock poisoned");
        for id in ids {
            let matches_ns = state
                .vectors
                .get(id)
                .map(|stored| stored.namespace == opts.namespace)
                .unwrap_or(false);
            if !matches_ns {
                continue;
            }
            state.vectors.remove(id);
            if let Some(ns_ids) = state.namespaces.get_mut(&opts.namespace) {
                ns_ids.retain(|other| other != id);
            }
        }
        Ok(())
    }

    async fn fetch(&self, ids: &[String], opts: &FetchOptions) -> Result<Vec<Vector>> {
        let state = self.state.read().expect("vector state lock poisoned");
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match state.vectors.get(id) {
                Some(stored) if stored.namespace == opts.namespace => out.push(Vector {
                    id: id.clone(),
                    values: stored.values.clone(),
                    metadata: stored.metadata.clone(),
                    sparse: stored.sparse.clone(),
                }),
                _ => {
                    return Err(Error::not_found("vector not found")
                        .with_detail("id", id)
                        .with_detail("namespace", &opts.namespace));
                }
            }
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }
}

#[async_trait]
impl BatchUpserter for MemoryVectorBackend {
    async fn upsert_batch(
        &self,
        vectors: Vec<Vector>,
        opts: &UpsertOptions,
    ) -> Result<BatchUpsertReport> {
        let mut report = BatchUpsertReport::default();
        let mut state = self.state.write().expect("vector state lock poisoned");
        for vector in vectors {
            if let Err(err) = self.check_dimension(&vector.id, &vector.values) {
                report.failures.push(BatchFailure {
                    id: vector.id,
                    error: err.to_string(),
                });
                continue;
            }
            Self::apply_upsert(&mut state, vector, &opts.namespace);
            report.upserted += 1;
        }
        Ok(report)
    }
}

#[async_trait]
impl NamespaceOps for MemoryVectorBackend {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let state = self.state.read().expect("vector state lock poisoned");
        let mut names: Vec<String> = state.namespaces.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let mut state = self.state.write().expect("vector state lock poisoned");
        state.namespaces.entry(namespace.to_string()).or_default();
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let mut state = self.state.write().expect("vector state lock poisoned");
        if let Some(ids) = state.namespaces.remove(namespace) {
            for id in ids {
                state.vectors.remove(&id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HybridSearcher for MemoryVectorBackend {
    async fn hybrid_query(&self, req: &HybridRequest) -> Result<Vec<QueryMatch>> {
        self.check_dimension("query", &req.vector)?;
        let state = self.state.read().expect("vector state lock poisoned");
        let scored = self.rank(&state, &req.namespace, req.filter.as_ref(), |stored| {
            let dense = self
                .metric
                .score(self.metric.distance(&req.vector, &stored.values));
            let sparse = stored
                .sparse
                .as_ref()
                .map(|s| s.dot(&req.sparse))
                .unwrap_or(0.0);
            req.alpha * dense + (1.0 - req.alpha) * sparse
        });
        Ok(Self::to_matches(
            &state,
            scored,
            req.top_k,
            req.include_values,
            req.include_metadata,
        ))
    }
}

#[async_trait]
impl StatsProvider for MemoryVectorBackend {
    async fn stats(&self) -> Result<StoreStats> {
        let state = self.state.read().expect("vector state lock poisoned");
        let mut namespaces = BTreeMap::new();
        for (name, ids) in &state.namespaces {
            namespaces.insert(name.clone(), ids.len());
        }
        Ok(StoreStats {
            dimension: self.dimension,
            vector_count: state.vectors.len(),
            namespaces,
        })
    }
}
