//! Core value types for the vector engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::filter::Filter;

/// Default number of matches a query returns.
pub const DEFAULT_TOP_K: usize = 10;

/// Sparse companion to a dense vector: parallel indices and values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Dot product of two sparse vectors (indices must be ascending).
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut sum = 0.0;
        let mut i = 0;
        let mut j = 0;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
            }
        }
        sum
    }
}

/// One stored vector: id unique per namespace, fixed-dimension values,
/// free-form metadata, optional sparse companion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<SparseVector>,
}

impl Vector {
    pub fn new(id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            values,
            metadata: Map::new(),
            sparse: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    /// Target namespace; empty string is the default namespace.
    pub namespace: String,
}

impl UpsertOptions {
    pub fn namespace(ns: impl Into<String>) -> Self {
        Self {
            namespace: ns.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub namespace: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub namespace: String,
}

/// Similarity query. Defaults: `top_k` 10, no filter, default
/// namespace, no score floor, neither values nor metadata included.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub filter: Option<Filter>,
    pub namespace: String,
    pub min_score: Option<f32>,
    pub include_values: bool,
    pub include_metadata: bool,
}

impl QueryRequest {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            top_k: DEFAULT_TOP_K,
            filter: None,
            namespace: String::new(),
            min_score: None,
            include_values: false,
            include_metadata: false,
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn include_values(mut self, include: bool) -> Self {
        self.include_values = include;
        self
    }

    pub fn include_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }
}

/// One query hit, ordered by descending score.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub values: Option<Vec<f32>>,
    pub metadata: Option<Map<String, Value>>,
}

/// Dense + sparse query fused by `alpha` (1.0 = dense only).
#[derive(Debug, Clone)]
pub struct HybridRequest {
    pub vector: Vec<f32>,
    pub sparse: SparseVector,
    pub alpha: f32,
    pub top_k: usize,
    pub filter: Option<Filter>,
    pub namespace: String,
    pub min_score: Option<f32>,
    pub include_values: bool,
    pub include_metadata: bool,
}

impl HybridRequest {
    pub fn new(vector: Vec<f32>, sparse: SparseVector) -> Self {
        Self {
            vector,
            sparse,
            alpha: 0.5,
            top_k: DEFAULT_TOP_K,
            filter: None,
            namespace: String::new(),
            min_score: None,
            include_values: false,
            include_metadata: false,
        }
    }
}

/// Outcome of a batch upsert with per-id failure reporting.
#[derive(Debug, Clone, Default)]
pub struct BatchUpsertReport {
    pub upserted: usize,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub id: String,
    pub error: String,
}

/// Store-wide statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub dimension: usize,
    pub vector_count: usize,
    /// Vector count per namespace, default namespace under `""`.
    pub namespaces: BTreeMap<String, usize>,
}

/// Physical index shape for backends with an index lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    IvfFlat { lists: u32 },
    Hnsw { m: u32, ef_construction: u32 },
}
