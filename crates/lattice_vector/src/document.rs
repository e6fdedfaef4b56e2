//! Document layer over the vector store.
//!
//! Documents are logical records carried in vector metadata: the text
//! body is mirrored under the `"content"` key on write and recovered on
//! read. Documents missing an embedding are embedded in one provider
//! batch before upsert; upserts go to the store in fixed-size chunks.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use lattice_core::{Error, Result};
use lattice_llm::Embedder;

use crate::client::VectorStore;
use crate::filter::Filter;
use crate::score::maximal_marginal_relevance;
use crate::types::{DeleteOptions, QueryRequest, UpsertOptions, Vector, DEFAULT_TOP_K};

/// Metadata key carrying the document body.
pub const CONTENT_METADATA_KEY: &str = "content";
/// Legacy key read as a fallback when `"content"` is absent.
const CONTENT_FALLBACK_KEY: &str = "text";

/// Default upsert chunk size.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// A logical document layered on a vector record.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    /// Filled by embed-on-write when absent.
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Map::new(),
            embedding: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A document plus its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct DocumentStoreConfig {
    pub batch_size: usize,
    pub namespace: String,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            namespace: String::new(),
        }
    }
}

/// Similarity search over documents.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Pre-computed query vector; skips the embed call when set.
    pub vector: Option<Vec<f32>>,
    pub top_k: usize,
    pub filter: Option<Filter>,
    pub min_score: Option<f32>,
    /// Overrides the store's configured namespace when set.
    pub namespace: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            vector: None,
            top_k: DEFAULT_TOP_K,
            filter: None,
            min_score: None,
            namespace: None,
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

    pub fn min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }
}

/// Embed-on-write document store. Holds non-owning references to the
/// vector client and the embedder.
pub struct DocumentStore {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: DocumentStoreConfig,
}

impl DocumentStore {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self::with_config(store, embedder, DocumentStoreConfig::default())
    }

    pub fn with_config(
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: DocumentStoreConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    fn target_namespace(&self, requested: Option<&String>) -> String {
        requested
            .cloned()
            .unwrap_or_else(|| self.config.namespace.clone())
    }

    /// Embed documents missing a vector (one provider batch), then
    /// upsert everything in chunks of `batch_size` into the store's
    /// configured namespace.
    pub async fn add_documents(&self, docs: Vec<Document>) -> Result<Vec<String>> {
        let namespace = self.config.namespace.clone();
        self.add_documents_in(docs, &namespace).await
    }

    /// Like [`DocumentStore::add_documents`] but targeting an explicit
    /// namespace.
    pub async fn add_documents_in(
        &self,
        mut docs: Vec<Document>,
        namespace: &str,
    ) -> Result<Vec<String>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let missing: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|&i| docs[i].content.clone()).collect();
            let embeddings = self.embedder.embed_documents(&texts).await?;
            if embeddings.len() != texts.len() {
                return Err(Error::external("embedder returned wrong batch size")
                    .with_detail("expected", texts.len())
                    .with_detail("got", embeddings.len()));
            }
            for (&i, embedding) in missing.iter().zip(embeddings) {
                docs[i].embedding = Some(embedding.values);
            }
        }

        let mut ids = Vec::with_capacity(docs.len());
        let mut vectors = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut metadata = doc.metadata;
            metadata.insert(
                CONTENT_METADATA_KEY.to_string(),
                Value::String(doc.content.clone()),
            );
            ids.push(doc.id.clone());
            vectors.push(Vector {
                id: doc.id,
                values: doc.embedding.expect("embedding filled above"),
                metadata,
                sparse: None,
            });
        }

        let opts = UpsertOptions {
            namespace: namespace.to_string(),
        };
        for chunk in vectors.chunks(self.config.batch_size) {
            self.store.upsert(chunk.to_vec(), &opts).await?;
        }
        debug!(count = ids.len(), namespace, "documents upserted");
        Ok(ids)
    }

    /// Similarity search returning documents with scores.
    pub async fn search(&self, req: &SearchRequest) -> Result<Vec<ScoredDocument>> {
        let vector = self.resolve_query_vector(req).await?;
        let matches = self.query_matches(req, vector, req.top_k, false).await?;
        Ok(matches
            .into_iter()
            .map(|m| scored_document(m.id, m.metadata, m.score))
            .collect())
    }

    /// Similarity search re-ranked by Maximal Marginal Relevance:
    /// over-fetches candidates, then greedily balances query relevance
    /// against redundancy among selected results.
    pub async fn search_mmr(&self, req: &SearchRequest, lambda: f32) -> Result<Vec<ScoredDocument>> {
        let fetch_k = (req.top_k * 4).max(req.top_k);
        let query_vector = self.resolve_query_vector(req).await?;
        let matches = self
            .query_matches(req, query_vector.clone(), fetch_k, true)
            .await?;

        let candidates: Vec<Vec<f32>> = matches
            .iter()
            .map(|m| m.values.clone().unwrap_or_default())
            .collect();
        let picked = maximal_marginal_relevance(&query_vector, &candidates, lambda, req.top_k);

        Ok(picked
            .into_iter()
            .map(|i| {
                let m = matches[i].clone();
                scored_document(m.id, m.metadata, m.score)
            })
            .collect())
    }

    /// Delete documents by id from the store's namespace.
    pub async fn delete(&self, ids: &[String]) -> Result<()> {
        let namespace = self.config.namespace.clone();
        self.delete_in(ids, &namespace).await
    }

    /// Delete documents by id from an explicit namespace.
    pub async fn delete_in(&self, ids: &[String], namespace: &str) -> Result<()> {
        let opts = DeleteOptions {
            namespace: namespace.to_string(),
        };
        self.store.delete(ids, &opts).await
    }

    /// The query embedding: taken from the request when pre-computed,
    /// otherwise one embed call (a query string is required then).
    async fn resolve_query_vector(&self, req: &SearchRequest) -> Result<Vec<f32>> {
        match &req.vector {
            Some(v) => Ok(v.clone()),
            None if !req.query.is_empty() => {
                Ok(self.embedder.embed_query(&req.query).await?.values)
            }
            None => Err(Error::validation(
                "search requires a query string or a query vector",
            )),
        }
    }

    async fn query_matches(
        &self,
        req: &SearchRequest,
        vector: Vec<f32>,
        top_k: usize,
        include_values: bool,
    ) -> Result<Vec<crate::types::QueryMatch>> {
        let mut query = QueryRequest::new(vector)
            .top_k(top_k)
            .namespace(self.target_namespace(req.namespace.as_ref()))
            .include_metadata(true)
            .include_values(include_values);
        if let Some(filter) = &req.filter {
            query = query.filter(filter.clone());
        }
        if let Some(min_score) = req.min_score {
            query = query.min_score(min_score);
        }
        self.store.query(&query).await
    }
}

/// Rebuild a document from match metadata: body from `"content"`, then
/// the legacy `"text"` key, else empty.
fn scored_document(
    id: String,
    metadata: Option<Map<String, Value>>,
    score: f32,
) -> ScoredDocument {
    let metadata = metadata.unwrap_or_default();
    let content = metadata
        .get(CONTENT_METADATA_KEY)
        .or_else(|| metadata.get(CONTENT_FALLBACK_KEY))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    ScoredDocument {
        document: Document {
            id,
            content,
            metadata,
            embedding: None,
        },
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackendConfig;
    use lattice_test_utils::HashEmbedder;
    use serde_json::json;

    fn doc_store(dimension: usize) -> DocumentStore {
        let store = Arc::new(VectorStore::in_memory(MemoryBackendConfig::new(dimension)));
        DocumentStore::new(store, Arc::new(HashEmbedder::new(dimension)))
    }

    #[tokio::test]
    async fn add_and_search_round_trip() {
        let store = doc_store(32);
        store
            .add_documents(vec![
                Document::new("d1", "the job queue retries failed work")
                    .with_metadata("source", json!("manual")),
                Document::new("d2", "vectors are indexed by namespace"),
            ])
            .await
            .unwrap();

        let hits = store
            .search(&SearchRequest::new("job queue retries").top_k(1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "d1");
        assert_eq!(hits[0].document.content, "the job queue retries failed work");
        assert_eq!(hits[0].document.metadata.get("source"), Some(&json!("manual")));
    }

    #[tokio::test]
    async fn content_fallback_key_is_read() {
        let dimension = 8;
        let vector_store = Arc::new(VectorStore::in_memory(MemoryBackendConfig::new(dimension)));
        let embedder = Arc::new(HashEmbedder::new(dimension));
        // A record written by an older producer: body under "text".
        vector_store
            .upsert(
                vec![Vector::new("legacy", embedder.embed_text("hello world"))
                    .with_metadata("text", json!("hello world"))],
                &UpsertOptions::default(),
            )
            .await
            .unwrap();

        let store = DocumentStore::new(vector_store, embedder);
        let hits = store
            .search(&SearchRequest::new("hello world"))
            .await
            .unwrap();
        assert_eq!(hits[0].document.content, "hello world");
    }

    #[tokio::test]
    async fn precomputed_embeddings_skip_the_embedder() {
        let store = doc_store(4);
        store
            .add_documents(vec![
                Document::new("pre", "ignored").with_embedding(vec![1.0, 0.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let mut req = SearchRequest::new("");
        req.vector = Some(vec![1.0, 0.0, 0.0, 0.0]);
        let hits = store.search(&req).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_query_without_vector_is_rejected() {
        let store = doc_store(4);
        let err = store.search(&SearchRequest::new("")).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn upserts_are_chunked_by_batch_size() {
        let dimension = 8;
        let vector_store = Arc::new(VectorStore::in_memory(MemoryBackendConfig::new(dimension)));
        let store = DocumentStore::with_config(
            vector_store.clone(),
            Arc::new(HashEmbedder::new(dimension)),
            DocumentStoreConfig {
                batch_size: 2,
                namespace: String::new(),
            },
        );

        let docs = (0..5)
            .map(|i| Document::new(format!("d{i}"), format!("document number {i}")))
            .collect();
        let ids = store.add_documents(docs).await.unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(vector_store.stats().await.unwrap().vector_count, 5);
    }

    #[tokio::test]
    async fn mmr_returns_at_most_top_k() {
        let store = doc_store(32);
        let docs = (0..6)
            .map(|i| Document::new(format!("d{i}"), format!("retry policy variant {i}")))
            .collect();
        store.add_documents(docs).await.unwrap();

        let hits = store
            .search_mmr(&SearchRequest::new("retry policy").top_k(3), 0.7)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
    }
}
