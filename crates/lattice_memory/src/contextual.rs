//! Contextual memory: per-message embedding plus query-time retrieval.
//!
//! Every non-system turn is rendered to text and indexed into the
//! document store under `msg-{n}`, where `n` is a monotonic counter
//! covering the memory's whole lifetime. On read, the last few turns
//! form a query; relevant, non-recent, non-duplicate hits are folded
//! into one synthetic user message spliced between the system prompt
//! and the live conversation. Index writes are best-effort: a store
//! failure must not lose the turn.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use lattice_core::{Message, Result};
use lattice_vector::{Document, DocumentStore, SearchRequest};

use crate::{render_message, Memory};

/// Number of trailing conversation turns used to build the retrieval
/// query.
const QUERY_TAIL_MESSAGES: usize = 4;

#[derive(Debug, Clone)]
pub struct ContextualMemoryConfig {
    /// Retrieved messages injected per read.
    pub top_k: usize,
    /// Score floor for retrieval hits.
    pub min_score: f32,
    /// Hits this close to the counter are "recent" and already present
    /// in the live conversation, so they are skipped.
    pub recent_to_skip: u64,
    /// Literal header line of the injected message.
    pub context_header: String,
    /// Vector namespace holding this memory's index.
    pub namespace: String,
}

impl Default for ContextualMemoryConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.0,
            recent_to_skip: 10,
            context_header: "Relevant context from earlier in the conversation:".to_string(),
            namespace: String::new(),
        }
    }
}

pub struct ContextualMemory {
    inner: Arc<dyn Memory>,
    documents: Arc<DocumentStore>,
    config: ContextualMemoryConfig,
    /// Monotonic across the memory's lifetime; survives `clear`, reset
    /// only by `clear_all`.
    msg_counter: AtomicU64,
    /// Keeps the build-query -> search -> splice sequence coherent.
    read_lock: Mutex<()>,
}

impl ContextualMemory {
    pub fn new(inner: Arc<dyn Memory>, documents: Arc<DocumentStore>) -> Self {
        Self::with_config(inner, documents, ContextualMemoryConfig::default())
    }

    pub fn with_config(
        inner: Arc<dyn Memory>,
        documents: Arc<DocumentStore>,
        config: ContextualMemoryConfig,
    ) -> Self {
        Self {
            inner,
            documents,
            config,
            msg_counter: AtomicU64::new(0),
            read_lock: Mutex::new(()),
        }
    }

    /// Messages indexed so far.
    pub fn indexed_count(&self) -> u64 {
        self.msg_counter.load(Ordering::SeqCst)
    }

    /// Clear the inner memory and drop the vector index: deletes
    /// `msg-1…msg-n` and resets the counter.
    pub async fn clear_all(&self) -> Result<()> {
        self.inner.clear().await?;
        let count = self.msg_counter.load(Ordering::SeqCst);
        if count > 0 {
            let ids: Vec<String> = (1..=count).map(|i| format!("msg-{i}")).collect();
            self.documents.delete_in(&ids, &self.config.namespace).await?;
        }
        self.msg_counter.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn index_document(&self, message: &Message, text: String) -> Document {
        let index = self.msg_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut doc = Document::new(format!("msg-{index}"), text)
            .with_metadata("role", message.role.as_str())
            .with_metadata("msg_index", index)
            .with_metadata("type", "conversation_message");
        if let Some(tool_call_id) = &message.tool_call_id {
            doc = doc.with_metadata("tool_call_id", tool_call_id.clone());
        }
        if !message.tool_calls.is_empty() {
            let names: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| Value::String(call.function.name.clone()))
                .collect();
            doc = doc.with_metadata("tool_names", Value::Array(names));
        }
        doc
    }
}

#[async_trait]
impl Memory for ContextualMemory {
    async fn add(&self, message: Message) -> Result<()> {
        self.inner.add(message.clone()).await?;

        if message.is_system() {
            return Ok(());
        }
        let text = render_message(&message);
        if text.is_empty() {
            return Ok(());
        }

        let doc = self.index_document(&message, text);
        // Best-effort: losing an index write degrades retrieval, never
        // the conversation itself.
        if let Err(err) = self
            .documents
            .add_documents_in(vec![doc], &self.config.namespace)
            .await
        {
            warn!(error = %err, "failed to index conversation message");
        }
        Ok(())
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        let _guard = self.read_lock.lock().await;

        let messages = self.inner.messages().await?;
        let system = messages.first().filter(|m| m.is_system()).cloned();
        let conversation: Vec<Message> = if system.is_some() {
            messages[1..].to_vec()
        } else {
            messages.clone()
        };
        if conversation.is_empty() {
            return Ok(messages);
        }

        let tail_start = conversation.len().saturating_sub(QUERY_TAIL_MESSAGES);
        let query = conversation[tail_start..]
            .iter()
            .map(render_message)
            .collect::<Vec<_>>()
            .join(" ");

        let request = SearchRequest::new(query)
            .top_k(self.config.top_k + self.config.recent_to_skip as usize)
            .min_score(self.config.min_score)
            .namespace(self.config.namespace.clone());
        let hits = self.documents.search(&request).await?;

        let recency_cutoff = self
            .msg_counter
            .load(Ordering::SeqCst)
            .saturating_sub(self.config.recent_to_skip);
        // A hit whose text already appears verbatim in the live
        // conversation is never injected.
        let conversation_texts: HashSet<String> = conversation
            .iter()
            .map(|m| m.rendered_content())
            .collect();

        let mut seen = HashSet::new();
        let mut retrieved = Vec::new();
        for hit in hits {
            let msg_index = hit
                .document
                .metadata
                .get("msg_index")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if msg_index > recency_cutoff {
                continue;
            }
            if conversation_texts.contains(&hit.document.content) {
                continue;
            }
            if !seen.insert(hit.document.content.clone()) {
                continue;
            }
            retrieved.push(hit.document.content);
            if retrieved.len() == self.config.top_k {
                break;
            }
        }
        if retrieved.is_empty() {
            return Ok(messages);
        }

        let content = format!("{}\n\n{}", self.config.context_header, retrieved.join("\n\n"));
        let context = Message::user(content)
            .with_metadata("contextual_memory", true)
            .with_metadata("retrieved_count", retrieved.len());

        let mut out = Vec::with_capacity(1 + 1 + conversation.len());
        if let Some(system) = system {
            out.push(system);
        }
        out.push(context);
        out.extend(conversation);
        Ok(out)
    }

    /// Clears only the live log; the vector index persists so earlier
    /// sessions stay retrievable.
    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }
}
