//! Collaborator interfaces for chat models and embedders.
//!
//! The memory engine drives these; concrete provider bindings live
//! outside the platform. Implementations must be `Send + Sync` so they
//! can be shared across worker tasks behind an `Arc`.

use async_trait::async_trait;

use lattice_core::{Message, Result};

pub mod options;
pub mod stream;

pub use options::{ChatOptions, TokenUsage};
pub use stream::{ChatStream, StreamChunk, StreamSender};

/// Response from a non-streaming chat call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: TokenUsage,
}

/// A conversational model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one chat round-trip and return the full assistant message.
    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse>;

    /// Run one chat round-trip, yielding incremental assistant deltas.
    async fn chat_stream(&self, messages: &[Message], options: &ChatOptions)
        -> Result<ChatStream>;
}

/// A single embedding: fixed-dimension dense vector plus optional usage
/// counters.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub usage: Option<TokenUsage>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            usage: None,
        }
    }
}

/// Text embedding provider. All returned vectors must have
/// [`Embedder::dimension`] elements.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts in one provider call.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Embedding>;

    /// Dimension of every vector this embedder produces.
    fn dimension(&self) -> usize;
}
