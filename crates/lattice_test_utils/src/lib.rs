//! Deterministic stub collaborators for tests.
//!
//! No network, no randomness: scripted chat models record their inputs
//! and replay canned replies, and the hash embedder maps text to a
//! fixed-dimension bag-of-words vector so similar texts get similar
//! embeddings.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use lattice_core::{Error, Message, Result};
use lattice_llm::{ChatModel, ChatOptions, ChatResponse, ChatStream, Embedder, Embedding, TokenUsage};

/// Chat model that replays canned replies and records every prompt it
/// receives.
pub struct ScriptedChatModel {
    script: Mutex<Script>,
    calls: Mutex<Vec<Vec<Message>>>,
}

enum Script {
    /// Always the same reply.
    Constant(String),
    /// Pop replies front-to-back; exhausting the queue is an error.
    Queue(VecDeque<String>),
}

impl ScriptedChatModel {
    /// Model that always answers `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(Script::Constant(reply.into())),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Model that answers from a finite script.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(Script::Queue(
                responses.into_iter().map(Into::into).collect(),
            )),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Prompts received so far, in call order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Result<String> {
        let mut script = self.script.lock().unwrap();
        match &mut *script {
            Script::Constant(reply) => Ok(reply.clone()),
            Script::Queue(queue) => queue
                .pop_front()
                .ok_or_else(|| Error::external("scripted chat model exhausted")),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn chat(&self, messages: &[Message], _options: &ChatOptions) -> Result<ChatResponse> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let reply = self.next_reply()?;
        Ok(ChatResponse {
            message: Message::assistant(reply),
            usage: TokenUsage::default(),
        })
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChatStream> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(ChatStream::from_text(self.next_reply()?))
    }
}

/// Chat model whose every call fails with an External error.
#[derive(Debug, Default)]
pub struct FailingChatModel;

#[async_trait]
impl ChatModel for FailingChatModel {
    async fn chat(&self, _messages: &[Message], _options: &ChatOptions) -> Result<ChatResponse> {
        Err(Error::external("chat model unavailable"))
    }

    async fn chat_stream(
        &self,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChatStream> {
        Err(Error::external("chat model unavailable"))
    }
}

/// Deterministic embedder: tokens are hashed into a fixed-dimension
/// bag-of-words vector, L2-normalized. Texts sharing words land close
/// together under cosine similarity.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "embedder dimension must be positive");
        Self { dimension }
    }

    /// Synchronous embedding, handy for seeding stores in tests.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let slot = (fnv1a(token) % self.dimension as u64) as usize;
            values[slot] += 1.0;
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts
            .iter()
            .map(|text| Embedding::new(self.embed_text(text)))
            .collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        Ok(Embedding::new(self.embed_text(text)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder whose every call fails with an External error.
#[derive(Debug, Clone, Copy)]
pub struct FailingEmbedder {
    pub dimension: usize,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Embedding>> {
        Err(Error::external("embedder unavailable"))
    }

    async fn embed_query(&self, _text: &str) -> Result<Embedding> {
        Err(Error::external("embedder unavailable"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(16);
        let a = embedder.embed_text("retry the failed job");
        let b = embedder.embed_text("retry the failed job");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_texts_are_closer_than_unrelated_ones() {
        let embedder = HashEmbedder::new(64);
        let query = embedder.embed_text("job queue retries");
        let close = embedder.embed_text("the job queue retries work");
        let far = embedder.embed_text("strawberry cheesecake recipe");
        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        assert!(dot(&query, &close) > dot(&query, &far));
    }
}
