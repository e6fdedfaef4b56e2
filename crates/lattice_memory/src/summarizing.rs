//! Summarizing memory: token-budgeted compaction of old turns.
//!
//! Compaction is lazy: nothing happens on `add`, and `messages()` only
//! compacts when the estimated token count exceeds the budget. The old
//! prefix is rendered into a summarization prompt, the LLM reply
//! becomes a single assistant message, and the inner log is replaced
//! through its own API with `[system?, summary, recent…]`. A failed LLM
//! call falls back to the un-summarized list; summarization must never
//! break the conversation.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use lattice_core::{Message, Result};
use lattice_llm::{ChatModel, ChatOptions};

use crate::estimator::{CharTokenEstimator, TokenEstimator};
use crate::{render_message, Memory};

/// Fired after each compaction with the number of messages summarized
/// and the summary text.
pub type SummarizeCallback = Arc<dyn Fn(usize, &str) + Send + Sync>;

#[derive(Clone)]
pub struct SummarizingMemoryConfig {
    /// Token budget that triggers compaction.
    pub max_tokens: usize,
    /// Most recent turns kept verbatim.
    pub recent_to_keep: usize,
    /// Options forwarded to the summarization call.
    pub llm_options: ChatOptions,
}

impl SummarizingMemoryConfig {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            recent_to_keep: 4,
            llm_options: ChatOptions::default(),
        }
    }
}

pub struct SummarizingMemory {
    inner: Arc<dyn Memory>,
    llm: Arc<dyn ChatModel>,
    config: SummarizingMemoryConfig,
    estimator: Arc<dyn TokenEstimator>,
    on_summarize: Option<SummarizeCallback>,
    /// Serializes compact-and-replace so concurrent readers cannot
    /// produce duplicate summaries.
    compact_lock: Mutex<()>,
}

impl SummarizingMemory {
    pub fn new(
        inner: Arc<dyn Memory>,
        llm: Arc<dyn ChatModel>,
        config: SummarizingMemoryConfig,
    ) -> Self {
        Self {
            inner,
            llm,
            config,
            estimator: Arc::new(CharTokenEstimator::default()),
            on_summarize: None,
            compact_lock: Mutex::new(()),
        }
    }

    /// Swap the token estimator, e.g. for a model-exact tokenizer.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_on_summarize<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, &str) + Send + Sync + 'static,
    {
        self.on_summarize = Some(Arc::new(callback));
        self
    }

    async fn compact(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        let system = messages
            .first()
            .filter(|m| m.is_system())
            .cloned();
        let conversation: Vec<Message> = if system.is_some() {
            messages[1..].to_vec()
        } else {
            messages.clone()
        };

        let keep = self.config.recent_to_keep.min(conversation.len());
        let split_at = conversation.len() - keep;
        let (old, recent) = conversation.split_at(split_at);
        if old.is_empty() {
            // Everything is "recent"; nothing to fold away.
            return Ok(messages);
        }

        let prompt = summarization_prompt(old);
        let response = match self.llm.chat(&prompt, &self.config.llm_options).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "summarization failed; returning uncompacted context");
                return Ok(messages);
            }
        };
        let summary_text = response.message.rendered_content();
        let summary = Message::assistant(summary_text.clone())
            .with_metadata("summarized", true)
            .with_metadata("messages_summarized", old.len());

        // Replace the inner log through its own API: clear keeps the
        // system prompt, then summary, then the kept tail.
        self.inner.clear().await?;
        self.inner.add(summary.clone()).await?;
        for message in recent {
            self.inner.add(message.clone()).await?;
        }
        debug!(
            summarized = old.len(),
            kept = recent.len(),
            "conversation compacted"
        );
        if let Some(callback) = &self.on_summarize {
            callback(old.len(), &summary_text);
        }

        let mut out = Vec::with_capacity(2 + recent.len());
        if let Some(system) = system {
            out.push(system);
        }
        out.push(summary);
        out.extend(recent.iter().cloned());
        Ok(out)
    }
}

#[async_trait]
impl Memory for SummarizingMemory {
    async fn add(&self, message: Message) -> Result<()> {
        self.inner.add(message).await
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        let messages = self.inner.messages().await?;
        if self.estimator.estimate(&messages) <= self.config.max_tokens {
            return Ok(messages);
        }

        let _guard = self.compact_lock.lock().await;
        // Re-pull under the lock; a concurrent reader may have already
        // compacted.
        let messages = self.inner.messages().await?;
        if self.estimator.estimate(&messages) <= self.config.max_tokens {
            return Ok(messages);
        }
        self.compact(messages).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }
}

fn summarization_prompt(old: &[Message]) -> Vec<Message> {
    let transcript: Vec<String> = old.iter().map(render_message).collect();
    vec![
        Message::system(
            "Condense the conversation excerpt into a short summary that \
             preserves facts, decisions, and open questions.",
        ),
        Message::user(format!(
            "Summarize the following conversation:\n\n{}",
            transcript.join("\n")
        )),
    ]
}
