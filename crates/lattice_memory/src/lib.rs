//! Memory Engine
//!
//! Conversation memory is three composable layers over one small
//! contract: a thread-safe base log, a token-budgeted summarizing layer
//! that compacts old turns through an LLM, and a contextual layer that
//! indexes every non-system turn into a document store and injects
//! semantically relevant past turns on read. Every layer wraps an inner
//! [`Memory`] and delegates storage while intercepting `add` and
//! `messages`.

use async_trait::async_trait;

use lattice_core::{Message, Result};

pub mod base;
pub mod contextual;
pub mod estimator;
pub mod summarizing;

pub use base::BaseMemory;
pub use contextual::{ContextualMemory, ContextualMemoryConfig};
pub use estimator::{CharTokenEstimator, TokenEstimator};
pub use summarizing::{SummarizingMemory, SummarizingMemoryConfig};

/// Conversation memory contract. Implementations are safe under
/// concurrent `add` and `messages` from different tasks; ordering
/// within a single caller is preserved.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Append one message to the log.
    async fn add(&self, message: Message) -> Result<()>;

    /// The current prompt context, oldest first.
    async fn messages(&self) -> Result<Vec<Message>>;

    /// Reset the log, preserving a leading System message if present.
    async fn clear(&self) -> Result<()>;
}

/// Render one message for prompts and indexing: `[role]: body` plus one
/// `[tool_call] name(args)` line per call. Returns an empty string for
/// messages with neither body nor tool calls.
pub fn render_message(message: &Message) -> String {
    let body = message.rendered_content();
    let mut out = String::new();
    if !body.is_empty() {
        out.push_str(&format!("[{}]: {}", message.role, body));
    }
    for call in &message.tool_calls {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!(
            "[tool_call] {}({})",
            call.function.name, call.function.arguments
        ));
    }
    out
}
