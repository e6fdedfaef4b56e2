//! Base memory: an ordered message log behind a read-write lock.

use async_trait::async_trait;
use std::sync::RwLock;

use lattice_core::{Message, Result};

use crate::Memory;

/// Thread-safe ordered message log. `messages()` hands out a defensive
/// copy so callers can never mutate internal state; `clear()` keeps a
/// leading System message.
#[derive(Default)]
pub struct BaseMemory {
    messages: RwLock<Vec<Message>>,
}

impl BaseMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the log with a System prompt at index 0.
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: RwLock::new(vec![Message::system(prompt)]),
        }
    }
}

#[async_trait]
impl Memory for BaseMemory {
    async fn add(&self, message: Message) -> Result<()> {
        self.messages
            .write()
            .expect("memory lock poisoned")
            .push(message);
        Ok(())
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        Ok(self.messages.read().expect("memory lock poisoned").clone())
    }

    async fn clear(&self) -> Result<()> {
        let mut messages = self.messages.write().expect("memory lock poisoned");
        if messages.first().map(Message::is_system).unwrap_or(false) {
            messages.truncate(1);
        } else {
            messages.clear();
        }
        Ok(())
    }
}
