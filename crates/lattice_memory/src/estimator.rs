//! Pluggable token estimation.
//!
//! The default is deliberately coarse: four characters per token plus a
//! fixed per-message overhead. Implementers can swap in a real
//! tokenizer without touching the compaction logic.

use lattice_core::Message;

/// Estimates the prompt-token cost of a message list.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, messages: &[Message]) -> usize;
}

/// Character-count fallback estimator. Counts rendered body, the
/// author name, and tool-call names and arguments.
#[derive(Debug, Clone, Copy)]
pub struct CharTokenEstimator {
    pub chars_per_token: usize,
    pub per_message_overhead: usize,
}

impl Default for CharTokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: 4,
            per_message_overhead: 4,
        }
    }
}

impl TokenEstimator for CharTokenEstimator {
    fn estimate(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|message| {
                let mut chars = message.rendered_content().chars().count();
                if let Some(name) = &message.name {
                    chars += name.chars().count();
                }
                for call in &message.tool_calls {
                    chars += call.function.name.chars().count();
                    chars += call.function.arguments.chars().count();
                }
                chars.div_ceil(self.chars_per_token) + self.per_message_overhead
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::{FunctionCall, Message, ToolCall};

    #[test]
    fn empty_message_costs_only_overhead() {
        let estimator = CharTokenEstimator::default();
        assert_eq!(estimator.estimate(&[Message::user("")]), 4);
    }

    #[test]
    fn counts_name_and_tool_call_arguments() {
        let estimator = CharTokenEstimator::default();
        let plain = Message::user("12345678");
        assert_eq!(estimator.estimate(std::slice::from_ref(&plain)), 2 + 4);

        let mut with_call = plain.clone().with_name("bob");
        with_call.tool_calls.push(ToolCall {
            id: "c".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "f".into(),
                arguments: "{}".into(),
            },
        });
        // 8 + 3 + 1 + 2 = 14 chars -> ceil(14/4) = 4 tokens + overhead.
        assert_eq!(estimator.estimate(&[with_call]), 4 + 4);
    }

    #[test]
    fn custom_ratio_changes_the_estimate() {
        let estimator = CharTokenEstimator {
            chars_per_token: 1,
            per_message_overhead: 0,
        };
        assert_eq!(estimator.estimate(&[Message::user("abcd")]), 4);
    }
}
