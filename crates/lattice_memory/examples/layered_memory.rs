//! The full memory stack wired together: base log -> token-budgeted
//! summarization -> contextual retrieval, with stub collaborators in
//! place of real LLM/embedding providers.
//!
//! Run with `cargo run -p lattice_memory --example layered_memory`.

use std::sync::Arc;

use lattice_core::Message;
use lattice_memory::{
    BaseMemory, ContextualMemory, ContextualMemoryConfig, Memory, SummarizingMemory,
    SummarizingMemoryConfig,
};
use lattice_test_utils::{HashEmbedder, ScriptedChatModel};
use lattice_vector::{DocumentStore, MemoryBackendConfig, VectorStore};

const DIMENSION: usize = 128;

#[tokio::main]
async fn main() -> lattice_core::Result<()> {
    let vector_store = Arc::new(VectorStore::in_memory(MemoryBackendConfig::new(DIMENSION)));
    let documents = Arc::new(DocumentStore::new(
        vector_store,
        Arc::new(HashEmbedder::new(DIMENSION)),
    ));

    let base = Arc::new(BaseMemory::with_system_prompt(
        "You are the on-call assistant for the lattice platform.",
    ));
    let mut summarizing_config = SummarizingMemoryConfig::new(60);
    summarizing_config.recent_to_keep = 2;
    let summarizing = Arc::new(
        SummarizingMemory::new(
            base,
            Arc::new(ScriptedChatModel::replying(
                "The user audited queue retries and vector namespaces.",
            )),
            summarizing_config,
        )
        .with_on_summarize(|count, _text| println!("(compacted {count} old turns)")),
    );
    let memory = ContextualMemory::with_config(
        summarizing,
        documents,
        ContextualMemoryConfig {
            top_k: 2,
            recent_to_skip: 2,
            ..ContextualMemoryConfig::default()
        },
    );

    let turns = [
        Message::user("how do delayed jobs reach the ready list?"),
        Message::assistant("a scheduler tick promotes every due id atomically"),
        Message::user("and what bounds retries?"),
        Message::assistant("a job fails permanently once attempts exceed max_retries"),
        Message::user("do vector namespaces isolate tenants?"),
        Message::assistant("yes, queries never cross the namespace boundary"),
        Message::user("remind me how promotion works"),
    ];
    for message in turns {
        memory.add(message).await?;
    }

    println!("--- prompt context ---");
    for message in memory.messages().await? {
        let marker = if message.metadata_flag("contextual_memory") {
            " [injected]"
        } else if message.metadata_flag("summarized") {
            " [summary]"
        } else {
            ""
        };
        println!("{}{}: {}", message.role, marker, message.content);
    }
    Ok(())
}
