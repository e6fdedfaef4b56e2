//! The junction of all three engines: a job handler drives a memory
//! stack, which embeds turns into the vector store and injects
//! retrieved context on read.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lattice_core::Message;
use lattice_jobs::{handler_fn, JobClient, JobRequest, JobStatus, MemoryJobBackend, WorkerOptions};
use lattice_memory::{BaseMemory, ContextualMemory, ContextualMemoryConfig, Memory};
use lattice_test_utils::HashEmbedder;
use lattice_vector::{DocumentStore, MemoryBackendConfig, VectorStore};

const DIMENSION: usize = 64;

#[tokio::test]
async fn job_handler_drives_the_memory_stack() {
    let vector_store = Arc::new(VectorStore::in_memory(MemoryBackendConfig::new(DIMENSION)));
    let documents = Arc::new(DocumentStore::new(
        vector_store.clone(),
        Arc::new(HashEmbedder::new(DIMENSION)),
    ));
    let memory: Arc<ContextualMemory> = Arc::new(ContextualMemory::with_config(
        Arc::new(BaseMemory::with_system_prompt("ingestion assistant")),
        documents,
        ContextualMemoryConfig {
            // Two of the three turns mention the retry queue, so the
            // top-2 injection always carries it.
            top_k: 2,
            recent_to_skip: 0,
            ..ContextualMemoryConfig::default()
        },
    ));

    let options = WorkerOptions {
        concurrency: 1,
        queues: vec!["default".to_string()],
        poll_interval: Duration::from_millis(50),
        dequeue_timeout: Duration::from_millis(100),
        shutdown_timeout: Duration::from_secs(5),
        default_retry_delay: Duration::from_millis(50),
    };
    let client = Arc::new(JobClient::with_options(
        Arc::new(MemoryJobBackend::new()),
        options,
    ));

    // The handler records each payload as a user turn, then reads the
    // assembled prompt context back.
    {
        let memory = memory.clone();
        client.register(
            "record_turn",
            handler_fn(move |job| {
                let memory = memory.clone();
                async move {
                    let text = String::from_utf8(job.payload.clone())?;
                    memory.add(Message::user(text)).await?;
                    let context = memory.messages().await?;
                    Ok(context.len().to_string().into_bytes())
                }
            }),
        );
    }

    let cancel = CancellationToken::new();
    let runner = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.start(cancel).await })
    };

    let payloads = [
        "the retry queue backed up overnight",
        "vector upserts moved tenants between namespaces",
        "what happened to the retry queue?",
    ];
    let mut last_id = String::new();
    for payload in payloads {
        last_id = client
            .enqueue(JobRequest::new("record_turn", payload.as_bytes().to_vec()))
            .await
            .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let job = client.get_job(&last_id).await.unwrap();
        if job.status == JobStatus::Completed {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never completed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // All three turns were indexed through the document store.
    assert_eq!(memory.indexed_count(), 3);
    assert_eq!(vector_store.stats().await.unwrap().vector_count, 3);

    // Reading the stack now injects retrieved context after the system
    // prompt.
    let messages = memory.messages().await.unwrap();
    assert_eq!(messages[0].role, lattice_core::Role::System);
    assert!(messages[1].metadata_flag("contextual_memory"));
    assert!(messages[1].content.contains("retry queue"));
}
