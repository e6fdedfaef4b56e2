//! Minimal worker wiring: in-process backend, two handlers, one
//! delayed job, graceful drain.
//!
//! Run with `cargo run -p lattice_jobs --example worker`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lattice_jobs::{handler_fn, JobClient, JobRequest, MemoryJobBackend, WorkerOptions};
use lattice_logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LogConfig {
        app_name: "worker-example",
        verbose: true,
    })?;

    let options = WorkerOptions {
        concurrency: 2,
        poll_interval: Duration::from_millis(200),
        default_retry_delay: Duration::from_millis(500),
        ..WorkerOptions::default()
    };
    let client = Arc::new(JobClient::with_options(
        Arc::new(MemoryJobBackend::new()),
        options,
    ));

    client.register(
        "greet",
        handler_fn(|job| async move {
            let name = String::from_utf8_lossy(&job.payload).to_string();
            println!("hello, {name}!");
            Ok(format!("greeted {name}").into_bytes())
        }),
    );
    client.register(
        "flaky",
        handler_fn(|job| async move {
            if job.attempts < 2 {
                anyhow::bail!("transient failure on attempt {}", job.attempts);
            }
            Ok(b"recovered".to_vec())
        }),
    );

    let greet = client
        .enqueue(JobRequest::new("greet", b"lattice".to_vec()))
        .await?;
    let flaky = client
        .enqueue(JobRequest::new("flaky", Vec::new()).max_retries(3))
        .await?;
    let delayed = client
        .enqueue_delayed(
            JobRequest::new("greet", b"later".to_vec()),
            Duration::from_secs(1),
        )
        .await?;

    let cancel = CancellationToken::new();
    let runner = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.start(cancel).await })
    };

    // Give the pool time to work through everything, then drain.
    tokio::time::sleep(Duration::from_secs(3)).await;
    cancel.cancel();
    runner.await??;

    for id in [&greet, &flaky, &delayed] {
        let job = client.get_job(id).await?;
        println!(
            "{} [{}] status={} attempts={} result={:?}",
            job.id,
            job.job_type,
            job.status,
            job.attempts,
            String::from_utf8_lossy(&job.result),
        );
    }
    Ok(())
}
