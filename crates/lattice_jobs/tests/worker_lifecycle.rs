//! End-to-end worker lifecycle against the in-process backend.
//!
//! Timing constants are scaled down from the production defaults so the
//! suite runs in a few seconds; assertions use generous deadlines to
//! stay robust on slow machines.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lattice_jobs::{
    handler_fn, JobClient, JobInfo, JobRequest, JobStatus, MemoryJobBackend, WorkerOptions,
};

fn fast_options(concurrency: usize) -> WorkerOptions {
    WorkerOptions {
        concurrency,
        queues: vec!["default".to_string()],
        poll_interval: Duration::from_millis(50),
        dequeue_timeout: Duration::from_millis(100),
        shutdown_timeout: Duration::from_secs(5),
        default_retry_delay: Duration::from_millis(50),
    }
}

async fn wait_for<F>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool>>>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn wait_for_status(
    client: &JobClient,
    id: &str,
    status: JobStatus,
    deadline: Duration,
) -> JobInfo {
    let start = tokio::time::Instant::now();
    loop {
        let job = client.get_job(id).await.unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            start.elapsed() < deadline,
            "job {id} stuck in {:?}, wanted {status:?}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// S1: immediate enqueue, handler succeeds, one attempt.
#[tokio::test]
async fn immediate_enqueue_completes_on_first_attempt() {
    let backend = Arc::new(MemoryJobBackend::new());
    let client = Arc::new(JobClient::with_options(backend, fast_options(1)));
    client.register("ok", handler_fn(|_job| async { Ok(b"done".to_vec()) }));

    let id = client
        .enqueue(JobRequest::new("ok", Vec::new()))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let runner = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.start(cancel).await })
    };

    let job = wait_for_status(&client, &id, JobStatus::Completed, Duration::from_secs(2)).await;
    assert_eq!(job.attempts, 1);
    assert_eq!(job.result, b"done");
    assert!(job.error.is_empty());

    cancel.cancel();
    runner.await.unwrap().unwrap();
}

/// S2: a handler that always fails exhausts its budget and the final
/// record carries the last error.
#[tokio::test]
async fn failing_handler_retries_then_fails_permanently() {
    let backend = Arc::new(MemoryJobBackend::new());
    let client = Arc::new(JobClient::with_options(backend, fast_options(1)));

    let invocations = Arc::new(AtomicU32::new(0));
    {
        let invocations = invocations.clone();
        client.register(
            "boom",
            handler_fn(move |_job| {
                let invocations = invocations.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("boom")
                }
            }),
        );
    }

    let id = client
        .enqueue(JobRequest::new("boom", Vec::new()).max_retries(2))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let runner = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.start(cancel).await })
    };

    let job = wait_for_status(&client, &id, JobStatus::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.attempts, 3);
    assert_eq!(job.error, "boom");
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    cancel.cancel();
    runner.await.unwrap().unwrap();
}

/// S3: a delayed job stays pending until its due time, then runs.
#[tokio::test]
async fn delayed_job_waits_for_promotion() {
    let backend = Arc::new(MemoryJobBackend::new());
    let client = Arc::new(JobClient::with_options(backend, fast_options(1)));
    client.register("ok", handler_fn(|_job| async { Ok(Vec::new()) }));

    let cancel = CancellationToken::new();
    let runner = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.start(cancel).await })
    };

    let id = client
        .enqueue_delayed(JobRequest::new("ok", Vec::new()), Duration::from_millis(400))
        .await
        .unwrap();

    // Well before the due time the job is untouched.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let job = client.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);

    let job = wait_for_status(&client, &id, JobStatus::Completed, Duration::from_secs(3)).await;
    assert_eq!(job.attempts, 1);

    cancel.cancel();
    runner.await.unwrap().unwrap();
}

/// A job whose type has no handler records the failure and is never
/// retried.
#[tokio::test]
async fn missing_handler_records_failure_without_retry() {
    let backend = Arc::new(MemoryJobBackend::new());
    let client = Arc::new(JobClient::with_options(backend, fast_options(1)));

    let id = client
        .enqueue(JobRequest::new("unregistered", Vec::new()))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let runner = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.start(cancel).await })
    };

    let ok = wait_for(Duration::from_secs(2), || {
        let client = client.clone();
        let id = id.clone();
        Box::pin(async move {
            let job = client.get_job(&id).await.unwrap();
            !job.error.is_empty()
        })
    })
    .await;
    assert!(ok, "failure was never recorded");

    let job = client.get_job(&id).await.unwrap();
    assert!(job.error.contains("no handler registered"));
    assert_eq!(job.attempts, 1);

    // No retry is scheduled: the attempt counter stays put.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.get_job(&id).await.unwrap().attempts, 1);

    cancel.cancel();
    runner.await.unwrap().unwrap();
}

/// Shutdown lets the in-flight handler finish before the client
/// returns.
#[tokio::test]
async fn shutdown_drains_the_running_handler() {
    let backend = Arc::new(MemoryJobBackend::new());
    let client = Arc::new(JobClient::with_options(backend, fast_options(1)));

    let started = Arc::new(tokio::sync::Notify::new());
    {
        let started = started.clone();
        client.register(
            "slow",
            handler_fn(move |_job| {
                let started = started.clone();
                async move {
                    // notify_one stores a permit, so the waiter cannot
                    // miss a wakeup that happens before it registers.
                    started.notify_one();
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    Ok(b"slow done".to_vec())
                }
            }),
        );
    }

    let id = client
        .enqueue(JobRequest::new("slow", Vec::new()))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let runner = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.start(cancel).await })
    };

    started.notified().await;
    cancel.cancel();
    runner.await.unwrap().unwrap();

    let job = client.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, b"slow done");
}

/// Jobs spread across several workers each complete exactly once.
#[tokio::test]
async fn concurrent_workers_complete_everything_once() {
    let backend = Arc::new(MemoryJobBackend::new());
    let client = Arc::new(JobClient::with_options(backend, fast_options(4)));

    let invocations = Arc::new(AtomicU32::new(0));
    {
        let invocations = invocations.clone();
        client.register(
            "count",
            handler_fn(move |_job| {
                let invocations = invocations.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Ok(Vec::new())
                }
            }),
        );
    }

    let mut ids = Vec::new();
    for _ in 0..12 {
        ids.push(
            client
                .enqueue(JobRequest::new("count", Vec::new()))
                .await
                .unwrap(),
        );
    }

    let cancel = CancellationToken::new();
    let runner = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.start(cancel).await })
    };

    for id in &ids {
        wait_for_status(&client, id, JobStatus::Completed, Duration::from_secs(3)).await;
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 12);

    cancel.cancel();
    runner.await.unwrap().unwrap();
}
