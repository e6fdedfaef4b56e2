//! Job client: handler registry, worker pool, scheduler, retry policy.
//!
//! `start` launches one scheduler task (promotes due jobs every poll
//! interval) and `concurrency` worker tasks (blocking-pop, dispatch,
//! record outcome), then blocks until the cancellation token fires.
//! Workers finish their in-flight handler before exiting; anything
//! still running past the shutdown timeout is abandoned and its job
//! stays `active` for out-of-band recovery.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lattice_core::{Error, Result};

use crate::backend::JobBackend;
use crate::config::WorkerOptions;
use crate::job::{JobInfo, JobRequest};

/// A unit of work bound to a job type. Handlers run at-least-once and
/// must be idempotent.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one job. The returned bytes become the job's recorded
    /// result; an error consumes one retry.
    async fn handle(&self, job: &JobInfo) -> anyhow::Result<Vec<u8>>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobInfo) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send,
{
    async fn handle(&self, job: &JobInfo) -> anyhow::Result<Vec<u8>> {
        (self.f)(job.clone()).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

type HandlerRegistry = Arc<RwLock<HashMap<String, Arc<dyn JobHandler>>>>;

pub struct JobClient {
    backend: Arc<dyn JobBackend>,
    handlers: HandlerRegistry,
    options: WorkerOptions,
    running: AtomicBool,
}

impl JobClient {
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self::with_options(backend, WorkerOptions::default())
    }

    pub fn with_options(backend: Arc<dyn JobBackend>, options: WorkerOptions) -> Self {
        Self {
            backend,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            options,
            running: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Bind a handler to a job type. Re-registering a type replaces the
    /// previous handler.
    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .insert(job_type.into(), handler);
    }

    /// Enqueue for immediate dispatch. Fills queue/retry defaults.
    pub async fn enqueue(&self, request: JobRequest) -> Result<String> {
        self.backend.enqueue(request.normalized()).await
    }

    /// Enqueue for dispatch no earlier than `delay` from now.
    pub async fn enqueue_delayed(&self, request: JobRequest, delay: Duration) -> Result<String> {
        self.backend.enqueue_delayed(request.normalized(), delay).await
    }

    pub async fn get_job(&self, id: &str) -> Result<JobInfo> {
        self.backend.get_job(id).await
    }

    /// Ready/scheduled depth of one queue.
    pub async fn queue_stats(&self, queue: &str) -> Result<crate::backend::QueueStats> {
        self.backend.queue_stats(queue).await
    }

    /// Run the scheduler and worker pool until `cancel` fires, then
    /// drain for up to the shutdown timeout. Re-entry while running is
    /// a Conflict.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::conflict("job client already running"));
        }
        info!(
            concurrency = self.options.concurrency,
            queues = ?self.options.queues,
            "job client starting"
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(scheduler_loop(
            self.backend.clone(),
            self.options.clone(),
            cancel.clone(),
        ));
        for worker_id in 0..self.options.concurrency {
            tasks.spawn(worker_loop(
                worker_id,
                self.backend.clone(),
                self.handlers.clone(),
                self.options.clone(),
                cancel.clone(),
            ));
        }

        cancel.cancelled().await;
        debug!("job client draining");

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.options.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.options.shutdown_timeout,
                "shutdown timeout exceeded; abandoning running handlers"
            );
            tasks.abort_all();
        }

        self.running.store(false, Ordering::SeqCst);
        info!("job client stopped");
        Ok(())
    }
}

async fn scheduler_loop(
    backend: Arc<dyn JobBackend>,
    options: WorkerOptions,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(options.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match backend.promote_scheduled(&options.queues).await {
                    Ok(0) => {}
                    Ok(promoted) => debug!(promoted, "scheduled jobs promoted"),
                    // Logged and retried next tick; promotion is not
                    // allowed to kill the scheduler.
                    Err(err) => warn!(error = %err, "scheduled promotion failed"),
                }
            }
        }
    }
    debug!("scheduler stopped");
}

async fn worker_loop(
    worker_id: usize,
    backend: Arc<dyn JobBackend>,
    handlers: HandlerRegistry,
    options: WorkerOptions,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let popped = tokio::select! {
            _ = cancel.cancelled() => break,
            result = backend.dequeue(&options.queues, options.dequeue_timeout) => result,
        };
        match popped {
            Ok(Some(job)) => {
                process_job(backend.as_ref(), &handlers, &options, job).await;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(worker_id, error = %err, "dequeue failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(options.poll_interval) => {}
                }
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn process_job(
    backend: &dyn JobBackend,
    handlers: &HandlerRegistry,
    options: &WorkerOptions,
    job: JobInfo,
) {
    let handler = handlers
        .read()
        .expect("handler registry lock poisoned")
        .get(&job.job_type)
        .cloned();
    let Some(handler) = handler else {
        // Unrecoverable: without a handler a rerun cannot succeed, so
        // no retry is scheduled.
        warn!(job_id = %job.id, job_type = %job.job_type, "no handler registered");
        let message = format!("no handler registered for job type: {}", job.job_type);
        if let Err(err) = backend.fail(&job.id, &message).await {
            error!(job_id = %job.id, error = %err, "failed to record missing-handler failure");
        }
        return;
    };

    debug!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, "job dispatched");
    match handler.handle(&job).await {
        Ok(result) => {
            if let Err(err) = backend.complete(&job.id, result).await {
                error!(job_id = %job.id, error = %err, "failed to record completion");
            }
        }
        Err(handler_err) => {
            let message = handler_err.to_string();
            match backend.fail(&job.id, &message).await {
                Ok(true) => {
                    if let Err(err) = backend.retry(&job.id, options.default_retry_delay).await {
                        error!(job_id = %job.id, error = %err, "failed to schedule retry");
                    }
                }
                Ok(false) => {
                    info!(job_id = %job.id, attempts = job.attempts, error = %message, "job failed permanently");
                }
                Err(err) => {
                    error!(job_id = %job.id, error = %err, "failed to record failure");
                }
            }
        }
    }
}
