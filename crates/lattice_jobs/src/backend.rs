//! Backend contract for the job queue.
//!
//! A backend owns three structures: a per-queue ready list drained
//! FIFO, a per-queue scheduled set keyed by due time, and a per-id
//! record store. Promotion of due jobs must be atomic per queue, and a
//! blocking pop must hand any given id to at most one caller.

use async_trait::async_trait;
use std::time::Duration;

use lattice_core::Result;

use crate::job::{JobInfo, JobRequest};

/// Queue depth snapshot for dashboards and stall detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub scheduled: usize,
}

#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Assign an id, persist a pending record, and append the id to the
    /// queue's ready list. The request arrives with defaults filled.
    async fn enqueue(&self, request: JobRequest) -> Result<String>;

    /// Like `enqueue`, but the id goes to the queue's scheduled set
    /// with due time `now + delay` and only reaches the ready list via
    /// promotion.
    async fn enqueue_delayed(&self, request: JobRequest, delay: Duration) -> Result<String>;

    /// Block up to `timeout` for an id on any of the queues' ready
    /// lists. On success the record is marked active, its attempt
    /// counter incremented, and returned. `None` on timeout. A popped
    /// id without a record is a malformed dequeue and is skipped.
    async fn dequeue(&self, queues: &[String], timeout: Duration) -> Result<Option<JobInfo>>;

    /// Record success: status completed, result stored, error cleared.
    async fn complete(&self, id: &str, result: Vec<u8>) -> Result<()>;

    /// Record failure and report whether the retry budget allows
    /// another attempt (status becomes retrying) or is spent (failed).
    /// Does not re-enqueue; the caller invokes [`JobBackend::retry`]
    /// when this returns true.
    async fn fail(&self, id: &str, error: &str) -> Result<bool>;

    /// Put the id back on its queue's scheduled set with due time
    /// `now + delay`.
    async fn retry(&self, id: &str, delay: Duration) -> Result<()>;

    /// Atomically move every due id from each queue's scheduled set to
    /// its ready list, in ascending due order. Returns how many moved.
    async fn promote_scheduled(&self, queues: &[String]) -> Result<usize>;

    /// Load a record by id; unknown ids are NotFound.
    async fn get_job(&self, id: &str) -> Result<JobInfo>;

    /// Ready and scheduled depth of one queue.
    async fn queue_stats(&self, queue: &str) -> Result<QueueStats>;
}
