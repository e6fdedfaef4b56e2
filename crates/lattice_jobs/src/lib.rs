//! Job Engine
//!
//! A durable, at-least-once job queue over two per-queue primitives: a
//! ready list (push-left / blocking-pop-right, drained FIFO) and a
//! scheduled set keyed by due time, plus a per-id record store. The
//! client runs a scheduler task that promotes due jobs and a bounded
//! pool of worker tasks that dequeue, dispatch to registered handlers,
//! and apply the retry policy. A worker that dies mid-job leaves the
//! record `active`; handlers must therefore be idempotent.

pub mod backend;
pub mod client;
pub mod config;
pub mod job;
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use backend::{JobBackend, QueueStats};
pub use client::{handler_fn, JobClient, JobHandler};
pub use config::WorkerOptions;
pub use job::{JobInfo, JobRequest, JobStatus, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE};
pub use memory::MemoryJobBackend;

#[cfg(feature = "redis")]
pub use crate::redis::RedisJobBackend;
