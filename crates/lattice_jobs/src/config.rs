//! Worker configuration.
//!
//! Defaults match production expectations; every knob can be overridden
//! through `JOBX_*` environment variables (durations in seconds,
//! fractions allowed).

use std::time::Duration;

use lattice_core::{Error, Result};

use crate::job::DEFAULT_QUEUE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Worker tasks per client.
    pub concurrency: usize,
    /// Queues a single client polls.
    pub queues: Vec<String>,
    /// Scheduler tick and worker idle sleep.
    pub poll_interval: Duration,
    /// Blocking-pop timeout.
    pub dequeue_timeout: Duration,
    /// Drain grace period on shutdown.
    pub shutdown_timeout: Duration,
    /// Delay applied when a failed job is retried.
    pub default_retry_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queues: vec![DEFAULT_QUEUE.to_string()],
            poll_interval: Duration::from_secs(1),
            dequeue_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            default_retry_delay: Duration::from_secs(30),
        }
    }
}

impl WorkerOptions {
    /// Options from `JOBX_*` environment variables, defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Same as [`WorkerOptions::from_env`] with an injectable source,
    /// so parsing is testable without touching process state.
    pub fn from_env_with(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();

        if let Some(raw) = get("JOBX_CONCURRENCY") {
            options.concurrency = parse_usize("JOBX_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = get("JOBX_QUEUES") {
            let queues: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect();
            if queues.is_empty() {
                return Err(Error::validation("queue list is empty")
                    .with_detail("variable", "JOBX_QUEUES")
                    .with_detail("value", raw));
            }
            options.queues = queues;
        }
        if let Some(raw) = get("JOBX_POLL_INTERVAL") {
            options.poll_interval = parse_duration("JOBX_POLL_INTERVAL", &raw)?;
        }
        if let Some(raw) = get("JOBX_DEQUEUE_TIMEOUT") {
            options.dequeue_timeout = parse_duration("JOBX_DEQUEUE_TIMEOUT", &raw)?;
        }
        if let Some(raw) = get("JOBX_SHUTDOWN_TIMEOUT") {
            options.shutdown_timeout = parse_duration("JOBX_SHUTDOWN_TIMEOUT", &raw)?;
        }
        if let Some(raw) = get("JOBX_DEFAULT_RETRY_DELAY") {
            options.default_retry_delay = parse_duration("JOBX_DEFAULT_RETRY_DELAY", &raw)?;
        }
        Ok(options)
    }
}

fn parse_usize(name: &str, raw: &str) -> Result<usize> {
    let value: usize = raw.trim().parse().map_err(|_| {
        Error::validation("expected a positive integer")
            .with_detail("variable", name)
            .with_detail("value", raw)
    })?;
    if value == 0 {
        return Err(Error::validation("value must be at least 1")
            .with_detail("variable", name)
            .with_detail("value", raw));
    }
    Ok(value)
}

fn parse_duration(name: &str, raw: &str) -> Result<Duration> {
    let seconds: f64 = raw.trim().parse().map_err(|_| {
        Error::validation("expected a duration in seconds")
            .with_detail("variable", name)
            .with_detail("value", raw)
    })?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(Error::validation("duration must be non-negative")
            .with_detail("variable", name)
            .with_detail("value", raw));
    }
    Ok(Duration::from_secs_f64(seconds))
}
