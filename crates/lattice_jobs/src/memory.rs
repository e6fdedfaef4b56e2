//! In-process job backend.
//!
//! All three structures live under one mutex, which makes promotion and
//! the pop-then-mark sequence trivially atomic. Blocking pops wait on a
//! `Notify` with a bounded re-check interval so a lost wakeup can only
//! delay a worker, never strand it.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use lattice_core::{Error, Result};

use crate::backend::{JobBackend, QueueStats};
use crate::job::{JobInfo, JobRequest, JobStatus};

/// Upper bound between wakeup re-checks while blocked on a pop.
const POP_RECHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct State {
    records: HashMap<String, JobInfo>,
    /// Ready lists: push-back on enqueue, pop-front on dequeue (FIFO).
    ready: HashMap<String, VecDeque<String>>,
    /// Scheduled sets ordered by (due_millis, id).
    scheduled: HashMap<String, BTreeSet<(i64, String)>>,
}

#[derive(Default)]
pub struct MemoryJobBackend {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryJobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_record(state: &mut State, request: &JobRequest) -> JobInfo {
        let id = Uuid::new_v4().to_string();
        let record = JobInfo::from_request(id, request, Utc::now());
        state.records.insert(record.id.clone(), record.clone());
        record
    }

    /// Pop-and-mark under the lock; at most one caller can observe any
    /// given id.
    fn try_pop(&self, queues: &[String]) -> Option<JobInfo> {
        let mut guard = self.state.lock().expect("job state lock poisoned");
        let state = &mut *guard;
        for queue in queues {
            let Some(ready) = state.ready.get_mut(queue) else {
                continue;
            };
            while let Some(id) = ready.pop_front() {
                match state.records.get_mut(&id) {
                    Some(record) => {
                        record.status = JobStatus::Active;
                        record.attempts += 1;
                        record.updated_at = Utc::now();
                        return Some(record.clone());
                    }
                    None => {
                        // Malformed dequeue: the list held an id with no
                        // record. Skip it and keep draining.
                        warn!(job_id = %id, queue, "popped id without a record");
                        continue;
                    }
                }
            }
        }
        None
    }

    fn record_mut<'a>(state: &'a mut State, id: &str) -> Result<&'a mut JobInfo> {
        state
            .records
            .get_mut(id)
            .ok_or_else(|| Error::not_found("job not found").with_detail("job_id", id))
    }

    fn schedule(state: &mut State, queue: &str, id: String, delay: Duration) {
        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        state
            .scheduled
            .entry(queue.to_string())
            .or_default()
            .insert((due, id));
    }
}

#[async_trait]
impl JobBackend for MemoryJobBackend {
    async fn enqueue(&self, request: JobRequest) -> Result<String> {
        let id = {
            let mut state = self.state.lock().expect("job state lock poisoned");
            let record = Self::insert_record(&mut state, &request);
            state
                .ready
                .entry(request.queue.clone())
                .or_default()
                .push_back(record.id.clone());
            record.id
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn enqueue_delayed(&self, request: JobRequest, delay: Duration) -> Result<String> {
        let mut state = self.state.lock().expect("job state lock poisoned");
        let record = Self::insert_record(&mut state, &request);
        Self::schedule(&mut state, &request.queue, record.id.clone(), delay);
        Ok(record.id)
    }

    async fn dequeue(&self, queues: &[String], timeout: Duration) -> Result<Option<JobInfo>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_pop(queues) {
                return Ok(Some(job));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = POP_RECHECK_INTERVAL.min(deadline - now);
            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn complete(&self, id: &str, result: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().expect("job state lock poisoned");
        let record = Self::record_mut(&mut state, id)?;
        record.ensure_not_terminal()?;
        record.status = JobStatus::Completed;
        record.result = result;
        record.error = String::new();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<bool> {
        let mut state = self.state.lock().expect("job state lock poisoned");
        let record = Self::record_mut(&mut state, id)?;
        record.ensure_not_terminal()?;
        let should_retry = record.should_retry();
        record.status = if should_retry {
            JobStatus::Retrying
        } else {
            JobStatus::Failed
        };
        record.error = error.to_string();
        record.updated_at = Utc::now();
        Ok(should_retry)
    }

    async fn retry(&self, id: &str, delay: Duration) -> Result<()> {
        let mut state = self.state.lock().expect("job state lock poisoned");
        let queue = Self::record_mut(&mut state, id)?.queue.clone();
        Self::schedule(&mut state, &queue, id.to_string(), delay);
        Ok(())
    }

    async fn promote_scheduled(&self, queues: &[String]) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let mut promoted = 0;
        {
            let mut state = self.state.lock().expect("job state lock poisoned");
            for queue in queues {
                let Some(scheduled) = state.scheduled.get_mut(queue) else {
                    continue;
                };
                // Ascending split: everything strictly after `now` stays.
                let keep = scheduled.split_off(&(now + 1, String::new()));
                let due = std::mem::replace(scheduled, keep);
                if due.is_empty() {
                    continue;
                }
                let ready = state.ready.entry(queue.clone()).or_default();
                for (_, id) in due {
                    ready.push_back(id);
                    promoted += 1;
                }
            }
        }
        if promoted > 0 {
            self.notify.notify_waiters();
        }
        Ok(promoted)
    }

    async fn get_job(&self, id: &str) -> Result<JobInfo> {
        let state = self.state.lock().expect("job state lock poisoned");
        state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("job not found").with_detail("job_id", id))
    }

    async fn queue_stats(&self, queue: &str) -> Result<QueueStats> {
        let state = self.state.lock().expect("job state lock poisoned");
        Ok(QueueStats {
            ready: state.ready.get(queue).map(VecDeque::len).unwrap_or(0),
            scheduled: state.scheduled.get(queue).map(BTreeSet::len).unwrap_or(0),
        })
    }
}
