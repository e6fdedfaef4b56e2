//! Redis job backend.
//!
//! Keys: `jobx:queue:{name}` (ready list, LPUSH/BRPOP),
//! `jobx:scheduled:{name}` (sorted set scored by unix seconds),
//! `jobx:job:{id}` (JSON record). Promotion runs as one Lua script so
//! the range-read, the pushes, and the removal are a single server-side
//! step. Blocking pops use a dedicated connection so they cannot stall
//! commands multiplexed on the shared one.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use lattice_core::{Error, Result};

use crate::backend::{JobBackend, QueueStats};
use crate::job::{JobInfo, JobRequest, JobStatus};

const PROMOTE_SCRIPT: &str = r#"
local moved = 0
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for i = 1, #due do
    redis.call('LPUSH', KEYS[1], due[i])
    moved = moved + 1
end
if moved > 0 then
    redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
end
return moved
"#;

fn queue_key(queue: &str) -> String {
    format!("jobx:queue:{queue}")
}

fn scheduled_key(queue: &str) -> String {
    format!("jobx:scheduled:{queue}")
}

fn job_key(id: &str) -> String {
    format!("jobx:job:{id}")
}

fn redis_err(err: redis::RedisError) -> Error {
    Error::external("redis operation failed").with_source(err)
}

pub struct RedisJobBackend {
    client: redis::Client,
    conn: ConnectionManager,
    promote: Script,
}

impl RedisJobBackend {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|err| Error::validation("invalid redis url").with_source(err))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(redis_err)?;
        Ok(Self {
            client,
            conn,
            promote: Script::new(PROMOTE_SCRIPT),
        })
    }

    async fn save(&self, record: &JobInfo) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(job_key(&record.id), json).await.map_err(redis_err)?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<JobInfo>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(job_key(id)).await.map_err(redis_err)?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn load_required(&self, id: &str) -> Result<JobInfo> {
        self.load(id)
            .await?
            .ok_or_else(|| Error::not_found("job not found").with_detail("job_id", id))
    }

    fn score_in(delay: Duration) -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0 + delay.as_secs_f64()
    }
}

#[async_trait]
impl JobBackend for RedisJobBackend {
    async fn enqueue(&self, request: JobRequest) -> Result<String> {
        let record = JobInfo::from_request(Uuid::new_v4().to_string(), &request, Utc::now());
        self.save(&record).await?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .lpush(queue_key(&request.queue), &record.id)
            .await
            .map_err(redis_err)?;
        Ok(record.id)
    }

    async fn enqueue_delayed(&self, request: JobRequest, delay: Duration) -> Result<String> {
        let record = JobInfo::from_request(Uuid::new_v4().to_string(), &request, Utc::now());
        self.save(&record).await?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(
                scheduled_key(&request.queue),
                &record.id,
                Self::score_in(delay),
            )
            .await
            .map_err(redis_err)?;
        Ok(record.id)
    }

    async fn dequeue(&self, queues: &[String], timeout: Duration) -> Result<Option<JobInfo>> {
        // Dedicated connection: BRPOP would otherwise block every
        // command sharing the multiplexed pipeline.
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)?;
        let keys: Vec<String> = queues.iter().map(|q| queue_key(q)).collect();
        let popped: Option<(String, String)> = conn
            .brpop(keys, timeout.as_secs_f64())
            .await
            .map_err(redis_err)?;
        let Some((_, id)) = popped else {
            return Ok(None);
        };

        let Some(mut record) = self.load(&id).await? else {
            // Malformed dequeue: list entry without a record.
            warn!(job_id = %id, "popped id without a record");
            return Ok(None);
        };
        record.status = JobStatus::Active;
        record.attempts += 1;
        record.updated_at = Utc::now();
        self.save(&record).await?;
        Ok(Some(record))
    }

    async fn complete(&self, id: &str, result: Vec<u8>) -> Result<()> {
        let mut record = self.load_required(id).await?;
        record.ensure_not_terminal()?;
        record.status = JobStatus::Completed;
        record.result = result;
        record.error = String::new();
        record.updated_at = Utc::now();
        self.save(&record).await
    }

    async fn fail(&self, id: &str, error: &str) -> Result<bool> {
        let mut record = self.load_required(id).await?;
        record.ensure_not_terminal()?;
        let should_retry = record.should_retry();
        record.status = if should_retry {
            JobStatus::Retrying
        } else {
            JobStatus::Failed
        };
        record.error = error.to_string();
        record.updated_at = Utc::now();
        self.save(&record).await?;
        Ok(should_retry)
    }

    async fn retry(&self, id: &str, delay: Duration) -> Result<()> {
        let record = self.load_required(id).await?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(scheduled_key(&record.queue), id, Self::score_in(delay))
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn promote_scheduled(&self, queues: &[String]) -> Result<usize> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let mut promoted = 0usize;
        for queue in queues {
            let mut conn = self.conn.clone();
            let moved: usize = self
                .promote
                .key(queue_key(queue))
                .key(scheduled_key(queue))
                .arg(now)
                .invoke_async(&mut conn)
                .await
                .map_err(redis_err)?;
            promoted += moved;
        }
        Ok(promoted)
    }

    async fn get_job(&self, id: &str) -> Result<JobInfo> {
        self.load_required(id).await
    }

    async fn queue_stats(&self, queue: &str) -> Result<QueueStats> {
        let mut conn = self.conn.clone();
        let ready: usize = conn.llen(queue_key(queue)).await.map_err(redis_err)?;
        let scheduled: usize = conn.zcard(scheduled_key(queue)).await.map_err(redis_err)?;
        Ok(QueueStats { ready, scheduled })
    }
}
