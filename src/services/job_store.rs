use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::{Job, JobPatch, JobStatus};

const KEY_PREFIX: &str = "imagegen:job:";

/// Existence check, status guard, merge and expiry in one atomic step.
///
/// KEYS[1] job hash, ARGV[1] allowed prior statuses (comma separated, empty
/// for any), ARGV[2] TTL seconds (0 keeps the key persistent), ARGV[3..]
/// field/value pairs.
const CONDITIONAL_UPDATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {0, ''}
end
local current = redis.call('HGET', KEYS[1], 'status') or ''
if ARGV[1] ~= '' then
  local allowed = false
  for status in string.gmatch(ARGV[1], '[^,]+') do
    if status == current then
      allowed = true
    end
  end
  if not allowed then
    return {-1, current}
  end
end
if #ARGV > 2 then
  redis.call('HSET', KEYS[1], unpack(ARGV, 3))
end
if tonumber(ARGV[2]) > 0 then
  redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return {1, current}
"#;

/// Result of a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The job was in a status outside the allowed set; nothing was written.
    Rejected(JobStatus),
}

/// Keyed persistence for in-flight generation jobs.
///
/// All mutations are partial merges so that the orchestrator and the webhook
/// relay never overwrite each other's fields.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Merge `patch` only if the job's current status is one of `allowed`
    /// (any status when `allowed` is empty).
    async fn update_if(
        &self,
        id: Uuid,
        allowed: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Unconditional partial merge.
    async fn update(&self, id: Uuid, patch: &JobPatch) -> Result<(), StoreError> {
        self.update_if(id, &[], patch).await.map(|_| ())
    }

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Redis-backed job store, one hash per job.
pub struct RedisJobStore {
    client: redis::Client,
    terminal_ttl: Duration,
    script: redis::Script,
}

impl RedisJobStore {
    pub fn new(redis_url: &str, terminal_ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self {
            client,
            terminal_ttl,
            script: redis::Script::new(CONDITIONAL_UPDATE_SCRIPT),
        })
    }

    fn key(id: Uuid) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Redis)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let fields = job.to_fields()?;
        conn.hset_multiple::<_, _, _, ()>(Self::key(job.id), fields.as_slice())
            .await
            .map_err(StoreError::Redis)?;
        if job.status.is_terminal() {
            conn.expire::<_, ()>(Self::key(job.id), self.terminal_ttl.as_secs() as i64)
                .await
                .map_err(StoreError::Redis)?;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> =
            conn.hgetall(Self::key(id)).await.map_err(StoreError::Redis)?;

        if fields.is_empty() {
            return Ok(None);
        }
        match Job::from_fields(&fields) {
            Some(job) => Ok(Some(job)),
            None => Err(StoreError::Corrupt(id)),
        }
    }

    async fn update_if(
        &self,
        id: Uuid,
        allowed: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut conn = self.connection().await?;

        let allowed = allowed
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let ttl = if patch.is_terminal() {
            self.terminal_ttl.as_secs()
        } else {
            0
        };

        let mut invocation = self.script.key(Self::key(id));
        invocation.arg(allowed).arg(ttl);
        for (field, value) in patch.to_fields()? {
            invocation.arg(field).arg(value);
        }

        let (code, current): (i64, String) = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::Redis)?;

        match code {
            1 => Ok(UpdateOutcome::Applied),
            0 => Err(StoreError::NotFound(id)),
            _ => {
                let status = current.parse().map_err(|_| StoreError::Corrupt(id))?;
                Ok(UpdateOutcome::Rejected(status))
            }
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(StoreError::Redis)?;
        Ok(())
    }
}

/// In-process job store for tests and single-node development runs.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, StoredJob>>,
    terminal_ttl: Duration,
}

struct StoredJob {
    job: Job,
    expires_at: Option<Instant>,
}

impl StoredJob {
    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

impl MemoryJobStore {
    pub fn new(terminal_ttl: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            terminal_ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.values().filter(|j| j.is_live()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(86_400))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        let expires_at = job
            .status
            .is_terminal()
            .then(|| Instant::now() + self.terminal_ttl);
        self.jobs.write().await.insert(
            job.id,
            StoredJob {
                job: job.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let live = jobs.get(&id).map(|stored| stored.is_live());
        match live {
            Some(true) => Ok(jobs.get(&id).map(|stored| stored.job.clone())),
            Some(false) => {
                jobs.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn update_if(
        &self,
        id: Uuid,
        allowed: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut jobs = self.jobs.write().await;
        if !jobs.get(&id).is_some_and(StoredJob::is_live) {
            jobs.remove(&id);
            return Err(StoreError::NotFound(id));
        }
        let stored = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if !allowed.is_empty() && !allowed.contains(&stored.job.status) {
            return Ok(UpdateOutcome::Rejected(stored.job.status));
        }

        stored.job.apply(patch);
        if patch.is_terminal() {
            stored.expires_at = Some(Instant::now() + self.terminal_ttl);
        }
        Ok(UpdateOutcome::Applied)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {0} has an unreadable record")]
    Corrupt(Uuid),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
