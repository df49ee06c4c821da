use std::collections::VecDeque;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use uuid::Uuid;

const QUEUE_KEY: &str = "imagegen:queue";
const PROCESSING_KEY: &str = "imagegen:processing";

/// FIFO of job ids waiting to be submitted to the provider.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Pop the oldest job id and park it in the processing list.
    async fn dequeue(&self) -> Result<Option<Uuid>, QueueError>;

    /// Remove a job id from the processing list.
    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed dispatch queue.
pub struct RedisJobQueue {
    client: redis::Client,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl DispatchQueue for RedisJobQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, job_id.to_string())
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Uuid>, QueueError> {
        let mut conn = self.connection().await?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let job_id = payload
                    .parse()
                    .map_err(|_| QueueError::InvalidEntry(payload.clone()))?;
                Ok(Some(job_id))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, job_id.to_string())
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// In-process dispatch queue for tests.
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<MemoryQueueState>,
}

#[derive(Default)]
struct MemoryQueueState {
    pending: VecDeque<Uuid>,
    processing: Vec<Uuid>,
}

impl MemoryJobQueue {
    pub async fn in_flight(&self) -> Vec<Uuid> {
        self.state.lock().await.processing.clone()
    }
}

#[async_trait]
impl DispatchQueue for MemoryJobQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.state.lock().await.pending.push_back(job_id);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Uuid>, QueueError> {
        let mut state = self.state.lock().await;
        let next = state.pending.pop_front();
        if let Some(job_id) = next {
            state.processing.push(job_id);
        }
        Ok(next)
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.processing.iter().position(|id| *id == job_id) {
            state.processing.remove(pos);
        }
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Queue entry is not a job id: {0}")]
    InvalidEntry(String),
}
