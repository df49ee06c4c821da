use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::job::{Job, JobPatch, JobRequest, JobStatus};
use crate::models::user::UserProfile;
use crate::services::job_store::{JobStore, StoreError, UpdateOutcome};
use crate::services::provider::{Callback, ImageProvider};
use crate::services::queue::{DispatchQueue, QueueError};

/// Queued generation: jobs are accepted immediately, submitted by the worker
/// and finished by provider callbacks through the webhook relay.
pub struct QueueDispatcher {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn DispatchQueue>,
    provider: Arc<dyn ImageProvider>,
    webhook_url: Option<String>,
}

impl QueueDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn DispatchQueue>,
        provider: Arc<dyn ImageProvider>,
        webhook_url: Option<String>,
    ) -> Self {
        Self {
            store,
            queue,
            provider,
            webhook_url,
        }
    }

    /// Record a new job and put it on the queue.
    pub async fn enqueue(&self, user: &UserProfile, request: JobRequest) -> Result<Job, DispatchError> {
        let job = Job::new(user.id, request);
        self.store.create(&job).await?;
        self.queue.enqueue(job.id).await?;

        metrics::counter!("imagegen_jobs_total", "channel" => "queue").increment(1);
        tracing::info!(job_id = %job.id, user_id = %user.id, kind = job.request.kind(), "Job enqueued");
        Ok(job)
    }

    pub async fn queue_depth(&self) -> Result<u64, DispatchError> {
        Ok(self.queue.depth().await?)
    }

    pub async fn health_check(&self) -> Result<(), DispatchError> {
        Ok(self.queue.health_check().await?)
    }

    /// Submit the next queued job to the provider.
    /// Returns Ok(true) if a queue entry was consumed, Ok(false) if the queue was empty.
    pub async fn process_next(&self) -> Result<bool, DispatchError> {
        let Some(job_id) = self.queue.dequeue().await? else {
            return Ok(false);
        };

        let result = self.submit(job_id).await;

        // The entry is acknowledged whatever happened; a failed submission is
        // recorded on the job itself.
        self.queue.complete(job_id).await?;
        result.map(|_| true)
    }

    async fn submit(&self, job_id: Uuid) -> Result<(), DispatchError> {
        match self
            .store
            .update_if(job_id, &[JobStatus::Enqueued], &JobPatch::started(Utc::now()))
            .await
        {
            Ok(UpdateOutcome::Applied) => {}
            Ok(UpdateOutcome::Rejected(status)) => {
                tracing::info!(job_id = %job_id, status = %status, "Skipping job that already left the queue");
                return Ok(());
            }
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(job_id = %job_id, "Queued job no longer exists");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(StoreError::NotFound(job_id))?;

        let callback = Callback {
            reference: job.id.to_string(),
            webhook_override: self.webhook_url.clone(),
        };
        let submitted = match &job.request {
            JobRequest::Imagine { prompt } => self.provider.imagine(prompt, &callback).await,
            JobRequest::ButtonCommand { button, message_id } => {
                self.provider.button(button, message_id, &callback).await
            }
        };

        match submitted {
            Ok(message_id) => {
                tracing::info!(job_id = %job.id, message_id = %message_id, "Job submitted to provider");
                self.store
                    .update(
                        job.id,
                        &JobPatch {
                            message_id: Some(message_id),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Provider rejected queued job");
                metrics::counter!("imagegen_jobs_failed", "reason" => "submission").increment(1);
                self.store
                    .update_if(
                        job.id,
                        &[JobStatus::Processing],
                        &JobPatch::failed(format!("Provider submission failed: {e}")),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
