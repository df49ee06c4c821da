//! Reconciles provider callbacks into the job store.
//!
//! The provider retries callbacks that are not acknowledged, so nothing in
//! here is allowed to surface an error to the HTTP layer.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::job::{Job, JobPatch, JobStatus, JobTimings};
use crate::models::webhook::{WebhookPayload, WebhookStatus};
use crate::services::accounts::AccountService;
use crate::services::job_store::{JobStore, StoreError, UpdateOutcome};
use crate::services::notify::{AlertNotifier, AnalyticsEvent, EventTracker};

pub const EVENT_FAILED: &str = "MJ Image Gen Failed";
pub const EVENT_COMPLETED: &str = "MJ Image Gen Completed";

const NOT_AVAILABLE: &str = "N/A";

pub struct WebhookRelay {
    store: Arc<dyn JobStore>,
    tracker: Arc<dyn EventTracker>,
    alerts: Arc<dyn AlertNotifier>,
    accounts: Arc<dyn AccountService>,
}

impl WebhookRelay {
    pub fn new(
        store: Arc<dyn JobStore>,
        tracker: Arc<dyn EventTracker>,
        alerts: Arc<dyn AlertNotifier>,
        accounts: Arc<dyn AccountService>,
    ) -> Self {
        Self {
            store,
            tracker,
            alerts,
            accounts,
        }
    }

    /// Apply one callback. Failures are logged and swallowed.
    pub async fn handle(&self, payload: &WebhookPayload) {
        let status = payload.status();
        let label = match &status {
            WebhookStatus::Processing => "processing",
            WebhookStatus::Done => "done",
            WebhookStatus::Failed => "failed",
            WebhookStatus::Other(_) => "other",
        };
        metrics::counter!("imagegen_webhooks_total", "status" => label).increment(1);

        let result = match status {
            WebhookStatus::Failed => self.handle_failed(payload).await,
            WebhookStatus::Processing => self.handle_processing(payload).await,
            WebhookStatus::Done => self.handle_done(payload).await,
            WebhookStatus::Other(other) => {
                tracing::info!(status = %other, reference = ?payload.reference, "Webhook with unhandled status");
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::error!(reference = ?payload.reference, error = %e, "Failed to handle webhook");
        }
    }

    async fn handle_failed(&self, payload: &WebhookPayload) -> Result<(), StoreError> {
        let Some(job) = self.load_job(payload).await? else {
            return Ok(());
        };

        let error_message = payload.error.as_deref().unwrap_or(NOT_AVAILABLE);
        let timings = JobTimings::compute(&job, Utc::now());
        let mut event = analytics_event(&job, EVENT_FAILED, timings);
        event
            .properties
            .insert("mjImageGenErrorMessage".to_string(), Value::from(error_message));

        let patch = JobPatch::failed(error_message);
        let (tracked, updated) = tokio::join!(
            self.tracker.track(event),
            self.store.update_if(
                job.id,
                &[JobStatus::Enqueued, JobStatus::Processing],
                &patch,
            ),
        );
        if let Err(e) = tracked {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to track analytics event");
        }
        if let UpdateOutcome::Rejected(current) = updated? {
            tracing::info!(job_id = %job.id, status = %current, "Ignoring failure callback for finished job");
        }
        metrics::counter!("imagegen_jobs_failed", "reason" => "provider").increment(1);

        if let Err(e) = self.alerts.notify(&failure_alert(payload)).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to send Slack notification");
        }
        Ok(())
    }

    async fn handle_processing(&self, payload: &WebhookPayload) -> Result<(), StoreError> {
        let Some(job_id) = job_id(payload) else {
            tracing::error!("Processing callback without a job reference");
            return Ok(());
        };
        let Some(progress) = payload.progress_percent() else {
            tracing::error!(job_id = %job_id, "Processing callback without progress");
            return Ok(());
        };

        let patch = JobPatch {
            status: Some(JobStatus::Processing),
            progress: Some(progress),
            image_url: payload.uri.clone().filter(|u| !u.is_empty()),
            ..Default::default()
        };
        match self
            .store
            .update_if(job_id, &[JobStatus::Enqueued, JobStatus::Processing], &patch)
            .await
        {
            Ok(UpdateOutcome::Applied) => {
                tracing::debug!(job_id = %job_id, progress, "Job progress updated");
            }
            Ok(UpdateOutcome::Rejected(current)) => {
                tracing::info!(job_id = %job_id, status = %current, "Ignoring late progress callback");
            }
            Err(StoreError::NotFound(_)) => {
                tracing::info!(job_id = %job_id, "Progress callback for unknown job");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn handle_done(&self, payload: &WebhookPayload) -> Result<(), StoreError> {
        let Some(job) = self.load_job(payload).await? else {
            return Ok(());
        };
        if job.status == JobStatus::Completed {
            tracing::info!(job_id = %job.id, "Ignoring duplicate completion callback");
            return Ok(());
        }

        let timings = JobTimings::compute(&job, Utc::now());
        let event = analytics_event(&job, EVENT_COMPLETED, timings);

        // FAILED is allowed so a completion orphaned by a stream timeout is
        // still recorded.
        let patch = JobPatch {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            image_url: payload.uri.clone(),
            buttons: payload.buttons.clone(),
            message_id: payload.message_id.clone(),
            clear_reason: true,
            ..Default::default()
        };
        let (tracked, updated) = tokio::join!(
            self.tracker.track(event),
            self.store.update_if(
                job.id,
                &[JobStatus::Enqueued, JobStatus::Processing, JobStatus::Failed],
                &patch,
            ),
        );
        if let Err(e) = tracked {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to track analytics event");
        }

        match updated? {
            UpdateOutcome::Applied => {
                metrics::counter!("imagegen_jobs_completed", "channel" => "webhook").increment(1);
                metrics::histogram!("imagegen_generation_seconds").record(timings.total_secs);
                tracing::info!(job_id = %job.id, total_secs = timings.total_secs, "Job completed via webhook");
                self.charge(job.user_id).await;
            }
            UpdateOutcome::Rejected(current) => {
                tracing::info!(job_id = %job.id, status = %current, "Completion callback lost the race");
            }
        }
        Ok(())
    }

    /// Look up the job a callback refers to. Unknown or malformed references
    /// are a no-op: callbacks may arrive after the job was evicted.
    async fn load_job(&self, payload: &WebhookPayload) -> Result<Option<Job>, StoreError> {
        let Some(job_id) = job_id(payload) else {
            tracing::warn!(reference = ?payload.reference, "Callback without a valid job reference");
            return Ok(None);
        };
        let job = self.store.get(job_id).await?;
        if job.is_none() {
            tracing::info!(job_id = %job_id, "Callback for unknown job");
        }
        Ok(job)
    }

    async fn charge(&self, user_id: Uuid) {
        if let Err(e) = self.accounts.add_usage_entry(user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to record usage entry");
        }
        if let Err(e) = self.accounts.subtract_credit(user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to subtract credit");
        }
    }
}

fn job_id(payload: &WebhookPayload) -> Option<Uuid> {
    payload.reference.as_deref()?.parse().ok()
}

fn analytics_event(job: &Job, name: &str, timings: JobTimings) -> AnalyticsEvent {
    let mut properties = Map::new();
    properties.insert("mjImageGenType".to_string(), Value::from(job.request.kind()));
    if let Some(button) = job.request.button() {
        properties.insert("mjImageGenButtonCommand".to_string(), Value::from(button));
    }
    properties.insert(
        "mjImageGenTotalDurationInSeconds".to_string(),
        Value::from(timings.total_secs),
    );
    properties.insert(
        "mjImageGenTotalWaitingInQueueTimeInSeconds".to_string(),
        Value::from(timings.queued_secs),
    );
    properties.insert(
        "mjImageGenTotalProcessingTimeInSeconds".to_string(),
        Value::from(timings.processing_secs),
    );

    AnalyticsEvent {
        user_id: job.user_id,
        name: name.to_string(),
        properties,
    }
}

fn failure_alert(payload: &WebhookPayload) -> String {
    let mut text = String::from("Midjourney generation Error:\n");
    if let Some(message_id) = payload.message_id.as_deref().filter(|v| *v != NOT_AVAILABLE) {
        text.push_str(&format!("Message ID: {message_id}\n"));
    }
    if let Some(prompt) = payload.prompt.as_deref().filter(|v| *v != NOT_AVAILABLE) {
        text.push_str(&format!("Prompt: {prompt}\n"));
    }
    if let Some(error) = payload.error.as_deref().filter(|v| *v != NOT_AVAILABLE) {
        text.push_str(&format!("Error: {error}"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_alert_lists_known_fields() {
        let payload = WebhookPayload {
            status: Some("FAILED".to_string()),
            message_id: Some("m-1".to_string()),
            error: Some("Job timed out".to_string()),
            ..Default::default()
        };
        assert_eq!(
            failure_alert(&payload),
            "Midjourney generation Error:\nMessage ID: m-1\nError: Job timed out"
        );
    }

    #[test]
    fn test_invalid_reference_yields_no_job_id() {
        let payload = WebhookPayload {
            reference: Some("not-a-uuid".to_string()),
            ..Default::default()
        };
        assert!(job_id(&payload).is_none());
    }
}
