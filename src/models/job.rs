use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of an image generation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Enqueued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What the provider was asked to do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum JobRequest {
    /// A fresh prompt submitted to the `imagine` endpoint.
    #[serde(rename = "MJ_IMAGE_GEN")]
    Imagine { prompt: String },

    /// A follow-up action (upscale, variation, ...) on a previous result.
    #[serde(rename = "MJ_BUTTON_COMMAND")]
    ButtonCommand {
        button: String,
        #[serde(rename = "messageId")]
        message_id: String,
    },
}

impl JobRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            JobRequest::Imagine { .. } => "MJ_IMAGE_GEN",
            JobRequest::ButtonCommand { .. } => "MJ_BUTTON_COMMAND",
        }
    }

    pub fn button(&self) -> Option<&str> {
        match self {
            JobRequest::ButtonCommand { button, .. } => Some(button),
            JobRequest::Imagine { .. } => None,
        }
    }
}

/// One image generation request's lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    pub request: JobRequest,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub progress: Option<u8>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub buttons: Vec<String>,
    pub message_id: Option<String>,
    pub reason: Option<String>,
}

impl Job {
    pub fn new(user_id: Uuid, request: JobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            request,
            status: JobStatus::Enqueued,
            enqueued_at: Utc::now(),
            processing_started_at: None,
            progress: None,
            image_url: None,
            image_urls: Vec::new(),
            buttons: Vec::new(),
            message_id: None,
            reason: None,
        }
    }

    /// Merge a partial update into this record. Fields absent from the patch
    /// are left untouched.
    pub fn apply(&mut self, patch: &JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(at) = patch.processing_started_at {
            self.processing_started_at = Some(at);
        }
        if let Some(progress) = patch.progress {
            self.progress = Some(progress);
        }
        if let Some(url) = &patch.image_url {
            self.image_url = Some(url.clone());
        }
        if let Some(urls) = &patch.image_urls {
            self.image_urls = urls.clone();
        }
        if let Some(buttons) = &patch.buttons {
            self.buttons = buttons.clone();
        }
        if let Some(message_id) = &patch.message_id {
            self.message_id = Some(message_id.clone());
        }
        if let Some(reason) = &patch.reason {
            self.reason = Some(reason.clone());
        } else if patch.clear_reason {
            self.reason = None;
        }
    }

    /// Flatten into hash fields for the Redis store.
    pub fn to_fields(&self) -> Result<Vec<(&'static str, String)>, serde_json::Error> {
        let mut fields = vec![
            ("id", self.id.to_string()),
            ("user_id", self.user_id.to_string()),
            ("request", serde_json::to_string(&self.request)?),
            ("status", self.status.to_string()),
            ("enqueued_at", self.enqueued_at.to_rfc3339()),
        ];
        let rest = JobPatch {
            status: None,
            processing_started_at: self.processing_started_at,
            progress: self.progress,
            image_url: self.image_url.clone(),
            image_urls: Some(self.image_urls.clone()),
            buttons: Some(self.buttons.clone()),
            message_id: self.message_id.clone(),
            reason: self.reason.clone(),
            clear_reason: false,
        };
        fields.extend(rest.to_fields()?);
        Ok(fields)
    }

    /// Rebuild a job from Redis hash fields. Returns `None` for an empty or
    /// malformed hash.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let get = |name: &str| fields.get(name).filter(|v| !v.is_empty());
        let timestamp = |name: &str| {
            get(name)
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|t| t.with_timezone(&Utc))
        };
        let list = |name: &str| {
            get(name)
                .and_then(|v| serde_json::from_str::<Vec<String>>(v).ok())
                .unwrap_or_default()
        };

        Some(Self {
            id: get("id")?.parse().ok()?,
            user_id: get("user_id")?.parse().ok()?,
            request: serde_json::from_str(get("request")?).ok()?,
            status: get("status")?.parse().ok()?,
            enqueued_at: timestamp("enqueued_at")?,
            processing_started_at: timestamp("processing_started_at"),
            progress: get("progress").and_then(|v| v.parse().ok()),
            image_url: get("image_url").cloned(),
            image_urls: list("image_urls"),
            buttons: list("buttons"),
            message_id: get("message_id").cloned(),
            reason: get("reason").cloned(),
        })
    }
}

/// Partial update to a [`Job`]. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub progress: Option<u8>,
    pub image_url: Option<String>,
    pub image_urls: Option<Vec<String>>,
    pub buttons: Option<Vec<String>>,
    pub message_id: Option<String>,
    pub reason: Option<String>,
    /// Drop a stored failure reason. Ignored when `reason` is set.
    pub clear_reason: bool,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            processing_started_at: Some(at),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Only the fields present in the patch, flattened for the Redis store.
    pub fn to_fields(&self) -> Result<Vec<(&'static str, String)>, serde_json::Error> {
        let mut fields = Vec::new();
        if let Some(status) = self.status {
            fields.push(("status", status.to_string()));
        }
        if let Some(at) = self.processing_started_at {
            fields.push(("processing_started_at", at.to_rfc3339()));
        }
        if let Some(progress) = self.progress {
            fields.push(("progress", progress.to_string()));
        }
        if let Some(url) = &self.image_url {
            fields.push(("image_url", url.clone()));
        }
        if let Some(urls) = &self.image_urls {
            fields.push(("image_urls", serde_json::to_string(urls)?));
        }
        if let Some(buttons) = &self.buttons {
            fields.push(("buttons", serde_json::to_string(buttons)?));
        }
        if let Some(message_id) = &self.message_id {
            fields.push(("message_id", message_id.clone()));
        }
        if let Some(reason) = &self.reason {
            fields.push(("reason", reason.clone()));
        } else if self.clear_reason {
            // Empty fields read back as absent.
            fields.push(("reason", String::new()));
        }
        Ok(fields)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(JobStatus::is_terminal)
    }
}

/// Elapsed durations for analytics, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobTimings {
    pub total_secs: f64,
    pub queued_secs: f64,
    pub processing_secs: f64,
}

impl JobTimings {
    /// A job that never left the queue counts its whole life as queued time.
    pub fn compute(job: &Job, now: DateTime<Utc>) -> Self {
        let secs = |from: DateTime<Utc>, to: DateTime<Utc>| {
            (to - from).num_milliseconds() as f64 / 1000.0
        };
        let started = job.processing_started_at.unwrap_or(now);
        Self {
            total_secs: secs(job.enqueued_at, now),
            queued_secs: secs(job.enqueued_at, started),
            processing_secs: secs(started, now),
        }
    }
}
