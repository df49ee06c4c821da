use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};

/// One entry of the chat history sent by the front-end.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ChatMessage {
    #[garde(skip)]
    pub role: String,

    #[garde(length(min = 1, max = 4000))]
    pub content: String,
}

/// Body of `POST /api/image-gen`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenRequest {
    #[garde(length(min = 1), dive)]
    pub messages: Vec<ChatMessage>,

    #[garde(length(max = 100))]
    pub image_style: Option<String>,

    #[garde(length(max = 20))]
    pub image_quality: Option<String>,

    #[garde(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f64>,
}

impl ImageGenRequest {
    /// The prompt is the most recent message.
    pub fn latest_prompt(&self) -> Option<&str> {
        self.messages.last().map(|m| m.content.as_str())
    }
}

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EnqueueRequest {
    #[serde(rename = "MJ_IMAGE_GEN", rename_all = "camelCase")]
    Imagine {
        #[garde(length(min = 1, max = 4000))]
        prompt: String,
        #[garde(length(max = 100))]
        image_style: Option<String>,
        #[garde(length(max = 20))]
        image_quality: Option<String>,
        #[garde(range(min = 0.0, max = 2.0))]
        temperature: Option<f64>,
    },

    #[serde(rename = "MJ_BUTTON_COMMAND", rename_all = "camelCase")]
    ButtonCommand {
        #[garde(length(min = 1, max = 20))]
        button: String,
        #[garde(length(min = 1, max = 200))]
        message_id: String,
    },
}

/// Response after a job was accepted onto the dispatch queue.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Response for querying a job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub image_url: Option<String>,
    pub image_urls: Vec<String>,
    pub buttons: Vec<String>,
    pub message_id: Option<String>,
    pub reason: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            image_url: job.image_url,
            image_urls: job.image_urls,
            buttons: job.buttons,
            message_id: job.message_id,
            reason: job.reason,
        }
    }
}
