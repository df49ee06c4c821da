use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Content strings the provider returns when it refuses a prompt. They are
/// shown to the user verbatim instead of the generic failure message.
pub const INVALID_USER_ACTIONS: &[&str] = &[
    "Banned prompt detected",
    "Invalid parameter",
    "Invalid link",
    "Job action restricted",
    "Action needed to continue",
    "Request cancelled due to image filters",
    "Queue full",
];

pub fn is_invalid_user_action(content: &str) -> bool {
    INVALID_USER_ACTIONS.contains(&content)
}

/// Where the provider should report back for a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Callback {
    /// Echoed back as `ref` in webhook callbacks; the job id.
    pub reference: String,
    pub webhook_override: Option<String>,
}

/// Snapshot of a provider message, as returned by the polling endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderProgress {
    pub progress: Option<u8>,
    pub image_url: Option<String>,
    pub image_urls: Vec<String>,
    pub button_message_id: Option<String>,
    pub content: Option<String>,
    pub buttons: Vec<String>,
}

/// Client for the Midjourney proxy.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Submit a prompt; returns the provider message id.
    async fn imagine(&self, prompt: &str, callback: &Callback) -> Result<String, ProviderError>;

    /// Run a follow-up action on a previous result; returns the new message id.
    async fn button(
        &self,
        button: &str,
        button_message_id: &str,
        callback: &Callback,
    ) -> Result<String, ProviderError>;

    async fn message(&self, message_id: &str) -> Result<ProviderProgress, ProviderError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagineRequest<'a> {
    msg: &'a str,
    #[serde(rename = "ref")]
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_override: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ButtonRequest<'a> {
    button: &'a str,
    button_message_id: &'a str,
    #[serde(rename = "ref")]
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_override: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    success: Option<bool>,
    message_id: Option<String>,
}

#[derive(Deserialize)]
struct MessageResponse {
    progress: Option<Value>,
    response: Option<Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    image_url: Option<String>,
    image_urls: Option<Vec<String>>,
    button_message_id: Option<String>,
    content: Option<String>,
    buttons: Option<Vec<String>>,
}

/// HTTP client for a thenextleg-compatible Midjourney proxy.
pub struct NextLegClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl NextLegClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ProviderError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn submit<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(ProviderError::Http)?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let submitted: SubmitResponse = response.json().await.map_err(ProviderError::Http)?;
        match (submitted.success, submitted.message_id) {
            (Some(true), Some(message_id)) if !message_id.is_empty() => Ok(message_id),
            _ => Err(ProviderError::Rejected),
        }
    }
}

#[async_trait]
impl ImageProvider for NextLegClient {
    async fn imagine(&self, prompt: &str, callback: &Callback) -> Result<String, ProviderError> {
        let body = ImagineRequest {
            msg: prompt,
            reference: &callback.reference,
            webhook_override: callback.webhook_override.as_deref(),
        };
        self.submit("/v2/imagine", &body).await
    }

    async fn button(
        &self,
        button: &str,
        button_message_id: &str,
        callback: &Callback,
    ) -> Result<String, ProviderError> {
        let body = ButtonRequest {
            button,
            button_message_id,
            reference: &callback.reference,
            webhook_override: callback.webhook_override.as_deref(),
        };
        self.submit("/v2/button", &body).await
    }

    async fn message(&self, message_id: &str) -> Result<ProviderProgress, ProviderError> {
        let response = self
            .http
            .get(format!("{}/v2/message/{}", self.base_url, message_id))
            .query(&[("authToken", self.api_key.as_str())])
            .send()
            .await
            .map_err(ProviderError::Http)?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let message: MessageResponse = response.json().await.map_err(ProviderError::Http)?;
        Ok(parse_message(message))
    }
}

fn parse_progress(value: &Value) -> Option<u8> {
    let number = value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))?;
    Some(number.clamp(0.0, 100.0).round() as u8)
}

/// While a job is running the provider sends `response` as a plain string,
/// so anything that is not the expected object is treated as empty.
fn parse_message(message: MessageResponse) -> ProviderProgress {
    let body: MessageBody = message
        .response
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    ProviderProgress {
        progress: message.progress.as_ref().and_then(parse_progress),
        image_url: body.image_url.filter(|u| !u.is_empty()),
        image_urls: body.image_urls.unwrap_or_default(),
        button_message_id: body.button_message_id,
        content: body.content.filter(|c| !c.is_empty()),
        buttons: body.buttons.unwrap_or_default(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned HTTP {0}")]
    Status(u16),

    #[error("Provider did not accept the submission")]
    Rejected,
}
