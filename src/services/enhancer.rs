use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ENHANCE_INSTRUCTIONS: &str = concat!(
    "You turn a user's image request into a Midjourney prompt. ",
    "Translate the request to English if needed, keep its subject, ",
    "and enrich it with concrete details about composition, lighting, ",
    "color and rendering style. Do not add Midjourney parameters such as ",
    "--v or --quality. Reply with the prompt only, on a single line."
);

/// Turns raw user text into an enriched, English prompt.
#[async_trait]
pub trait PromptEnhancer: Send + Sync {
    async fn enhance(&self, user_text: &str) -> Result<String, EnhancerError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatCompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionReply,
}

#[derive(Deserialize)]
struct ChatCompletionReply {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completion endpoint.
pub struct OpenAiEnhancer {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEnhancer {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, EnhancerError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(EnhancerError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl PromptEnhancer for OpenAiEnhancer {
    async fn enhance(&self, user_text: &str) -> Result<String, EnhancerError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatCompletionMessage {
                    role: "system",
                    content: ENHANCE_INSTRUCTIONS,
                },
                ChatCompletionMessage {
                    role: "user",
                    content: user_text,
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(EnhancerError::Http)?;

        if !response.status().is_success() {
            return Err(EnhancerError::Status(response.status().as_u16()));
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(EnhancerError::Http)?;

        extract_prompt(completion)
    }
}

fn extract_prompt(completion: ChatCompletionResponse) -> Result<String, EnhancerError> {
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().replace('\n', " "))
        .filter(|content| !content.is_empty())
        .ok_or(EnhancerError::EmptyReply)
}

#[derive(Debug, thiserror::Error)]
pub enum EnhancerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Enhancer returned HTTP {0}")]
    Status(u16),

    #[error("Enhancer returned no prompt")]
    EmptyReply,
}
