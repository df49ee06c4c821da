use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string (profiles, credits, usage)
    pub database_url: String,

    /// Redis connection string for the job store and dispatch queue
    pub redis_url: String,

    /// HS256 secret used by the auth provider to sign access tokens
    pub jwt_secret: String,

    /// Midjourney proxy base URL
    #[serde(default = "default_provider_api_url")]
    pub provider_api_url: String,

    /// Midjourney proxy API key
    pub provider_api_key: String,

    /// OpenAI-compatible endpoint used to translate and enhance prompts
    #[serde(default = "default_enhancer_api_url")]
    pub enhancer_api_url: String,

    pub enhancer_api_key: String,

    #[serde(default = "default_enhancer_model")]
    pub enhancer_model: String,

    /// Public URL of the webhook endpoint handed to the provider as
    /// `webhookOverride`. Without it the provider uses its account default.
    pub webhook_public_url: Option<String>,

    /// Slack incoming webhook for generation failure alerts
    pub slack_webhook_url: Option<String>,

    /// Analytics ingestion endpoint and project token
    pub analytics_url: Option<String>,
    pub analytics_token: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// How long a finished job stays in the store
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_provider_api_url() -> String {
    "https://api.thenextleg.io".to_string()
}

fn default_enhancer_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_enhancer_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_poll_interval_ms() -> u64 {
    3500
}

fn default_generation_timeout_secs() -> u64 {
    300
}

fn default_job_ttl_secs() -> u64 {
    86_400
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_secs(self.generation_timeout_secs),
            webhook_url: self.webhook_public_url.clone(),
        }
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }
}

/// Timing knobs for the polling loop.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub webhook_url: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            timeout: Duration::from_secs(default_generation_timeout_secs()),
            webhook_url: None,
        }
    }
}
