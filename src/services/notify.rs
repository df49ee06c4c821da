//! Best-effort side channels: Slack alerts and analytics events.
//!
//! Both sinks are optional in configuration. When unset they only log.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An analytics event attributed to a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub user_id: Uuid,
    pub name: String,
    pub properties: Map<String, Value>,
}

#[async_trait]
pub trait EventTracker: Send + Sync {
    async fn track(&self, event: AnalyticsEvent) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotifyError>;
}

fn http_client() -> Result<Client, NotifyError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(NotifyError::Http)
}

/// Posts messages to a Slack incoming webhook.
pub struct SlackNotifier {
    http: Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Result<Self, NotifyError> {
        Ok(Self {
            http: http_client()?,
            webhook_url: webhook_url.filter(|u| !u.is_empty()),
        })
    }
}

#[async_trait]
impl AlertNotifier for SlackNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        let Some(url) = &self.webhook_url else {
            tracing::debug!(text, "Slack webhook not configured, skipping alert");
            return Ok(());
        };

        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Sends events to a Mixpanel-style `/track` ingestion endpoint.
pub struct HttpEventTracker {
    http: Client,
    endpoint: Option<String>,
    token: Option<String>,
}

impl HttpEventTracker {
    pub fn new(endpoint: Option<String>, token: Option<String>) -> Result<Self, NotifyError> {
        Ok(Self {
            http: http_client()?,
            endpoint: endpoint.filter(|u| !u.is_empty()),
            token,
        })
    }

    fn payload(&self, event: &AnalyticsEvent) -> Value {
        let mut properties = event.properties.clone();
        properties.insert("distinct_id".to_string(), Value::String(event.user_id.to_string()));
        if let Some(token) = &self.token {
            properties.insert("token".to_string(), Value::String(token.clone()));
        }
        serde_json::json!([{ "event": event.name, "properties": properties }])
    }
}

#[async_trait]
impl EventTracker for HttpEventTracker {
    async fn track(&self, event: AnalyticsEvent) -> Result<(), NotifyError> {
        let Some(endpoint) = &self.endpoint else {
            let properties = Value::Object(event.properties.clone());
            tracing::info!(
                user_id = %event.user_id,
                event = %event.name,
                properties = %properties,
                "Analytics event"
            );
            return Ok(());
        };

        let response = self.http.post(endpoint).json(&self.payload(&event)).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Endpoint returned HTTP {0}")]
    HttpStatus(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_sinks_succeed_without_network() {
        let slack = SlackNotifier::new(None).unwrap();
        slack.notify("Midjourney generation Error").await.unwrap();

        let tracker = HttpEventTracker::new(Some(String::new()), None).unwrap();
        tracker
            .track(AnalyticsEvent {
                user_id: Uuid::new_v4(),
                name: "MJ Image Gen Completed".to_string(),
                properties: Map::new(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_payload_carries_distinct_id_and_token() {
        let tracker =
            HttpEventTracker::new(Some("https://api.example/track".to_string()), Some("tok".to_string()))
                .unwrap();
        let user_id = Uuid::new_v4();
        let mut properties = Map::new();
        properties.insert("mjImageGenType".to_string(), Value::from("MJ_IMAGE_GEN"));

        let payload = tracker.payload(&AnalyticsEvent {
            user_id,
            name: "MJ Image Gen Failed".to_string(),
            properties,
        });

        assert_eq!(payload[0]["event"], "MJ Image Gen Failed");
        assert_eq!(payload[0]["properties"]["distinct_id"], user_id.to_string());
        assert_eq!(payload[0]["properties"]["token"], "tok");
        assert_eq!(payload[0]["properties"]["mjImageGenType"], "MJ_IMAGE_GEN");
    }
}
