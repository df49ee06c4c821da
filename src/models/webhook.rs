use serde::Deserialize;
use serde_json::Value;

/// Callback body posted by the provider.
///
/// Every field is optional: the provider is not trusted to send a complete
/// payload and a malformed callback must still be acknowledged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub status: Option<String>,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    pub progress: Option<Value>,
    pub uri: Option<String>,
    pub buttons: Option<Vec<String>>,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub prompt: Option<String>,
}

/// Status values the relay reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookStatus {
    Processing,
    Done,
    Failed,
    Other(String),
}

impl WebhookPayload {
    pub fn status(&self) -> WebhookStatus {
        match self.status.as_deref() {
            Some("PROCESSING") => WebhookStatus::Processing,
            Some("DONE") => WebhookStatus::Done,
            Some("FAIL") | Some("FAILED") => WebhookStatus::Failed,
            other => WebhookStatus::Other(other.unwrap_or_default().to_string()),
        }
    }

    /// Progress as a percentage. The provider sends either a number or a
    /// numeric string.
    pub fn progress_percent(&self) -> Option<u8> {
        let value = self.progress.as_ref()?;
        let number = value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))?;
        Some(number.clamp(0.0, 100.0).round() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> WebhookPayload {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_status_aliases() {
        assert_eq!(parse(r#"{"status":"FAIL"}"#).status(), WebhookStatus::Failed);
        assert_eq!(parse(r#"{"status":"FAILED"}"#).status(), WebhookStatus::Failed);
        assert_eq!(parse(r#"{"status":"DONE"}"#).status(), WebhookStatus::Done);
        assert_eq!(
            parse(r#"{"status":"QUEUED"}"#).status(),
            WebhookStatus::Other("QUEUED".to_string())
        );
    }

    #[test]
    fn test_progress_accepts_numbers_and_strings() {
        assert_eq!(parse(r#"{"progress":42}"#).progress_percent(), Some(42));
        assert_eq!(parse(r#"{"progress":"73"}"#).progress_percent(), Some(73));
        assert_eq!(parse(r#"{"progress":"incomplete"}"#).progress_percent(), None);
        assert_eq!(parse(r#"{}"#).progress_percent(), None);
    }

    #[test]
    fn test_ref_and_message_id_field_names() {
        let payload = parse(r#"{"ref":"job-1","messageId":"m-9"}"#);
        assert_eq!(payload.reference.as_deref(), Some("job-1"));
        assert_eq!(payload.message_id.as_deref(), Some("m-9"));
    }
}
