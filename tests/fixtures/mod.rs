//! Provider polling responses and callback bodies.
#![allow(dead_code)]

use serde_json::{json, Value};

use imagegen_relay::services::provider::ProviderProgress;

pub const IMAGE_URLS: [&str; 4] = [
    "https://cdn.test/grid/0.png",
    "https://cdn.test/grid/1.png",
    "https://cdn.test/grid/2.png",
    "https://cdn.test/grid/3.png",
];

pub fn in_progress(progress: u8) -> ProviderProgress {
    ProviderProgress {
        progress: Some(progress),
        ..Default::default()
    }
}

pub fn finished() -> ProviderProgress {
    ProviderProgress {
        progress: Some(100),
        image_url: Some("https://cdn.test/grid.png".to_string()),
        image_urls: IMAGE_URLS.iter().map(|u| u.to_string()).collect(),
        button_message_id: Some("btn-msg-1".to_string()),
        content: None,
        buttons: vec!["U1".to_string(), "V1".to_string()],
    }
}

/// Finished without images, carrying the provider's refusal text.
pub fn refused(content: &str) -> ProviderProgress {
    ProviderProgress {
        progress: Some(100),
        content: Some(content.to_string()),
        ..Default::default()
    }
}

pub fn done_callback(reference: &str) -> Value {
    json!({
        "status": "DONE",
        "ref": reference,
        "uri": "https://cdn.test/grid.png",
        "buttons": ["U1", "U2", "V1", "V2"],
        "messageId": "done-msg-1",
        "progress": 100
    })
}

pub fn failed_callback(reference: &str) -> Value {
    json!({
        "status": "FAILED",
        "ref": reference,
        "messageId": "failed-msg-1",
        "prompt": "a red bicycle --quality 1 --v 5.1",
        "error": "Job timed out"
    })
}

pub fn processing_callback(reference: &str, progress: Value) -> Value {
    json!({
        "status": "PROCESSING",
        "ref": reference,
        "progress": progress
    })
}
