use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;

use crate::app_state::AppState;
use crate::models::webhook::WebhookPayload;

/// POST /api/webhooks/mj-health-check — provider callback.
///
/// Always 200: an error response would only make the provider retry.
pub async fn provider_callback(State(state): State<AppState>, body: Bytes) -> StatusCode {
    match serde_json::from_slice::<WebhookPayload>(&body) {
        Ok(payload) => state.relay.handle(&payload).await,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed provider callback");
        }
    }
    StatusCode::OK
}
