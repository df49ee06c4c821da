use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod health;
pub mod image_gen;
pub mod jobs;
pub mod metrics;
pub mod webhook;

/// Header the chat front-end sends the session token in.
pub const USER_TOKEN_HEADER: &str = "user-token";

/// API routes. Metrics and middleware layers are added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/image-gen", post(image_gen::generate_image))
        .route("/api/webhooks/mj-health-check", post(webhook::provider_callback))
        .route("/api/v1/jobs", post(jobs::enqueue_job))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job_status))
        .with_state(state)
}

/// Caller token from the `user-token` header, falling back to
/// `Authorization: Bearer`.
pub fn caller_token(headers: &HeaderMap) -> Option<&str> {
    let from_user_header = headers
        .get(USER_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    let from_bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    };
    from_user_header
        .or_else(from_bearer)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
