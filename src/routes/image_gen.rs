use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::generation::ImageGenRequest;
use crate::routes::caller_token;
use crate::services::orchestrator::{GenerationError, GenerationRequest};

/// POST /api/image-gen — generate an image, streaming progress as it happens.
pub async fn generate_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ImageGenRequest>,
) -> AppResult<Response> {
    let token = caller_token(&headers).ok_or(GenerationError::Unauthorized)?;
    let user = state.orchestrator.authorize(token).await?;

    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let text = request
        .latest_prompt()
        .ok_or_else(|| AppError::BadRequest("messages must not be empty".to_string()))?
        .to_string();

    let receiver = state
        .orchestrator
        .start(
            &user,
            GenerationRequest {
                text,
                style: request.image_style,
                quality: request.image_quality,
                temperature: request.temperature,
            },
        )
        .await?;

    let stream = UnboundedReceiverStream::new(receiver).map(Ok::<_, Infallible>);
    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
