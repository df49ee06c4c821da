use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::generation::{EnqueueRequest, EnqueueResponse, JobStatusResponse};
use crate::models::job::JobRequest;
use crate::routes::caller_token;
use crate::services::orchestrator::GenerationError;
use crate::services::prompt;

/// POST /api/v1/jobs — queue an imagine prompt or a button command.
pub async fn enqueue_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EnqueueRequest>,
) -> AppResult<(StatusCode, Json<EnqueueResponse>)> {
    let token = caller_token(&headers).ok_or(GenerationError::Unauthorized)?;
    let user = state.orchestrator.authorize(token).await?;

    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let job_request = match request {
        EnqueueRequest::Imagine {
            prompt: text,
            image_style,
            image_quality,
            temperature,
        } => JobRequest::Imagine {
            prompt: prompt::build_with_defaults(
                &text,
                image_style.as_deref(),
                image_quality.as_deref(),
                temperature,
            ),
        },
        EnqueueRequest::ButtonCommand { button, message_id } => {
            JobRequest::ButtonCommand { button, message_id }
        }
    };

    let job = state.dispatcher.enqueue(&user, job_request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /api/v1/jobs/{job_id} — job status for its owner.
pub async fn get_job_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobStatusResponse>> {
    let token = caller_token(&headers).ok_or(GenerationError::Unauthorized)?;
    let user = state
        .accounts
        .authenticate(token)
        .await
        .map_err(GenerationError::from)?;

    let job = state.store.get(job_id).await?.ok_or(AppError::NotFound)?;
    if job.user_id != user.id {
        return Err(AppError::NotFound);
    }

    Ok(Json(job.into()))
}
