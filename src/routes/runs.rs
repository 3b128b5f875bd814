use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::api::{ProgressResponse, StartRunRequest, StartRunResponse};
use crate::services::read_lock;

/// POST /api/v1/runs: start processing every pending image.
///
/// The body is optional; `{"language": "deu"}` overrides the configured language.
pub async fn start_run(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<StartRunResponse>), ApiError> {
    let request: StartRunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartRunRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let language = request
        .language
        .unwrap_or_else(|| state.config.ocr_language.clone());
    // The handle is dropped; progress is observed through /runs/current.
    let started = state.start_run(Some(language.clone()), None)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            status: "running".to_string(),
            language,
            pending: started.pending,
        }),
    ))
}

/// GET /api/v1/runs/current
pub async fn current_run(State(state): State<AppState>) -> Json<ProgressResponse> {
    let progress = read_lock(&state.progress).clone();
    Json(progress.into())
}

/// POST /api/v1/runs/current/cancel: stop after the image being processed.
pub async fn cancel_run(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    if state.cancel_run() {
        tracing::info!("Batch run cancellation requested");
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::Conflict("No batch run in progress".to_string()))
    }
}
