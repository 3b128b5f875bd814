use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::api::{ClearResponse, QueueResponse, UploadResponse};
use crate::models::item::{ItemId, QueueItemView};
use crate::services::ingestion::{CandidateFile, IngestionOutcome};
use crate::services::{read_lock, write_lock};

/// POST /api/v1/queue: add images. Every file part is offered to the filter.
///
/// Responds 201 when at least one image was queued and 422 when none was.
pub async fn upload_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut candidates = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let mime = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        candidates.push(CandidateFile { name, mime, bytes });
    }

    if candidates.is_empty() {
        return Err(ApiError::BadRequest("No files in upload".to_string()));
    }

    let report = state.submit(candidates);
    let outcome = report.outcome();
    tracing::info!(
        accepted = report.accepted.len(),
        rejected = report.rejected.len(),
        "Images submitted"
    );

    let status = match outcome {
        IngestionOutcome::NothingAccepted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::CREATED,
    };
    Ok((
        status,
        Json(UploadResponse {
            outcome,
            message: outcome.notice(),
            accepted_ids: report.accepted,
            rejected: report.rejected,
        }),
    ))
}

/// GET /api/v1/queue
pub async fn list_queue(State(state): State<AppState>) -> Json<QueueResponse> {
    let queue = read_lock(&state.queue);
    let counts = queue.counts();
    Json(QueueResponse {
        counts,
        message: format!(
            "{} images selected ({} pending)",
            counts.total, counts.pending
        ),
        items: queue.snapshot(),
    })
}

/// DELETE /api/v1/queue/{id}: 409 while the item belongs to the running batch.
pub async fn remove_image(
    State(state): State<AppState>,
    Path(id): Path<ItemId>,
) -> Result<Json<QueueItemView>, ApiError> {
    let removed = write_lock(&state.queue).remove(id)?;
    tracing::info!(item_id = %id, name = %removed.name, "Image removed from queue");
    Ok(Json(removed))
}

/// DELETE /api/v1/queue: 409 while a run is active.
pub async fn clear_queue(State(state): State<AppState>) -> Result<Json<ClearResponse>, ApiError> {
    let removed = write_lock(&state.queue).clear()?;
    metrics::gauge!("ocr_queue_pending").set(0.0);
    tracing::info!(removed, "Queue cleared");
    Ok(Json(ClearResponse { removed }))
}
