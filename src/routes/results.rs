use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::api::{ClearResponse, ResultView, ResultsResponse, RetryResponse};
use crate::models::item::ItemId;
use crate::services::export::{self, TEXT_MIME, ZIP_MIME};
use crate::services::read_lock;

fn attachment(file_name: &str) -> String {
    format!("attachment; filename=\"{}\"", file_name.replace('"', "'"))
}

/// GET /api/v1/results: summary, successes and failures of the last run.
pub async fn list_results(State(state): State<AppState>) -> Json<ResultsResponse> {
    let results = read_lock(&state.results);
    let summary = results.summary();
    Json(ResultsResponse {
        summary,
        headline: summary.headline(),
        results: results.results().iter().map(ResultView::from).collect(),
        failures: results.failures().to_vec(),
    })
}

/// GET /api/v1/results/{id}/text
pub async fn download_text(
    State(state): State<AppState>,
    Path(id): Path<ItemId>,
) -> Result<impl IntoResponse, ApiError> {
    let blob = read_lock(&state.results)
        .find_result(id)
        .map(export::export_one)
        .ok_or_else(|| ApiError::NotFound(format!("No result for item {id}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, TEXT_MIME.to_string()),
            (header::CONTENT_DISPOSITION, attachment(&blob.file_name)),
        ],
        blob.content,
    ))
}

/// POST /api/v1/results/failures/{id}/retry: back to pending; does not start a run.
pub async fn retry_failure(
    State(state): State<AppState>,
    Path(id): Path<ItemId>,
) -> Result<Json<RetryResponse>, ApiError> {
    state.retry(id)?;
    tracing::info!(item_id = %id, "Failed image queued for retry");
    let pending = read_lock(&state.queue).counts().pending;
    Ok(Json(RetryResponse { reset: 1, pending }))
}

/// POST /api/v1/results/failures/retry
pub async fn retry_all_failures(State(state): State<AppState>) -> Json<RetryResponse> {
    let reset = state.retry_all();
    tracing::info!(reset, "Failed images queued for retry");
    let pending = read_lock(&state.queue).counts().pending;
    Json(RetryResponse { reset, pending })
}

/// GET /api/v1/export/text: every result in one text, under per-file headers.
pub async fn export_text(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let results = read_lock(&state.results);
    if results.results().is_empty() {
        return Err(ApiError::NotFound("No results to export".to_string()));
    }
    let text = export::concatenate_all(results.results());
    Ok(([(header::CONTENT_TYPE, TEXT_MIME)], text))
}

/// GET /api/v1/export/zip: one `.txt` entry per result.
pub async fn export_zip(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let archive = {
        let results = read_lock(&state.results);
        if results.results().is_empty() {
            return Err(ApiError::NotFound("No results to export".to_string()));
        }
        export::export_all(results.results())?
    };
    let file_name = export::archive_file_name(Utc::now());
    tracing::info!(file_name = %file_name, bytes = archive.len(), "Exporting results archive");

    Ok((
        [
            (header::CONTENT_TYPE, ZIP_MIME.to_string()),
            (header::CONTENT_DISPOSITION, attachment(&file_name)),
        ],
        archive,
    ))
}

/// POST /api/v1/reset: empty the queue and results. 409 while a run is active.
pub async fn reset_all(State(state): State<AppState>) -> Result<Json<ClearResponse>, ApiError> {
    let removed = state.reset()?;
    tracing::info!(removed, "All images and results cleared");
    Ok(Json(ClearResponse { removed }))
}
