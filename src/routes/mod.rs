pub mod health;
pub mod metrics;
pub mod queue;
pub mod results;
pub mod runs;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::app_state::{AppState, StartError};
use crate::models::api::ErrorResponse;
use crate::services::aggregator::RetryError;
use crate::services::export::ExportError;
use crate::services::queue::QueueError;

/// API routes. `/metrics` is mounted separately since it carries its own state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/queue",
            post(queue::upload_images)
                .get(queue::list_queue)
                .delete(queue::clear_queue),
        )
        .route("/api/v1/queue/{id}", delete(queue::remove_image))
        .route("/api/v1/runs", post(runs::start_run))
        .route("/api/v1/runs/current", get(runs::current_run))
        .route("/api/v1/runs/current/cancel", post(runs::cancel_run))
        .route("/api/v1/results", get(results::list_results))
        .route("/api/v1/results/{id}/text", get(results::download_text))
        .route(
            "/api/v1/results/failures/retry",
            post(results::retry_all_failures),
        )
        .route(
            "/api/v1/results/failures/{id}/retry",
            post(results::retry_failure),
        )
        .route("/api/v1/export/text", get(results::export_text))
        .route("/api/v1/export/zip", get(results::export_zip))
        .route("/api/v1/reset", post(results::reset_all))
        .with_state(state)
}

/// Error returned by API handlers, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::NotFound(_) => ApiError::NotFound(e.to_string()),
            QueueError::Busy(_) | QueueError::RunActive | QueueError::InvalidTransition { .. } => {
                ApiError::Conflict(e.to_string())
            }
            QueueError::InconsistentState(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<RetryError> for ApiError {
    fn from(e: RetryError) -> Self {
        match e {
            RetryError::UnknownFailure(_) => ApiError::NotFound(e.to_string()),
            RetryError::Queue(inner) => inner.into(),
        }
    }
}

impl From<StartError> for ApiError {
    fn from(e: StartError) -> Self {
        ApiError::Conflict(e.to_string())
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
