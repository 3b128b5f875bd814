use garde::Validate;
use serde::{Deserialize, Serialize};

use super::item::{ItemId, QueueCounts, QueueItemView};
use super::progress::RunProgress;
use super::record::{ErrorRecord, ResultRecord, Summary};
use crate::services::export;
use crate::services::ingestion::{IngestionOutcome, RejectedFile};

/// Response after submitting images.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub outcome: IngestionOutcome,
    pub accepted_ids: Vec<ItemId>,
    pub rejected: Vec<RejectedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Current queue contents.
#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub counts: QueueCounts,
    /// "3 images selected (2 pending)"
    pub message: String,
    pub items: Vec<QueueItemView>,
}

/// Optional body of a start request.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct StartRunRequest {
    #[garde(length(min = 1, max = 64))]
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub status: String,
    pub language: String,
    pub pending: usize,
}

/// One successful item as shown in the results list.
#[derive(Debug, Serialize)]
pub struct ResultView {
    pub item_id: ItemId,
    pub filename: String,
    pub text: String,
    pub confidence: f64,
    pub download_name: String,
}

impl From<&ResultRecord> for ResultView {
    fn from(record: &ResultRecord) -> Self {
        let text = if record.text.trim().is_empty() {
            "No text detected".to_string()
        } else {
            record.text.clone()
        };
        Self {
            item_id: record.item_id,
            filename: record.filename.clone(),
            text,
            confidence: record.confidence,
            download_name: export::text_file_name(&record.filename),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub summary: Summary,
    pub headline: String,
    pub results: Vec<ResultView>,
    pub failures: Vec<ErrorRecord>,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub reset: usize,
    pub pending: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

/// Live run view with the derived overall figures.
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    #[serde(flatten)]
    pub progress: RunProgress,
    pub overall_percent: f64,
    /// "Processing 2 of 5 images (40.0%)"
    pub overall_text: String,
}

impl From<RunProgress> for ProgressResponse {
    fn from(progress: RunProgress) -> Self {
        Self {
            overall_percent: progress.overall_percent(),
            overall_text: progress.overall_text(),
            progress,
        }
    }
}
