//! Type filter in front of the queue store.
//!
//! Only PNG images are queued. A declared MIME type decides when there is one;
//! files without a useful MIME type (e.g. read from disk) are sniffed.

use bytes::Bytes;
use image::ImageFormat;
use serde::Serialize;

use crate::models::item::{ItemId, NewImage};
use crate::services::queue::QueueStore;

/// A file offered for queueing.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub name: String,
    pub mime: Option<String>,
    pub bytes: Bytes,
}

/// A file that did not pass the filter.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RejectedFile {
    pub name: String,
    pub mime: Option<String>,
}

/// How a submission went, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestionOutcome {
    AllAccepted { accepted: usize },
    PartiallyAccepted { accepted: usize, rejected: usize },
    NothingAccepted { rejected: usize },
}

impl IngestionOutcome {
    /// Notice shown to the user, if the outcome warrants one.
    pub fn notice(&self) -> Option<String> {
        match self {
            IngestionOutcome::AllAccepted { .. } => None,
            IngestionOutcome::PartiallyAccepted { rejected, .. } => {
                Some(format!("{rejected} non-PNG files were skipped."))
            }
            IngestionOutcome::NothingAccepted { .. } => {
                Some("Please select PNG image files.".to_string())
            }
        }
    }
}

/// Result of [`ingest`].
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub accepted: Vec<ItemId>,
    pub rejected: Vec<RejectedFile>,
}

impl IngestionReport {
    pub fn outcome(&self) -> IngestionOutcome {
        match (self.accepted.len(), self.rejected.len()) {
            (0, rejected) => IngestionOutcome::NothingAccepted { rejected },
            (accepted, 0) => IngestionOutcome::AllAccepted { accepted },
            (accepted, rejected) => IngestionOutcome::PartiallyAccepted { accepted, rejected },
        }
    }
}

/// Whether a candidate is a PNG image.
pub fn is_png(candidate: &CandidateFile) -> bool {
    match candidate.mime.as_deref().map(str::trim) {
        Some(mime) if !mime.is_empty() && !mime.eq_ignore_ascii_case("application/octet-stream") => {
            mime.to_ascii_lowercase().contains("png")
        }
        _ => matches!(image::guess_format(&candidate.bytes), Ok(ImageFormat::Png)),
    }
}

/// Final path component of a submitted file name.
///
/// Directory parts are dropped: the name later becomes an archive entry and
/// a download name.
pub fn base_name(name: &str) -> String {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .map(str::trim)
        .unwrap_or_default();
    match base {
        "" | "." | ".." => "image".to_string(),
        base => base.to_string(),
    }
}

/// Split candidates into accepted and rejected, preserving order.
pub fn partition(candidates: Vec<CandidateFile>) -> (Vec<CandidateFile>, Vec<RejectedFile>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for candidate in candidates {
        if is_png(&candidate) {
            accepted.push(candidate);
        } else {
            rejected.push(RejectedFile {
                name: candidate.name,
                mime: candidate.mime,
            });
        }
    }
    (accepted, rejected)
}

/// Filter candidates and queue the accepted ones.
pub fn ingest(queue: &mut QueueStore, candidates: Vec<CandidateFile>) -> IngestionReport {
    let candidates = candidates
        .into_iter()
        .map(|file| CandidateFile {
            name: base_name(&file.name),
            ..file
        })
        .collect();
    let (accepted, rejected) = partition(candidates);

    for file in &rejected {
        tracing::debug!(name = %file.name, mime = ?file.mime, "Skipping non-PNG file");
    }

    let images = accepted
        .into_iter()
        .map(|file| NewImage {
            name: file.name,
            mime: file.mime,
            bytes: file.bytes,
        })
        .collect();
    let accepted = queue.add(images);

    metrics::counter!("ocr_items_submitted_total").increment(accepted.len() as u64);
    metrics::counter!("ocr_items_rejected_total").increment(rejected.len() as u64);

    IngestionReport { accepted, rejected }
}
