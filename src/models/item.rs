use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Identifier assigned to every queued image at ingestion.
pub type ItemId = Uuid;

/// Processing status of a queued image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Errored,
}

impl ItemStatus {
    /// Completed and errored items are terminal for the run that produced them.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Errored)
    }
}

/// Text extracted from one image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean word confidence, 0-100.
    pub confidence: f64,
}

impl Recognition {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// An image accepted by ingestion, before it receives an id.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub name: String,
    pub mime: Option<String>,
    pub bytes: Bytes,
}

/// State of an item together with the data that state carries.
///
/// A result only exists on completed items and an error only on errored ones.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ItemState {
    Pending,
    Processing,
    Completed(Recognition),
    Errored(String),
}

impl ItemState {
    pub(crate) fn status(&self) -> ItemStatus {
        match self {
            ItemState::Pending => ItemStatus::Pending,
            ItemState::Processing => ItemStatus::Processing,
            ItemState::Completed(_) => ItemStatus::Completed,
            ItemState::Errored(_) => ItemStatus::Errored,
        }
    }
}

/// One submitted image and its processing state. Owned by the queue store.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: ItemId,
    pub name: String,
    pub size: u64,
    pub mime: Option<String>,
    pub added_at: DateTime<Utc>,
    payload: Bytes,
    pub(crate) state: ItemState,
}

impl QueueItem {
    pub(crate) fn new(image: NewImage) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: image.name,
            size: image.bytes.len() as u64,
            mime: image.mime,
            added_at: Utc::now(),
            payload: image.bytes,
            state: ItemState::Pending,
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.state.status()
    }

    /// Raw image bytes. Cloning is a reference-count bump.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn result(&self) -> Option<&Recognition> {
        match &self.state {
            ItemState::Completed(recognition) => Some(recognition),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ItemState::Errored(message) => Some(message),
            _ => None,
        }
    }

    /// Immutable projection used for display.
    pub fn view(&self) -> QueueItemView {
        QueueItemView {
            id: self.id,
            name: self.name.clone(),
            size: self.size,
            display_size: display_size(self.size),
            status: self.status(),
            added_at: self.added_at,
            result: self.result().cloned(),
            error: self.error().map(str::to_string),
        }
    }
}

/// Snapshot row of the queue, without the image bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItemView {
    pub id: ItemId,
    pub name: String,
    pub size: u64,
    pub display_size: String,
    pub status: ItemStatus,
    pub added_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Recognition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-status counts of the queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub errored: usize,
}

/// Human-readable file size: KB below one megabyte, MB above.
pub fn display_size(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    if bytes > MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    }
}
