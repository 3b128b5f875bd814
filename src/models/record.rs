use serde::{Deserialize, Serialize};

use super::item::ItemId;

/// Exportable projection of a completed item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    pub item_id: ItemId,
    pub filename: String,
    pub text: String,
    pub confidence: f64,
}

/// Retryable projection of an errored item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    /// The queue item this failure came from; retry goes through it.
    pub item_id: ItemId,
    pub filename: String,
    pub error: String,
}

/// Outcome counts of the most recent run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub success_count: usize,
    pub total_count: usize,
    /// `None` when nothing succeeded; there is no average to report.
    pub average_confidence: Option<f64>,
}

impl Summary {
    pub fn failure_count(&self) -> usize {
        self.total_count - self.success_count
    }

    /// One-line summary in the form shown above the results list.
    pub fn headline(&self) -> String {
        let confidence = match self.average_confidence {
            Some(avg) => format!("{avg:.1}%"),
            None => "n/a".to_string(),
        };
        format!(
            "{}/{} images processed successfully | Avg confidence: {}",
            self.success_count, self.total_count, confidence
        )
    }
}
