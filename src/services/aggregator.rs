use crate::models::item::ItemId;
use crate::models::record::{ErrorRecord, ResultRecord, Summary};
use crate::services::queue::{QueueError, QueueStore};

/// Successes and failures of the most recent run.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    results: Vec<ResultRecord>,
    failures: Vec<ErrorRecord>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; called when a run starts.
    pub fn reset(&mut self) {
        self.results.clear();
        self.failures.clear();
    }

    pub fn record_success(&mut self, record: ResultRecord) {
        self.results.push(record);
    }

    pub fn record_failure(&mut self, record: ErrorRecord) {
        self.failures.push(record);
    }

    pub fn results(&self) -> &[ResultRecord] {
        &self.results
    }

    pub fn failures(&self) -> &[ErrorRecord] {
        &self.failures
    }

    pub fn find_result(&self, item_id: ItemId) -> Option<&ResultRecord> {
        self.results.iter().find(|r| r.item_id == item_id)
    }

    pub fn summary(&self) -> Summary {
        let success_count = self.results.len();
        let average_confidence = if success_count == 0 {
            None
        } else {
            let total: f64 = self.results.iter().map(|r| r.confidence).sum();
            Some(total / success_count as f64)
        };
        Summary {
            success_count,
            total_count: success_count + self.failures.len(),
            average_confidence,
        }
    }

    /// Put a failed item back in the queue as pending and drop its failure record.
    ///
    /// Does not start a run.
    pub fn retry(&mut self, item_id: ItemId, queue: &mut QueueStore) -> Result<(), RetryError> {
        let index = self
            .failures
            .iter()
            .position(|f| f.item_id == item_id)
            .ok_or(RetryError::UnknownFailure(item_id))?;

        // The record goes even if the item has left the queue since.
        self.failures.remove(index);
        queue.reset_to_pending(item_id)?;
        Ok(())
    }

    /// Retry every recorded failure. Returns how many items went back to pending.
    pub fn retry_all(&mut self, queue: &mut QueueStore) -> usize {
        let mut reset = 0;
        for failure in self.failures.drain(..) {
            match queue.reset_to_pending(failure.item_id) {
                Ok(()) => reset += 1,
                Err(e) => tracing::warn!(
                    item_id = %failure.item_id,
                    error = %e,
                    "Could not retry failed item"
                ),
            }
        }
        reset
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RetryError {
    #[error("No recorded failure for item {0}")]
    UnknownFailure(ItemId),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
