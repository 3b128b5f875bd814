use std::collections::HashSet;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::item::{
    ItemId, ItemState, ItemStatus, NewImage, QueueCounts, QueueItem, QueueItemView, Recognition,
};

/// Change notification sent to every registered queue listener.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Added { ids: Vec<ItemId> },
    Removed { id: ItemId },
    Cleared { removed: usize },
    StatusChanged { id: ItemId, status: ItemStatus },
}

/// Ordered, in-memory store of submitted images.
///
/// While a batch run holds the store (see [`QueueStore::claim_pending`]) the
/// items it captured cannot be removed and the store cannot be cleared.
#[derive(Debug, Default)]
pub struct QueueStore {
    items: Vec<QueueItem>,
    claimed: HashSet<ItemId>,
    run_active: bool,
    listeners: Vec<mpsc::UnboundedSender<QueueEvent>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for queue changes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<QueueEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    /// Append images as pending items, in the given order.
    pub fn add(&mut self, images: Vec<NewImage>) -> Vec<ItemId> {
        let ids: Vec<ItemId> = images
            .into_iter()
            .map(|image| {
                let item = QueueItem::new(image);
                let id = item.id;
                self.items.push(item);
                id
            })
            .collect();

        if !ids.is_empty() {
            self.notify(QueueEvent::Added { ids: ids.clone() });
        }
        ids
    }

    /// Remove an item that no active run has captured.
    pub fn remove(&mut self, id: ItemId) -> Result<QueueItemView, QueueError> {
        let index = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or(QueueError::NotFound(id))?;

        let item = &self.items[index];
        if item.status() == ItemStatus::Processing || self.claimed.contains(&id) {
            return Err(QueueError::Busy(id));
        }

        let removed = self.items.remove(index);
        self.notify(QueueEvent::Removed { id });
        Ok(removed.view())
    }

    /// Empty the store. Refused while a run is active.
    pub fn clear(&mut self) -> Result<usize, QueueError> {
        if self.run_active {
            return Err(QueueError::RunActive);
        }
        let removed = self.items.len();
        self.items.clear();
        self.notify(QueueEvent::Cleared { removed });
        Ok(removed)
    }

    /// Transition a single item.
    ///
    /// `result` must be given exactly when moving to `Completed` and `error`
    /// exactly when moving to `Errored`.
    pub fn set_status(
        &mut self,
        id: ItemId,
        status: ItemStatus,
        result: Option<Recognition>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let next = match (status, result, error) {
            (ItemStatus::Pending, None, None) => ItemState::Pending,
            (ItemStatus::Processing, None, None) => ItemState::Processing,
            (ItemStatus::Completed, Some(result), None) => ItemState::Completed(result),
            (ItemStatus::Errored, None, Some(error)) => ItemState::Errored(error),
            _ => return Err(QueueError::InconsistentState(status)),
        };

        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(QueueError::NotFound(id))?;

        let from = item.status();
        let allowed = matches!(
            (from, status),
            (ItemStatus::Pending, ItemStatus::Processing)
                | (ItemStatus::Processing, ItemStatus::Completed)
                | (ItemStatus::Processing, ItemStatus::Errored)
                | (ItemStatus::Errored, ItemStatus::Pending)
        );
        if !allowed {
            return Err(QueueError::InvalidTransition { id, from, to: status });
        }

        item.state = next;
        self.notify(QueueEvent::StatusChanged { id, status });
        Ok(())
    }

    pub fn mark_processing(&mut self, id: ItemId) -> Result<(), QueueError> {
        self.set_status(id, ItemStatus::Processing, None, None)
    }

    pub fn complete(&mut self, id: ItemId, result: Recognition) -> Result<(), QueueError> {
        self.set_status(id, ItemStatus::Completed, Some(result), None)
    }

    pub fn fail(&mut self, id: ItemId, error: impl Into<String>) -> Result<(), QueueError> {
        self.set_status(id, ItemStatus::Errored, None, Some(error.into()))
    }

    /// Put an errored item back in line, clearing its error.
    pub fn reset_to_pending(&mut self, id: ItemId) -> Result<(), QueueError> {
        self.set_status(id, ItemStatus::Pending, None, None)
    }

    pub fn get(&self, id: ItemId) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn snapshot(&self) -> Vec<QueueItemView> {
        self.items.iter().map(QueueItem::view).collect()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            total: self.items.len(),
            ..Default::default()
        };
        for item in &self.items {
            match item.status() {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Errored => counts.errored += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_run_active(&self) -> bool {
        self.run_active
    }

    /// Capture the pending items, in insertion order, for a new run.
    pub fn claim_pending(&mut self) -> Vec<ItemId> {
        let ids: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| item.status() == ItemStatus::Pending)
            .map(|item| item.id)
            .collect();
        self.claimed = ids.iter().copied().collect();
        self.run_active = true;
        ids
    }

    /// Hand the store back after a run.
    pub fn release(&mut self) {
        self.claimed.clear();
        self.run_active = false;
    }

    fn notify(&mut self, event: QueueEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueueError {
    #[error("Queue item {0} not found")]
    NotFound(ItemId),

    #[error("Queue item {0} belongs to the running batch")]
    Busy(ItemId),

    #[error("A batch run is in progress")]
    RunActive,

    #[error("Cannot move item {id} from {from} to {to}")]
    InvalidTransition {
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("Status {0} was given a result/error that does not match it")]
    InconsistentState(ItemStatus),
}
