pub mod aggregator;
pub mod export;
pub mod ingestion;
pub mod ocr;
pub mod queue;
pub mod scheduler;
pub mod tesseract;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use aggregator::ResultAggregator;
use queue::QueueStore;

/// Queue store shared between the scheduler and its callers.
pub type SharedQueue = Arc<RwLock<QueueStore>>;

/// Result aggregator shared between the scheduler and its callers.
pub type SharedResults = Arc<RwLock<ResultAggregator>>;

/// Lock for writing, recovering from poisoning. When both stores are
/// needed, lock the queue first.
pub fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}
