use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::models::item::ItemId;
use crate::models::progress::RunProgress;
use crate::services::{
    aggregator::{ResultAggregator, RetryError},
    ingestion::{self, CandidateFile, IngestionReport},
    ocr::RecognitionAdapter,
    queue::{QueueError, QueueStore},
    read_lock,
    scheduler::{BatchEvent, BatchScheduler, EventSink, RunOutcome, SchedulerOptions},
    write_lock, SharedQueue, SharedResults,
};

/// Shared application state: every component, composed once.
#[derive(Clone)]
pub struct AppState {
    pub queue: SharedQueue,
    pub results: SharedResults,
    pub scheduler: Arc<BatchScheduler>,
    pub progress: Arc<RwLock<RunProgress>>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig, adapter: RecognitionAdapter) -> Self {
        let options = SchedulerOptions {
            item_timeout: config.item_timeout(),
        };
        Self {
            queue: Arc::new(RwLock::new(QueueStore::new())),
            results: Arc::new(RwLock::new(ResultAggregator::new())),
            scheduler: BatchScheduler::new(adapter, options),
            progress: Arc::new(RwLock::new(RunProgress::default())),
            config: Arc::new(config),
        }
    }

    /// Filter and queue submitted files.
    pub fn submit(&self, candidates: Vec<CandidateFile>) -> IngestionReport {
        let report = ingestion::ingest(&mut write_lock(&self.queue), candidates);
        metrics::gauge!("ocr_queue_pending").set(read_lock(&self.queue).counts().pending as f64);
        report
    }

    /// Start a batch run in the background.
    ///
    /// Entering `Running` and capturing the pending items happen before this
    /// returns, so a second call fails with [`StartError::AlreadyRunning`] and
    /// captured items cannot be removed in the meantime. Events are folded
    /// into [`AppState::progress`] and also forwarded to `observer`, if given.
    /// The handle resolves once the progress view has seen every event.
    pub fn start_run(
        &self,
        language: Option<String>,
        observer: Option<EventSink>,
    ) -> Result<StartedRun, StartError> {
        let language = language.unwrap_or_else(|| self.config.ocr_language.clone());

        let guard = self
            .scheduler
            .try_begin(&self.queue)
            .ok_or(StartError::AlreadyRunning)?;
        let pending = guard.pending();
        if pending == 0 {
            return Err(StartError::NothingPending);
        }
        write_lock(&self.progress).begin(&language);

        let (tx, mut rx) = mpsc::unbounded_channel::<BatchEvent>();
        let progress = self.progress.clone();
        let consumer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                write_lock(&progress).apply(&event);
                if let Some(observer) = &observer {
                    let _ = observer.send(event);
                }
            }
        });

        let results = self.results.clone();
        let handle = tokio::spawn(async move {
            let outcome = guard.run(&results, &language, &tx).await;
            drop(tx);
            if let Err(e) = consumer.await {
                tracing::warn!(error = %e, "Progress consumer ended abnormally");
            }
            outcome
        });
        Ok(StartedRun { pending, handle })
    }

    /// Request the running batch to stop after its current item.
    pub fn cancel_run(&self) -> bool {
        self.scheduler.cancel()
    }

    pub fn retry(&self, item_id: ItemId) -> Result<(), RetryError> {
        let mut queue = write_lock(&self.queue);
        write_lock(&self.results).retry(item_id, &mut queue)
    }

    pub fn retry_all(&self) -> usize {
        let mut queue = write_lock(&self.queue);
        write_lock(&self.results).retry_all(&mut queue)
    }

    /// Empty the queue and forget results. Refused while a run is active.
    pub fn reset(&self) -> Result<usize, QueueError> {
        let mut queue = write_lock(&self.queue);
        if self.scheduler.is_running() || queue.is_run_active() {
            return Err(QueueError::RunActive);
        }
        let removed = queue.clear()?;
        drop(queue);
        write_lock(&self.results).reset();
        *write_lock(&self.progress) = RunProgress::default();
        metrics::gauge!("ocr_queue_pending").set(0.0);
        Ok(removed)
    }

    /// Stop accepting work and release the engine.
    pub async fn shutdown(&self) {
        self.scheduler.cancel();
        self.scheduler.shutdown().await;
    }
}

/// A run that has entered `Running`.
#[derive(Debug)]
pub struct StartedRun {
    /// Items captured for the run.
    pub pending: usize,
    pub handle: JoinHandle<RunOutcome>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StartError {
    #[error("A batch run is already in progress")]
    AlreadyRunning,

    #[error("No pending images to process")]
    NothingPending,
}
