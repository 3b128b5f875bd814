//! Sequential batch scheduler.
//!
//! A run goes `Idle -> Running -> (Completed | Cancelled | Aborted) -> Idle`.
//! It captures the pending items once, when it enters `Running`, then feeds
//! them one at a time to the recognition adapter in that fixed order. A
//! failing item is marked errored and the loop moves on; only an engine that
//! cannot start aborts the run.
//!
//! Queue and result mutations happen synchronously between the two
//! suspension points (`ensure_ready` and `recognize`), so locks are never
//! held across an `.await`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use super::ocr::{EngineLauncher, ImageInput, OcrError, RecognitionAdapter, StageProgress};
use super::{read_lock, write_lock, SharedQueue, SharedResults};
use crate::models::item::{ItemId, Recognition};
use crate::models::record::{ErrorRecord, ResultRecord, Summary};

/// Channel the scheduler reports on. Unbounded so reporting never suspends the loop.
pub type EventSink = mpsc::UnboundedSender<BatchEvent>;

/// Notifications emitted during a run, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    RunStarted {
        pending: usize,
        language: String,
    },
    /// Progress while the engine starts.
    EngineProgress {
        progress: StageProgress,
    },
    /// The item at the cursor changed.
    ItemStarted {
        item_id: ItemId,
        name: String,
        size: u64,
        index: usize,
        total: usize,
    },
    ItemProgress {
        item_id: ItemId,
        progress: StageProgress,
    },
    ItemCompleted {
        item_id: ItemId,
        confidence: f64,
    },
    ItemFailed {
        item_id: ItemId,
        error: String,
    },
    OverallProgress {
        done: usize,
        total: usize,
    },
    RunCompleted {
        summary: Summary,
    },
    RunCancelled {
        summary: Summary,
        remaining: usize,
    },
    RunAborted {
        error: String,
    },
}

/// How a call to run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Summary),
    /// Stopped between items on request; the rest are still pending.
    Cancelled { summary: Summary, remaining: usize },
    /// The engine could not start. No item was touched.
    Aborted(String),
    /// Another run was already in progress; nothing happened.
    AlreadyRunning,
}

/// Ordered item ids captured at run start, and the cursor into them.
#[derive(Debug, Clone)]
pub struct BatchRun {
    items: Vec<ItemId>,
    current_index: usize,
}

impl BatchRun {
    pub fn new(items: Vec<ItemId>) -> Self {
        Self {
            items,
            current_index: 0,
        }
    }

    pub fn current(&self) -> Option<ItemId> {
        self.items.get(self.current_index).copied()
    }

    pub fn advance(&mut self) {
        if self.current_index < self.items.len() {
            self.current_index += 1;
        }
    }

    pub fn done(&self) -> usize {
        self.current_index
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn remaining(&self) -> usize {
        self.items.len() - self.current_index
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Upper bound on one recognition; expiry fails only that item.
    pub item_timeout: Option<Duration>,
}

/// Drives batch runs over the queue through the single recognition adapter.
pub struct BatchScheduler {
    adapter: Mutex<RecognitionAdapter>,
    launcher: Arc<dyn EngineLauncher>,
    running: AtomicBool,
    cancel_requested: AtomicBool,
    options: SchedulerOptions,
}

impl BatchScheduler {
    pub fn new(adapter: RecognitionAdapter, options: SchedulerOptions) -> Arc<Self> {
        Arc::new(Self {
            launcher: adapter.launcher(),
            adapter: Mutex::new(adapter),
            running: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            options,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enter `Running` and capture the pending items, unless a run is
    /// already in progress.
    ///
    /// The returned guard is the only way to drive a run; dropping it hands
    /// the queue back and returns the scheduler to idle.
    pub fn try_begin(self: &Arc<Self>, queue: &SharedQueue) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.cancel_requested.store(false, Ordering::SeqCst);
        let items = write_lock(queue).claim_pending();
        Some(RunGuard {
            scheduler: Arc::clone(self),
            queue: Arc::clone(queue),
            run: BatchRun::new(items),
        })
    }

    /// Run one batch over the currently pending items.
    pub async fn run(
        self: &Arc<Self>,
        queue: &SharedQueue,
        results: &SharedResults,
        language: &str,
        events: &EventSink,
    ) -> RunOutcome {
        match self.try_begin(queue) {
            Some(guard) => guard.run(results, language, events).await,
            None => {
                tracing::debug!("Batch already running, start ignored");
                RunOutcome::AlreadyRunning
            }
        }
    }

    /// Ask the running batch to stop after the current item.
    /// Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        true
    }

    /// Probe the engine without touching the live instance.
    pub async fn health_check(&self) -> Result<(), OcrError> {
        self.launcher.health_check().await
    }

    /// Release the engine. Waits for a running batch to finish first.
    pub async fn shutdown(&self) {
        self.adapter.lock().await.shutdown().await;
    }
}

/// Proof that the caller owns the `Running` state and the captured items.
pub struct RunGuard {
    scheduler: Arc<BatchScheduler>,
    queue: SharedQueue,
    run: BatchRun,
}

impl RunGuard {
    /// Number of items captured for this run.
    pub fn pending(&self) -> usize {
        self.run.total()
    }

    /// Drive the run to a terminal state.
    pub async fn run(
        mut self,
        results: &SharedResults,
        language: &str,
        events: &EventSink,
    ) -> RunOutcome {
        let scheduler = Arc::clone(&self.scheduler);
        let queue = Arc::clone(&self.queue);

        write_lock(results).reset();
        let pending = self.run.total();
        tracing::info!(pending, language, "Starting batch run");
        emit(
            events,
            BatchEvent::RunStarted {
                pending,
                language: language.to_string(),
            },
        );

        let mut adapter = scheduler.adapter.lock().await;

        let engine_sink = |progress: StageProgress| {
            emit(events, BatchEvent::EngineProgress { progress });
        };
        if let Err(e) = adapter.ensure_ready(language, &engine_sink).await {
            let error = e.to_string();
            tracing::error!(error = %error, "OCR engine failed to start, aborting run");
            metrics::counter!("ocr_runs_aborted_total").increment(1);
            emit(events, BatchEvent::RunAborted { error: error.clone() });
            return RunOutcome::Aborted(error);
        }

        emit(
            events,
            BatchEvent::OverallProgress {
                done: 0,
                total: self.run.total(),
            },
        );

        let mut cancelled = false;
        while let Some(item_id) = self.run.current() {
            if scheduler.cancel_requested.swap(false, Ordering::SeqCst) {
                cancelled = true;
                break;
            }

            process_item(
                &adapter,
                &scheduler.options,
                &queue,
                results,
                events,
                item_id,
                self.run.done(),
                self.run.total(),
            )
            .await;

            self.run.advance();
            emit(
                events,
                BatchEvent::OverallProgress {
                    done: self.run.done(),
                    total: self.run.total(),
                },
            );
        }
        drop(adapter);

        let pending_after = {
            let mut queue = write_lock(&queue);
            queue.release();
            queue.counts().pending
        };
        metrics::gauge!("ocr_queue_pending").set(pending_after as f64);

        let summary = read_lock(results).summary();
        if cancelled {
            let remaining = self.run.remaining();
            tracing::info!(
                succeeded = summary.success_count,
                failed = summary.failure_count(),
                remaining,
                "Batch run cancelled"
            );
            emit(events, BatchEvent::RunCancelled { summary, remaining });
            return RunOutcome::Cancelled { summary, remaining };
        }

        tracing::info!(
            succeeded = summary.success_count,
            failed = summary.failure_count(),
            average_confidence = ?summary.average_confidence,
            "Batch run completed"
        );
        emit(events, BatchEvent::RunCompleted { summary });
        RunOutcome::Completed(summary)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        write_lock(&self.queue).release();
        self.scheduler.running.store(false, Ordering::SeqCst);
    }
}

/// Take one item from pending to a terminal state.
#[allow(clippy::too_many_arguments)]
async fn process_item(
    adapter: &RecognitionAdapter,
    options: &SchedulerOptions,
    queue: &SharedQueue,
    results: &SharedResults,
    events: &EventSink,
    item_id: ItemId,
    index: usize,
    total: usize,
) {
    let input = {
        let mut queue = write_lock(queue);
        let prepared = queue.mark_processing(item_id).and_then(|_| {
            queue
                .get(item_id)
                .map(|item| (item.name.clone(), item.size, item.payload().clone()))
                .ok_or(super::queue::QueueError::NotFound(item_id))
        });
        match prepared {
            Ok((name, size, bytes)) => {
                emit(
                    events,
                    BatchEvent::ItemStarted {
                        item_id,
                        name: name.clone(),
                        size,
                        index,
                        total,
                    },
                );
                ImageInput { name, bytes }
            }
            Err(e) => {
                // Only reachable if the store was changed behind the run's back.
                tracing::warn!(item_id = %item_id, error = %e, "Captured item could not be started");
                let filename = queue.get(item_id).map(|i| i.name.clone()).unwrap_or_default();
                drop(queue);
                write_lock(results).record_failure(ErrorRecord {
                    item_id,
                    filename,
                    error: e.to_string(),
                });
                emit(
                    events,
                    BatchEvent::ItemFailed {
                        item_id,
                        error: e.to_string(),
                    },
                );
                return;
            }
        }
    };

    tracing::info!(item_id = %item_id, name = %input.name, index = index + 1, total, "Recognizing image");

    let item_sink = |progress: StageProgress| {
        emit(events, BatchEvent::ItemProgress { item_id, progress });
    };
    let started = Instant::now();
    let outcome = match options.item_timeout {
        Some(limit) => tokio::time::timeout(limit, adapter.recognize(&input, &item_sink))
            .await
            .unwrap_or_else(|_| Err(OcrError::Timeout(limit))),
        None => adapter.recognize(&input, &item_sink).await,
    };
    let elapsed = started.elapsed();
    metrics::histogram!("ocr_recognition_seconds").record(elapsed.as_secs_f64());

    match outcome {
        Ok(recognition) => record_success(queue, results, events, item_id, input.name, recognition),
        Err(e) => {
            if e.is_fatal() {
                tracing::error!(item_id = %item_id, name = %input.name, error = %e, "OCR engine unavailable");
            } else {
                tracing::warn!(item_id = %item_id, name = %input.name, error = %e, "Recognition failed");
            }
            record_failure(queue, results, events, item_id, input.name, e.to_string());
        }
    }
}

fn record_success(
    queue: &SharedQueue,
    results: &SharedResults,
    events: &EventSink,
    item_id: ItemId,
    filename: String,
    recognition: Recognition,
) {
    let confidence = recognition.confidence;
    let record = ResultRecord {
        item_id,
        filename,
        text: recognition.text.clone(),
        confidence,
    };

    if let Err(e) = write_lock(queue).complete(item_id, recognition) {
        tracing::warn!(item_id = %item_id, error = %e, "Could not mark item completed");
    }
    write_lock(results).record_success(record);
    metrics::counter!("ocr_items_completed_total").increment(1);

    tracing::info!(item_id = %item_id, confidence, "Image recognized");
    emit(events, BatchEvent::ItemCompleted { item_id, confidence });
}

fn record_failure(
    queue: &SharedQueue,
    results: &SharedResults,
    events: &EventSink,
    item_id: ItemId,
    filename: String,
    error: String,
) {
    if let Err(e) = write_lock(queue).fail(item_id, error.clone()) {
        tracing::warn!(item_id = %item_id, error = %e, "Could not mark item errored");
    }
    write_lock(results).record_failure(ErrorRecord {
        item_id,
        filename,
        error: error.clone(),
    });
    metrics::counter!("ocr_items_failed_total").increment(1);

    emit(events, BatchEvent::ItemFailed { item_id, error });
}

fn emit(events: &EventSink, event: BatchEvent) {
    // A caller that stopped listening does not stop the run.
    let _ = events.send(event);
}
