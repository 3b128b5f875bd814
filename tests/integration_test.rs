//! Batch runs end to end against a scripted engine.
//!
//! Run with: cargo test --test integration_test

mod fixtures;
mod helpers;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use batch_ocr::app_state::StartError;
use batch_ocr::models::item::ItemStatus;
use batch_ocr::models::progress::{LastOutcome, RunState};
use batch_ocr::models::record::Summary;
use batch_ocr::services::aggregator::{ResultAggregator, RetryError};
use batch_ocr::services::ingestion::{CandidateFile, IngestionOutcome};
use batch_ocr::services::ocr::{RecognitionAdapter, Stage};
use batch_ocr::services::queue::{QueueError, QueueStore};
use batch_ocr::services::scheduler::{BatchEvent, BatchScheduler, RunOutcome, SchedulerOptions};
use batch_ocr::services::{read_lock, write_lock};
use helpers::*;

fn started_names(events: &[BatchEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            BatchEvent::ItemStarted { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_items_run_in_order_and_failure_is_isolated() {
    let launcher = ScriptedLauncher::new().fail_item("b.png");
    let state = state_with(&launcher);
    let ids = queue_pngs(&state, &["a.png", "b.png", "c.png"]);

    let (outcome, events) = run_to_end(&state, None).await;

    assert_eq!(launcher.recognized(), vec!["a.png", "b.png", "c.png"]);
    assert_eq!(started_names(&events), vec!["a.png", "b.png", "c.png"]);
    assert_eq!(status_of(&state, ids[0]), ItemStatus::Completed);
    assert_eq!(status_of(&state, ids[1]), ItemStatus::Errored);
    assert_eq!(status_of(&state, ids[2]), ItemStatus::Completed);

    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.total_count, 3);

    assert!(matches!(events.first(), Some(BatchEvent::RunStarted { pending: 3, .. })));
    assert!(matches!(events.last(), Some(BatchEvent::RunCompleted { .. })));
    assert!(events.contains(&BatchEvent::ItemFailed {
        item_id: ids[1],
        error: "cannot read b.png".to_string(),
    }));

    let queue = read_lock(&state.queue);
    assert_eq!(queue.get(ids[1]).unwrap().error(), Some("cannot read b.png"));
    assert_eq!(queue.get(ids[0]).unwrap().result().unwrap().text, "text of a.png");
}

#[tokio::test]
async fn test_every_claimed_item_reaches_a_terminal_state() {
    let launcher = ScriptedLauncher::new().fail_item("2.png").fail_item("4.png");
    let state = state_with(&launcher);
    queue_pngs(&state, &["1.png", "2.png", "3.png", "4.png"]);

    let (outcome, events) = run_to_end(&state, None).await;
    assert!(matches!(outcome, RunOutcome::Completed(_)));

    let counts = read_lock(&state.queue).counts();
    assert_eq!(counts.pending + counts.processing, 0);
    assert_eq!((counts.completed, counts.errored), (2, 2));
    assert!(events.contains(&BatchEvent::OverallProgress { done: 4, total: 4 }));

    let results = read_lock(&state.results);
    assert_eq!(results.results().len() + results.failures().len(), 4);
}

#[tokio::test]
async fn test_engine_start_failure_aborts_without_touching_items() {
    let launcher = ScriptedLauncher::new().fail_launch("no traineddata for xyz");
    let state = state_with(&launcher);
    let ids = queue_pngs(&state, &["a.png", "b.png"]);

    let (outcome, events) = run_to_end(&state, Some("xyz")).await;

    let RunOutcome::Aborted(error) = outcome else {
        panic!("expected an aborted run, got {outcome:?}");
    };
    assert!(error.contains("no traineddata for xyz"));
    assert!(launcher.recognized().is_empty());
    assert!(ids.iter().all(|id| status_of(&state, *id) == ItemStatus::Pending));
    assert!(started_names(&events).is_empty());
    assert!(matches!(events.last(), Some(BatchEvent::RunAborted { .. })));
    assert!(!state.scheduler.is_running());

    let progress = read_lock(&state.progress);
    assert_eq!(progress.state, RunState::Idle);
    assert!(matches!(progress.last_outcome, Some(LastOutcome::Aborted { .. })));

    // The store is released: it can be cleared again.
    drop(progress);
    tokio_test::assert_ok!(state.reset());
}

#[tokio::test]
async fn test_second_start_while_running_is_refused() {
    let launcher = ScriptedLauncher::new().delay_all(Duration::from_millis(100));
    let state = state_with(&launcher);
    queue_pngs(&state, &["a.png", "b.png"]);

    let handle = state.start_run(None, None).expect("first start").handle;
    assert_eq!(
        state.start_run(None, None).unwrap_err(),
        StartError::AlreadyRunning
    );

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(launcher.recognized(), vec!["a.png", "b.png"]);
}

#[tokio::test]
async fn test_concurrent_runs_process_each_item_once() {
    let launcher = ScriptedLauncher::new().delay_all(Duration::from_millis(50));
    let queue = Arc::new(RwLock::new(QueueStore::new()));
    let results = Arc::new(RwLock::new(ResultAggregator::new()));
    write_lock(&queue).add(vec![
        new_png("a.png"),
        new_png("b.png"),
    ]);
    let scheduler = BatchScheduler::new(
        RecognitionAdapter::new(launcher.clone()),
        SchedulerOptions::default(),
    );
    let (tx, _rx) = mpsc::unbounded_channel();

    let (first, second) = futures::future::join(
        scheduler.run(&queue, &results, "eng", &tx),
        scheduler.run(&queue, &results, "eng", &tx),
    )
    .await;

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == RunOutcome::AlreadyRunning)
            .count(),
        1
    );
    assert_eq!(launcher.recognized(), vec!["a.png", "b.png"]);
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_nothing_pending_is_refused() {
    let launcher = ScriptedLauncher::new();
    let state = state_with(&launcher);
    assert_eq!(
        state.start_run(None, None).unwrap_err(),
        StartError::NothingPending
    );
    assert!(!state.scheduler.is_running());
}

#[tokio::test]
async fn test_retry_puts_failure_back_and_next_run_processes_only_it() {
    let launcher = ScriptedLauncher::new().fail_item("b.png");
    let state = state_with(&launcher);
    let ids = queue_pngs(&state, &["a.png", "b.png", "c.png"]);
    run_to_end(&state, None).await;

    launcher.heal_item("b.png");
    state.retry(ids[1]).unwrap();
    assert_eq!(status_of(&state, ids[1]), ItemStatus::Pending);
    assert!(read_lock(&state.queue).get(ids[1]).unwrap().error().is_none());
    assert!(read_lock(&state.results).failures().is_empty());
    assert_eq!(
        state.retry(ids[1]),
        Err(RetryError::UnknownFailure(ids[1]))
    );

    let (outcome, _) = run_to_end(&state, None).await;
    assert_eq!(
        launcher.recognized(),
        vec!["a.png", "b.png", "c.png", "b.png"]
    );
    assert_eq!(
        outcome,
        RunOutcome::Completed(Summary {
            success_count: 1,
            total_count: 1,
            average_confidence: Some(90.0),
        })
    );
    assert_eq!(status_of(&state, ids[0]), ItemStatus::Completed);
    assert_eq!(status_of(&state, ids[1]), ItemStatus::Completed);
}

#[tokio::test]
async fn test_retry_all_resets_every_failure() {
    let launcher = ScriptedLauncher::new().fail_item("a.png").fail_item("b.png");
    let state = state_with(&launcher);
    queue_pngs(&state, &["a.png", "b.png", "c.png"]);
    run_to_end(&state, None).await;

    assert_eq!(state.retry_all(), 2);
    let counts = read_lock(&state.queue).counts();
    assert_eq!((counts.pending, counts.completed, counts.errored), (2, 1, 0));
    assert!(read_lock(&state.results).failures().is_empty());
}

#[tokio::test]
async fn test_summary_averages_successes_only() {
    let launcher = ScriptedLauncher::new()
        .confidence("a.png", 80.0)
        .confidence("b.png", 90.0)
        .confidence("c.png", 100.0)
        .fail_item("d.png");
    let state = state_with(&launcher);
    queue_pngs(&state, &["a.png", "b.png", "c.png", "d.png"]);

    let (outcome, _) = run_to_end(&state, None).await;
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.total_count, 4);
    assert_eq!(summary.failure_count(), 1);
    assert_eq!(summary.average_confidence, Some(90.0));
    assert_eq!(
        summary.headline(),
        "3/4 images processed successfully | Avg confidence: 90.0%"
    );
}

#[tokio::test]
async fn test_all_failures_have_no_average() {
    let launcher = ScriptedLauncher::new().fail_item("a.png");
    let state = state_with(&launcher);
    queue_pngs(&state, &["a.png"]);

    let (outcome, _) = run_to_end(&state, None).await;
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!((summary.success_count, summary.total_count), (0, 1));
    assert_eq!(summary.average_confidence, None);
}

#[tokio::test]
async fn test_slow_item_times_out_and_run_continues() {
    let launcher = ScriptedLauncher::new().delay_item("slow.png", Duration::from_secs(30));
    let queue = Arc::new(RwLock::new(QueueStore::new()));
    let results = Arc::new(RwLock::new(ResultAggregator::new()));
    let ids = write_lock(&queue).add(vec![
        new_png("slow.png"),
        new_png("fast.png"),
    ]);
    let scheduler = BatchScheduler::new(
        RecognitionAdapter::new(launcher.clone()),
        SchedulerOptions {
            item_timeout: Some(Duration::from_millis(50)),
        },
    );
    let (tx, _rx) = mpsc::unbounded_channel();

    let outcome = scheduler.run(&queue, &results, "eng", &tx).await;

    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!((summary.success_count, summary.total_count), (1, 2));
    let queue = read_lock(&queue);
    assert_eq!(queue.get(ids[0]).unwrap().status(), ItemStatus::Errored);
    assert!(queue.get(ids[0]).unwrap().error().unwrap().contains("timed out"));
    assert_eq!(queue.get(ids[1]).unwrap().status(), ItemStatus::Completed);
}

#[tokio::test]
async fn test_cancel_stops_between_items() {
    let launcher = ScriptedLauncher::new().delay_all(Duration::from_millis(100));
    let state = state_with(&launcher);
    let ids = queue_pngs(&state, &["a.png", "b.png", "c.png"]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = state.start_run(None, Some(tx)).unwrap().handle;
    wait_for(&mut rx, |e| matches!(e, BatchEvent::ItemStarted { .. })).await;
    assert!(state.cancel_run());

    let outcome = handle.await.unwrap();
    let RunOutcome::Cancelled { summary, remaining } = outcome else {
        panic!("expected a cancelled run, got {outcome:?}");
    };
    assert_eq!(remaining, 2);
    assert_eq!(summary.success_count, 1);
    assert_eq!(status_of(&state, ids[0]), ItemStatus::Completed);
    assert_eq!(status_of(&state, ids[1]), ItemStatus::Pending);
    assert_eq!(status_of(&state, ids[2]), ItemStatus::Pending);

    assert!(!state.cancel_run());
    assert!(matches!(
        read_lock(&state.progress).last_outcome,
        Some(LastOutcome::Cancelled { remaining: 2, .. })
    ));
}

#[tokio::test]
async fn test_cancel_right_after_start_is_honoured() {
    let launcher = ScriptedLauncher::new();
    let state = state_with(&launcher);
    let ids = queue_pngs(&state, &["a.png", "b.png", "c.png"]);

    let started = state.start_run(None, None).unwrap();
    assert_eq!(started.pending, 3);
    assert!(state.cancel_run());

    let outcome = started.handle.await.unwrap();
    let RunOutcome::Cancelled { summary, remaining } = outcome else {
        panic!("expected a cancelled run, got {outcome:?}");
    };
    assert_eq!(remaining, 3);
    assert_eq!(summary.total_count, 0);
    assert!(launcher.recognized().is_empty());
    assert!(ids.iter().all(|id| status_of(&state, *id) == ItemStatus::Pending));
    assert!(!state.scheduler.is_running());
}

#[tokio::test]
async fn test_reset_refused_while_store_is_claimed() {
    let state = state_with(&ScriptedLauncher::new());
    queue_pngs(&state, &["a.png"]);

    write_lock(&state.queue).claim_pending();
    assert_eq!(state.reset(), Err(QueueError::RunActive));

    write_lock(&state.queue).release();
    assert_eq!(state.reset(), Ok(1));
}

#[tokio::test]
async fn test_captured_items_are_locked_during_run() {
    let launcher = ScriptedLauncher::new().delay_all(Duration::from_millis(100));
    let state = state_with(&launcher);
    let ids = queue_pngs(&state, &["a.png", "b.png"]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = state.start_run(None, Some(tx)).unwrap().handle;
    wait_for(&mut rx, |e| matches!(e, BatchEvent::ItemStarted { .. })).await;

    assert_eq!(
        write_lock(&state.queue).remove(ids[0]),
        Err(QueueError::Busy(ids[0]))
    );
    assert_eq!(
        write_lock(&state.queue).remove(ids[1]),
        Err(QueueError::Busy(ids[1]))
    );
    assert_eq!(state.reset(), Err(QueueError::RunActive));

    // Images added mid-run wait for the next run.
    let late = queue_pngs(&state, &["late.png"]);
    handle.await.unwrap();
    assert_eq!(status_of(&state, late[0]), ItemStatus::Pending);
    assert_eq!(launcher.recognized(), vec!["a.png", "b.png"]);
}

#[tokio::test]
async fn test_engine_is_reused_and_restarted_on_language_change() {
    let launcher = ScriptedLauncher::new();
    let state = state_with(&launcher);

    queue_pngs(&state, &["a.png"]);
    run_to_end(&state, Some("eng")).await;
    queue_pngs(&state, &["b.png"]);
    run_to_end(&state, Some("eng")).await;
    assert_eq!(launcher.launches(), 1);

    queue_pngs(&state, &["c.png"]);
    run_to_end(&state, Some("deu")).await;
    assert_eq!(launcher.launches(), 2);
    assert_eq!(launcher.terminations(), 1);
    assert_eq!(launcher.languages(), vec!["eng", "deu"]);

    state.shutdown().await;
    assert_eq!(launcher.terminations(), 2);
}

#[tokio::test]
async fn test_stage_reports_pass_through_unchanged() {
    let launcher = ScriptedLauncher::new();
    let state = state_with(&launcher);
    let ids = queue_pngs(&state, &["a.png"]);

    let (_, events) = run_to_end(&state, None).await;

    let item_stages: Vec<Stage> = events
        .iter()
        .filter_map(|event| match event {
            BatchEvent::ItemProgress { item_id, progress } if *item_id == ids[0] => {
                Some(progress.stage.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        item_stages,
        vec![
            Stage::Recognizing,
            Stage::Other(UNKNOWN_STAGE.to_string()),
            Stage::Done
        ]
    );
    assert!(events.iter().any(|event| matches!(
        event,
        BatchEvent::EngineProgress { progress } if progress.stage == Stage::LoadingLanguage
    )));
}

#[tokio::test]
async fn test_results_are_reset_per_run() {
    let launcher = ScriptedLauncher::new();
    let state = state_with(&launcher);

    queue_pngs(&state, &["a.png", "b.png"]);
    run_to_end(&state, None).await;
    assert_eq!(read_lock(&state.results).results().len(), 2);

    queue_pngs(&state, &["c.png"]);
    run_to_end(&state, None).await;
    let results = read_lock(&state.results);
    assert_eq!(results.results().len(), 1);
    assert_eq!(results.results()[0].filename, "c.png");

    let progress = read_lock(&state.progress);
    assert_eq!(progress.state, RunState::Idle);
    assert_eq!((progress.done, progress.total), (1, 1));
}

#[tokio::test]
async fn test_sniffed_and_declared_types_are_filtered() {
    let launcher = ScriptedLauncher::new();
    let state = state_with(&launcher);

    let report = state.submit(vec![
        CandidateFile {
            name: "from-disk".to_string(),
            mime: None,
            bytes: Bytes::from(fixtures::small_png()),
        },
        CandidateFile {
            name: "photo.jpg".to_string(),
            mime: None,
            bytes: Bytes::from_static(fixtures::JPEG_MAGIC),
        },
        png("scan.png"),
    ]);

    assert_eq!(
        report.outcome(),
        IngestionOutcome::PartiallyAccepted {
            accepted: 2,
            rejected: 1
        }
    );
    assert_eq!(report.rejected[0].name, "photo.jpg");
    assert_eq!(read_lock(&state.queue).len(), 2);
}
