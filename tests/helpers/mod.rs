//! Scripted OCR engine and shared setup for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use batch_ocr::app_state::AppState;
use batch_ocr::config::AppConfig;
use batch_ocr::models::item::{ItemId, ItemStatus, NewImage, Recognition};
use batch_ocr::services::ingestion::CandidateFile;
use batch_ocr::services::ocr::{
    EngineLauncher, ImageInput, OcrError, ProgressSink, RecognitionAdapter, RecognitionEngine,
    Stage, StageProgress,
};
use batch_ocr::services::read_lock;
use batch_ocr::services::scheduler::{BatchEvent, RunOutcome};

use crate::fixtures;

/// Stage label outside the engine's known vocabulary.
pub const UNKNOWN_STAGE: &str = "preprocessing image";

/// Launcher whose engines follow a script instead of reading images.
///
/// Clones share the script and the counters, so a test can keep one clone
/// after handing the other to the adapter.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    inner: Arc<Script>,
}

#[derive(Default)]
struct Script {
    launch_error: Mutex<Option<String>>,
    failing: Mutex<HashSet<String>>,
    confidences: Mutex<HashMap<String, f64>>,
    delays: Mutex<HashMap<String, Duration>>,
    default_delay: Mutex<Option<Duration>>,
    launches: AtomicUsize,
    terminations: AtomicUsize,
    languages: Mutex<Vec<String>>,
    recognized: Mutex<Vec<String>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every launch fails with `reason`.
    pub fn fail_launch(self, reason: &str) -> Self {
        *self.inner.launch_error.lock().unwrap() = Some(reason.to_string());
        self
    }

    /// Recognition of `name` fails.
    pub fn fail_item(self, name: &str) -> Self {
        self.inner.failing.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn heal_item(&self, name: &str) {
        self.inner.failing.lock().unwrap().remove(name);
    }

    pub fn confidence(self, name: &str, confidence: f64) -> Self {
        self.inner
            .confidences
            .lock()
            .unwrap()
            .insert(name.to_string(), confidence);
        self
    }

    /// Recognition of `name` takes `delay`.
    pub fn delay_item(self, name: &str, delay: Duration) -> Self {
        self.inner
            .delays
            .lock()
            .unwrap()
            .insert(name.to_string(), delay);
        self
    }

    /// Every recognition takes at least `delay`.
    pub fn delay_all(self, delay: Duration) -> Self {
        *self.inner.default_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn launches(&self) -> usize {
        self.inner.launches.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.inner.terminations.load(Ordering::SeqCst)
    }

    pub fn languages(&self) -> Vec<String> {
        self.inner.languages.lock().unwrap().clone()
    }

    /// Names handed to the engine, in call order.
    pub fn recognized(&self) -> Vec<String> {
        self.inner.recognized.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineLauncher for ScriptedLauncher {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn health_check(&self) -> Result<(), OcrError> {
        match self.inner.launch_error.lock().unwrap().clone() {
            Some(reason) => Err(OcrError::EngineInit(reason)),
            None => Ok(()),
        }
    }

    async fn launch(
        &self,
        language: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Box<dyn RecognitionEngine>, OcrError> {
        self.inner.launches.fetch_add(1, Ordering::SeqCst);
        self.inner
            .languages
            .lock()
            .unwrap()
            .push(language.to_string());

        progress.report(StageProgress::new(Stage::LoadingEngine, 0.0));
        let launch_error = self.inner.launch_error.lock().unwrap().clone();
        if let Some(reason) = launch_error {
            return Err(OcrError::Io(std::io::Error::other(reason)));
        }
        progress.report(StageProgress::new(Stage::LoadingLanguage, 1.0));

        Ok(Box::new(ScriptedEngine {
            script: self.inner.clone(),
        }))
    }
}

struct ScriptedEngine {
    script: Arc<Script>,
}

#[async_trait]
impl RecognitionEngine for ScriptedEngine {
    async fn recognize(
        &self,
        image: &ImageInput,
        progress: &dyn ProgressSink,
    ) -> Result<Recognition, OcrError> {
        self.script
            .recognized
            .lock()
            .unwrap()
            .push(image.name.clone());
        progress.report(StageProgress::new(Stage::Recognizing, 0.0));
        progress.report(StageProgress::new(Stage::from_label(UNKNOWN_STAGE), 0.5));

        let delay = self
            .script
            .delays
            .lock()
            .unwrap()
            .get(&image.name)
            .copied()
            .or(*self.script.default_delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.script.failing.lock().unwrap().contains(&image.name) {
            return Err(OcrError::Recognition(format!("cannot read {}", image.name)));
        }
        let confidence = self
            .script
            .confidences
            .lock()
            .unwrap()
            .get(&image.name)
            .copied()
            .unwrap_or(90.0);

        progress.report(StageProgress::new(Stage::Done, 1.0));
        Ok(Recognition::new(format!("text of {}", image.name), confidence))
    }

    async fn terminate(&mut self) {
        self.script.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        item_timeout_secs: 0,
        ..AppConfig::default()
    }
}

pub fn state_with(launcher: &ScriptedLauncher) -> AppState {
    AppState::new(test_config(), RecognitionAdapter::new(launcher.clone()))
}

pub fn png(name: &str) -> CandidateFile {
    CandidateFile {
        name: name.to_string(),
        mime: Some("image/png".to_string()),
        bytes: Bytes::from(fixtures::small_png()),
    }
}

/// Image for feeding a bare [`batch_ocr::services::queue::QueueStore`].
pub fn new_png(name: &str) -> NewImage {
    NewImage {
        name: name.to_string(),
        mime: Some("image/png".to_string()),
        bytes: Bytes::from(fixtures::small_png()),
    }
}

/// Queue PNGs under the given names and return their ids in order.
pub fn queue_pngs(state: &AppState, names: &[&str]) -> Vec<ItemId> {
    let report = state.submit(names.iter().map(|name| png(name)).collect());
    assert_eq!(report.accepted.len(), names.len());
    report.accepted
}

/// Start a run and wait for it, returning the outcome and every event seen.
pub async fn run_to_end(state: &AppState, language: Option<&str>) -> (RunOutcome, Vec<BatchEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = state
        .start_run(language.map(str::to_string), Some(tx))
        .expect("run should start")
        .handle;
    let outcome = handle.await.expect("run task panicked");

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome, events)
}

/// Wait for the first event matching `pred`.
pub async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<BatchEvent>,
    pred: impl Fn(&BatchEvent) -> bool,
) -> BatchEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn status_of(state: &AppState, id: ItemId) -> ItemStatus {
    read_lock(&state.queue)
        .get(id)
        .map(|item| item.status())
        .expect("item should be queued")
}

/// File name, content type and bytes of one upload part.
pub type FilePart<'a> = (&'a str, &'a str, &'a [u8]);

pub fn part<'a>(name: &'a str, mime: &'a str, bytes: &'a [u8]) -> FilePart<'a> {
    (name, mime, bytes)
}

/// `multipart/form-data` body with one file part per entry.
pub fn multipart_body(boundary: &str, files: &[FilePart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, mime, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
