use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, Serializer};

use crate::models::item::Recognition;

/// Named phase reported by a recognition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    LoadingEngine,
    LoadingLanguage,
    Recognizing,
    Done,
    /// A label outside the known vocabulary, kept verbatim.
    Other(String),
}

impl Stage {
    pub const LOADING_ENGINE: &'static str = "loading tesseract core";
    pub const LOADING_LANGUAGE: &'static str = "loading language traineddata";
    pub const RECOGNIZING: &'static str = "recognizing text";
    pub const DONE: &'static str = "done";

    pub fn from_label(label: &str) -> Self {
        match label {
            Self::LOADING_ENGINE => Stage::LoadingEngine,
            Self::LOADING_LANGUAGE => Stage::LoadingLanguage,
            Self::RECOGNIZING => Stage::Recognizing,
            Self::DONE => Stage::Done,
            other => Stage::Other(other.to_string()),
        }
    }

    /// Engine-side label of this stage.
    pub fn label(&self) -> &str {
        match self {
            Stage::LoadingEngine => Self::LOADING_ENGINE,
            Stage::LoadingLanguage => Self::LOADING_LANGUAGE,
            Stage::Recognizing => Self::RECOGNIZING,
            Stage::Done => Self::DONE,
            Stage::Other(label) => label,
        }
    }

    /// User-facing phrase. Unknown stages are shown as reported.
    pub fn describe(&self) -> &str {
        match self {
            Stage::LoadingEngine => "Loading OCR engine...",
            Stage::LoadingLanguage => "Loading language data...",
            Stage::Recognizing => "Analyzing image and extracting text...",
            Stage::Done => "Processing complete!",
            Stage::Other(label) => label,
        }
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// One progress report: a stage and how far into it the engine is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageProgress {
    pub stage: Stage,
    /// Always within 0.0..=1.0.
    pub fraction: f64,
}

impl StageProgress {
    pub fn new(stage: Stage, fraction: f64) -> Self {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        Self { stage, fraction }
    }

    pub fn percent(&self) -> f64 {
        self.fraction * 100.0
    }
}

/// Receiver of engine progress reports.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: StageProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(StageProgress) + Send + Sync,
{
    fn report(&self, progress: StageProgress) {
        self(progress)
    }
}

/// Sink that discards every report.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: StageProgress) {}
}

/// Image handed to an engine.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub name: String,
    pub bytes: Bytes,
}

/// A started recognition engine, bound to one language configuration.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Recognise one image. Failures here concern only this image.
    async fn recognize(
        &self,
        image: &ImageInput,
        progress: &dyn ProgressSink,
    ) -> Result<Recognition, OcrError>;

    /// Release whatever the engine holds.
    async fn terminate(&mut self);
}

/// Starts engine instances.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap availability probe for health checks.
    async fn health_check(&self) -> Result<(), OcrError>;

    /// Start an engine for `language`. Expensive; the adapter calls it once per language.
    async fn launch(
        &self,
        language: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Box<dyn RecognitionEngine>, OcrError>;
}

struct LiveEngine {
    language: String,
    engine: Box<dyn RecognitionEngine>,
}

/// Owns at most one engine instance and reuses it across items.
pub struct RecognitionAdapter {
    launcher: Arc<dyn EngineLauncher>,
    live: Option<LiveEngine>,
}

impl RecognitionAdapter {
    pub fn new(launcher: impl EngineLauncher + 'static) -> Self {
        Self {
            launcher: Arc::new(launcher),
            live: None,
        }
    }

    pub fn launcher(&self) -> Arc<dyn EngineLauncher> {
        self.launcher.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.live.is_some()
    }

    /// Language of the live engine, if one is running.
    pub fn language(&self) -> Option<&str> {
        self.live.as_ref().map(|live| live.language.as_str())
    }

    /// Start the engine unless one is already running for `language`.
    ///
    /// A live engine for a different language is shut down first. Any launch
    /// failure is reported as [`OcrError::EngineInit`].
    pub async fn ensure_ready(
        &mut self,
        language: &str,
        progress: &dyn ProgressSink,
    ) -> Result<(), OcrError> {
        if self.language() == Some(language) {
            return Ok(());
        }
        if self.live.is_some() {
            tracing::info!(language, "Language changed, restarting OCR engine");
            self.shutdown().await;
        }

        tracing::info!(engine = self.launcher.name(), language, "Initializing OCR engine");
        let engine = self
            .launcher
            .launch(language, progress)
            .await
            .map_err(|e| match e {
                OcrError::EngineInit(reason) => OcrError::EngineInit(reason),
                other => OcrError::EngineInit(other.to_string()),
            })?;

        self.live = Some(LiveEngine {
            language: language.to_string(),
            engine,
        });
        Ok(())
    }

    /// Recognise one image with the live engine.
    pub async fn recognize(
        &self,
        image: &ImageInput,
        progress: &dyn ProgressSink,
    ) -> Result<Recognition, OcrError> {
        let live = self.live.as_ref().ok_or(OcrError::NotReady)?;
        live.engine.recognize(image, progress).await
    }

    /// Release the engine. Does nothing when none is running.
    pub async fn shutdown(&mut self) {
        if let Some(mut live) = self.live.take() {
            live.engine.terminate().await;
            tracing::info!(language = %live.language, "OCR engine terminated");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("Failed to initialize OCR engine: {0}")]
    EngineInit(String),

    #[error("{0}")]
    Recognition(String),

    #[error("Recognition timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("OCR engine has not been initialized")]
    NotReady,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    /// Whether the error takes the engine down rather than one image.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OcrError::EngineInit(_) | OcrError::NotReady)
    }
}
