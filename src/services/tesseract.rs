//! Tesseract engine driven through its command-line binary.
//!
//! Launching verifies the binary and the requested language data once.
//! Each recognition writes the image to a scratch directory and asks
//! Tesseract for both plain text and word-level TSV, the latter for the
//! confidence score.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use super::ocr::{
    EngineLauncher, ImageInput, OcrError, ProgressSink, RecognitionEngine, Stage, StageProgress,
};
use crate::models::item::Recognition;

/// Starts [`TesseractEngine`]s.
#[derive(Debug, Clone)]
pub struct TesseractLauncher {
    binary: PathBuf,
}

impl TesseractLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, OcrError> {
        Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OcrError::EngineInit(format!(
                    "{} not found (install tesseract-ocr)",
                    self.binary.display()
                )),
                _ => OcrError::Io(e),
            })
    }
}

impl Default for TesseractLauncher {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl EngineLauncher for TesseractLauncher {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn health_check(&self) -> Result<(), OcrError> {
        let output = self.run(&["--version"]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(OcrError::EngineInit(stderr_of(&output)))
        }
    }

    async fn launch(
        &self,
        language: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Box<dyn RecognitionEngine>, OcrError> {
        progress.report(StageProgress::new(Stage::LoadingEngine, 0.0));
        let version = self.run(&["--version"]).await?;
        if !version.status.success() {
            return Err(OcrError::EngineInit(stderr_of(&version)));
        }
        progress.report(StageProgress::new(Stage::LoadingEngine, 1.0));

        progress.report(StageProgress::new(Stage::LoadingLanguage, 0.0));
        let listing = self.run(&["--list-langs"]).await?;
        if !listing.status.success() {
            return Err(OcrError::EngineInit(stderr_of(&listing)));
        }
        // Older releases print the list on stderr.
        let mut text = String::from_utf8_lossy(&listing.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&listing.stderr));
        let installed = parse_language_list(&text);

        let missing: Vec<&str> = language
            .split('+')
            .filter(|code| !installed.iter().any(|have| have == code))
            .collect();
        if !missing.is_empty() {
            return Err(OcrError::EngineInit(format!(
                "language data not installed: {}",
                missing.join(", ")
            )));
        }
        progress.report(StageProgress::new(Stage::LoadingLanguage, 1.0));

        tracing::debug!(language, binary = %self.binary.display(), "Tesseract ready");
        Ok(Box::new(TesseractEngine {
            binary: self.binary.clone(),
            language: language.to_string(),
        }))
    }
}

/// A Tesseract configuration bound to one language.
#[derive(Debug)]
pub struct TesseractEngine {
    binary: PathBuf,
    language: String,
}

impl TesseractEngine {
    async fn run_tesseract(&self, image_path: &Path, output_base: &Path) -> Result<(), OcrError> {
        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg(output_base)
            .args(["-l", &self.language, "txt", "tsv"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OcrError::Recognition(format!("failed to run tesseract: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(OcrError::Recognition(format!(
                "tesseract failed: {}",
                stderr_of(&output)
            )))
        }
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    async fn recognize(
        &self,
        image: &ImageInput,
        progress: &dyn ProgressSink,
    ) -> Result<Recognition, OcrError> {
        let scratch = tempfile::tempdir()?;
        let image_path = scratch.path().join("input.png");
        let output_base = scratch.path().join("output");
        tokio::fs::write(&image_path, &image.bytes).await?;

        progress.report(StageProgress::new(Stage::Recognizing, 0.0));
        self.run_tesseract(&image_path, &output_base).await?;
        progress.report(StageProgress::new(Stage::Recognizing, 1.0));

        let text = tokio::fs::read_to_string(output_base.with_extension("txt")).await?;
        let tsv = tokio::fs::read_to_string(output_base.with_extension("tsv")).await?;
        let confidence = mean_word_confidence(&tsv);

        progress.report(StageProgress::new(Stage::Done, 1.0));
        Ok(Recognition::new(text.trim_end(), confidence))
    }

    async fn terminate(&mut self) {
        // Every recognition is its own process; nothing stays resident.
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Language codes from `tesseract --list-langs` output.
fn parse_language_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of available languages"))
        .map(str::to_string)
        .collect()
}

/// Mean confidence of recognised words in Tesseract TSV output.
///
/// Word rows are level 5; non-word rows carry a confidence of -1. Returns 0
/// when the page has no words.
fn mean_word_confidence(tsv: &str) -> f64 {
    let mut sum = 0.0;
    let mut words = 0usize;
    for line in tsv.lines().skip(1) {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 12 || columns[0] != "5" {
            continue;
        }
        match columns[10].parse::<f64>() {
            Ok(conf) if conf >= 0.0 => {
                sum += conf;
                words += 1;
            }
            _ => {}
        }
    }
    if words == 0 {
        0.0
    } else {
        sum / words as f64
    }
}
