//! `ocr-batch`: recognise a set of PNG files from the command line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use garde::Validate;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use batch_ocr::{
    app_state::AppState,
    config::AppConfig,
    services::{
        export,
        ingestion::CandidateFile,
        ocr::RecognitionAdapter,
        read_lock,
        scheduler::{BatchEvent, RunOutcome},
        tesseract::TesseractLauncher,
    },
};

#[derive(Parser, Debug)]
#[command(name = "ocr-batch", version, about = "Recognise text in a batch of PNG images")]
struct Args {
    /// Tesseract language code(s), `+`-joined.
    #[arg(short, long, env = "OCR_LANGUAGE", default_value = "eng")]
    lang: String,

    /// Per-image limit in seconds; 0 disables it.
    #[arg(long, env = "ITEM_TIMEOUT_SECS", default_value_t = 300)]
    timeout: u64,

    /// Tesseract binary to run.
    #[arg(long, env = "TESSERACT_BIN", default_value = "tesseract")]
    tesseract: String,

    /// Write every result into one zip archive.
    #[arg(long)]
    zip: Option<PathBuf>,

    /// Write every result into one text file, under per-image headers.
    #[arg(long)]
    text: Option<PathBuf>,

    /// Write one `.txt` file per image into this directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Images to process. Anything that is not a PNG is skipped.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = AppConfig {
        ocr_language: args.lang.clone(),
        tesseract_bin: args.tesseract.clone(),
        item_timeout_secs: args.timeout,
        ..AppConfig::default()
    };
    config.validate()?;

    let adapter = RecognitionAdapter::new(TesseractLauncher::new(&config.tesseract_bin));
    let state = AppState::new(config, adapter);

    let mut candidates = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let bytes = tokio::fs::read(path).await?;
        candidates.push(CandidateFile {
            name: display_name(path),
            mime: None,
            bytes: Bytes::from(bytes),
        });
    }

    let report = state.submit(candidates);
    for rejected in &report.rejected {
        eprintln!("skipped {}", rejected.name);
    }
    if let Some(notice) = report.outcome().notice() {
        eprintln!("{notice}");
    }
    if report.accepted.is_empty() {
        return Ok(ExitCode::FAILURE);
    }

    let cancel_state = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && cancel_state.cancel_run() {
            eprintln!("Stopping after the current image...");
        }
    });

    let bar = ProgressBar::new(report.accepted.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("█▓░"),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let (tx, rx) = mpsc::unbounded_channel();
    let started = state.start_run(Some(args.lang.clone()), Some(tx))?;
    bar.set_length(started.pending as u64);
    let display = tokio::spawn(drive_progress_bar(bar.clone(), rx));

    let outcome = started.handle.await?;
    display.await?;
    bar.finish_and_clear();

    let code = match &outcome {
        RunOutcome::Aborted(error) => {
            eprintln!("OCR engine could not start: {error}");
            ExitCode::FAILURE
        }
        RunOutcome::AlreadyRunning => ExitCode::FAILURE,
        RunOutcome::Completed(_) | RunOutcome::Cancelled { .. } => {
            write_exports(&state, &args)?;
            ExitCode::SUCCESS
        }
    };

    print_summary(&state, &outcome);
    state.shutdown().await;
    Ok(code)
}

async fn drive_progress_bar(bar: ProgressBar, mut events: mpsc::UnboundedReceiver<BatchEvent>) {
    let mut current = String::new();
    while let Some(event) = events.recv().await {
        match event {
            BatchEvent::EngineProgress { progress } => {
                bar.set_message(format!(
                    "{} {:.0}%",
                    progress.stage.describe(),
                    progress.percent()
                ));
            }
            BatchEvent::ItemStarted { name, .. } => {
                bar.set_message(name.clone());
                current = name;
            }
            BatchEvent::ItemProgress { progress, .. } => {
                bar.set_message(format!(
                    "{current}: {} {:.0}%",
                    progress.stage.describe(),
                    progress.percent()
                ));
            }
            BatchEvent::ItemFailed { error, .. } => {
                bar.println(format!("✗ {current}: {error}"));
            }
            BatchEvent::OverallProgress { done, total } => {
                bar.set_length(total as u64);
                bar.set_position(done as u64);
            }
            _ => {}
        }
    }
}

fn print_summary(state: &AppState, outcome: &RunOutcome) {
    let results = read_lock(&state.results);
    match outcome {
        RunOutcome::Completed(summary) => println!("{}", summary.headline()),
        RunOutcome::Cancelled { summary, remaining } => {
            println!("{} ({remaining} not processed)", summary.headline());
        }
        _ => return,
    }
    for failure in results.failures() {
        println!("  failed: {}: {}", failure.filename, failure.error);
    }
}

fn write_exports(state: &AppState, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let results = read_lock(&state.results);
    let records = results.results();
    if records.is_empty() {
        return Ok(());
    }

    if let Some(path) = &args.text {
        std::fs::write(path, export::concatenate_all(records))?;
        eprintln!("wrote {}", path.display());
    }
    if let Some(path) = &args.zip {
        std::fs::write(path, export::export_all(records)?)?;
        eprintln!("wrote {}", path.display());
    }
    if let Some(dir) = &args.out_dir {
        std::fs::create_dir_all(dir)?;
        for (name, record) in export::unique_entry_names(records).into_iter().zip(records) {
            std::fs::write(dir.join(name), &record.text)?;
        }
        eprintln!("wrote {} files to {}", records.len(), dir.display());
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
