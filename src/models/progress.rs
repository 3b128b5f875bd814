use serde::Serialize;

use super::item::{display_size, ItemId};
use super::record::Summary;
use crate::services::scheduler::BatchEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentItem {
    pub id: ItemId,
    pub name: String,
    pub display_size: String,
}

/// How the last finished run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LastOutcome {
    Completed { summary: Summary },
    Cancelled { summary: Summary, remaining: usize },
    Aborted { error: String },
}

/// Live view of the current (or last) run, folded from scheduler events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunProgress {
    pub state: RunState,
    pub language: Option<String>,
    pub current_item: Option<CurrentItem>,
    /// User-facing phrase for the current stage.
    pub stage: Option<String>,
    pub stage_percent: f64,
    pub done: usize,
    pub total: usize,
    pub last_outcome: Option<LastOutcome>,
}

impl RunProgress {
    /// Mark a run as started before its first event arrives.
    pub fn begin(&mut self, language: &str) {
        *self = RunProgress {
            state: RunState::Running,
            language: Some(language.to_string()),
            stage: Some("Initializing OCR engine...".to_string()),
            ..Default::default()
        };
    }

    pub fn overall_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.done as f64 / self.total as f64 * 100.0
        }
    }

    /// "Processing 2 of 5 images (40.0%)"
    pub fn overall_text(&self) -> String {
        format!(
            "Processing {} of {} images ({:.1}%)",
            self.done,
            self.total,
            self.overall_percent()
        )
    }

    pub fn apply(&mut self, event: &BatchEvent) {
        match event {
            BatchEvent::RunStarted { language, .. } => self.begin(language),
            BatchEvent::EngineProgress { progress } => {
                self.stage = Some(progress.stage.describe().to_string());
                self.stage_percent = progress.percent();
            }
            BatchEvent::ItemStarted {
                item_id,
                name,
                size,
                ..
            } => {
                self.current_item = Some(CurrentItem {
                    id: *item_id,
                    name: name.clone(),
                    display_size: display_size(*size),
                });
                self.stage = None;
                self.stage_percent = 0.0;
            }
            BatchEvent::ItemProgress { progress, .. } => {
                self.stage = Some(progress.stage.describe().to_string());
                self.stage_percent = progress.percent();
            }
            BatchEvent::ItemCompleted { .. } | BatchEvent::ItemFailed { .. } => {}
            BatchEvent::OverallProgress { done, total } => {
                self.done = *done;
                self.total = *total;
            }
            BatchEvent::RunCompleted { summary } => {
                self.finish(LastOutcome::Completed { summary: *summary });
            }
            BatchEvent::RunCancelled { summary, remaining } => {
                self.finish(LastOutcome::Cancelled {
                    summary: *summary,
                    remaining: *remaining,
                });
            }
            BatchEvent::RunAborted { error } => {
                self.finish(LastOutcome::Aborted {
                    error: error.clone(),
                });
            }
        }
    }

    fn finish(&mut self, outcome: LastOutcome) {
        self.state = RunState::Idle;
        self.current_item = None;
        self.stage = None;
        self.stage_percent = 0.0;
        self.last_outcome = Some(outcome);
    }
}
