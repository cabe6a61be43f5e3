//! Per-step progress output.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use omop_core::{Step, StepObserver, StepRecord, StepStatus};

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}";

/// Drives one progress bar over the steps of a run.
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    pub fn new(steps: usize) -> Self {
        let bar = ProgressBar::with_draw_target(Some(steps as u64), ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::default_bar().template(TEMPLATE) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// A bar that draws nothing, for dry runs and tests.
    pub fn hidden(steps: usize) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(steps as u64);
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// One line per finished step: status, key, rows and duration.
pub fn step_line(record: &StepRecord) -> String {
    let mark = match record.status {
        StepStatus::Succeeded => "ok",
        StepStatus::Failed => "FAILED",
    };
    let rows = record
        .rows
        .map_or_else(|| "-".to_string(), |rows| rows.to_string());
    format!(
        "[{mark}] {key} (step {ordinal}) rows={rows} {duration} ms",
        key = record.key,
        ordinal = record.ordinal,
        duration = record.duration_ms(),
    )
}

impl StepObserver for ProgressObserver {
    fn on_step_start(&mut self, step: &Step) {
        self.bar.set_message(step.key().to_string());
    }

    fn on_step_finish(&mut self, record: &StepRecord) {
        self.bar.println(step_line(record));
        self.bar.inc(1);
    }

    fn on_step_skipped(&mut self, _step: &Step) {
        self.bar.inc(1);
    }
}
