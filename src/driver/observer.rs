//! # Progress Observers
//!
//! Receive driver progress: percentage for the bar, fragments for the results
//! area, retries and the final outcome.

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use regex::Regex;
use std::time::Duration;

use crate::driver::error::ClientError;
use crate::driver::DriverOutcome;
use crate::types::BatchResponseData;

/// Bar resolution: hundredths of a percent
const BAR_LENGTH: u64 = 10_000;

pub trait ProgressObserver: Send + Sync {
    fn on_start(&self, _total_items: u64) {}

    /// A batch response arrived (including replays)
    fn on_batch(&self, data: &BatchResponseData);

    fn on_retry(&self, _attempt: u32, _delay: Duration, _error: &ClientError) {}

    fn on_finish(&self, _outcome: &DriverOutcome) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_batch(&self, _data: &BatchResponseData) {}
}

/// Keeps every response and the concatenated results markup
#[derive(Debug, Default)]
pub struct RecordingObserver {
    batches: Mutex<Vec<BatchResponseData>>,
    results_html: Mutex<String>,
    retries: Mutex<Vec<u32>>,
    total_items: Mutex<Option<u64>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<BatchResponseData> {
        self.batches.lock().clone()
    }

    pub fn percentages(&self) -> Vec<f64> {
        self.batches.lock().iter().map(|b| b.percentage).collect()
    }

    /// The results area: every fragment in arrival order
    pub fn results_html(&self) -> String {
        self.results_html.lock().clone()
    }

    pub fn retry_attempts(&self) -> Vec<u32> {
        self.retries.lock().clone()
    }

    pub fn total_items(&self) -> Option<u64> {
        *self.total_items.lock()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_start(&self, total_items: u64) {
        *self.total_items.lock() = Some(total_items);
    }

    fn on_batch(&self, data: &BatchResponseData) {
        self.results_html.lock().push_str(&data.html);
        self.batches.lock().push(data.clone());
    }

    fn on_retry(&self, attempt: u32, _delay: Duration, _error: &ClientError) {
        self.retries.lock().push(attempt);
    }
}

/// Terminal progress bar; optionally echoes each item line above the bar
pub struct ConsoleProgress {
    bar: ProgressBar,
    show_items: bool,
    tags: Option<Regex>,
}

impl ConsoleProgress {
    pub fn new(label: &str, show_items: bool) -> Self {
        let bar = ProgressBar::new(BAR_LENGTH);
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{bar:40.green/white}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.set_prefix(label.to_string());
        bar.set_message("0%");

        Self {
            bar,
            show_items,
            tags: Regex::new(r"<[^>]+>").ok(),
        }
    }

    fn plain_lines(&self, html: &str) -> Vec<String> {
        html.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| match &self.tags {
                Some(tags) => unescape(&tags.replace_all(line, "")),
                None => line.to_string(),
            })
            .collect()
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_batch(&self, data: &BatchResponseData) {
        if self.show_items && !data.replayed {
            for line in self.plain_lines(&data.html) {
                self.bar.println(line);
            }
        }
        self.bar
            .set_position(((data.percentage * 100.0).round() as u64).min(BAR_LENGTH));
        self.bar.set_message(format!(
            "{}% | {} updated, {} skipped, {} failed",
            data.percentage, data.totals.success, data.totals.skipped, data.totals.failed
        ));
    }

    fn on_retry(&self, attempt: u32, delay: Duration, error: &ClientError) {
        self.bar.println(format!(
            "retry {attempt} in {}ms: {error}",
            delay.as_millis()
        ));
    }

    fn on_finish(&self, outcome: &DriverOutcome) {
        self.bar.finish_with_message(format!(
            "done | {} updated, {} skipped, {} failed",
            outcome.totals.success, outcome.totals.skipped, outcome.totals.failed
        ));
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
