//! Progress reporting utilities

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter for comparisons and monitor runs
#[derive(Debug)]
pub struct ProgressReporter {
    pub spinner: Option<ProgressBar>,
    pub chunks_pb: Option<ProgressBar>,
    show_progress: bool,
    start_time: std::time::Instant,
}

impl ProgressReporter {
    /// Spinner while sources are opened and planned, then a chunk bar
    pub fn new_for_compare(label: &str) -> Self {
        Self {
            spinner: Some(create_spinner(&format!("Planning {}...", label))),
            chunks_pb: Some(create_progress_bar(0, "chunks")),
            show_progress: true,
            start_time: std::time::Instant::now(),
        }
    }

    /// Spinner covering a batch of monitor runs
    pub fn new_for_run(monitor_count: usize) -> Self {
        Self {
            spinner: Some(create_spinner(&format!("Running {} monitor(s)...", monitor_count))),
            chunks_pb: None,
            show_progress: true,
            start_time: std::time::Instant::now(),
        }
    }

    /// Create minimal progress reporter (no progress bars)
    pub fn new_minimal() -> Self {
        Self {
            spinner: None,
            chunks_pb: None,
            show_progress: false,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.show_progress
    }

    /// Chunk completion callback; the first call retires the planning spinner
    pub fn update_chunks(&self, done: usize, total: usize) {
        if let Some(spinner) = &self.spinner {
            if !spinner.is_finished() {
                spinner.finish_and_clear();
            }
        }
        if let Some(pb) = &self.chunks_pb {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        }
    }

    /// Finish all progress bars with a closing message
    pub fn finish(&mut self, message: &str) {
        if let Some(pb) = self.chunks_pb.take() {
            pb.finish_and_clear();
        }
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
        if self.show_progress {
            log::debug!("{} in {:.2?}", message, self.start_time.elapsed());
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
        if let Some(pb) = self.chunks_pb.take() {
            pb.finish_and_clear();
        }
    }
}

/// Create a spinner progress bar
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Create a progress bar with known total
fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>5}/{len:5} {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}
