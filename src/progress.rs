//! Terminal rendering of sync and export progress.

use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};

use purefood_sync::sync::SyncProgress;

fn hidden(no_progress_bar: bool) -> bool {
    no_progress_bar || !std::io::stdout().is_terminal()
}

pub(crate) fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if hidden(no_progress_bar) {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

fn create_bytes_bar(no_progress_bar: bool) -> ProgressBar {
    if hidden(no_progress_bar) {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

/// Download bar in bytes, then a count bar while images are processed.
pub(crate) struct CliProgress {
    no_progress_bar: bool,
    download: Option<ProgressBar>,
    processing: Option<ProgressBar>,
}

impl CliProgress {
    pub(crate) fn new(no_progress_bar: bool) -> Self {
        Self {
            no_progress_bar,
            download: None,
            processing: None,
        }
    }

    pub(crate) fn finish(&mut self) {
        if let Some(pb) = self.download.take() {
            pb.finish_and_clear();
        }
        if let Some(pb) = self.processing.take() {
            pb.finish_and_clear();
        }
    }
}

impl SyncProgress for CliProgress {
    fn download(&mut self, downloaded: u64, total: u64) {
        let no_progress_bar = self.no_progress_bar;
        let pb = self.download.get_or_insert_with(|| {
            let pb = create_bytes_bar(no_progress_bar);
            pb.set_message("downloading");
            pb
        });
        pb.set_length(total);
        pb.set_position(downloaded);
        if downloaded == total {
            pb.finish_with_message("downloaded");
        }
        tracing::debug!(
            "Downloaded {} of {}",
            format_bytes(downloaded),
            format_bytes(total)
        );
    }

    fn processing(&mut self, processed: usize, total: usize) {
        let no_progress_bar = self.no_progress_bar;
        let pb = self.processing.get_or_insert_with(|| {
            let pb = create_progress_bar(no_progress_bar, total as u64);
            pb.set_message("processing images");
            pb
        });
        pb.set_position(processed as u64);
        if processed == total {
            pb.finish_with_message("images processed");
        }
    }
}

/// Human-readable size: `1536` -> `"1.5 KB"`.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

pub(crate) fn format_duration(d: std::time::Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
