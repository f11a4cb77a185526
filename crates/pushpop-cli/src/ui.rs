//! UI utilities for the PushPop CLI.

use std::io::{self, Write};
use std::time::Duration;

use pushpop_core::download::{DownloadProgress, Phase};
use tokio::sync::watch;

/// Parse a duration string like "500ms", "30s", "5m", or "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num_str) = s.strip_suffix("ms") {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_millis(num))
    } else if let Some(num_str) = s.strip_suffix('m') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 60))
    } else if let Some(num_str) = s.strip_suffix('s') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num))
    } else if let Some(num_str) = s.strip_suffix('h') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 3600))
    } else {
        None
    }
}

/// Format remaining duration as "M:SS".
pub fn format_remaining(remaining: Duration) -> String {
    let total_secs = remaining.as_secs();
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    format!("{}:{:02}", mins, secs)
}

/// Format a byte count with a binary unit.
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Render one progress line for the current snapshot.
pub fn progress_line(progress: &DownloadProgress) -> String {
    let eta = progress
        .eta
        .map_or_else(|| "--:--".to_string(), format_remaining);

    match progress.phase {
        Phase::Requesting => "  Connecting...".to_string(),
        Phase::Streaming => {
            let percent = progress
                .percentage()
                .map_or_else(|| "  ?.??".to_string(), |p| format!("{p:>6.2}"));
            let total = progress
                .total_bytes
                .map_or_else(|| "?".to_string(), format_size);
            format!(
                "  [{}%] {}/{} - {}/s - ETA: {}",
                percent,
                format_size(progress.bytes_transferred),
                total,
                format_size(progress.speed_bps),
                eta
            )
        }
        Phase::DigestPending => format!(
            "  Waiting for the sender to finish hashing (asked {} times)",
            progress.digest_retries
        ),
        Phase::ComputingDigest => format!(
            "  [{:>6.2}%] verifying - {}/s - ETA: {}",
            progress.hash_percentage(),
            format_size(progress.speed_bps),
            eta
        ),
        phase => format!("  {}...", capitalize(&phase.to_string())),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Redraw the progress line until the download reaches a terminal phase.
pub async fn display_progress(mut rx: watch::Receiver<DownloadProgress>) {
    let mut last_width: usize = 0;

    loop {
        if rx.changed().await.is_err() {
            break;
        }

        let progress = rx.borrow_and_update().clone();
        if progress.phase.is_terminal() {
            break;
        }

        let line = progress_line(&progress);
        let pad = last_width.saturating_sub(line.chars().count());
        last_width = line.chars().count();
        print!("\r{}{}", line, " ".repeat(pad));
        let _ = io::stdout().flush();
    }

    if last_width > 0 {
        print!("\r{}\r", " ".repeat(last_width));
        let _ = io::stdout().flush();
    }
}
