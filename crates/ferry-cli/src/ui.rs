//! UI utilities for Ferry CLI.

use std::io::{self, Write};
use std::time::Duration;

use ferry_core::transfer::TransferProgress;

/// Format a byte count for display.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Format a duration as seconds with millisecond precision.
pub fn format_secs(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

/// The single-line progress display for a transfer.
pub fn progress_line(name: &str, progress: &TransferProgress) -> String {
    format!(
        "\r  [{:>6.2}%] {} - {} of {}    ",
        progress.percentage(),
        name,
        format_size(progress.bytes_moved),
        format_size(progress.total_size)
    )
}

/// Redraw the progress line in place.
pub fn show_progress(name: &str, progress: &TransferProgress) {
    print!("{}", progress_line(name, progress));
    let _ = io::stdout().flush();
    if progress.is_complete() {
        println!();
    }
}

/// Print a server listing.
pub fn print_listing(names: &[String]) {
    if names.is_empty() {
        println!("  (no files)");
        return;
    }
    for name in names {
        println!("  {}", name);
    }
    println!("  {} file(s)", names.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::transfer::TransferDirection;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(2500), "2.4 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(Duration::from_millis(1500)), "1.500s");
        assert_eq!(format_secs(Duration::ZERO), "0.000s");
    }

    #[test]
    fn test_progress_line() {
        let mut progress = TransferProgress::new(TransferDirection::Receive, 2048);
        progress.bytes_moved = 1024;
        let line = progress_line("a.bin", &progress);
        assert_eq!(line, "\r  [ 50.00%] a.bin - 1.0 KB of 2.0 KB    ");
    }
}
