use std::fmt::Display;
use std::sync::OnceLock;
use std::time::Instant;

use owo_colors::{AnsiColors, OwoColorize};

use crate::error::SiteError;

static BUILD_START: OnceLock<Instant> = OnceLock::new();

/// Width of the right-aligned status column
const STATUS_WIDTH: usize = 12;

/// Everything frostpage reports in the status column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Building,
    Failed,
    Warning,
    Starting,
    Watching,
    Reloading,
    Reloaded,
    Waiting,
    Listening,
    Finished,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Status::Building => "Building",
            Status::Failed => "Failed",
            Status::Warning => "Warning",
            Status::Starting => "Starting",
            Status::Watching => "Watching",
            Status::Reloading => "Reloading",
            Status::Reloaded => "Reloaded",
            Status::Waiting => "Waiting",
            Status::Listening => "Listening",
            Status::Finished => "Finished",
        }
    }

    fn color(self) -> AnsiColors {
        match self {
            Status::Failed => AnsiColors::Red,
            Status::Warning => AnsiColors::Yellow,
            Status::Watching | Status::Reloading | Status::Waiting => AnsiColors::Cyan,
            _ => AnsiColors::Green,
        }
    }
}

fn line(status: Status, message: impl Display) -> String {
    let padding = " ".repeat(STATUS_WIDTH.saturating_sub(status.label().len()));
    format!(
        "{}{} {}",
        padding,
        status.label().color(status.color()).bold(),
        message
    )
}

pub fn status(status: Status, message: impl Display) {
    eprintln!("{}", line(status, message));
}

/// One line per page that failed to export; the diagnostics follow at the end
pub fn page_failed(url: &str, source: &str) {
    status(Status::Failed, format_args!("{} (from {})", url, source));
}

/// Summary line plus the full report of every collected warning
pub fn warnings(warnings: &[SiteError]) {
    if warnings.is_empty() {
        return;
    }

    let noun = if warnings.len() == 1 {
        "warning"
    } else {
        "warnings"
    };
    eprintln!();
    status(
        Status::Warning,
        format_args!("site loaded with {} {}", warnings.len(), noun),
    );
    for warning in warnings {
        report(warning.clone());
    }
}

pub fn report(error: SiteError) {
    eprintln!("{:?}", miette::Report::new(error));
}

pub fn start_build() {
    BUILD_START.get_or_init(Instant::now);
}

/// Closing line of a successful build, with the time since `start_build`
pub fn finished(summary: impl Display) {
    let elapsed = BUILD_START
        .get()
        .map(|start| start.elapsed())
        .unwrap_or_default();

    status(
        Status::Finished,
        format_args!("{} in {:.2}s", summary, elapsed.as_secs_f64()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_column_is_right_aligned() {
        let failed = line(Status::Failed, "/about/ (from about.md)");
        assert!(failed.starts_with("      "));
        assert!(failed.contains("Failed"));
        assert!(failed.ends_with(" /about/ (from about.md)"));

        let reloading = line(Status::Reloading, "x");
        assert!(reloading.starts_with("   "));
        assert!(reloading.contains("Reloading"));
    }

    #[test]
    fn test_status_colors() {
        assert_eq!(Status::Failed.color(), AnsiColors::Red);
        assert_eq!(Status::Warning.color(), AnsiColors::Yellow);
        assert_eq!(Status::Waiting.color(), AnsiColors::Cyan);
        assert_eq!(Status::Finished.color(), AnsiColors::Green);
    }
}
