//! ui::output
//!
//! Output formatting and display.
//!
//! # Design
//!
//! Four output modes, selected by config or `--output`:
//! - `minimal` - terminal results only
//! - `ticker` - one in-place status line while sessions run
//! - `pretty` - human-readable progress lines (default)
//! - `verbose` - everything, with subprocess output passed through
//!
//! The heartbeat line is rewritten in place (`\r`) so long sessions show
//! liveness without scrolling the terminal.

use std::fmt::Display;
use std::io::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Output verbosity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Minimal,
    Ticker,
    Pretty,
    Verbose,
}

impl OutputMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minimal" => Some(OutputMode::Minimal),
            "ticker" => Some(OutputMode::Ticker),
            "pretty" => Some(OutputMode::Pretty),
            "verbose" => Some(OutputMode::Verbose),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Minimal => "minimal",
            OutputMode::Ticker => "ticker",
            OutputMode::Pretty => "pretty",
            OutputMode::Verbose => "verbose",
        }
    }

    /// Whether subprocess output should pass straight through instead of
    /// being captured.
    pub fn passthrough(&self) -> bool {
        matches!(self, OutputMode::Verbose)
    }

    /// Whether progress lines are shown at all.
    pub fn progress(&self) -> bool {
        !matches!(self, OutputMode::Minimal)
    }
}

/// Print a progress message (suppressed in minimal mode).
pub fn print(mode: OutputMode, message: impl Display) {
    if mode.progress() {
        println!("{}", message);
    }
}

/// Print a warning (suppressed in minimal mode).
pub fn warn(mode: OutputMode, message: impl Display) {
    if mode.progress() {
        eprintln!("warning: {}", message);
    }
}

/// Print an error (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}

/// Print a debug line (verbose mode only).
pub fn debug(mode: OutputMode, message: impl Display) {
    if mode == OutputMode::Verbose {
        eprintln!("[debug] {}", message);
    }
}

/// Render a heartbeat status line in place.
///
/// Shown in `ticker` and `pretty` modes while a session subprocess runs.
pub fn heartbeat(
    mode: OutputMode,
    phase: &str,
    plan_id: &str,
    role: &str,
    elapsed: Duration,
    idle: Duration,
) {
    if !matches!(mode, OutputMode::Ticker | OutputMode::Pretty) {
        return;
    }
    let line = heartbeat_line(phase, plan_id, role, elapsed, idle);
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "\r{line}");
    let _ = stderr.flush();
}

/// Terminate an in-place heartbeat line before normal output resumes.
pub fn heartbeat_done(mode: OutputMode) {
    if matches!(mode, OutputMode::Ticker | OutputMode::Pretty) {
        eprintln!();
    }
}

fn heartbeat_line(phase: &str, plan_id: &str, role: &str, elapsed: Duration, idle: Duration) -> String {
    format!(
        "[{phase}] {plan_id} ({role}) elapsed={} idle={}",
        format_duration(elapsed),
        format_duration(idle)
    )
}

/// Format a duration as `MMmSSs` / `SSs`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total >= 60 {
        format!("{}m{:02}s", total / 60, total % 60)
    } else {
        format!("{total}s")
    }
}

/// The last `n` lines of captured output, for failure reporting.
pub fn tail_lines(output: &str, n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|line| line.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod mode {
        use super::*;

        #[test]
        fn parse_roundtrip() {
            for s in ["minimal", "ticker", "pretty", "verbose"] {
                assert_eq!(OutputMode::parse(s).unwrap().as_str(), s);
            }
            assert!(OutputMode::parse("loud").is_none());
        }

        #[test]
        fn only_verbose_passes_through() {
            assert!(OutputMode::Verbose.passthrough());
            assert!(!OutputMode::Pretty.passthrough());
            assert!(!OutputMode::Ticker.passthrough());
            assert!(!OutputMode::Minimal.passthrough());
        }

        #[test]
        fn minimal_suppresses_progress() {
            assert!(!OutputMode::Minimal.progress());
            assert!(OutputMode::Pretty.progress());
        }
    }

    mod formatting {
        use super::*;

        #[test]
        fn short_durations_in_seconds() {
            assert_eq!(format_duration(Duration::from_secs(9)), "9s");
        }

        #[test]
        fn long_durations_in_minutes() {
            assert_eq!(format_duration(Duration::from_secs(61)), "1m01s");
            assert_eq!(format_duration(Duration::from_secs(600)), "10m00s");
        }

        #[test]
        fn heartbeat_line_contains_identity() {
            let line = heartbeat_line(
                "session",
                "fix-footer",
                "worker",
                Duration::from_secs(65),
                Duration::from_secs(3),
            );
            assert!(line.contains("fix-footer"));
            assert!(line.contains("worker"));
            assert!(line.contains("1m05s"));
        }
    }

    mod tails {
        use super::*;

        #[test]
        fn returns_last_n_lines() {
            let output = "a\nb\nc\nd\n";
            assert_eq!(tail_lines(output, 2), vec!["c", "d"]);
        }

        #[test]
        fn short_output_returned_whole() {
            assert_eq!(tail_lines("only\n", 10), vec!["only"]);
        }

        #[test]
        fn zero_lines_is_empty() {
            assert!(tail_lines("a\nb\n", 0).is_empty());
        }
    }
}
