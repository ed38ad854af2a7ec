//! validation
//!
//! Two-lane validation engine.
//!
//! # Lanes
//!
//! - **always**: sandbox-safe commands run in-process for every
//!   completing plan. One non-zero exit or timeout fails the plan.
//! - **hostRequired**: commands that need host capabilities, executed
//!   through a provider (`ci` / `local` / `hybrid`, see [`host`]).
//!
//! Validation commands are opaque shell invocations; this engine only
//! observes exit status, captured output, and the structured payload a
//! host provider writes.

pub mod host;

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::ui::output;

pub use host::{HostResult, HostStatus};

/// Result of one shell invocation.
#[derive(Debug)]
pub struct ShellResult {
    pub exit_code: i32,
    pub timed_out: bool,
    pub captured: String,
}

impl ShellResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Run one opaque shell command with a timeout.
///
/// Output is captured; on timeout the child is killed outright.
pub fn run_shell(
    command: &str,
    cwd: &Path,
    env: &[(String, String)],
    timeout: Duration,
) -> std::io::Result<ShellResult> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let mut captured = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        let _ = stdout.read_to_end(&mut captured);
    }
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_end(&mut captured);
    }

    Ok(match status {
        Some(status) => ShellResult {
            exit_code: status.code().unwrap_or(-1),
            timed_out: false,
            captured: String::from_utf8_lossy(&captured).into_owned(),
        },
        None => ShellResult {
            exit_code: -1,
            timed_out: true,
            captured: String::from_utf8_lossy(&captured).into_owned(),
        },
    })
}

/// Outcome of the always lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneOutcome {
    Passed,
    Failed {
        command: String,
        reason: String,
        tail: Vec<String>,
    },
}

impl LaneOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, LaneOutcome::Passed)
    }
}

/// Run the always lane: every command in order, stop at first failure.
pub fn run_always_lane(
    commands: &[String],
    cwd: &Path,
    timeout: Duration,
    failure_tail_lines: usize,
) -> LaneOutcome {
    for command in commands {
        let result = match run_shell(command, cwd, &[], timeout) {
            Ok(result) => result,
            Err(err) => {
                return LaneOutcome::Failed {
                    command: command.clone(),
                    reason: format!("failed to spawn: {err}"),
                    tail: Vec::new(),
                };
            }
        };
        if !result.success() {
            let reason = if result.timed_out {
                "timed out".to_string()
            } else {
                format!("exited with code {}", result.exit_code)
            };
            return LaneOutcome::Failed {
                command: command.clone(),
                reason,
                tail: output::tail_lines(&result.captured, failure_tail_lines),
            };
        }
    }
    LaneOutcome::Passed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strings(commands: &[&str]) -> Vec<String> {
        commands.iter().map(|c| c.to_string()).collect()
    }

    mod shell {
        use super::*;

        #[test]
        fn captures_exit_and_output() {
            let dir = TempDir::new().unwrap();
            let result = run_shell(
                "echo out; echo err >&2; exit 7",
                dir.path(),
                &[],
                Duration::from_secs(5),
            )
            .unwrap();
            assert_eq!(result.exit_code, 7);
            assert!(!result.timed_out);
            assert!(result.captured.contains("out"));
            assert!(result.captured.contains("err"));
        }

        #[test]
        fn timeout_kills_the_child() {
            let dir = TempDir::new().unwrap();
            let result = run_shell("sleep 30", dir.path(), &[], Duration::from_millis(200)).unwrap();
            assert!(result.timed_out);
            assert!(!result.success());
        }

        #[test]
        fn env_is_passed() {
            let dir = TempDir::new().unwrap();
            let env = vec![("LANE_PROBE".to_string(), "value".to_string())];
            let result =
                run_shell("printf '%s' \"$LANE_PROBE\"", dir.path(), &env, Duration::from_secs(5))
                    .unwrap();
            assert_eq!(result.captured, "value");
        }
    }

    mod always_lane {
        use super::*;

        #[test]
        fn all_passing_commands_pass() {
            let dir = TempDir::new().unwrap();
            let outcome = run_always_lane(
                &strings(&["true", "echo fine"]),
                dir.path(),
                Duration::from_secs(5),
                10,
            );
            assert!(outcome.passed());
        }

        #[test]
        fn first_failure_stops_the_lane() {
            let dir = TempDir::new().unwrap();
            let marker = dir.path().join("ran-after-failure");
            let commands = strings(&[
                "echo context; false",
                &format!("touch {}", marker.display()),
            ]);
            let outcome = run_always_lane(&commands, dir.path(), Duration::from_secs(5), 10);
            match outcome {
                LaneOutcome::Failed { command, tail, .. } => {
                    assert!(command.contains("false"));
                    assert!(tail.iter().any(|line| line.contains("context")));
                }
                LaneOutcome::Passed => panic!("lane should fail"),
            }
            assert!(!marker.exists(), "later commands must not run");
        }

        #[test]
        fn empty_lane_passes() {
            let dir = TempDir::new().unwrap();
            assert!(run_always_lane(&[], dir.path(), Duration::from_secs(5), 10).passed());
        }

        #[test]
        fn timeout_is_a_failure() {
            let dir = TempDir::new().unwrap();
            let outcome = run_always_lane(
                &strings(&["sleep 30"]),
                dir.path(),
                Duration::from_millis(200),
                10,
            );
            assert!(matches!(outcome, LaneOutcome::Failed { ref reason, .. }
                if reason.contains("timed out")));
        }
    }
}
