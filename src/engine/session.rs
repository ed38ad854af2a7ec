//! engine::session
//!
//! Session runner: one subprocess per role stage.
//!
//! # Architecture
//!
//! The rendered command runs through a system shell so executor
//! templates keep full placeholder flexibility. Output is captured by
//! reader threads feeding an mpsc channel; the main thread fans in
//! captured bytes, heartbeat ticks, and the timeout deadline. On
//! timeout the child gets SIGTERM, then SIGKILL five seconds later.
//!
//! Outcome classification is a pure function over the exit disposition
//! and the result payload, in strict priority order:
//!
//! 1. timeout or death-by-signal
//! 2. the handoff exit code
//! 3. any other non-zero exit
//! 4. exit 0 without a payload (handoff when payloads are required)
//! 5. the payload itself (`handoff_required` literal, missing or low
//!    `contextRemaining`, then the reported status as-is)

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ui::output::{self, OutputMode};

/// Errors from session execution.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn executor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// How the subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Deadline hit; SIGTERM/SIGKILL was delivered.
    TimedOut,
    /// Killed by a signal we did not send.
    Signaled,
    /// Normal exit with a code.
    Code(i32),
}

/// Status reported in the executor result payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadStatus {
    Completed,
    Blocked,
    Failed,
    Pending,
    HandoffRequired,
}

/// The executor result payload contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    pub status: PayloadStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub context_remaining: Option<f64>,
    #[serde(default)]
    pub blocker_key: Option<String>,
    #[serde(default)]
    pub evidence_action: Option<String>,
}

/// Read a result payload; a missing or unparseable file is `None`.
pub fn load_payload(path: &Path) -> Option<ResultPayload> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Classified outcome of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { summary: String },
    HandoffRequired { reason: String },
    Blocked { reason: String },
    Failed { reason: String },
    Pending { reason: String },
}

/// Knobs that drive classification.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyKnobs {
    pub handoff_exit_code: i32,
    pub require_result_payload: bool,
    pub context_threshold: u64,
}

/// Classify a session outcome. Pure; see the module docs for the
/// priority order.
pub fn classify(
    exit: ExitDisposition,
    payload: Option<&ResultPayload>,
    knobs: &ClassifyKnobs,
) -> SessionOutcome {
    match exit {
        ExitDisposition::TimedOut => {
            return SessionOutcome::Failed {
                reason: "session timed out".to_string(),
            };
        }
        ExitDisposition::Signaled => {
            return SessionOutcome::Failed {
                reason: "session killed by signal".to_string(),
            };
        }
        ExitDisposition::Code(code) if code == knobs.handoff_exit_code => {
            return SessionOutcome::HandoffRequired {
                reason: format!("handoff exit code {code}"),
            };
        }
        ExitDisposition::Code(code) if code != 0 => {
            return SessionOutcome::Failed {
                reason: format!("session exited with code {code}"),
            };
        }
        ExitDisposition::Code(_) => {}
    }

    let Some(payload) = payload else {
        if knobs.require_result_payload {
            // No payload means no context accounting; roll over rather
            // than trust an unaccounted session.
            return SessionOutcome::HandoffRequired {
                reason: "exit 0 without result payload".to_string(),
            };
        }
        return SessionOutcome::Completed {
            summary: String::new(),
        };
    };

    match payload.status {
        PayloadStatus::HandoffRequired => SessionOutcome::HandoffRequired {
            reason: nonempty(&payload.reason, "executor requested handoff"),
        },
        PayloadStatus::Completed => {
            let Some(remaining) = payload.context_remaining else {
                return SessionOutcome::HandoffRequired {
                    reason: "completed without numeric contextRemaining".to_string(),
                };
            };
            if remaining <= knobs.context_threshold as f64 {
                return SessionOutcome::HandoffRequired {
                    reason: format!(
                        "contextRemaining {remaining} at or below threshold {}",
                        knobs.context_threshold
                    ),
                };
            }
            SessionOutcome::Completed {
                summary: payload.summary.clone(),
            }
        }
        PayloadStatus::Blocked => SessionOutcome::Blocked {
            reason: nonempty(&payload.reason, "executor reported blocked"),
        },
        PayloadStatus::Failed => SessionOutcome::Failed {
            reason: nonempty(&payload.reason, "executor reported failed"),
        },
        PayloadStatus::Pending => SessionOutcome::Pending {
            reason: nonempty(&payload.reason, "executor reported pending"),
        },
    }
}

fn nonempty(reason: &str, fallback: &str) -> String {
    if reason.trim().is_empty() {
        fallback.to_string()
    } else {
        reason.to_string()
    }
}

/// Render a command template by placeholder substitution.
pub fn render_command(template: &str, substitutions: &[(&str, String)]) -> String {
    let mut rendered = template.to_string();
    for (placeholder, value) in substitutions {
        rendered = rendered.replace(&format!("{{{placeholder}}}"), value);
    }
    rendered
}

/// Everything needed to run one session subprocess.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub shell_command: String,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    pub log_path: PathBuf,
    pub plan_id: String,
    pub role: String,
    pub session: u32,
    pub timeout: Duration,
    pub heartbeat: Duration,
    pub stall_warn: Duration,
    pub output_mode: OutputMode,
}

/// Raw result of a subprocess run, before classification.
#[derive(Debug)]
pub struct RawSessionResult {
    pub exit: ExitDisposition,
    pub captured: String,
    pub duration: Duration,
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Run the session subprocess to completion (or timeout).
///
/// Captures stdout+stderr unless the output mode passes them through,
/// emits the heartbeat/stall-warning lines, and writes the per-session
/// executor log.
pub fn run(spec: &SessionSpec) -> Result<RawSessionResult, SessionError> {
    let started = Instant::now();
    let capture = !spec.output_mode.passthrough();

    let mut command = Command::new("sh");
    command.arg("-c").arg(&spec.shell_command);
    command.current_dir(&spec.cwd);
    for (key, value) in &spec.env {
        command.env(key, value);
    }
    command.stdin(Stdio::null());
    if capture {
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
    }

    let mut child = command.spawn().map_err(SessionError::Spawn)?;

    // Reader threads fan captured bytes into one channel.
    let (sender, receiver) = mpsc::channel::<Vec<u8>>();
    let mut readers = Vec::new();
    if capture {
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, sender.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, sender.clone()));
        }
    }
    drop(sender);

    let deadline = started + spec.timeout;
    let mut captured: Vec<u8> = Vec::new();
    let mut last_output = Instant::now();
    let mut last_heartbeat = Instant::now();
    let mut stall_warned = false;
    let mut timed_out = false;

    let status = loop {
        // Wait up to one poll interval for output, then drain whatever
        // else is already buffered. A disconnected channel (readers
        // done, or passthrough mode) degrades to a plain sleep.
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => {
                captured.extend_from_slice(&chunk);
                while let Ok(more) = receiver.try_recv() {
                    captured.extend_from_slice(&more);
                }
                last_output = Instant::now();
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
        }

        if let Some(status) = child.try_wait().map_err(SessionError::Spawn)? {
            break status;
        }

        let idle = last_output.elapsed();
        if !stall_warned && idle >= spec.stall_warn {
            output::warn(
                spec.output_mode,
                format!(
                    "session stalled: {} ({}) idle for {}",
                    spec.plan_id,
                    spec.role,
                    output::format_duration(idle)
                ),
            );
            stall_warned = true;
        }

        if last_heartbeat.elapsed() >= spec.heartbeat {
            output::heartbeat(
                spec.output_mode,
                "session",
                &spec.plan_id,
                &spec.role,
                started.elapsed(),
                idle,
            );
            last_heartbeat = Instant::now();
        }

        if Instant::now() >= deadline {
            timed_out = true;
            break terminate(&mut child)?;
        }
    };

    // Collect anything still buffered.
    while let Ok(chunk) = receiver.try_recv() {
        captured.extend_from_slice(&chunk);
    }
    for reader in readers {
        let _ = reader.join();
    }
    output::heartbeat_done(spec.output_mode);

    let exit = if timed_out {
        ExitDisposition::TimedOut
    } else {
        match status.code() {
            Some(code) => ExitDisposition::Code(code),
            None => ExitDisposition::Signaled,
        }
    };

    let captured = String::from_utf8_lossy(&captured).into_owned();
    write_executor_log(spec, &captured, capture, exit)?;

    Ok(RawSessionResult {
        exit,
        captured,
        duration: started.elapsed(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    mut source: R,
    sender: mpsc::Sender<Vec<u8>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match source.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if sender.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// SIGTERM, wait up to the grace period, then SIGKILL.
fn terminate(child: &mut std::process::Child) -> Result<std::process::ExitStatus, SessionError> {
    send_sigterm(child);
    let grace_deadline = Instant::now() + KILL_GRACE;
    loop {
        if let Some(status) = child.try_wait().map_err(SessionError::Spawn)? {
            return Ok(status);
        }
        if Instant::now() >= grace_deadline {
            let _ = child.kill();
            return child.wait().map_err(SessionError::Spawn);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn send_sigterm(child: &std::process::Child) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &std::process::Child) {}

fn write_executor_log(
    spec: &SessionSpec,
    captured: &str,
    capture: bool,
    exit: ExitDisposition,
) -> Result<(), SessionError> {
    if let Some(parent) = spec.log_path.parent() {
        fs::create_dir_all(parent).map_err(|source| SessionError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let exit_line = match exit {
        ExitDisposition::TimedOut => "timed-out".to_string(),
        ExitDisposition::Signaled => "signaled".to_string(),
        ExitDisposition::Code(code) => format!("exit {code}"),
    };
    let mut log = format!(
        "# executor session\nplan: {}\nrole: {}\nsession: {}\ncommand: {}\nresult: {}\n",
        spec.plan_id, spec.role, spec.session, spec.shell_command, exit_line
    );
    if capture {
        log.push_str("\n## output\n\n");
        log.push_str(captured);
        if !captured.ends_with('\n') {
            log.push('\n');
        }
    }
    fs::write(&spec.log_path, log).map_err(|source| SessionError::Io {
        path: spec.log_path.display().to_string(),
        source,
    })
}
