//! state::events
//!
//! Append-only event log with redaction.
//!
//! # Architecture
//!
//! Every state-changing action emits one event. Events are JSON lines
//! appended to `run-events.jsonl`; the log is evidence, not authority —
//! it records what the orchestrator decided and observed, but run state
//! remains the source of truth for resume.
//!
//! Every event passes through the redactor before it reaches disk:
//! field names matching the sensitive-key pattern are replaced with
//! `[REDACTED]`, and string values have `Bearer …` tokens and
//! secret-like `key=value` assignments substituted.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::paths::ConveyorPaths;
use crate::core::types::{AutonomyMode, PlanId};

use super::run_state::StateError;

/// Event types emitted by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    RunFinished,
    RunModeDowngraded,
    PlanPromoted,
    PlanWaitingDependency,
    PlanStarted,
    SessionStarted,
    SessionFinished,
    RoleStageAdvanced,
    RoleStageReused,
    HandoffRecorded,
    SecurityApprovalPending,
    ValidationPassed,
    ValidationFailed,
    HostValidationPassed,
    HostValidationFailed,
    HostValidationBlocked,
    EvidenceCurated,
    CommitCreated,
    PlanCompleted,
    PlanBlocked,
    PlanPending,
    PlanFailed,
}

/// One event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<PlanId>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub mode: AutonomyMode,
    #[serde(default)]
    pub details: Value,
}

impl Event {
    /// Create an event with empty details.
    pub fn new(
        kind: EventKind,
        run_id: impl Into<String>,
        mode: AutonomyMode,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: now.to_rfc3339(),
            run_id: run_id.into(),
            task_id: None,
            kind,
            model: None,
            mode,
            details: Value::Null,
        }
    }

    /// Attach the plan this event concerns.
    pub fn task(mut self, plan_id: &PlanId) -> Self {
        self.task_id = Some(plan_id.clone());
        self
    }

    /// Attach the model driving the session.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach structured details.
    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

fn sensitive_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(token|secret|password|passphrase|api[-_]?key|authorization|cookie|session)")
            .expect("sensitive key pattern compiles")
    })
}

fn bearer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bbearer\s+\S+").expect("bearer pattern compiles"))
}

fn assignment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(token|secret|password|passphrase|api[-_]?key|authorization|cookie|session)\s*=\s*[^\s,;]+",
        )
        .expect("assignment pattern compiles")
    })
}

/// Whether a field name matches the sensitive-key pattern.
pub fn is_sensitive_key(key: &str) -> bool {
    sensitive_key_pattern().is_match(key)
}

/// Redact a JSON value in place.
///
/// Object fields whose name matches the sensitive-key pattern lose
/// their value entirely; remaining strings have `Bearer …` tokens and
/// secret-like assignments substituted.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if sensitive_key_pattern().is_match(key) {
                    *entry = Value::String("[REDACTED]".to_string());
                } else {
                    redact_value(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_value(item);
            }
        }
        Value::String(s) => {
            *s = redact_str(s);
        }
        _ => {}
    }
}

/// Redact secret-like content inside a string.
pub fn redact_str(input: &str) -> String {
    let replaced = bearer_pattern().replace_all(input, "Bearer [REDACTED]");
    assignment_pattern()
        .replace_all(&replaced, "$1=[REDACTED]")
        .into_owned()
}

/// The append-only event log.
pub struct EventLog {
    path: PathBuf,
    dry_run: bool,
}

impl EventLog {
    pub fn new(paths: &ConveyorPaths, dry_run: bool) -> Self {
        Self {
            path: paths.events_path(),
            dry_run,
        }
    }

    /// Append one event, redacted.
    pub fn append(&self, event: Event) -> Result<(), StateError> {
        let mut event = event;
        redact_value(&mut event.details);

        if self.dry_run {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StateError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| StateError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        let line = serde_json::to_string(&event).expect("event serializes");
        writeln!(file, "{line}").map_err(|source| StateError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Read the whole log (audit path).
    pub fn read_all(&self) -> Result<Vec<Event>, StateError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|source| StateError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let mut events = Vec::new();
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            let event = serde_json::from_str(line).map_err(|source| StateError::Parse {
                path: self.path.display().to_string(),
                source,
            })?;
            events.push(event);
        }
        Ok(events)
    }
}
