//! state
//!
//! Durable run state: the rewritten state file, the append-only event
//! log, and the exclusive run lock.
//!
//! # Modules
//!
//! - [`run_state`] - Run-state JSON, rewritten atomically per transition
//! - [`events`] - Redacted append-only event log (JSON lines)
//! - [`lock`] - Single-host run lock with stale-PID reclamation
//!
//! # Design
//!
//! Every transition is persisted before the next action, so an
//! interrupted run resumes from its last recorded step. In dry-run mode
//! every writer here becomes a no-op while decisions proceed.

pub mod events;
pub mod lock;
pub mod run_state;

pub use events::{Event, EventKind, EventLog};
pub use lock::{LockError, LockRecord, RunLock};
pub use run_state::{
    AssessmentSnapshot, CapabilitySnapshot, EvidenceState, InProgress, LaneStatus, RoleState,
    RunState, StateError, StateStore, Stats, ValidationState,
};
