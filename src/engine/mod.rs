//! engine
//!
//! Orchestrates the plan lifecycle: Catalog -> Schedule -> Gate ->
//! Role Pipeline -> Sessions -> Validation -> Evidence -> Finalize.
//!
//! # Architecture
//!
//! The engine is the central coordinator. The scheduler picks the next
//! executable plan deterministically; the per-plan FSM drives it
//! through policy gating, role-pipeline sessions, the completion gate,
//! two-lane validation, evidence curation, and the atomic completion
//! commit. All plan-document writes flow through the plan store and all
//! durable state through the state store, so the invariants stay
//! centralized.
//!
//! # Invariants
//!
//! - Every transition is persisted before the next action (resumable)
//! - Terminal plan outcomes are recorded exactly once per run
//! - The engine never mutates a plan document directly; the plan store
//!   is the single writer

pub mod capabilities;
pub mod fsm;
pub mod gate;
pub mod parallel;
pub mod pipeline;
pub mod risk;
pub mod scheduler;
pub mod session;

pub use fsm::{execute_plan, PlanOutcome};
pub use gate::{evaluate, resolve_effective_mode, GateDecision};
pub use risk::{assess, RiskAssessment};
pub use scheduler::{run_scheduler, SchedulerReport};
pub use session::{classify, ClassifyKnobs, ExitDisposition, SessionOutcome};

use thiserror::Error;

use crate::config::{ConfigError, OrchestratorConfig};
use crate::core::env::Env;
use crate::core::paths::{ConveyorPaths, PathError};
use crate::core::types::AutonomyMode;
use crate::git::GitError;
use crate::plan::catalog::CatalogError;
use crate::plan::store::StoreError;
use crate::state::lock::LockError;
use crate::state::run_state::StateError;
use crate::ui::output::OutputMode;

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Catalog load failed (fatal at startup).
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Plan store write failed.
    #[error("plan store error: {0}")]
    Store(#[from] StoreError),

    /// State persistence failed.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Run lock problem (fatal).
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Session subprocess plumbing failed.
    #[error("session error: {0}")]
    Session(#[from] session::SessionError),

    /// Evidence curation failed.
    #[error("evidence error: {0}")]
    Evidence(#[from] crate::evidence::EvidenceError),

    /// Configuration problem (fatal at startup).
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Git failure outside the tolerated commit path.
    #[error("git error: {0}")]
    Git(#[from] GitError),

    /// Unsafe path rejected.
    #[error("path error: {0}")]
    Path(#[from] PathError),
}

/// Shared execution context for a run.
///
/// Built once at startup from config, CLI flags, and environment, then
/// threaded through the scheduler and FSM.
#[derive(Debug, Clone)]
pub struct EngineContext<'a> {
    pub paths: &'a ConveyorPaths,
    pub config: &'a OrchestratorConfig,
    pub env: &'a Env,
    /// Resolved executor command template (provider override applied).
    pub command_template: String,
    /// Effective run mode after the full-autonomy env gate.
    pub mode: AutonomyMode,
    pub run_id: String,
    pub dry_run: bool,
    /// Whether atomic completion commits are enabled.
    pub commit: bool,
    pub allow_dirty: bool,
    pub output: OutputMode,
    /// Stop after this many plans (0 = unbounded).
    pub max_plans: usize,
    pub skip_promotion: bool,
    /// Concurrent plan budget (1 = sequential).
    pub parallel_plans: usize,
    /// Restrict execution to one plan (`--plan-id`).
    pub plan_filter: Option<crate::core::types::PlanId>,
}
