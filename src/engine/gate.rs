//! engine::gate
//!
//! Policy gating for plan execution.
//!
//! # Architecture
//!
//! Gating runs before every session dispatch. It checks the plan's
//! autonomy policy against the run mode and the effective risk tier
//! against the environment approvals. A gate failure blocks the plan
//! with a persisted reason; the run continues with other plans.
//!
//! The run-level gate is separate: `--mode full` without
//! `ORCH_ALLOW_FULL_AUTONOMY=1` downgrades the whole run to `guarded`
//! at start instead of failing.
//!
//! # Invariants
//!
//! - Gating is deterministic given plan, assessment, mode, and env
//! - A blocked decision always carries an operator-readable reason

use crate::core::env::Env;
use crate::core::types::{AutonomyMode, RiskTier};
use crate::plan::catalog::Plan;

use super::risk::RiskAssessment;

/// The policy gate decision for one plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Dispatch may proceed.
    Allowed,
    /// The plan is blocked; the reason is persisted and reported.
    Blocked { reason: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

/// Resolve the run's effective mode.
///
/// `full` requires `ORCH_ALLOW_FULL_AUTONOMY=1`; otherwise the run is
/// downgraded to `guarded`. Returns the effective mode and whether a
/// downgrade happened.
pub fn resolve_effective_mode(requested: AutonomyMode, env: &Env) -> (AutonomyMode, bool) {
    match requested {
        AutonomyMode::Full if !env.allow_full_autonomy() => (AutonomyMode::Guarded, true),
        other => (other, false),
    }
}

/// Evaluate the per-plan policy gate.
pub fn evaluate(
    plan: &Plan,
    assessment: &RiskAssessment,
    mode: AutonomyMode,
    env: &Env,
) -> GateDecision {
    if !plan.metadata.autonomy_allowed.permits(mode) {
        return GateDecision::Blocked {
            reason: format!(
                "autonomy restriction: plan allows '{}' but run mode is '{}'",
                plan.metadata.autonomy_allowed, mode
            ),
        };
    }

    match assessment.effective {
        RiskTier::Medium if !env.approved_medium() => GateDecision::Blocked {
            reason: "medium risk tier requires ORCH_APPROVED_MEDIUM=1".to_string(),
        },
        RiskTier::High if !env.approved_high() => GateDecision::Blocked {
            reason: "high risk tier requires ORCH_APPROVED_HIGH=1".to_string(),
        },
        _ => GateDecision::Allowed,
    }
}
