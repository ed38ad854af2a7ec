//! engine::risk
//!
//! Risk scoring and effective-tier resolution.
//!
//! # Model
//!
//! The score is a weighted sum over declared tier, dependency count,
//! sensitive tag/path hits, full-autonomy mode, and prior validation
//! failures. Thresholds map the score to a computed tier, and the
//! effective tier is `max(declared, computed)` — scoring can raise a
//! plan's tier, never lower it.
//!
//! Scoring is pure and deterministic: the same plan, config, and run
//! history always produce the same assessment.

use crate::config::model::{ApprovalGatesConfig, RiskModelConfig};
use crate::core::types::{AutonomyMode, RiskTier};
use crate::plan::catalog::Plan;
use crate::state::run_state::AssessmentSnapshot;

/// The outcome of risk scoring for one plan.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub declared: RiskTier,
    pub computed: RiskTier,
    pub effective: RiskTier,
    pub score: u32,
    pub sensitive: bool,
    pub sensitive_tag_hits: u32,
    pub sensitive_path_hits: u32,
    pub reasons: Vec<String>,
    pub requires_security_approval: bool,
}

impl RiskAssessment {
    /// The serializable snapshot stored in run state.
    pub fn snapshot(&self) -> AssessmentSnapshot {
        AssessmentSnapshot {
            declared: self.declared,
            computed: self.computed,
            effective: self.effective,
            score: self.score,
            sensitive: self.sensitive,
            sensitive_tag_hits: self.sensitive_tag_hits,
            sensitive_path_hits: self.sensitive_path_hits,
            reasons: self.reasons.clone(),
        }
    }
}

/// Score a plan.
///
/// `prior_validation_failures` is the count of validation failures this
/// run has already recorded for the plan.
pub fn assess(
    plan: &Plan,
    model: &RiskModelConfig,
    gates: &ApprovalGatesConfig,
    mode: AutonomyMode,
    prior_validation_failures: u32,
) -> RiskAssessment {
    let weights = &model.weights;
    let mut score = 0u32;
    let mut reasons = Vec::new();

    let declared = plan.metadata.risk_tier;
    match declared {
        RiskTier::Medium => {
            score += weights.declared_medium;
            reasons.push(format!("declared tier medium (+{})", weights.declared_medium));
        }
        RiskTier::High => {
            score += weights.declared_high;
            reasons.push(format!("declared tier high (+{})", weights.declared_high));
        }
        RiskTier::Low => {}
    }

    let dependency_count = plan.metadata.dependencies.len() as u32;
    if dependency_count > 0 {
        let points = dependency_count * weights.dependency;
        score += points;
        reasons.push(format!("{dependency_count} dependencies (+{points})"));
    }

    let sensitive_tag_hits = plan
        .metadata
        .tags
        .iter()
        .filter(|tag| model.sensitive_tags.iter().any(|s| s.eq_ignore_ascii_case(tag)))
        .count() as u32;
    if sensitive_tag_hits > 0 {
        let points = sensitive_tag_hits * weights.sensitive_tag;
        score += points;
        reasons.push(format!("{sensitive_tag_hits} sensitive tags (+{points})"));
    }

    let sensitive_path_hits = plan
        .metadata
        .spec_targets
        .iter()
        .filter(|target| {
            model
                .sensitive_paths
                .iter()
                .any(|prefix| target.starts_with(prefix))
        })
        .count() as u32;
    if sensitive_path_hits > 0 {
        let points = sensitive_path_hits * weights.sensitive_path;
        score += points;
        reasons.push(format!("{sensitive_path_hits} sensitive paths (+{points})"));
    }

    if mode == AutonomyMode::Full {
        score += weights.autonomy_full;
        reasons.push(format!("full autonomy (+{})", weights.autonomy_full));
    }

    if prior_validation_failures > 0 {
        let points = prior_validation_failures * weights.validation_failure;
        score += points;
        reasons.push(format!(
            "{prior_validation_failures} prior validation failures (+{points})"
        ));
    }

    let computed = if score >= model.thresholds.high {
        RiskTier::High
    } else if score >= model.thresholds.medium {
        RiskTier::Medium
    } else {
        RiskTier::Low
    };
    let effective = declared.max(computed);

    let sensitive = sensitive_tag_hits > 0 || sensitive_path_hits > 0;
    let requires_security_approval = (effective == RiskTier::High
        && gates.require_security_ops_for_high)
        || (effective == RiskTier::Medium
            && sensitive
            && gates.require_security_ops_for_medium_if_sensitive);

    RiskAssessment {
        declared,
        computed,
        effective,
        score,
        sensitive,
        sensitive_tag_hits,
        sensitive_path_hits,
        reasons,
        requires_security_approval,
    }
}
