//! engine::pipeline
//!
//! Role pipeline state: per-risk stage derivation, advancement,
//! stage reuse, and the completion-gate rewind.
//!
//! # Architecture
//!
//! A plan's pipeline is the ordered role sequence for its effective
//! risk tier. Pipeline state lives in run state keyed by plan id, so a
//! resumed run re-enters the same stage. Three rules shape re-entry:
//!
//! - **Reset on pipeline change**: a different `stage_key` (the tier
//!   moved enough to swap pipelines) resets the cursor to stage 0.
//! - **Stage reuse**: completed `planner`/`explorer` stages are skipped
//!   when the stage key and the plan scope (dependencies, spec-targets,
//!   tags) are unchanged since their completion.
//! - **Rewind**: when the full pipeline ran but the document is not yet
//!   `completed`, the cursor rewinds to the `worker` stage and loops.

use chrono::{DateTime, Utc};

use crate::config::model::PipelinesConfig;
use crate::core::types::{RiskTier, Role};
use crate::state::run_state::RoleState;

use super::risk::RiskAssessment;

/// Joined stage names; the pipeline identity.
pub fn stage_key(stages: &[Role]) -> String {
    stages
        .iter()
        .map(Role::as_str)
        .collect::<Vec<_>>()
        .join(">")
}

/// Resolve the role sequence for a tier.
///
/// With role orchestration disabled every plan runs a single worker
/// stage.
pub fn resolve_stages(pipelines: &PipelinesConfig, enabled: bool, tier: RiskTier) -> Vec<Role> {
    if !enabled {
        return vec![Role::Worker];
    }
    pipelines.for_tier(tier).to_vec()
}

/// Fresh pipeline state for a plan.
pub fn new_role_state(
    assessment: &RiskAssessment,
    stages: Vec<Role>,
    scope_key: String,
    now: DateTime<Utc>,
) -> RoleState {
    RoleState {
        stage_key: stage_key(&stages),
        stages,
        current_index: 0,
        completed_stages: Vec::new(),
        assessment: assessment.snapshot(),
        scope_key,
        updated_at: now.to_rfc3339(),
    }
}

/// Reconcile an existing pipeline state with the current assessment.
///
/// A changed stage key resets the pipeline to index 0 and forgets all
/// completions; otherwise only the assessment snapshot is refreshed.
pub fn sync(
    entry: &mut RoleState,
    assessment: &RiskAssessment,
    stages: Vec<Role>,
    now: DateTime<Utc>,
) {
    let key = stage_key(&stages);
    if entry.stage_key != key {
        entry.stages = stages;
        entry.stage_key = key;
        entry.current_index = 0;
        entry.completed_stages.clear();
    }
    entry.assessment = assessment.snapshot();
    entry.updated_at = now.to_rfc3339();
}

/// Skip previously-completed reusable stages at the cursor.
///
/// Reuse applies only while the plan scope is unchanged since the
/// stages completed. Returns the roles skipped.
pub fn apply_stage_reuse(entry: &mut RoleState, current_scope: &str) -> Vec<Role> {
    if entry.scope_key != current_scope {
        // Scope moved: earlier planner/explorer output no longer
        // describes this plan.
        entry
            .completed_stages
            .retain(|role| !role.reusable());
        return Vec::new();
    }

    let mut reused = Vec::new();
    while let Some(role) = entry.stages.get(entry.current_index).copied() {
        if role.reusable() && entry.completed_stages.contains(&role) {
            entry.current_index += 1;
            reused.push(role);
        } else {
            break;
        }
    }
    reused
}

/// The role at the cursor, or `None` when the pipeline is exhausted.
pub fn current_role(entry: &RoleState) -> Option<Role> {
    entry.stages.get(entry.current_index).copied()
}

/// Mark the cursor stage completed and advance.
pub fn advance(entry: &mut RoleState, scope_key: &str, now: DateTime<Utc>) {
    if let Some(role) = current_role(entry) {
        if !entry.completed_stages.contains(&role) {
            entry.completed_stages.push(role);
        }
        entry.current_index += 1;
    }
    entry.scope_key = scope_key.to_string();
    entry.updated_at = now.to_rfc3339();
}

/// Rewind the cursor to the worker stage for another completion loop.
///
/// Planner/explorer completions survive (they stay reusable); worker
/// and reviewer completions are forgotten.
pub fn rewind_to_worker(entry: &mut RoleState, now: DateTime<Utc>) {
    entry.current_index = entry
        .stages
        .iter()
        .position(|role| *role == Role::Worker)
        .unwrap_or(0);
    entry.completed_stages.retain(|role| role.reusable());
    entry.updated_at = now.to_rfc3339();
}

/// Whether every stage has run.
pub fn is_complete(entry: &RoleState) -> bool {
    entry.current_index >= entry.stages.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{ApprovalGatesConfig, RiskModelConfig};
    use crate::core::types::{PlanId, PlanPhase};
    use crate::engine::risk;
    use crate::plan::catalog::Plan;
    use crate::plan::metadata::PlanMetadata;
    use std::path::PathBuf;

    fn now() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    fn assessment_for(tier: &str) -> RiskAssessment {
        let metadata =
            PlanMetadata::parse(&format!("Status: queued\nRisk-Tier: {tier}\n")).unwrap();
        let plan = Plan {
            id: PlanId::new("test-plan").unwrap(),
            phase: PlanPhase::Active,
            path: PathBuf::from("x.md"),
            metadata,
        };
        risk::assess(
            &plan,
            &RiskModelConfig::default(),
            &ApprovalGatesConfig::default(),
            crate::core::types::AutonomyMode::Guarded,
            0,
        )
    }

    fn medium_state() -> RoleState {
        let assessment = assessment_for("medium");
        let stages = resolve_stages(&PipelinesConfig::default(), true, RiskTier::Medium);
        new_role_state(&assessment, stages, "scope-a".to_string(), now())
    }

    mod derivation {
        use super::*;

        #[test]
        fn stage_key_joins_roles() {
            assert_eq!(
                stage_key(&[Role::Planner, Role::Worker, Role::Reviewer]),
                "planner>worker>reviewer"
            );
        }

        #[test]
        fn disabled_orchestration_is_worker_only() {
            let stages = resolve_stages(&PipelinesConfig::default(), false, RiskTier::High);
            assert_eq!(stages, vec![Role::Worker]);
        }

        #[test]
        fn tiers_map_to_default_pipelines() {
            let pipelines = PipelinesConfig::default();
            assert_eq!(
                resolve_stages(&pipelines, true, RiskTier::Low),
                vec![Role::Worker]
            );
            assert_eq!(
                resolve_stages(&pipelines, true, RiskTier::High).len(),
                4
            );
        }
    }

    mod advancement {
        use super::*;

        #[test]
        fn advance_walks_the_pipeline() {
            let mut entry = medium_state();
            assert_eq!(current_role(&entry), Some(Role::Planner));
            advance(&mut entry, "scope-a", now());
            assert_eq!(current_role(&entry), Some(Role::Worker));
            advance(&mut entry, "scope-a", now());
            advance(&mut entry, "scope-a", now());
            assert!(is_complete(&entry));
            assert_eq!(current_role(&entry), None);
        }

        #[test]
        fn completed_stages_accumulate() {
            let mut entry = medium_state();
            advance(&mut entry, "scope-a", now());
            advance(&mut entry, "scope-a", now());
            assert_eq!(entry.completed_stages, vec![Role::Planner, Role::Worker]);
        }
    }

    mod reset {
        use super::*;

        #[test]
        fn changed_stage_key_resets_pipeline() {
            let mut entry = medium_state();
            advance(&mut entry, "scope-a", now());
            advance(&mut entry, "scope-a", now());

            // Tier moved to high: four-stage pipeline.
            let assessment = assessment_for("high");
            let stages = resolve_stages(&PipelinesConfig::default(), true, RiskTier::High);
            sync(&mut entry, &assessment, stages, now());

            assert_eq!(entry.current_index, 0);
            assert!(entry.completed_stages.is_empty());
            assert_eq!(entry.stage_key, "planner>explorer>worker>reviewer");
        }

        #[test]
        fn same_stage_key_keeps_cursor() {
            let mut entry = medium_state();
            advance(&mut entry, "scope-a", now());

            let assessment = assessment_for("medium");
            let stages = resolve_stages(&PipelinesConfig::default(), true, RiskTier::Medium);
            sync(&mut entry, &assessment, stages, now());

            assert_eq!(entry.current_index, 1);
            assert_eq!(entry.completed_stages, vec![Role::Planner]);
        }
    }

    mod reuse {
        use super::*;

        #[test]
        fn completed_planner_is_skipped_when_scope_unchanged() {
            let mut entry = medium_state();
            advance(&mut entry, "scope-a", now());
            // Simulate a resume starting from index 0 of the same pipeline.
            entry.current_index = 0;

            let reused = apply_stage_reuse(&mut entry, "scope-a");
            assert_eq!(reused, vec![Role::Planner]);
            assert_eq!(current_role(&entry), Some(Role::Worker));
        }

        #[test]
        fn scope_change_disables_reuse() {
            let mut entry = medium_state();
            advance(&mut entry, "scope-a", now());
            entry.current_index = 0;

            let reused = apply_stage_reuse(&mut entry, "scope-b");
            assert!(reused.is_empty());
            assert_eq!(current_role(&entry), Some(Role::Planner));
            // Stale planner completion was forgotten.
            assert!(entry.completed_stages.is_empty());
        }

        #[test]
        fn worker_is_never_reused() {
            let mut entry = medium_state();
            advance(&mut entry, "scope-a", now()); // planner
            advance(&mut entry, "scope-a", now()); // worker
            entry.current_index = 1;

            let reused = apply_stage_reuse(&mut entry, "scope-a");
            assert!(reused.is_empty());
            assert_eq!(current_role(&entry), Some(Role::Worker));
        }
    }

    mod rewind {
        use super::*;

        #[test]
        fn rewind_targets_worker_and_keeps_reusable_completions() {
            let mut entry = medium_state();
            advance(&mut entry, "scope-a", now()); // planner
            advance(&mut entry, "scope-a", now()); // worker
            advance(&mut entry, "scope-a", now()); // reviewer
            assert!(is_complete(&entry));

            rewind_to_worker(&mut entry, now());
            assert_eq!(current_role(&entry), Some(Role::Worker));
            assert_eq!(entry.completed_stages, vec![Role::Planner]);
        }

        #[test]
        fn rewind_on_worker_only_pipeline_hits_index_zero() {
            let assessment = assessment_for("low");
            let stages = resolve_stages(&PipelinesConfig::default(), true, RiskTier::Low);
            let mut entry = new_role_state(&assessment, stages, "scope".to_string(), now());
            advance(&mut entry, "scope", now());
            rewind_to_worker(&mut entry, now());
            assert_eq!(entry.current_index, 0);
        }
    }
}
