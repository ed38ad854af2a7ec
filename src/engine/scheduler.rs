//! engine::scheduler
//!
//! The scheduler loop: promote, pick, drive, aggregate.
//!
//! # Ordering rules
//!
//! 1. Recompute the catalog and reconcile cumulative sets.
//! 2. Build the executable set: active plans in an executable status,
//!    not settled or deferred this run, with every dependency completed.
//! 3. Sort by priority (`p0` first) then path, for determinism.
//! 4. Emit `plan_waiting_dependency` once per distinct missing-set key.
//! 5. Pop the head and run the per-plan FSM; update sets; persist.
//! 6. Stop when the executable set is empty or `--max-plans` is hit.
//! 7. Unless `--skip-promotion`, promote all eligible futures after the
//!    main loop and re-enter it once more.
//!
//! A dependency cycle needs no special detection: it yields an empty
//! executable set with a non-empty waiting set, per-plan
//! `plan_waiting_dependency` events, and clean termination.

use std::collections::BTreeSet;

use chrono::Utc;
use serde_json::json;

use crate::core::types::{PlanId, PlanStatus};
use crate::plan::catalog::{Catalog, Plan};
use crate::state::events::EventKind;
use crate::state::run_state::RunState;
use crate::ui::output;

use super::fsm::{self, PlanOutcome, PlanResources};
use super::{parallel, EngineContext, EngineError};

/// Aggregated results of one scheduler run.
#[derive(Debug, Default)]
pub struct SchedulerReport {
    pub executed: Vec<(PlanId, PlanOutcome)>,
    pub promoted: Vec<PlanId>,
}

impl SchedulerReport {
    pub fn count(&self, label: &str) -> usize {
        self.executed
            .iter()
            .filter(|(_, outcome)| outcome.label() == label)
            .count()
    }
}

/// Statuses from which a plan may be picked up.
fn executable_status(status: PlanStatus) -> bool {
    matches!(
        status,
        PlanStatus::Queued | PlanStatus::InProgress | PlanStatus::Validation
    )
}

/// Run the scheduler to completion.
pub fn run_scheduler(
    ctx: &EngineContext<'_>,
    state: &mut RunState,
    resources: &PlanResources<'_>,
) -> Result<SchedulerReport, EngineError> {
    let mut report = SchedulerReport::default();
    // Plans that returned Pending this run; retried on resume, not now.
    let mut deferred: BTreeSet<PlanId> = BTreeSet::new();
    // One waiting event per distinct unsatisfied-dependency set.
    let mut waiting_emitted: BTreeSet<String> = BTreeSet::new();

    drive_loop(ctx, state, resources, &mut report, &mut deferred, &mut waiting_emitted)?;

    if !ctx.skip_promotion {
        promote_futures(ctx, state, resources, &mut report)?;
        if !report.promoted.is_empty() {
            drive_loop(ctx, state, resources, &mut report, &mut deferred, &mut waiting_emitted)?;
        }
    }

    Ok(report)
}

fn drive_loop(
    ctx: &EngineContext<'_>,
    state: &mut RunState,
    resources: &PlanResources<'_>,
    report: &mut SchedulerReport,
    deferred: &mut BTreeSet<PlanId>,
    waiting_emitted: &mut BTreeSet<String>,
) -> Result<(), EngineError> {
    loop {
        if ctx.max_plans > 0 && report.executed.len() >= ctx.max_plans {
            output::print(ctx.output, format!("max-plans reached ({})", ctx.max_plans));
            return Ok(());
        }

        let catalog = Catalog::load(ctx.paths)?;
        reconcile(state, &catalog);

        let mut executable = executable_set(&catalog, state, deferred);
        if let Some(filter) = &ctx.plan_filter {
            executable.retain(|plan| &plan.id == filter);
        }
        emit_waiting_events(ctx, resources, &catalog, state, deferred, waiting_emitted)?;

        if executable.is_empty() {
            return Ok(());
        }

        state.queue = executable.iter().map(|plan| plan.id.clone()).collect();
        resources.state_store.save(state)?;

        if ctx.parallel_plans > 1 {
            let wave = parallel::partition_wave(&executable, ctx.parallel_plans);
            let outcomes = parallel::execute_wave(ctx, &wave, state, resources)?;
            for (plan_id, outcome) in outcomes {
                if matches!(outcome, PlanOutcome::Pending { .. }) {
                    deferred.insert(plan_id.clone());
                }
                report.executed.push((plan_id, outcome));
            }
        } else {
            let plan = executable[0].clone();
            let outcome = fsm::execute_plan(ctx, &plan, &catalog, state, resources)?;
            if matches!(outcome, PlanOutcome::Pending { .. }) {
                deferred.insert(plan.id.clone());
            }
            report.executed.push((plan.id, outcome));
        }

        state.touch(Utc::now());
        resources.state_store.save(state)?;
    }
}

/// Fold on-disk completion into the cumulative sets.
fn reconcile(state: &mut RunState, catalog: &Catalog) {
    for plan in &catalog.completed {
        state.mark_completed(&plan.id);
    }
}

/// Deterministic executable set: filter, then priority + path order.
fn executable_set(
    catalog: &Catalog,
    state: &RunState,
    deferred: &BTreeSet<PlanId>,
) -> Vec<Plan> {
    let mut executable: Vec<Plan> = catalog
        .active
        .iter()
        .filter(|plan| executable_status(plan.metadata.status))
        .filter(|plan| !state.is_settled(&plan.id))
        .filter(|plan| !deferred.contains(&plan.id))
        .filter(|plan| {
            plan.metadata
                .dependencies
                .iter()
                .all(|dep| state.completed_plan_ids.contains(dep))
        })
        .cloned()
        .collect();
    executable.sort_by(|a, b| {
        a.metadata
            .priority
            .cmp(&b.metadata.priority)
            .then_with(|| a.path.cmp(&b.path))
    });
    executable
}

/// Emit `plan_waiting_dependency` once per distinct missing set.
fn emit_waiting_events(
    ctx: &EngineContext<'_>,
    resources: &PlanResources<'_>,
    catalog: &Catalog,
    state: &RunState,
    deferred: &BTreeSet<PlanId>,
    waiting_emitted: &mut BTreeSet<String>,
) -> Result<(), EngineError> {
    for plan in &catalog.active {
        if !executable_status(plan.metadata.status)
            || state.is_settled(&plan.id)
            || deferred.contains(&plan.id)
        {
            continue;
        }
        let missing: Vec<&PlanId> = plan
            .metadata
            .dependencies
            .iter()
            .filter(|dep| !state.completed_plan_ids.contains(*dep))
            .collect();
        if missing.is_empty() {
            continue;
        }
        let missing_ids: Vec<String> = missing.iter().map(|id| id.to_string()).collect();
        let key = format!("{}:{}", plan.id, missing_ids.join(","));
        if !waiting_emitted.insert(key) {
            continue;
        }
        resources.events.append(
            crate::state::events::Event::new(
                EventKind::PlanWaitingDependency,
                ctx.run_id.clone(),
                ctx.mode,
                Utc::now(),
            )
            .task(&plan.id)
            .details(json!({ "missing": missing_ids })),
        )?;
        output::print(
            ctx.output,
            format!("waiting: {} (missing {})", plan.id, missing_ids.join(", ")),
        );
    }
    Ok(())
}

/// Promote all eligible futures.
fn promote_futures(
    ctx: &EngineContext<'_>,
    state: &mut RunState,
    resources: &PlanResources<'_>,
    report: &mut SchedulerReport,
) -> Result<(), EngineError> {
    let catalog = Catalog::load(ctx.paths)?;
    for plan in &catalog.future {
        if plan.metadata.status != PlanStatus::ReadyForPromotion {
            continue;
        }
        match resources.store.promote(plan, &catalog, Utc::now()) {
            Ok(target) => {
                state.stats.promotions += 1;
                report.promoted.push(plan.id.clone());
                resources.events.append(
                    crate::state::events::Event::new(
                        EventKind::PlanPromoted,
                        ctx.run_id.clone(),
                        ctx.mode,
                        Utc::now(),
                    )
                    .task(&plan.id)
                    .details(json!({ "target": target.display().to_string() })),
                )?;
                output::print(ctx.output, format!("promoted: {}", plan.id));
            }
            Err(crate::plan::store::StoreError::AlreadyActive { plan_id }) => {
                output::warn(
                    ctx.output,
                    format!("promotion skipped, id already active: {plan_id}"),
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
    state.touch(Utc::now());
    resources.state_store.save(state)?;
    Ok(())
}
