//! engine::parallel
//!
//! Parallel plan dispatch over isolated git worktrees.
//!
//! # Model
//!
//! The scheduler hands over a wave of dependency-satisfied plans.
//! Partitioning keeps the wave safe: no two plans in a wave share a
//! `Concurrency-Locks` name, so lock-sharing plans serialize across
//! waves. Each plan runs its FSM on its own thread against a dedicated
//! worktree on branch `<branchPrefix><plan-id>`; merging those branches
//! back is the operator's (or a future plan's) business.
//!
//! Threads work on a clone of the run state and never persist it
//! themselves; after the wave joins, each clone's per-plan entries,
//! terminal marks, and counter deltas are folded into the master state,
//! which is then persisted once. The shared event log accepts appends
//! from all threads (one line per append).
//!
//! Without a git repository there is nothing to isolate with, so the
//! wave degrades to sequential execution in the main tree.

use std::collections::BTreeSet;

use crate::core::paths::ConveyorPaths;
use crate::core::types::PlanId;
use crate::git::Repo;
use crate::plan::catalog::{Catalog, Plan};
use crate::plan::store::PlanStore;
use crate::state::run_state::{RunState, StateStore, Stats};

use super::fsm::{self, PlanOutcome, PlanResources};
use super::{EngineContext, EngineError};

/// Select a lock-disjoint prefix of the executable set, bounded by the
/// parallel budget. Order is preserved.
pub fn partition_wave(executable: &[Plan], max: usize) -> Vec<Plan> {
    let mut taken_locks: BTreeSet<String> = BTreeSet::new();
    let mut wave = Vec::new();
    for plan in executable {
        if wave.len() >= max {
            break;
        }
        let locks = &plan.metadata.concurrency_locks;
        if locks.iter().any(|lock| taken_locks.contains(lock)) {
            continue;
        }
        taken_locks.extend(locks.iter().cloned());
        wave.push(plan.clone());
    }
    wave
}

/// Execute one wave of plans concurrently.
pub fn execute_wave(
    ctx: &EngineContext<'_>,
    wave: &[Plan],
    state: &mut RunState,
    resources: &PlanResources<'_>,
) -> Result<Vec<(PlanId, PlanOutcome)>, EngineError> {
    if wave.len() <= 1 {
        return execute_sequentially(ctx, wave, state, resources);
    }
    let Some(repo) = Repo::try_open(ctx.paths.repo_root()) else {
        return execute_sequentially(ctx, wave, state, resources);
    };

    // Prepare a worktree per plan before any thread starts.
    let worktree_root = ctx
        .paths
        .repo_root()
        .join(&ctx.config.parallel.worktree_root);
    for plan in wave {
        let path = worktree_root.join(plan.id.as_str());
        if path.exists() {
            continue; // prior run left it behind; reuse
        }
        let branch = format!("{}{}", ctx.config.parallel.branch_prefix, plan.id);
        repo.add_worktree(plan.id.as_str(), &path, &branch)?;
    }

    let baseline = state.stats;
    let mut joined: Vec<(PlanId, Result<PlanOutcome, EngineError>, RunState)> = Vec::new();

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for plan in wave {
            let thread_state = state.clone();
            let worktree = worktree_root.join(plan.id.as_str());
            handles.push(scope.spawn(move || {
                let result = run_in_worktree(ctx, plan, worktree, thread_state);
                (plan.id.clone(), result.0, result.1)
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(entry) => joined.push(entry),
                Err(_) => {
                    // A panicked worker loses its state delta; the plan
                    // stays unsettled and is retried on resume.
                }
            }
        }
    });

    let mut outcomes = Vec::new();
    for (plan_id, result, thread_state) in joined {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => PlanOutcome::Failed {
                reason: format!("parallel execution error: {err}"),
            },
        };
        merge_thread_state(state, &thread_state, &plan_id, &outcome, baseline);
        outcomes.push((plan_id, outcome));
    }
    resources.state_store.save(state)?;
    Ok(outcomes)
}

type ThreadResult = (Result<PlanOutcome, EngineError>, RunState);

fn run_in_worktree(
    ctx: &EngineContext<'_>,
    plan: &Plan,
    worktree: std::path::PathBuf,
    mut thread_state: RunState,
) -> ThreadResult {
    let wt_paths = ConveyorPaths::new(worktree);
    let thread_ctx = EngineContext {
        paths: &wt_paths,
        config: ctx.config,
        env: ctx.env,
        command_template: ctx.command_template.clone(),
        mode: ctx.mode,
        run_id: ctx.run_id.clone(),
        dry_run: ctx.dry_run,
        commit: ctx.commit,
        allow_dirty: ctx.allow_dirty,
        output: ctx.output,
        max_plans: ctx.max_plans,
        skip_promotion: ctx.skip_promotion,
        parallel_plans: 1,
        plan_filter: ctx.plan_filter.clone(),
    };

    let catalog = match Catalog::load(&wt_paths) {
        Ok(catalog) => catalog,
        Err(err) => return (Err(err.into()), thread_state),
    };
    let Some(wt_plan) = catalog.get(&plan.id).cloned() else {
        return (
            Ok(PlanOutcome::Failed {
                reason: "plan missing from worktree catalog".to_string(),
            }),
            thread_state,
        );
    };

    let store = PlanStore::new(&wt_paths, ctx.dry_run);
    // Threads never persist run state; the master merges and saves.
    let state_store = StateStore::new(&wt_paths, true);
    let events = crate::state::events::EventLog::new(ctx.paths, ctx.dry_run);
    let thread_resources = PlanResources {
        store: &store,
        state_store: &state_store,
        events: &events,
    };

    let outcome = fsm::execute_plan(
        &thread_ctx,
        &wt_plan,
        &catalog,
        &mut thread_state,
        &thread_resources,
    );
    (outcome, thread_state)
}

/// Fold one worker's state back into the master.
fn merge_thread_state(
    master: &mut RunState,
    thread_state: &RunState,
    plan_id: &PlanId,
    outcome: &PlanOutcome,
    baseline: Stats,
) {
    if let Some(entry) = thread_state.role_state.get(plan_id) {
        master.role_state.insert(plan_id.clone(), entry.clone());
    }
    if let Some(entry) = thread_state.validation_state.get(plan_id) {
        master
            .validation_state
            .insert(plan_id.clone(), entry.clone());
    }
    if let Some(entry) = thread_state.evidence_state.get(plan_id) {
        master.evidence_state.insert(plan_id.clone(), entry.clone());
    }

    match outcome {
        PlanOutcome::Completed => master.mark_completed(plan_id),
        PlanOutcome::Blocked { .. } => master.mark_blocked(plan_id),
        PlanOutcome::Failed { .. } => master.mark_failed(plan_id),
        PlanOutcome::Pending { .. } => {}
    }

    let stats = &thread_state.stats;
    master.stats.handoffs += stats.handoffs.saturating_sub(baseline.handoffs);
    master.stats.validation_failures += stats
        .validation_failures
        .saturating_sub(baseline.validation_failures);
    master.stats.commits += stats.commits.saturating_sub(baseline.commits);
    master.stats.promotions += stats.promotions.saturating_sub(baseline.promotions);
}

fn execute_sequentially(
    ctx: &EngineContext<'_>,
    wave: &[Plan],
    state: &mut RunState,
    resources: &PlanResources<'_>,
) -> Result<Vec<(PlanId, PlanOutcome)>, EngineError> {
    let catalog = Catalog::load(ctx.paths)?;
    let mut outcomes = Vec::new();
    for plan in wave {
        let outcome = fsm::execute_plan(ctx, plan, &catalog, state, resources)?;
        outcomes.push((plan.id.clone(), outcome));
    }
    Ok(outcomes)
}
