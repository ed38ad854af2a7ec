//! cli::commands::run
//!
//! The `run` and `resume` handlers.
//!
//! Both share the same startup path: load + override config, resolve
//! the effective mode, fail-closed assertions, acquire the run lock,
//! probe capabilities, then hand control to the scheduler. `resume`
//! differs only in where the run state comes from.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::cli::args::RunArgs;
use crate::cli::Globals;
use crate::config::{self, CliOverrides};
use crate::core::env::Env;
use crate::core::paths::ConveyorPaths;
use crate::core::types::{AutonomyMode, PlanId};
use crate::engine::capabilities;
use crate::engine::fsm::PlanResources;
use crate::engine::gate::resolve_effective_mode;
use crate::engine::scheduler::run_scheduler;
use crate::engine::EngineContext;
use crate::plan::store::PlanStore;
use crate::state::events::{Event, EventKind, EventLog};
use crate::state::lock::RunLock;
use crate::state::run_state::{RunState, StateStore};
use crate::ui::output::{self, OutputMode};

pub fn run(args: &RunArgs, globals: &Globals, resume: bool) -> Result<i32> {
    let root = globals.root()?;
    let paths = ConveyorPaths::new(root);
    let env = Env::from_process();

    let mut config = config::load(&paths)?;
    let overrides = CliOverrides {
        context_threshold: args.context_threshold,
        require_result_payload: args.require_result_payload,
        handoff_token_budget: args.handoff_token_budget,
        max_rollovers: args.max_rollovers,
        max_sessions_per_plan: args.max_sessions_per_plan,
        validation: args.validation.clone(),
        failure_tail_lines: args.failure_tail_lines,
        heartbeat_seconds: args.heartbeat_seconds,
        stall_warn_seconds: args.stall_warn_seconds,
        output: args
            .output
            .as_deref()
            .map(|raw| {
                OutputMode::parse(raw).ok_or_else(|| anyhow!("unknown output mode: {raw}"))
            })
            .transpose()?,
    };
    overrides.apply(&mut config);

    let output_mode = if globals.quiet {
        OutputMode::Minimal
    } else {
        config.logging.output
    };

    let requested = AutonomyMode::parse(&args.mode)
        .map_err(|err| anyhow!("invalid --mode: {err}"))?;
    let (effective, downgraded) = resolve_effective_mode(requested, &env);

    let commit = args.commit.unwrap_or(true);
    let allow_dirty = args.allow_dirty.unwrap_or(false);
    let dry_run = args.dry_run.unwrap_or(false);
    let skip_promotion = args.skip_promotion.unwrap_or(false);

    config::assert_runnable(&config, &env, allow_dirty, commit)?;
    let command_template = config::resolve_executor_command(&config, &env)?;

    let plan_filter = args
        .plan_id
        .as_deref()
        .map(PlanId::new)
        .transpose()
        .map_err(|err| anyhow!("invalid --plan-id: {err}"))?;

    let state_store = StateStore::new(&paths, dry_run);
    let now = Utc::now();

    let mut state = if resume {
        let mut state = state_store
            .load()?
            .ok_or_else(|| anyhow!("no run state to resume at {}", paths.run_state_path().display()))?;
        if let Some(requested_id) = &args.run_id {
            if requested_id != &state.run_id {
                bail!(
                    "run state belongs to '{}', not '{requested_id}'",
                    state.run_id
                );
            }
        }
        state.effective_mode = effective;
        state
    } else {
        let run_id = args
            .run_id
            .clone()
            .unwrap_or_else(|| generate_run_id(now));
        RunState::new(run_id, requested, effective, now)
    };
    let run_id = state.run_id.clone();

    // One run per repository root.
    let lock = RunLock::acquire(&paths, &run_id, effective, now, dry_run)?;

    let events = EventLog::new(&paths, dry_run);
    if downgraded {
        output::warn(
            output_mode,
            "full autonomy not approved (ORCH_ALLOW_FULL_AUTONOMY); running guarded",
        );
        events.append(
            Event::new(EventKind::RunModeDowngraded, run_id.clone(), effective, Utc::now())
                .details(json!({"requested": requested.as_str()})),
        )?;
    }

    state.capabilities = Some(capabilities::probe(&env, Utc::now()));
    state.touch(Utc::now());
    state_store.save(&state)?;

    events.append(
        Event::new(EventKind::RunStarted, run_id.clone(), effective, Utc::now()).details(json!({
            "resume": resume,
            "dryRun": dry_run,
            "parallelPlans": args.parallel_plans,
        })),
    )?;
    output::print(
        output_mode,
        format!("run {run_id} ({} mode{})", effective, if dry_run { ", dry-run" } else { "" }),
    );

    let store = PlanStore::new(&paths, dry_run);
    let resources = PlanResources {
        store: &store,
        state_store: &state_store,
        events: &events,
    };
    let ctx = EngineContext {
        paths: &paths,
        config: &config,
        env: &env,
        command_template,
        mode: effective,
        run_id: run_id.clone(),
        dry_run,
        commit,
        allow_dirty,
        output: output_mode,
        max_plans: args.max_plans,
        skip_promotion,
        parallel_plans: args.parallel_plans.max(1),
        plan_filter,
    };

    let report = run_scheduler(&ctx, &mut state, &resources)
        .context("scheduler run failed")?;

    events.append(
        Event::new(EventKind::RunFinished, run_id.clone(), effective, Utc::now()).details(json!({
            "executed": report.executed.len(),
            "completed": report.count("completed"),
            "blocked": report.count("blocked"),
            "failed": report.count("failed"),
            "pending": report.count("pending"),
            "promoted": report.promoted.len(),
        })),
    )?;

    if globals.json {
        let summary = json!({
            "runId": run_id,
            "mode": effective.as_str(),
            "dryRun": dry_run,
            "executed": report
                .executed
                .iter()
                .map(|(id, outcome)| json!({"planId": id.as_str(), "outcome": outcome.label()}))
                .collect::<Vec<_>>(),
            "promoted": report
                .promoted
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>(),
            "stats": {
                "promotions": state.stats.promotions,
                "handoffs": state.stats.handoffs,
                "validationFailures": state.stats.validation_failures,
                "commits": state.stats.commits,
            },
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        output::print(
            output_mode,
            format!(
                "run finished: {} executed ({} completed, {} blocked, {} failed, {} pending), {} promoted",
                report.executed.len(),
                report.count("completed"),
                report.count("blocked"),
                report.count("failed"),
                report.count("pending"),
                report.promoted.len()
            ),
        );
    }

    drop(lock);
    Ok(0)
}

fn generate_run_id(now: chrono::DateTime<Utc>) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("run-{}-{}", now.format("%Y%m%d"), &uuid[..8])
}
